pub mod config;
pub mod metrics;
pub mod routes;
pub mod services;
pub mod telemetry;

pub use config::{AppConfig, LogFormat};
pub use metrics::{Metrics, MetricsSnapshot, TimedOperation};
pub use routes::{AppState, build_router};
pub use services::{Collaborators, ExtractionBusy, HealthReport, Services, Stores};
pub use telemetry::init_tracing;
