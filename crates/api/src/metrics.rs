use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use extract::PipelineReport;
use index::{BackfillReport, LoadResult};
use query::{AnswerOutcome, GatewayAnswer};

pub struct Metrics {
    // Extraction
    batches_extracted: AtomicUsize,
    batches_failed: AtomicUsize,

    // Load
    nodes_loaded: AtomicUsize,
    relationships_loaded: AtomicUsize,
    relationship_failures: AtomicUsize,
    failed_loads: AtomicUsize,

    // Backfill
    embeddings_written: AtomicUsize,
    embedding_failures: AtomicUsize,

    // Questions
    questions_answered: AtomicUsize,
    questions_unanswered: AtomicUsize,
    questions_failed: AtomicUsize,

    // Timing (in microseconds)
    total_extract_time_us: AtomicU64,
    total_load_time_us: AtomicU64,
    total_embed_time_us: AtomicU64,
    total_query_time_us: AtomicU64,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            batches_extracted: AtomicUsize::new(0),
            batches_failed: AtomicUsize::new(0),
            nodes_loaded: AtomicUsize::new(0),
            relationships_loaded: AtomicUsize::new(0),
            relationship_failures: AtomicUsize::new(0),
            failed_loads: AtomicUsize::new(0),
            embeddings_written: AtomicUsize::new(0),
            embedding_failures: AtomicUsize::new(0),
            questions_answered: AtomicUsize::new(0),
            questions_unanswered: AtomicUsize::new(0),
            questions_failed: AtomicUsize::new(0),
            total_extract_time_us: AtomicU64::new(0),
            total_load_time_us: AtomicU64::new(0),
            total_embed_time_us: AtomicU64::new(0),
            total_query_time_us: AtomicU64::new(0),
        })
    }

    pub fn record_extract(&self, duration: Duration, report: &PipelineReport) {
        add_micros(&self.total_extract_time_us, duration);
        self.batches_extracted.fetch_add(report.batches_extracted, Ordering::Relaxed);
        self.batches_failed.fetch_add(report.batches_failed, Ordering::Relaxed);
    }

    pub fn record_load(&self, duration: Duration, result: &LoadResult) {
        add_micros(&self.total_load_time_us, duration);
        if result.is_success() {
            self.nodes_loaded.fetch_add(result.node_count, Ordering::Relaxed);
            self.relationships_loaded.fetch_add(
                result.relationship_count.saturating_sub(result.failed_relationships),
                Ordering::Relaxed,
            );
        } else {
            self.failed_loads.fetch_add(1, Ordering::Relaxed);
        }
        self.relationship_failures.fetch_add(result.failed_relationships, Ordering::Relaxed);
    }

    pub fn record_embed(&self, duration: Duration, report: &BackfillReport) {
        add_micros(&self.total_embed_time_us, duration);
        self.embeddings_written.fetch_add(report.embedded(), Ordering::Relaxed);
        self.embedding_failures.fetch_add(report.failed(), Ordering::Relaxed);
    }

    pub fn record_question(&self, duration: Duration, answer: &GatewayAnswer) {
        add_micros(&self.total_query_time_us, duration);
        let counter = match answer.outcome {
            AnswerOutcome::Answered(_) => &self.questions_answered,
            AnswerOutcome::NoAnswer => &self.questions_unanswered,
            AnswerOutcome::Failed(_) => &self.questions_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let questions = self.questions_answered.load(Ordering::Relaxed)
            + self.questions_unanswered.load(Ordering::Relaxed)
            + self.questions_failed.load(Ordering::Relaxed);

        MetricsSnapshot {
            batches_extracted: self.batches_extracted.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            nodes_loaded: self.nodes_loaded.load(Ordering::Relaxed),
            relationships_loaded: self.relationships_loaded.load(Ordering::Relaxed),
            relationship_failures: self.relationship_failures.load(Ordering::Relaxed),
            failed_loads: self.failed_loads.load(Ordering::Relaxed),
            embeddings_written: self.embeddings_written.load(Ordering::Relaxed),
            embedding_failures: self.embedding_failures.load(Ordering::Relaxed),
            questions_answered: self.questions_answered.load(Ordering::Relaxed),
            questions_unanswered: self.questions_unanswered.load(Ordering::Relaxed),
            questions_failed: self.questions_failed.load(Ordering::Relaxed),
            total_extract_time_ms: to_ms(&self.total_extract_time_us),
            total_load_time_ms: to_ms(&self.total_load_time_us),
            total_embed_time_ms: to_ms(&self.total_embed_time_us),
            avg_query_time_ms: avg_time_ms(&self.total_query_time_us, questions),
        }
    }
}

fn add_micros(total: &AtomicU64, duration: Duration) {
    total.fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
}

fn to_ms(total_us: &AtomicU64) -> f64 {
    total_us.load(Ordering::Relaxed) as f64 / 1000.0
}

fn avg_time_ms(total_us: &AtomicU64, count: usize) -> f64 {
    if count > 0 {
        to_ms(total_us) / count as f64
    } else {
        0.0
    }
}

#[derive(Debug, Serialize)]
pub struct MetricsSnapshot {
    pub batches_extracted: usize,
    pub batches_failed: usize,
    pub nodes_loaded: usize,
    pub relationships_loaded: usize,
    pub relationship_failures: usize,
    pub failed_loads: usize,
    pub embeddings_written: usize,
    pub embedding_failures: usize,
    pub questions_answered: usize,
    pub questions_unanswered: usize,
    pub questions_failed: usize,
    pub total_extract_time_ms: f64,
    pub total_load_time_ms: f64,
    pub total_embed_time_ms: f64,
    pub avg_query_time_ms: f64,
}

pub struct TimedOperation {
    start: Instant,
}

impl TimedOperation {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
