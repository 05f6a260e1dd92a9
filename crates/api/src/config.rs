use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use extract::{NodeLabel, PipelineConfig};
use index::Neo4jConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub neo4j: Neo4jSection,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub pipeline: PipelineSection,
    pub query: QueryConfig,
    pub server: ServerConfig,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Neo4jSection {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub database: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub base_url: String,
    pub extraction_model: String,
    pub query_model: String,
    /// Invalid-JSON repair attempts inside one extraction call.
    pub json_repairs: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub base_url: String,
    pub model: String,
    pub dimensions: usize,
    pub target_labels: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSection {
    pub data_file: PathBuf,
    pub output_dir: PathBuf,
    pub checkpoint_file: String,
    pub consolidated_file: String,
    pub batch_size: usize,
    pub failure_backoff_ms: u64,
    /// Tried in order when decoding the input table.
    pub input_encodings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    pub row_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Text,
    Json,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            neo4j: Neo4jSection {
                uri: "bolt://localhost:7687".to_string(),
                user: "neo4j".to_string(),
                password: String::new(),
                database: "neo4j".to_string(),
            },
            llm: LlmConfig {
                base_url: "http://localhost:11434".to_string(),
                extraction_model: "llama3".to_string(),
                query_model: "llama3".to_string(),
                json_repairs: 3,
            },
            embedding: EmbeddingConfig {
                base_url: "http://localhost:11434".to_string(),
                model: "nomic-embed-text".to_string(),
                dimensions: 1536,
                target_labels: vec!["Company".to_string(), "Content".to_string()],
            },
            pipeline: PipelineSection {
                data_file: PathBuf::from("data/esg_database.csv"),
                output_dir: PathBuf::from("output"),
                checkpoint_file: "checkpoint_graphs.json".to_string(),
                consolidated_file: "final_merged_graph_full.json".to_string(),
                batch_size: 5,
                failure_backoff_ms: 5000,
                input_encodings: vec!["utf-8".to_string(), "cp949".to_string()],
            },
            query: QueryConfig { row_limit: 50 },
            server: ServerConfig {
                bind_addr: "0.0.0.0:3000".to_string(),
            },
            log_format: LogFormat::Text,
        }
    }
}

impl AppConfig {
    /// Defaults overridden by the process environment, after loading `.env` if present.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each known variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(v) = var("NEO4J_URI") {
            config.neo4j.uri = v;
        }
        if let Some(v) = var("NEO4J_USER") {
            config.neo4j.user = v;
        }
        if let Some(v) = var("NEO4J_PASSWORD") {
            config.neo4j.password = v;
        }
        if let Some(v) = var("NEO4J_DATABASE") {
            config.neo4j.database = v;
        }

        if let Some(v) = var("LLM_BASE_URL") {
            config.llm.base_url = v;
        }
        if let Some(v) = var("EXTRACTION_MODEL") {
            config.llm.extraction_model = v;
        }
        if let Some(v) = var("QUERY_MODEL") {
            config.llm.query_model = v;
        }
        if let Some(v) = var("LLM_JSON_REPAIRS") {
            config.llm.json_repairs = parse("LLM_JSON_REPAIRS", &v)?;
        }

        if let Some(v) = var("EMBEDDING_BASE_URL") {
            config.embedding.base_url = v;
        }
        if let Some(v) = var("EMBEDDING_MODEL") {
            config.embedding.model = v;
        }
        if let Some(v) = var("EMBEDDING_DIMENSIONS") {
            config.embedding.dimensions = parse("EMBEDDING_DIMENSIONS", &v)?;
        }
        if let Some(v) = var("EMBEDDING_TARGET_LABELS") {
            config.embedding.target_labels = split_list(&v);
        }

        if let Some(v) = var("DATA_FILE_PATH") {
            config.pipeline.data_file = PathBuf::from(v);
        }
        if let Some(v) = var("OUTPUT_DIR") {
            config.pipeline.output_dir = PathBuf::from(v);
        }
        if let Some(v) = var("BATCH_SIZE") {
            config.pipeline.batch_size = parse("BATCH_SIZE", &v)?;
        }
        if let Some(v) = var("FAILURE_BACKOFF_MS") {
            config.pipeline.failure_backoff_ms = parse("FAILURE_BACKOFF_MS", &v)?;
        }
        if let Some(v) = var("INPUT_ENCODINGS") {
            config.pipeline.input_encodings = split_list(&v);
        }

        if let Some(v) = var("QUERY_ROW_LIMIT") {
            config.query.row_limit = parse("QUERY_ROW_LIMIT", &v)?;
        }
        if let Some(v) = var("BIND_ADDR") {
            config.server.bind_addr = v;
        }
        if let Some(v) = var("LOG_FORMAT") {
            config.log_format = if v.eq_ignore_ascii_case("json") {
                LogFormat::Json
            } else {
                LogFormat::Text
            };
        }

        // Fail at startup rather than at the first backfill.
        config.target_labels()?;
        Ok(config)
    }

    /// Copy safe to log: the password is masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if !copy.neo4j.password.is_empty() {
            copy.neo4j.password = "***".to_string();
        }
        copy
    }

    pub fn neo4j_config(&self) -> Neo4jConfig {
        Neo4jConfig {
            uri: self.neo4j.uri.clone(),
            user: self.neo4j.user.clone(),
            password: self.neo4j.password.clone(),
            database: self.neo4j.database.clone(),
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            batch_size: self.pipeline.batch_size,
            checkpoint_path: self.checkpoint_path(),
            output_path: self.consolidated_path(),
            failure_backoff: Duration::from_millis(self.pipeline.failure_backoff_ms),
        }
    }

    /// Directory holding the input table; request-supplied inputs must stay inside it.
    pub fn data_dir(&self) -> PathBuf {
        self.pipeline
            .data_file
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.pipeline.output_dir.join(&self.pipeline.checkpoint_file)
    }

    pub fn consolidated_path(&self) -> PathBuf {
        self.pipeline.output_dir.join(&self.pipeline.consolidated_file)
    }

    pub fn target_labels(&self) -> Result<Vec<NodeLabel>> {
        self.embedding
            .target_labels
            .iter()
            .map(|label| NodeLabel::from_str(label))
            .collect::<Result<Vec<_>>>()
            .context("Invalid EMBEDDING_TARGET_LABELS")
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse::<T>()
        .with_context(|| format!("{} must be a number, got {:?}", key, value))
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_environment() {
        let config = AppConfig::from_lookup(|_| None).unwrap();

        assert_eq!(config.neo4j.uri, "bolt://localhost:7687");
        assert_eq!(config.pipeline.batch_size, 5);
        assert_eq!(config.query.row_limit, 50);
        assert_eq!(config.data_dir(), PathBuf::from("data"));
        assert_eq!(config.checkpoint_path(), PathBuf::from("output/checkpoint_graphs.json"));
        assert_eq!(
            config.consolidated_path(),
            PathBuf::from("output/final_merged_graph_full.json")
        );
        assert_eq!(
            config.target_labels().unwrap(),
            vec![NodeLabel::Company, NodeLabel::Content]
        );
    }

    #[test]
    fn test_environment_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("NEO4J_PASSWORD", "secret"),
            ("BATCH_SIZE", "10"),
            ("INPUT_ENCODINGS", "cp949, utf-8"),
            ("EMBEDDING_TARGET_LABELS", "Company"),
            ("OUTPUT_DIR", "/tmp/esg"),
            ("LOG_FORMAT", "JSON"),
        ]))
        .unwrap();

        assert_eq!(config.pipeline.batch_size, 10);
        assert_eq!(config.pipeline.input_encodings, vec!["cp949", "utf-8"]);
        assert_eq!(config.target_labels().unwrap(), vec![NodeLabel::Company]);
        assert_eq!(config.pipeline_config().output_path, PathBuf::from("/tmp/esg/final_merged_graph_full.json"));
        assert_eq!(config.log_format, LogFormat::Json);

        assert_eq!(config.neo4j_config().password, "secret");
        assert_eq!(config.redacted().neo4j.password, "***");
    }

    #[test]
    fn test_bad_values_are_rejected() {
        assert!(AppConfig::from_lookup(lookup(&[("BATCH_SIZE", "five")])).is_err());
        assert!(AppConfig::from_lookup(lookup(&[("EMBEDDING_TARGET_LABELS", "Company,Planet")])).is_err());
    }
}
