//! Configuration module
//!
//! All settings come from environment variables (a `.env` file is honoured). Every field
//! has a default except the queue connection string, which is required when the Postgres
//! queue backend is selected.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::constants::{
    DEFAULT_DOC_TYPE, DEFAULT_MAX_UPLOAD_BYTES, DEFAULT_QUEUE_NAME, DEFAULT_UPLOAD_FIELD,
    MULTIPART_OVERHEAD_BYTES, PDF_MEDIA_TYPE,
};
use crate::storage_types::StorageBackend;

const SERVER_PORT: u16 = 8000;
const DB_MAX_CONNECTIONS: u32 = 10;
const DB_TIMEOUT_SECS: u64 = 30;
const REQUEST_TIMEOUT_SECS: u64 = 60;
const VISIBILITY_TIMEOUT_SECS: u64 = 300;
const MAX_DELIVERIES: u32 = 5;
const ENQUEUE_TIMEOUT_MS: u64 = 2000;
const ENQUEUE_MAX_ATTEMPTS: u32 = 3;
const ENQUEUE_BACKOFF_MS: u64 = 100;
const RECONCILE_INTERVAL_SECS: u64 = 60;
const WORKER_MAX_CONCURRENCY: usize = 4;
const WORKER_POLL_INTERVAL_MS: u64 = 1000;
const JOB_TIMEOUT_SECS: u64 = 240;

/// Which job queue implementation to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueBackend {
    /// Durable queue in a Postgres `jobs` table.
    Postgres,
    /// In-process queue; state is lost on restart. Development and tests only.
    Memory,
}

impl FromStr for QueueBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Ok(QueueBackend::Postgres),
            "memory" => Ok(QueueBackend::Memory),
            _ => Err(anyhow::anyhow!("Invalid queue backend: {}", s)),
        }
    }
}

/// Acceptance rules for one document type (`POST /uploads/{doc_type}`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocumentPolicy {
    pub doc_type: String,
    /// Name of the multipart field that carries the file.
    pub field_name: String,
    /// The only media type accepted, compared on its essence (no parameters).
    pub media_type: String,
    /// Extension appended to storage keys, without the dot.
    pub extension: String,
    pub max_bytes: usize,
}

impl Default for DocumentPolicy {
    fn default() -> Self {
        Self {
            doc_type: DEFAULT_DOC_TYPE.to_string(),
            field_name: DEFAULT_UPLOAD_FIELD.to_string(),
            media_type: PDF_MEDIA_TYPE.to_string(),
            extension: "pdf".to_string(),
            max_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

/// Process-level settings shared by the API and the worker.
#[derive(Clone, Debug)]
pub struct BaseConfig {
    pub server_port: u16,
    pub environment: String,
    pub service_name: String,
    pub cors_origins: Vec<String>,
    pub request_timeout_secs: u64,
}

impl Default for BaseConfig {
    fn default() -> Self {
        Self {
            server_port: SERVER_PORT,
            environment: "development".to_string(),
            service_name: "paperdrop".to_string(),
            cors_origins: vec!["*".to_string()],
            request_timeout_secs: REQUEST_TIMEOUT_SECS,
        }
    }
}

#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub local_path: String,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            local_path: "uploads".to_string(),
            s3_bucket: None,
            s3_region: None,
            s3_endpoint: None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct QueueConfig {
    pub backend: QueueBackend,
    pub url: Option<String>,
    pub name: String,
    pub db_max_connections: u32,
    pub db_timeout_secs: u64,
    pub visibility_timeout_secs: u64,
    pub max_deliveries: u32,
    pub enqueue_timeout_ms: u64,
    pub enqueue_max_attempts: u32,
    pub enqueue_backoff_ms: u64,
    pub orphan_ledger_path: String,
    /// 0 disables the periodic sweep.
    pub reconcile_interval_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::Postgres,
            url: None,
            name: DEFAULT_QUEUE_NAME.to_string(),
            db_max_connections: DB_MAX_CONNECTIONS,
            db_timeout_secs: DB_TIMEOUT_SECS,
            visibility_timeout_secs: VISIBILITY_TIMEOUT_SECS,
            max_deliveries: MAX_DELIVERIES,
            enqueue_timeout_ms: ENQUEUE_TIMEOUT_MS,
            enqueue_max_attempts: ENQUEUE_MAX_ATTEMPTS,
            enqueue_backoff_ms: ENQUEUE_BACKOFF_MS,
            orphan_ledger_path: "uploads/.orphans".to_string(),
            reconcile_interval_secs: RECONCILE_INTERVAL_SECS,
        }
    }
}

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    pub max_concurrency: usize,
    pub poll_interval_ms: u64,
    pub job_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: WORKER_MAX_CONCURRENCY,
            poll_interval_ms: WORKER_POLL_INTERVAL_MS,
            job_timeout_secs: JOB_TIMEOUT_SECS,
        }
    }
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub base: BaseConfig,
    pub policies: Vec<DocumentPolicy>,
    pub storage: StorageConfig,
    pub queue: QueueConfig,
    pub worker: WorkerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base: BaseConfig::default(),
            policies: vec![DocumentPolicy::default()],
            storage: StorageConfig::default(),
            queue: QueueConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

/// Read `key`, falling back to `default` when unset or blank. A value that does not parse
/// is an error rather than a silent default.
fn env_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_opt(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{} has an invalid value '{}': {}", key, raw, e)),
        None => Ok(default),
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let cors_origins = env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let base = BaseConfig {
            server_port: env::var("PORT")
                .unwrap_or_else(|_| SERVER_PORT.to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number"))?,
            environment,
            service_name: env::var("SERVICE_NAME").unwrap_or_else(|_| "paperdrop".to_string()),
            cors_origins,
            request_timeout_secs: env_or("REQUEST_TIMEOUT_SECS", REQUEST_TIMEOUT_SECS)?,
        };

        let policy = DocumentPolicy {
            doc_type: env::var("DOC_TYPE")
                .unwrap_or_else(|_| DEFAULT_DOC_TYPE.to_string())
                .trim()
                .to_lowercase(),
            field_name: env::var("UPLOAD_FIELD_NAME")
                .unwrap_or_else(|_| DEFAULT_UPLOAD_FIELD.to_string()),
            media_type: env::var("ACCEPTED_MEDIA_TYPE")
                .unwrap_or_else(|_| PDF_MEDIA_TYPE.to_string())
                .trim()
                .to_lowercase(),
            extension: env::var("STORAGE_EXTENSION").unwrap_or_else(|_| "pdf".to_string()),
            max_bytes: env_or("MAX_UPLOAD_BYTES", DEFAULT_MAX_UPLOAD_BYTES)?,
        };

        let storage = StorageConfig {
            backend: env::var("STORAGE_BACKEND")
                .unwrap_or_else(|_| "local".to_string())
                .parse()?,
            local_path: env::var("LOCAL_STORAGE_PATH").unwrap_or_else(|_| "uploads".to_string()),
            s3_bucket: env_opt("S3_BUCKET"),
            s3_region: env_opt("S3_REGION").or_else(|| env_opt("AWS_REGION")),
            s3_endpoint: env_opt("S3_ENDPOINT"),
        };

        let queue = QueueConfig {
            backend: env::var("QUEUE_BACKEND")
                .unwrap_or_else(|_| "postgres".to_string())
                .parse()?,
            url: env_opt("QUEUE_URL").or_else(|| env_opt("DATABASE_URL")),
            name: env::var("QUEUE_NAME").unwrap_or_else(|_| DEFAULT_QUEUE_NAME.to_string()),
            db_max_connections: env_or("DB_MAX_CONNECTIONS", DB_MAX_CONNECTIONS)?,
            db_timeout_secs: env_or("DB_TIMEOUT_SECONDS", DB_TIMEOUT_SECS)?,
            visibility_timeout_secs: env_or("VISIBILITY_TIMEOUT_SECS", VISIBILITY_TIMEOUT_SECS)?,
            max_deliveries: env_or("MAX_DELIVERIES", MAX_DELIVERIES)?,
            enqueue_timeout_ms: env_or("ENQUEUE_TIMEOUT_MS", ENQUEUE_TIMEOUT_MS)?,
            enqueue_max_attempts: env_or("ENQUEUE_MAX_ATTEMPTS", ENQUEUE_MAX_ATTEMPTS)?,
            enqueue_backoff_ms: env_or("ENQUEUE_BACKOFF_MS", ENQUEUE_BACKOFF_MS)?,
            orphan_ledger_path: env::var("ORPHAN_LEDGER_PATH")
                .unwrap_or_else(|_| format!("{}/.orphans", storage.local_path)),
            reconcile_interval_secs: env_or("RECONCILE_INTERVAL_SECS", RECONCILE_INTERVAL_SECS)?,
        };

        let worker = WorkerConfig {
            max_concurrency: env_or("WORKER_MAX_CONCURRENCY", WORKER_MAX_CONCURRENCY)?,
            poll_interval_ms: env_or("WORKER_POLL_INTERVAL_MS", WORKER_POLL_INTERVAL_MS)?,
            job_timeout_secs: env_or("JOB_TIMEOUT_SECS", JOB_TIMEOUT_SECS)?,
        };

        Ok(Config {
            base,
            policies: vec![policy],
            storage,
            queue,
            worker,
        })
    }

    /// Fail fast on settings that would make the pipeline unsafe or unusable.
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.is_production() && self.base.cors_origins.iter().any(|o| o == "*") {
            return Err(anyhow::anyhow!(
                "CORS_ORIGINS cannot be '*' in production. Please specify explicit origins."
            ));
        }

        if self.policies.is_empty() {
            return Err(anyhow::anyhow!("At least one document policy is required"));
        }
        for policy in &self.policies {
            if policy.max_bytes == 0 {
                return Err(anyhow::anyhow!(
                    "MAX_UPLOAD_BYTES must be greater than zero (doc type '{}')",
                    policy.doc_type
                ));
            }
            if policy.field_name.trim().is_empty() {
                return Err(anyhow::anyhow!("UPLOAD_FIELD_NAME must not be empty"));
            }
            if !policy.media_type.contains('/') {
                return Err(anyhow::anyhow!(
                    "ACCEPTED_MEDIA_TYPE '{}' is not a valid media type",
                    policy.media_type
                ));
            }
            let safe = |s: &str| {
                !s.is_empty()
                    && s.chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            };
            if !safe(&policy.doc_type) || !safe(&policy.extension) {
                return Err(anyhow::anyhow!(
                    "DOC_TYPE and STORAGE_EXTENSION may only contain [A-Za-z0-9_-]"
                ));
            }
        }

        if self.storage.backend == StorageBackend::S3 {
            if self.storage.s3_bucket.is_none() {
                return Err(anyhow::anyhow!(
                    "S3_BUCKET must be set when using S3 storage backend"
                ));
            }
            if self.storage.s3_region.is_none() {
                return Err(anyhow::anyhow!(
                    "S3_REGION or AWS_REGION must be set when using S3 storage backend"
                ));
            }
        }

        match self.queue.backend {
            QueueBackend::Postgres if self.queue.url.is_none() => {
                return Err(anyhow::anyhow!(
                    "QUEUE_URL (or DATABASE_URL) must be set when QUEUE_BACKEND=postgres"
                ));
            }
            QueueBackend::Memory if self.is_production() => {
                return Err(anyhow::anyhow!(
                    "QUEUE_BACKEND=memory is not durable and cannot be used in production"
                ));
            }
            _ => {}
        }

        if self.queue.enqueue_max_attempts == 0 {
            return Err(anyhow::anyhow!("ENQUEUE_MAX_ATTEMPTS must be at least 1"));
        }
        if self.queue.max_deliveries == 0 {
            return Err(anyhow::anyhow!("MAX_DELIVERIES must be at least 1"));
        }
        if self.queue.visibility_timeout_secs == 0 {
            return Err(anyhow::anyhow!("VISIBILITY_TIMEOUT_SECS must be at least 1"));
        }
        if self.worker.max_concurrency == 0 {
            return Err(anyhow::anyhow!("WORKER_MAX_CONCURRENCY must be at least 1"));
        }
        // A handler still running when its lease expires would be claimed a second time.
        if self.worker.job_timeout_secs >= self.queue.visibility_timeout_secs {
            return Err(anyhow::anyhow!(
                "JOB_TIMEOUT_SECS ({}) must be less than VISIBILITY_TIMEOUT_SECS ({})",
                self.worker.job_timeout_secs,
                self.queue.visibility_timeout_secs
            ));
        }

        Ok(())
    }

    pub fn is_production(&self) -> bool {
        let env = self.base.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn server_port(&self) -> u16 {
        self.base.server_port
    }

    pub fn environment(&self) -> &str {
        &self.base.environment
    }

    pub fn service_name(&self) -> &str {
        &self.base.service_name
    }

    pub fn cors_origins(&self) -> &[String] {
        &self.base.cors_origins
    }

    pub fn policy(&self, doc_type: &str) -> Option<&DocumentPolicy> {
        self.policies
            .iter()
            .find(|p| p.doc_type.eq_ignore_ascii_case(doc_type))
    }

    /// Largest accepted upload across all policies.
    pub fn max_upload_bytes(&self) -> usize {
        self.policies
            .iter()
            .map(|p| p.max_bytes)
            .max()
            .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES)
    }

    /// HTTP body limit: the largest upload plus room for multipart framing.
    pub fn body_limit_bytes(&self) -> usize {
        self.max_upload_bytes() + MULTIPART_OVERHEAD_BYTES
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.base.request_timeout_secs.max(1))
    }

    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.queue.enqueue_timeout_ms)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.queue.visibility_timeout_secs)
    }
}
