use crate::pipeline::router::RoutingTable;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use thiserror::Error;

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_EMBEDDING_BATCH_SIZE: usize = 96;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
    /// A `DOCSTAGE_ROUTE_*` variable named a stage that does not exist.
    #[error("Unknown route variable: {0}")]
    UnknownRoute(String),
    /// A route override named a discriminator the stage does not know.
    #[error("Unknown {stage} discriminator in route override: {discriminator}")]
    UnknownDiscriminator {
        /// Stage the override belongs to.
        stage: String,
        /// Offending discriminator.
        discriminator: String,
    },
    /// A stage/discriminator pair has neither an override nor a stage default.
    #[error("No route configured for {stage} '{discriminator}'")]
    MissingRoute {
        /// Stage missing a destination.
        stage: String,
        /// Discriminator missing a destination.
        discriminator: String,
    },
}

/// Where raw uploads are read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectStoreLocation {
    /// Local directory containing one sub-directory per bucket.
    Filesystem(PathBuf),
    /// HTTP endpoint serving `GET {base}/{bucket}/{key}`.
    Http(String),
}

/// Runtime configuration for the pipeline handlers.
///
/// Loaded once at startup and handed to [`crate::runtime::Runtime::from_config`]; nothing reads
/// the environment after that.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bucket holding uploaded files.
    pub bucket: String,
    /// Object store backend.
    pub object_store: ObjectStoreLocation,
    /// Base URL of the Qdrant instance; the `qdrant` target is unavailable without it.
    pub qdrant_url: Option<String>,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
    /// API key for the OpenAI-compatible embeddings endpoint.
    pub openai_api_key: Option<String>,
    /// Base URL of the OpenAI-compatible API.
    pub openai_base_url: String,
    /// Base URL of the Ollama runtime; the `ollama` provider is unavailable without it.
    pub ollama_url: Option<String>,
    /// Base URL of the document partitioning service used for pdf, pptx and docx.
    pub partition_url: Option<String>,
    /// Texts per embedding request unless a message overrides it.
    pub embedding_batch_size: usize,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
    /// Validated next-stage routes.
    pub routes: RoutingTable,
}

/// Read `.env` from the working directory or a parent into the process environment. Variables
/// already set are kept. Returns the file that was read.
pub fn load_dotenv() -> Option<PathBuf> {
    dotenvy::dotenv().ok()
}

impl Config {
    /// Load `.env` (when present) and then the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        load_dotenv();
        let config = Self::from_vars(env::vars())?;
        tracing::debug!(
            bucket = %config.bucket,
            object_store = ?config.object_store,
            qdrant_url = ?config.qdrant_url,
            server_port = ?config.server_port,
            embedding_batch_size = config.embedding_batch_size,
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Build configuration from explicit `(name, value)` pairs.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        let lookup = Lookup(&vars);

        let object_store = match (
            lookup.optional("OBJECT_STORE_URL"),
            lookup.optional("OBJECT_STORE_ROOT"),
        ) {
            (Some(url), _) => ObjectStoreLocation::Http(url.trim_end_matches('/').to_string()),
            (None, Some(root)) => ObjectStoreLocation::Filesystem(PathBuf::from(root)),
            (None, None) => {
                return Err(ConfigError::MissingVariable(
                    "OBJECT_STORE_ROOT or OBJECT_STORE_URL".into(),
                ));
            }
        };

        let embedding_batch_size = lookup
            .parsed::<usize>("EMBEDDING_BATCH_SIZE")?
            .unwrap_or(DEFAULT_EMBEDDING_BATCH_SIZE);
        if embedding_batch_size == 0 {
            return Err(ConfigError::InvalidValue("EMBEDDING_BATCH_SIZE".into()));
        }

        Ok(Self {
            bucket: lookup.required("DOCSTAGE_BUCKET")?,
            object_store,
            qdrant_url: lookup.optional("QDRANT_URL"),
            qdrant_api_key: lookup.optional("QDRANT_API_KEY"),
            openai_api_key: lookup.optional("OPENAI_API_KEY"),
            openai_base_url: lookup
                .optional("OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            ollama_url: lookup.optional("OLLAMA_URL"),
            partition_url: lookup.optional("PARTITION_URL"),
            embedding_batch_size,
            server_port: lookup.parsed("SERVER_PORT")?,
            routes: RoutingTable::from_vars(vars.iter())?,
        })
    }
}

struct Lookup<'a>(&'a HashMap<String, String>);

impl Lookup<'_> {
    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.optional(key)
            .ok_or_else(|| ConfigError::MissingVariable(key.to_string()))
    }

    fn optional(&self, key: &str) -> Option<String> {
        self.0
            .get(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn parsed<T: std::str::FromStr>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        self.optional(key)
            .map(|value| {
                value
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue(key.to_string()))
            })
            .transpose()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn base_vars() -> Vec<(&'static str, &'static str)> {
        vec![
            ("DOCSTAGE_BUCKET", "uploads"),
            ("OBJECT_STORE_ROOT", "/tmp/docstage"),
            ("DOCSTAGE_ROUTE_PARSE", "parse"),
            ("DOCSTAGE_ROUTE_CHUNK", "chunk"),
            ("DOCSTAGE_ROUTE_EMBED", "embed"),
            ("DOCSTAGE_ROUTE_STORE", "store"),
            ("DOCSTAGE_ROUTE_STATUS", "status"),
        ]
    }

    #[test]
    fn loads_defaults() {
        let config = Config::from_vars(base_vars()).unwrap();
        assert_eq!(config.bucket, "uploads");
        assert_eq!(
            config.object_store,
            ObjectStoreLocation::Filesystem(PathBuf::from("/tmp/docstage"))
        );
        assert_eq!(config.embedding_batch_size, 96);
        assert_eq!(config.openai_base_url, DEFAULT_OPENAI_BASE_URL);
        assert!(config.qdrant_url.is_none());
        assert_eq!(config.routes.status_queue().as_str(), "status");
    }

    #[test]
    fn object_store_url_wins_over_root() {
        let mut vars = base_vars();
        vars.push(("OBJECT_STORE_URL", "http://objects.local/"));
        let config = Config::from_vars(vars).unwrap();
        assert_eq!(
            config.object_store,
            ObjectStoreLocation::Http("http://objects.local".into())
        );
    }

    #[test]
    fn missing_bucket_is_reported() {
        let vars: Vec<_> = base_vars()
            .into_iter()
            .filter(|(key, _)| *key != "DOCSTAGE_BUCKET")
            .collect();
        let error = Config::from_vars(vars).unwrap_err();
        assert!(matches!(error, ConfigError::MissingVariable(ref key) if key == "DOCSTAGE_BUCKET"));
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let mut vars = base_vars();
        vars.push(("EMBEDDING_BATCH_SIZE", "zero"));
        assert!(matches!(
            Config::from_vars(vars).unwrap_err(),
            ConfigError::InvalidValue(_)
        ));

        let mut vars = base_vars();
        vars.push(("SERVER_PORT", "70000"));
        assert!(matches!(
            Config::from_vars(vars).unwrap_err(),
            ConfigError::InvalidValue(ref key) if key == "SERVER_PORT"
        ));
    }

    #[test]
    fn incomplete_routes_fail_at_startup() {
        let vars: Vec<_> = base_vars()
            .into_iter()
            .filter(|(key, _)| *key != "DOCSTAGE_ROUTE_EMBED")
            .collect();
        assert!(matches!(
            Config::from_vars(vars).unwrap_err(),
            ConfigError::MissingRoute { .. }
        ));
    }
}
