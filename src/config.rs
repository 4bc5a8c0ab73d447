use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use homedir::my_home;
use serde::{Deserialize, Serialize};

use crate::semantic::{SearchStrategy, DEFAULT_MODEL};

const CONFIG_FILE: &str = "config.yaml";

/// Overrides the data directory (config, store files, model cache)
pub const BASE_PATH_ENV: &str = "INVOICE_RAG_BASE_PATH";

/// Default model download timeout in seconds
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;
const DEFAULT_TOP_K: usize = 5;
/// Number of invoices handed to the model as context when answering questions
const DEFAULT_CHAT_TOP_K: usize = 15;
const DEFAULT_LLM_MODEL: &str = "gemini-2.5-flash";
const DEFAULT_API_KEY_ENV: &str = "GEMINI_API_KEY";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
const ANALYSIS_MAX_THREADS: u16 = 4;
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model name for embeddings (e.g., "all-MiniLM-L6-v2")
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Timeout for model download in seconds
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    #[serde(default = "default_chat_top_k")]
    pub chat_top_k: usize,

    #[serde(default)]
    pub strategy: SearchStrategy,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_top_k: DEFAULT_TOP_K,
            chat_top_k: DEFAULT_CHAT_TOP_K,
            strategy: SearchStrategy::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_model")]
    pub model: String,

    /// Name of the environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_llm_model(),
            api_key_env: default_api_key_env(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Upper bound on invoices analyzed concurrently
    #[serde(default = "analysis_max_threads")]
    pub max_threads: u16,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_threads: ANALYSIS_MAX_THREADS,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_embedding_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_chat_top_k() -> usize {
    DEFAULT_CHAT_TOP_K
}

fn default_llm_model() -> String {
    DEFAULT_LLM_MODEL.to_string()
}

fn default_api_key_env() -> String {
    DEFAULT_API_KEY_ENV.to_string()
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn analysis_max_threads() -> u16 {
    ANALYSIS_MAX_THREADS
}

fn default_listen_addr() -> String {
    DEFAULT_LISTEN_ADDR.to_string()
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

/// `$INVOICE_RAG_BASE_PATH`, falling back to `~/.local/share/invoice-rag`.
pub fn default_base_path() -> anyhow::Result<PathBuf> {
    if let Ok(path) = std::env::var(BASE_PATH_ENV) {
        return Ok(PathBuf::from(path));
    }

    let home = my_home()
        .context("couldnt find home dir")?
        .context("couldnt find home dir")?;
    Ok(home.join(".local/share/invoice-rag"))
}

impl Config {
    fn validate(&self) -> anyhow::Result<()> {
        if self.embedding.model.trim().is_empty() {
            bail!("embedding.model must not be empty");
        }
        if self.embedding.download_timeout_secs == 0 {
            bail!("embedding.download_timeout_secs must be greater than 0");
        }
        if self.search.default_top_k == 0 {
            bail!("search.default_top_k must be greater than 0");
        }
        if self.search.chat_top_k == 0 {
            bail!("search.chat_top_k must be greater than 0");
        }
        if self.llm.model.trim().is_empty() {
            bail!("llm.model must not be empty");
        }
        if self.llm.api_key_env.trim().is_empty() {
            bail!("llm.api_key_env must not be empty");
        }
        if self.llm.request_timeout_secs == 0 {
            bail!("llm.request_timeout_secs must be greater than 0");
        }
        if self.analysis.max_threads == 0 {
            bail!("analysis.max_threads must be greater than 0");
        }
        if self.server.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            bail!(
                "server.listen_addr must be a socket address, got '{}'",
                self.server.listen_addr
            );
        }
        Ok(())
    }

    pub fn load() -> anyhow::Result<Self> {
        Self::load_with(&default_base_path()?)
    }

    pub fn load_with(base_path: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(base_path)
            .with_context(|| format!("failed to create {}", base_path.display()))?;
        let path = base_path.join(CONFIG_FILE);

        // create new if does not exist
        if !path.exists() {
            std::fs::write(&path, serde_yml::to_string(&Self::default())?)?;
        }

        let config_str = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut config: Self = serde_yml::from_str(&config_str)
            .with_context(|| format!("config {} is malformed", path.display()))?;

        config.base_path = base_path.to_path_buf();

        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_str = serde_yml::to_string(&self)?;
        std::fs::write(self.base_path.join(CONFIG_FILE), config_str)?;
        Ok(())
    }

    /// Directory holding config, store files and the model cache.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_creates_default_config() {
        let tmp = tempfile::tempdir().unwrap();
        let config = Config::load_with(tmp.path()).unwrap();

        assert!(tmp.path().join(CONFIG_FILE).exists());
        assert_eq!(config.embedding.model, "all-MiniLM-L6-v2");
        assert_eq!(config.search.default_top_k, 5);
        assert_eq!(config.search.chat_top_k, 15);
        assert_eq!(config.search.strategy, SearchStrategy::EphemeralIndex);
        assert_eq!(config.llm.api_key_env, "GEMINI_API_KEY");
        assert_eq!(config.analysis.max_threads, 4);
        assert_eq!(config.base_path(), tmp.path());
    }

    #[test]
    fn test_partial_config_is_filled_and_resaved() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join(CONFIG_FILE),
            "search:\n  strategy: linear_scan\n",
        )
        .unwrap();

        let config = Config::load_with(tmp.path()).unwrap();
        assert_eq!(config.search.strategy, SearchStrategy::LinearScan);
        assert_eq!(config.search.chat_top_k, 15);

        let saved = std::fs::read_to_string(tmp.path().join(CONFIG_FILE)).unwrap();
        assert!(saved.contains("chat_top_k"));
        assert!(saved.contains("linear_scan"));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join(CONFIG_FILE),
            "analysis:\n  max_threads: 0\n",
        )
        .unwrap();
        assert!(Config::load_with(tmp.path()).is_err());

        std::fs::write(
            tmp.path().join(CONFIG_FILE),
            "server:\n  listen_addr: not-an-address\n",
        )
        .unwrap();
        assert!(Config::load_with(tmp.path()).is_err());
    }

    #[test]
    fn test_malformed_yaml_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(CONFIG_FILE), "search: [1, 2").unwrap();
        assert!(Config::load_with(tmp.path()).is_err());
    }
}
