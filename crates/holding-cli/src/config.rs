use holding_channels::{FanoutNotifier, LogNotifier, Notifier, TelegramNotifier};
use holding_core::HoldingResult;
use holding_pipeline::{AgentSeed, TenantSeed};
use holding_router::{CredentialSource, RouterConfig};
use holding_store::{MemoryStore, SqliteStore, Store};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Top-level `holding.toml`. Every section is optional.
#[derive(Debug, Clone, Deserialize)]
pub struct HoldingConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub tenants: Vec<TenantSeed>,
    #[serde(default)]
    pub agents: Vec<AgentSeed>,
    #[serde(default = "default_prompts_dir")]
    pub prompts_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file, or `:memory:`.
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotifyConfig {
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
}

/// Telegram alert channel. Token and chat id are read from the environment.
#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    #[serde(default = "default_token_env")]
    pub bot_token_env: String,
    #[serde(default = "default_chat_env")]
    pub chat_id_env: String,
    #[serde(default)]
    pub api_base: Option<String>,
}

fn default_db_path() -> String {
    "data/holding.db".to_string()
}
fn default_prompts_dir() -> PathBuf {
    PathBuf::from("prompts")
}
fn default_token_env() -> String {
    "TELEGRAM_BOT_TOKEN".to_string()
}
fn default_chat_env() -> String {
    "TELEGRAM_CHAT_ID".to_string()
}

impl Default for HoldingConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            router: RouterConfig::default(),
            notify: NotifyConfig::default(),
            tenants: Vec::new(),
            agents: Vec::new(),
            prompts_dir: default_prompts_dir(),
        }
    }
}

impl HoldingConfig {
    /// Parses TOML and resolves relative paths against `base_dir`.
    pub fn from_toml(text: &str, base_dir: &Path) -> anyhow::Result<Self> {
        let mut config: HoldingConfig = toml::from_str(text)?;
        if config.prompts_dir.is_relative() {
            config.prompts_dir = base_dir.join(&config.prompts_dir);
        }
        if config.database.path != ":memory:" && Path::new(&config.database.path).is_relative() {
            config.database.path = base_dir.join(&config.database.path).display().to_string();
        }
        Ok(config)
    }

    /// Loads `path`; a missing file yields the defaults.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        match tokio::fs::read_to_string(path).await {
            Ok(text) => Self::from_toml(&text, base_dir),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "Config file not found; using defaults");
                Self::from_toml("", base_dir)
            }
            Err(e) => Err(anyhow::anyhow!(
                "Failed to read config file '{}': {e}",
                path.display()
            )),
        }
    }

    /// Opens the configured store.
    pub fn open_store(&self) -> HoldingResult<Arc<dyn Store>> {
        if self.database.path == ":memory:" {
            info!("Using in-memory store");
            return Ok(Arc::new(MemoryStore::new()));
        }
        info!(path = %self.database.path, "Opening SQLite store");
        Ok(Arc::new(SqliteStore::open(&self.database.path)?))
    }

    /// Telegram channel, when configured and both values are set.
    pub fn telegram(&self, credentials: &dyn CredentialSource) -> Option<TelegramNotifier> {
        let telegram = self.notify.telegram.as_ref()?;
        match (
            credentials.get(&telegram.bot_token_env),
            credentials.get(&telegram.chat_id_env),
        ) {
            (Some(token), Some(chat_id)) => {
                let notifier = TelegramNotifier::new(token, chat_id);
                Some(match &telegram.api_base {
                    Some(base) => notifier.with_api_base(base),
                    None => notifier,
                })
            }
            _ => {
                warn!(
                    token_env = %telegram.bot_token_env,
                    chat_env = %telegram.chat_id_env,
                    "Telegram configured but credentials are missing"
                );
                None
            }
        }
    }

    /// Log alerts always, plus Telegram when available.
    pub fn notifier(&self, credentials: &dyn CredentialSource) -> Arc<dyn Notifier> {
        let mut fanout = FanoutNotifier::new().with(Box::new(LogNotifier));
        if let Some(telegram) = self.telegram(credentials) {
            fanout = fanout.with(Box::new(telegram));
        }
        info!(channels = fanout.len(), "Alert channels ready");
        Arc::new(fanout)
    }
}
