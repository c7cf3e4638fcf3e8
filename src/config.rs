//! Configuration for the herald delivery CLI.

use std::{path::Path, time::Duration};

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use herald_core::{Subscriptions, TenantId, Webhook, WebhookId};
use herald_delivery::{ClientConfig, EngineConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const CONFIG_FILE: &str = "herald.toml";
const ENV_PREFIX: &str = "HERALD_";

/// CLI configuration with defaults, file, and environment overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables prefixed with `HERALD_` (highest priority)
/// 2. Configuration file (`herald.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// Webhooks can only be declared in the file, as `[[webhooks]]` tables.
///
/// # Example
///
/// ```toml
/// tenant = "acct-42"
/// concurrency_limit = 8
///
/// [[webhooks]]
/// url = "https://example.com/hooks/chat"
/// events = ["message", "message_ack"]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Tenant served by the engine.
    ///
    /// Environment variable: `HERALD_TENANT`
    #[serde(default = "default_tenant")]
    pub tenant: String,

    // Engine
    /// Maximum simultaneous delivery workers.
    ///
    /// Environment variable: `HERALD_CONCURRENCY_LIMIT`
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,
    /// Maximum queued jobs not yet started.
    ///
    /// Environment variable: `HERALD_QUEUE_LIMIT`
    #[serde(default = "default_queue_limit")]
    pub queue_limit: usize,
    /// Drain bound on shutdown in milliseconds.
    ///
    /// Environment variable: `HERALD_SHUTDOWN_TIMEOUT_MS`
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    // Retry
    /// Total attempts per delivery, including the first.
    ///
    /// Environment variable: `HERALD_MAX_RETRIES`
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Backoff unit in milliseconds.
    ///
    /// Environment variable: `HERALD_BASE_DELAY_MS`
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound for a single backoff sleep in milliseconds.
    ///
    /// Environment variable: `HERALD_MAX_DELAY_MS`
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Jitter fraction applied to backoff sleeps (0.0 to 1.0).
    ///
    /// Environment variable: `HERALD_JITTER_FACTOR`
    #[serde(default)]
    pub jitter_factor: f64,

    // Client
    /// Timeout for each HTTP attempt in milliseconds.
    ///
    /// Environment variable: `HERALD_ATTEMPT_TIMEOUT_MS`
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    /// User-Agent sent with every delivery.
    ///
    /// Environment variable: `HERALD_USER_AGENT`
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    // Logging
    /// Fallback log filter when `RUST_LOG` is unset.
    ///
    /// Environment variable: `HERALD_LOG_FILTER`
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Webhooks registered at startup.
    #[serde(default)]
    pub webhooks: Vec<WebhookConfig>,
}

/// A webhook declared in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Stable ID; a random one is assigned when omitted.
    #[serde(default)]
    pub id: Option<Uuid>,
    /// Target URL.
    pub url: String,
    /// Subscribed event names; `"all"` subscribes to everything.
    pub events: Vec<String>,
    /// Whether the webhook receives deliveries.
    #[serde(default = "default_active")]
    pub active: bool,
}

impl Config {
    /// Loads configuration from defaults, `herald.toml` and `HERALD_*`
    /// environment variables.
    pub fn load() -> Result<Self> {
        Self::load_from(CONFIG_FILE)
    }

    /// Loads configuration using `path` as the configuration file.
    ///
    /// A missing file is not an error; defaults and environment still apply.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX));

        let config: Self = figment.extract().context("Failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Tenant ID for the engine.
    pub fn tenant_id(&self) -> TenantId {
        TenantId::new(self.tenant.as_str())
    }

    /// Default drain bound for shutdown.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Convert to the engine configuration.
    pub fn to_engine_config(&self) -> EngineConfig {
        EngineConfig {
            concurrency_limit: self.concurrency_limit,
            queue_limit: self.queue_limit,
            retry_policy: self.to_retry_policy(),
            client_config: self.to_client_config(),
            shutdown_timeout: self.shutdown_timeout(),
        }
    }

    /// Convert to retry policy.
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            jitter_factor: self.jitter_factor,
            attempt_timeout: Duration::from_millis(self.attempt_timeout_ms),
        }
    }

    /// Convert to client configuration.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            timeout: Duration::from_millis(self.attempt_timeout_ms),
            user_agent: self.user_agent.clone(),
            ..ClientConfig::default()
        }
    }

    /// Webhooks declared in the configuration.
    pub fn webhooks(&self) -> Vec<Webhook> {
        self.webhooks
            .iter()
            .map(|declared| Webhook {
                id: declared.id.map_or_else(WebhookId::new, WebhookId),
                url: declared.url.clone(),
                events: Subscriptions::from_events(declared.events.iter().cloned()),
                is_active: declared.active,
            })
            .collect()
    }

    /// Validate configuration values.
    fn validate(&self) -> Result<()> {
        if self.tenant.trim().is_empty() {
            anyhow::bail!("tenant must not be empty");
        }

        if self.concurrency_limit == 0 {
            anyhow::bail!("concurrency_limit must be greater than 0");
        }

        if self.queue_limit == 0 {
            anyhow::bail!("queue_limit must be greater than 0");
        }

        if self.attempt_timeout_ms == 0 {
            anyhow::bail!("attempt_timeout_ms must be greater than 0");
        }

        if !(0.0..=1.0).contains(&self.jitter_factor) {
            anyhow::bail!("jitter_factor must be between 0.0 and 1.0");
        }

        for webhook in &self.webhooks {
            if webhook.url.trim().is_empty() {
                anyhow::bail!("webhook url must not be empty");
            }
            if webhook.events.is_empty() {
                anyhow::bail!("webhook {} must subscribe to at least one event", webhook.url);
            }
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tenant: default_tenant(),
            concurrency_limit: default_concurrency_limit(),
            queue_limit: default_queue_limit(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_factor: 0.0,
            attempt_timeout_ms: default_attempt_timeout_ms(),
            user_agent: default_user_agent(),
            log_filter: default_log_filter(),
            webhooks: Vec::new(),
        }
    }
}

fn default_tenant() -> String {
    "default".to_string()
}

fn default_concurrency_limit() -> usize {
    herald_delivery::DEFAULT_CONCURRENCY_LIMIT
}

fn default_queue_limit() -> usize {
    herald_delivery::DEFAULT_QUEUE_LIMIT
}

fn default_shutdown_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    300_000
}

fn default_attempt_timeout_ms() -> u64 {
    10_000
}

fn default_user_agent() -> String {
    ClientConfig::default().user_agent
}

fn default_log_filter() -> String {
    "info,herald=debug".to_string()
}

fn default_active() -> bool {
    true
}
