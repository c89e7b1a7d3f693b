use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Two equivalent ways to configure:
//
//   config.toml:     [relay]
//                    push_timeout_ms = 100
//
//   env var:         MARKET_RELAY__PUSH_TIMEOUT_MS=100   (double underscore = nesting)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub relay: RelayFileConfig,
    #[serde(default)]
    pub auth: AuthFileConfig,
}

/// Listener settings (lives under `[server]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Relay tuning knobs (lives under `[relay]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RelayFileConfig {
    #[serde(default = "default_send_channel_capacity")]
    pub send_channel_capacity: usize,
    #[serde(default = "default_push_timeout_ms")]
    pub push_timeout_ms: u64,
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for RelayFileConfig {
    fn default() -> Self {
        Self {
            send_channel_capacity: default_send_channel_capacity(),
            push_timeout_ms: default_push_timeout_ms(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

/// Handshake/session settings (lives under `[auth]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthFileConfig {
    /// When false the `auth` frame's claimed user id is trusted as-is.
    #[serde(default)]
    pub require_token: bool,
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
}

impl Default for AuthFileConfig {
    fn default() -> Self {
        Self {
            require_token: false,
            session_ttl_secs: default_session_ttl(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    5000
}
fn default_send_channel_capacity() -> usize {
    64
}
fn default_push_timeout_ms() -> u64 {
    250
}
fn default_max_frame_bytes() -> usize {
    64 * 1024
}
fn default_session_ttl() -> u64 {
    604800
}

/// Build a figment that layers: defaults → config.toml → MARKET_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `MARKET_AUTH__REQUIRE_TOKEN=true`  →  `auth.require_token = true`
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("MARKET_").split("__"))
}

// =============================================================================
// Runtime config structs (derived from FileConfig, used throughout the server)
// =============================================================================

/// Relay configuration (runtime view).
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Outbound frames buffered per connection before pushes start timing out
    pub send_channel_capacity: usize,
    /// Upper bound on how long a push may wait for a slow recipient
    pub push_timeout: Duration,
    /// Inbound text frames larger than this are rejected as malformed
    pub max_frame_bytes: usize,
}

impl RelayConfig {
    pub fn from_file(fc: &RelayFileConfig) -> Self {
        Self {
            send_channel_capacity: fc.send_channel_capacity.max(1),
            push_timeout: Duration::from_millis(fc.push_timeout_ms),
            max_frame_bytes: fc.max_frame_bytes,
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self::from_file(&RelayFileConfig::default())
    }
}

/// Authentication configuration (runtime view).
#[derive(Clone, Debug)]
pub struct AuthConfig {
    /// Whether the handshake must carry a valid session token
    pub require_token: bool,
    /// Session time-to-live in seconds (default: 7 days)
    pub session_ttl_secs: u64,
}

impl AuthConfig {
    pub fn from_file(fc: &AuthFileConfig) -> Self {
        Self {
            require_token: fc.require_token,
            session_ttl_secs: fc.session_ttl_secs,
        }
    }
}

// =============================================================================
// Directory layout config (not tunable via figment, derived from --data-dir)
// =============================================================================

#[derive(Clone, Debug)]
pub struct MarketConfig {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
}

impl MarketConfig {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("Could not find home directory")?
                .join(".market-relay"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        let db_path = data_dir.join("market.db");

        Ok(Self { data_dir, db_path })
    }

    pub fn db_url(&self) -> String {
        format!("sqlite://{}?mode=rwc", self.db_path.display())
    }

    /// Load the layered tunables for this data directory.
    pub fn load_file_config(&self) -> Result<FileConfig> {
        load_config(&self.data_dir)
            .extract()
            .context("Failed to load configuration")
    }
}
