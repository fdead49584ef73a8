//! Run configuration, loaded once from YAML.
//!
//! Every knob the pipeline needs lives in [`Config`]: mailbox credentials,
//! the HTML rewrite and print-style rule sets, the page limit, the ordered
//! cover-letter list, the upload command and the delivery-provider
//! credentials. The value is immutable for the run and is passed by
//! reference into each stage; nothing reads configuration from ambient
//! state.
//!
//! Optional keys carry `#[serde(default)]` so a minimal file keeps working:
//!
//! ```rust
//! use postlink::Config;
//!
//! let config = Config::from_yaml_str(r#"
//! imap: { host: imap.example.org, port: 993, user: me, password: pw, tls: true }
//! generate: { sed_options: "", css_styling: "", pdf_max_pages: 8 }
//! pingen: { client_id: id, client_secret: s, organisation_id: org }
//! "#).unwrap();
//! assert_eq!(config.generate.link_domain, "mailchi.mp");
//! assert!(config.cover_letters.is_empty());
//! ```

use crate::error::PostlinkError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Environment variable that overrides the config file location.
pub const CONFIG_PATH_ENV: &str = "POSTLINK_CONFIG";

/// Config file used when [`CONFIG_PATH_ENV`] is unset.
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Top-level configuration for one postlink run.
#[derive(Clone, Deserialize)]
pub struct Config {
    /// Mailbox holding the newsletter notifications.
    pub imap: ImapConfig,

    /// Rendering and rewrite rules for the general document.
    pub generate: GenerateConfig,

    /// Headless browser settings.
    #[serde(default)]
    pub browser: BrowserConfig,

    /// Cover documents, one letter per entry, processed in this order.
    #[serde(default)]
    pub cover_letters: Vec<PathBuf>,

    /// External command run once before any letter is submitted.
    #[serde(default)]
    pub upload: Option<UploadConfig>,

    /// Pingen credentials and endpoints.
    pub pingen: PingenConfig,

    /// Directory receiving the HTML and PDF artifacts. Default: `.`.
    #[serde(default = "default_workdir")]
    pub workdir: PathBuf,
}

#[derive(Clone, Deserialize)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Wrap the connection in TLS. Plain TCP is only useful for local servers.
    #[serde(default = "default_true")]
    pub tls: bool,
    /// Mailbox to select. Default: `INBOX`.
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
    /// Socket read/write timeout in seconds. Default: 30.
    #[serde(default = "default_imap_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateConfig {
    /// Rewrite rule set applied to the captured HTML (sed script syntax).
    #[serde(default)]
    pub sed_options: String,

    /// CSS injected into the cleaned page before printing.
    #[serde(default)]
    pub css_styling: String,

    /// Hard cap on the general document's page count.
    pub pdf_max_pages: usize,

    /// Host (or parent domain) a newsletter link must point at. Default: `mailchi.mp`.
    #[serde(default = "default_link_domain")]
    pub link_domain: String,

    /// Which engine interprets `sed_options`. Default: [`RewriteEngine::Builtin`].
    #[serde(default)]
    pub rewrite_engine: RewriteEngine,

    /// Treat rewrite patterns as POSIX ERE (`sed -E`) instead of BRE. Default: false.
    #[serde(default)]
    pub extended_regex: bool,

    /// Page margin on every side, in millimetres. Default: 6.
    #[serde(default = "default_margin_mm")]
    pub margin_mm: f64,

    /// Extra wait after the network goes idle, before the DOM is captured. Default: 0.
    #[serde(default)]
    pub settle_ms: u64,
}

/// Engine used to apply the HTML rewrite rule set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RewriteEngine {
    /// In-process sed interpreter built on `regex`. (default)
    #[default]
    Builtin,
    /// Spawn the system `sed -f` on a script file.
    Sed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Chrome/Chromium binary. If None, chromiumoxide searches the usual locations.
    #[serde(default)]
    pub executable: Option<PathBuf>,
    /// Pass `--no-sandbox` (needed when running as root in containers).
    #[serde(default)]
    pub no_sandbox: bool,
    /// A page counts as loaded once no request has been in flight for this long. Default: 500 ms.
    #[serde(default = "default_network_idle_ms")]
    pub network_idle_ms: u64,
    /// Give up on a navigation whose network never goes idle. Default: 30 s.
    #[serde(default = "default_navigation_timeout")]
    pub navigation_timeout_secs: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            executable: None,
            no_sandbox: false,
            network_idle_ms: default_network_idle_ms(),
            navigation_timeout_secs: default_navigation_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    pub cmd: String,
    /// Shell used as `<shell> -c <cmd>`. Default: `bash`.
    #[serde(default = "default_shell")]
    pub shell: String,
}

#[derive(Clone, Deserialize)]
pub struct PingenConfig {
    pub client_id: String,
    pub client_secret: String,
    pub organisation_id: String,
    #[serde(default = "default_identity_url")]
    pub identity_url: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
}

fn default_true() -> bool {
    true
}
fn default_workdir() -> PathBuf {
    PathBuf::from(".")
}
fn default_mailbox() -> String {
    "INBOX".into()
}
fn default_imap_timeout() -> u64 {
    30
}
fn default_link_domain() -> String {
    "mailchi.mp".into()
}
fn default_margin_mm() -> f64 {
    6.0
}
fn default_network_idle_ms() -> u64 {
    500
}
fn default_navigation_timeout() -> u64 {
    30
}
fn default_shell() -> String {
    "bash".into()
}
fn default_identity_url() -> String {
    "https://identity.pingen.com".into()
}
fn default_api_url() -> String {
    "https://api.pingen.com".into()
}

impl Config {
    /// Resolve the config path from [`CONFIG_PATH_ENV`], falling back to
    /// [`DEFAULT_CONFIG_PATH`] in the working directory.
    pub fn default_path() -> PathBuf {
        std::env::var_os(CONFIG_PATH_ENV)
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Read, parse and validate a YAML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PostlinkError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| PostlinkError::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Config =
            serde_yaml::from_str(&text).map_err(|e| PostlinkError::ConfigParse {
                path: path.to_path_buf(),
                detail: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate YAML held in memory.
    pub fn from_yaml_str(text: &str) -> Result<Self, PostlinkError> {
        let config: Config =
            serde_yaml::from_str(text).map_err(|e| PostlinkError::ConfigParse {
                path: PathBuf::from("<inline>"),
                detail: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<(), PostlinkError> {
        if self.imap.host.trim().is_empty() {
            return Err(PostlinkError::InvalidConfig("imap.host must not be empty".into()));
        }
        if self.imap.port == 0 {
            return Err(PostlinkError::InvalidConfig("imap.port must be non-zero".into()));
        }
        if self.generate.pdf_max_pages == 0 {
            return Err(PostlinkError::InvalidConfig(
                "generate.pdf_max_pages must be ≥ 1".into(),
            ));
        }
        if self.generate.link_domain.trim().is_empty() {
            return Err(PostlinkError::InvalidConfig(
                "generate.link_domain must not be empty".into(),
            ));
        }
        if !(0.0..=50.0).contains(&self.generate.margin_mm) {
            return Err(PostlinkError::InvalidConfig(format!(
                "generate.margin_mm must be 0–50, got {}",
                self.generate.margin_mm
            )));
        }
        Ok(())
    }
}

// Secrets never reach the logs.

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("imap", &self.imap)
            .field("generate", &self.generate)
            .field("browser", &self.browser)
            .field("cover_letters", &self.cover_letters)
            .field("upload", &self.upload)
            .field("pingen", &self.pingen)
            .field("workdir", &self.workdir)
            .finish()
    }
}

impl fmt::Debug for ImapConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImapConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("tls", &self.tls)
            .field("mailbox", &self.mailbox)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl fmt::Debug for PingenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PingenConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("organisation_id", &self.organisation_id)
            .field("identity_url", &self.identity_url)
            .field("api_url", &self.api_url)
            .finish()
    }
}
