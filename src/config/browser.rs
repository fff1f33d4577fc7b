//! Browser engine configuration.
//!
//! Always compiled so config files parse the same way with or without the
//! `browser` feature.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Browser engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowserEngineConfig {
    /// Run in headless mode (default: true).
    /// PDF export of detail pages only works headless.
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Apply stealth evasion scripts after each navigation.
    #[serde(default = "default_stealth")]
    pub stealth: bool,

    /// Proxy server URL (e.g., "socks5://127.0.0.1:1080").
    #[serde(default)]
    pub proxy: Option<String>,

    /// Explicit Chrome/Chromium executable.
    #[serde(default)]
    pub chrome_path: Option<PathBuf>,

    /// User agent override.
    #[serde(default)]
    pub user_agent: Option<String>,

    /// Launch/connect timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Additional Chrome arguments.
    #[serde(default)]
    pub chrome_args: Vec<String>,

    /// Remote Chrome DevTools URL (e.g., "ws://localhost:9222").
    /// If set, connects to existing browser instead of launching one.
    #[serde(default)]
    pub remote_url: Option<String>,
}

pub fn default_headless() -> bool {
    true
}

fn default_stealth() -> bool {
    true
}

pub fn default_timeout() -> u64 {
    30
}

impl Default for BrowserEngineConfig {
    fn default() -> Self {
        Self {
            headless: default_headless(),
            stealth: default_stealth(),
            proxy: None,
            chrome_path: None,
            user_agent: None,
            timeout: default_timeout(),
            chrome_args: Vec::new(),
            remote_url: None,
        }
    }
}

impl BrowserEngineConfig {
    /// Apply environment overrides:
    /// - `BROWSER_URL` - remote DevTools endpoint
    /// - `BROWSER_HEADLESS` - `false`/`0` to show the window
    /// - `CHROME_PATH` - browser executable
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("BROWSER_URL") {
            if !url.trim().is_empty() {
                self.remote_url = Some(url.trim().to_string());
            }
        }
        if let Ok(val) = std::env::var("BROWSER_HEADLESS") {
            self.headless = !(val.eq_ignore_ascii_case("false") || val == "0");
        }
        if let Ok(path) = std::env::var("CHROME_PATH") {
            if !path.is_empty() {
                self.chrome_path = Some(PathBuf::from(path));
            }
        }
        self
    }

    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}
