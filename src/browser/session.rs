//! Chromium session: launch or connect, then hand out page drivers.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chromiumoxide::{Browser, BrowserConfig};
use futures::StreamExt;
use tokio::sync::Mutex;
use tracing::info;

use super::chromium::ChromiumPage;
use super::stealth::DEFAULT_USER_AGENT;
use super::{BrowserEngineConfig, PageDriver};

/// Owns the browser process (or remote connection) for one run.
pub struct BrowserSession {
    config: BrowserEngineConfig,
    browser: Option<Arc<Mutex<Browser>>>,
}

impl BrowserSession {
    /// Common Chrome executable paths to check.
    const CHROME_PATHS: &'static [&'static str] = &[
        // Linux
        "/usr/bin/google-chrome",
        "/usr/bin/google-chrome-stable",
        "/usr/bin/chromium",
        "/usr/bin/chromium-browser",
        "/snap/bin/chromium",
        // macOS
        "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        "/Applications/Chromium.app/Contents/MacOS/Chromium",
        "/opt/google/chrome/google-chrome",
    ];

    pub fn new(config: BrowserEngineConfig) -> Self {
        Self {
            config,
            browser: None,
        }
    }

    /// Find a Chrome executable: configured path, well-known paths, then PATH.
    fn find_chrome(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.config.chrome_path {
            if path.exists() {
                return Ok(path.clone());
            }
            anyhow::bail!("Configured chrome_path does not exist: {}", path.display());
        }

        for path in Self::CHROME_PATHS {
            let p = std::path::Path::new(path);
            if p.exists() {
                info!("Found Chrome at: {}", path);
                return Ok(p.to_path_buf());
            }
        }

        for cmd in [
            "google-chrome",
            "google-chrome-stable",
            "chromium",
            "chromium-browser",
        ] {
            if let Ok(path) = which::which(cmd) {
                info!("Found Chrome in PATH: {}", path.display());
                return Ok(path);
            }
        }

        Err(anyhow::anyhow!(
            "Chrome/Chromium not found. Install it, set CHROME_PATH, \
             or point BROWSER_URL at a running DevTools endpoint"
        ))
    }

    /// Launch or connect to the browser if not already running.
    pub async fn ensure_browser(&mut self) -> Result<()> {
        if self.browser.is_some() {
            return Ok(());
        }

        if let Some(remote_url) = self.config.remote_url.clone() {
            return self.connect_remote(&remote_url).await;
        }

        info!("Launching browser (headless={})", self.config.headless);
        let chrome_path = self.find_chrome()?;

        let mut builder = BrowserConfig::builder().chrome_executable(chrome_path);

        // with_head means NOT headless
        if !self.config.headless {
            builder = builder.with_head();
        }

        if let Some(ref proxy) = self.config.proxy {
            builder = builder.arg(format!("--proxy-server={}", proxy));
        }

        builder = builder
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-popup-blocking")
            .arg("--lang=es-CO")
            .arg("--no-sandbox")
            .arg("--disable-gpu");

        for arg in &self.config.chrome_args {
            builder = builder.arg(arg);
        }

        let config = builder
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build browser config: {}", e))?;

        let launch = Browser::launch(config);
        let (browser, mut handler) =
            tokio::time::timeout(std::time::Duration::from_secs(self.config.timeout), launch)
                .await
                .context("Timed out launching browser")?
                .context("Failed to launch browser")?;

        tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        self.browser = Some(Arc::new(Mutex::new(browser)));
        Ok(())
    }

    /// Connect to a remote Chrome instance via its `/json/version` endpoint.
    async fn connect_remote(&mut self, url: &str) -> Result<()> {
        info!("Connecting to remote browser at {}", url);

        let http_url = url
            .replace("ws://", "http://")
            .replace("wss://", "https://");
        let version_url = format!("{}/json/version", http_url.trim_end_matches('/'));

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(self.config.timeout))
            .build()?;
        let resp: serde_json::Value = client
            .get(&version_url)
            .send()
            .await
            .context("Failed to connect to remote browser")?
            .json()
            .await
            .context("Failed to parse browser version info")?;

        let ws_url = resp
            .get("webSocketDebuggerUrl")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("No webSocketDebuggerUrl in response"))?;

        info!("Connecting to WebSocket: {}", ws_url);

        let (browser, mut handler) = Browser::connect(ws_url)
            .await
            .context("Failed to connect to remote browser")?;

        tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        });

        self.browser = Some(Arc::new(Mutex::new(browser)));
        Ok(())
    }

    /// Open a new tab at `url`.
    pub async fn new_page(&mut self, url: &str) -> Result<Box<dyn PageDriver>> {
        self.ensure_browser().await?;
        let browser = self
            .browser
            .clone()
            .ok_or_else(|| anyhow::anyhow!("Browser not running"))?;

        let page = {
            let guard = browser.lock().await;
            guard
                .new_page("about:blank")
                .await
                .context("Failed to open tab")?
        };

        let user_agent = self
            .config
            .user_agent
            .clone()
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let driver = ChromiumPage::attach(page, browser, self.config.stealth, user_agent).await?;
        if url != "about:blank" {
            driver.goto(url).await?;
        }
        Ok(Box::new(driver))
    }

    /// Close the browser.
    pub async fn close(&mut self) {
        if let Some(browser) = self.browser.take() {
            let mut guard = browser.lock().await;
            let _ = guard.close().await;
        }
    }
}
