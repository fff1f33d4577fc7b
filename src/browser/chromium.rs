//! Chromium page driver over CDP.
//!
//! Elements found by [`PageDriver::query_all`] are tagged in the DOM with a
//! `data-pqr-node` attribute carrying a page-unique id. A server-side reload
//! drops the tags, so handles from the previous document fail with
//! [`DriverError::StaleElement`] instead of pointing at a different node.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::cdp::browser_protocol::page::{CaptureScreenshotFormat, PrintToPdfParams};
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, Page};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::debug;

use super::locator::Locator;
use super::stealth::STEALTH_SCRIPTS;
use super::{with_timeout, ClickMode, Download, ElementHandle, PageDriver};
use crate::error::{DriverError, DriverResult};

const NODE_ATTR: &str = "data-pqr-node";

/// Finds matches for a locator and tags them. Argument object:
/// `{css, text, innermost, scope, start}`; returns `{ids, next}` or
/// `{stale: true}` / `{error}`.
const QUERY_JS: &str = r#"
(function(args) {
    const root = args.scope === null
        ? document
        : document.querySelector('[data-pqr-node="' + args.scope + '"]');
    if (!root) return { stale: true };
    let nodes;
    try {
        nodes = Array.from(root.querySelectorAll(args.css));
    } catch (e) {
        return { error: String(e) };
    }
    const norm = s => (s || '').replace(/\s+/g, ' ').trim().toLowerCase();
    nodes = nodes.filter(n => !['HTML', 'HEAD', 'SCRIPT', 'STYLE'].includes(n.tagName));
    if (args.text !== null) {
        const needle = norm(args.text);
        nodes = nodes.filter(n => norm(n.innerText || n.textContent).includes(needle));
        if (args.innermost) {
            nodes = nodes.filter(n => !nodes.some(o => o !== n && n.contains(o)));
        }
    }
    let next = args.start;
    const ids = nodes.map(n => {
        let id = n.getAttribute('data-pqr-node');
        if (!id) {
            id = String(next++);
            n.setAttribute('data-pqr-node', id);
        }
        return Number(id);
    });
    return { ids: ids, next: next };
})
"#;

const IDLE_JS: &str = r#"
new Promise((resolve) => {
    let last = -1;
    let stable = 0;
    const tick = () => {
        const n = performance.getEntriesByType('resource').length;
        if (document.readyState === 'complete' && n === last) {
            stable += 1;
        } else {
            stable = 0;
        }
        last = n;
        if (stable >= 2) {
            resolve(true);
        } else {
            setTimeout(tick, 250);
        }
    };
    tick();
})
"#;

/// One Chromium tab.
pub struct ChromiumPage {
    page: Page,
    browser: Arc<Mutex<Browser>>,
    generation: AtomicU64,
    next_id: AtomicU64,
    stealth: bool,
    user_agent: String,
    tab_timeout: Duration,
}

impl ChromiumPage {
    pub(crate) async fn attach(
        page: Page,
        browser: Arc<Mutex<Browser>>,
        stealth: bool,
        user_agent: String,
    ) -> DriverResult<Self> {
        page.execute(SetUserAgentOverrideParams::new(user_agent.clone()))
            .await
            .map_err(|e| DriverError::Other(format!("user agent override failed: {}", e)))?;

        Ok(Self {
            page,
            browser,
            generation: AtomicU64::new(1),
            next_id: AtomicU64::new(1),
            stealth,
            user_agent,
            tab_timeout: Duration::from_secs(5),
        })
    }

    async fn apply_stealth(&self) {
        if !self.stealth {
            return;
        }
        for script in STEALTH_SCRIPTS {
            if let Err(e) = self.page.evaluate(script.to_string()).await {
                debug!("Stealth script injection skipped: {}", e);
            }
        }
    }

    async fn eval_value(&self, script: String) -> DriverResult<Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| DriverError::Script(e.to_string()))?;
        Ok(result.value().cloned().unwrap_or(Value::Null))
    }

    /// Run `body` as `function(el) { ... }` against a tagged element.
    async fn on_node<T: DeserializeOwned>(
        &self,
        handle: &ElementHandle,
        body: &str,
    ) -> DriverResult<T> {
        if handle.generation != self.generation() {
            return Err(DriverError::StaleElement);
        }
        let script = format!(
            r#"(function() {{
                const el = document.querySelector('[{attr}="{id}"]');
                if (!el) return {{ stale: true }};
                return {{ value: (function(el) {{ {body} }})(el) }};
            }})()"#,
            attr = NODE_ATTR,
            id = handle.id,
            body = body
        );
        let result = self.eval_value(script).await?;
        if result.get("stale").and_then(Value::as_bool) == Some(true) {
            return Err(DriverError::StaleElement);
        }
        let value = result.get("value").cloned().unwrap_or(Value::Null);
        serde_json::from_value(value).map_err(|e| DriverError::Script(e.to_string()))
    }

    async fn wrap_new_page(&self, page: Page) -> DriverResult<Box<dyn PageDriver>> {
        let tab = ChromiumPage::attach(
            page,
            self.browser.clone(),
            self.stealth,
            self.user_agent.clone(),
        )
        .await?;
        tab.apply_stealth().await;
        Ok(Box::new(tab))
    }
}

#[async_trait]
impl PageDriver for ChromiumPage {
    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    async fn url(&self) -> DriverResult<String> {
        self.page
            .url()
            .await
            .map(|u| u.map(|u| u.to_string()).unwrap_or_default())
            .map_err(|e| DriverError::Other(e.to_string()))
    }

    async fn goto(&self, url: &str) -> DriverResult<()> {
        self.page
            .goto(url)
            .await
            .map_err(|e| DriverError::Navigation(format!("{}: {}", url, e)))?;
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.apply_stealth().await;
        Ok(())
    }

    async fn query_all(
        &self,
        locator: &str,
        scope: Option<&ElementHandle>,
    ) -> DriverResult<Vec<ElementHandle>> {
        let loc = Locator::parse(locator)?;
        if let Some(scope) = scope {
            if scope.generation != self.generation() {
                return Err(DriverError::StaleElement);
            }
        }
        let args = json!({
            "css": loc.css_or_any(),
            "text": loc.text,
            "innermost": loc.innermost(),
            "scope": scope.map(|s| s.id),
            "start": self.next_id.load(Ordering::SeqCst),
        });
        let result = self.eval_value(format!("{}({})", QUERY_JS, args)).await?;

        if result.get("stale").and_then(Value::as_bool) == Some(true) {
            return Err(DriverError::StaleElement);
        }
        if let Some(err) = result.get("error").and_then(Value::as_str) {
            return Err(DriverError::InvalidLocator(format!("{}: {}", locator, err)));
        }
        if let Some(next) = result.get("next").and_then(Value::as_u64) {
            self.next_id.fetch_max(next, Ordering::SeqCst);
        }

        let generation = self.generation();
        Ok(result
            .get("ids")
            .and_then(Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(Value::as_u64)
                    .map(|id| ElementHandle { generation, id })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn is_visible(&self, element: &ElementHandle) -> DriverResult<bool> {
        self.on_node(
            element,
            "const s = getComputedStyle(el); const r = el.getBoundingClientRect(); \
             return s.display !== 'none' && s.visibility !== 'hidden' && s.opacity !== '0' \
             && (r.width > 0 || r.height > 0);",
        )
        .await
    }

    async fn is_enabled(&self, element: &ElementHandle) -> DriverResult<bool> {
        self.on_node(
            element,
            "return !(el.disabled || el.getAttribute('aria-disabled') === 'true' \
             || el.classList.contains('disabled'));",
        )
        .await
    }

    async fn text(&self, element: &ElementHandle) -> DriverResult<String> {
        self.on_node(
            element,
            "return (el.innerText || el.textContent || '').replace(/\\s+/g, ' ').trim();",
        )
        .await
    }

    async fn attribute(
        &self,
        element: &ElementHandle,
        name: &str,
    ) -> DriverResult<Option<String>> {
        let name = serde_json::to_string(name).map_err(|e| DriverError::Script(e.to_string()))?;
        self.on_node(
            element,
            &format!(
                "const n = {name}; if (n === 'value' && 'value' in el) return String(el.value); \
                 return el.getAttribute(n);"
            ),
        )
        .await
    }

    async fn tag_name(&self, element: &ElementHandle) -> DriverResult<String> {
        self.on_node(element, "return el.tagName.toLowerCase();").await
    }

    async fn click(&self, element: &ElementHandle, mode: ClickMode) -> DriverResult<()> {
        match mode {
            ClickMode::Normal => {
                if element.generation != self.generation() {
                    return Err(DriverError::StaleElement);
                }
                let selector = format!("[{}=\"{}\"]", NODE_ATTR, element.id);
                let el = self
                    .page
                    .find_element(selector)
                    .await
                    .map_err(|_| DriverError::StaleElement)?;
                el.click()
                    .await
                    .map_err(|e| DriverError::NotActionable(e.to_string()))?;
            }
            ClickMode::Force => {
                let _: bool = self.on_node(element, "el.click(); return true;").await?;
            }
            ClickMode::Synthetic => {
                let _: bool = self
                    .on_node(
                        element,
                        "el.dispatchEvent(new MouseEvent('click', \
                         { bubbles: true, cancelable: true, view: window })); return true;",
                    )
                    .await?;
            }
        }
        Ok(())
    }

    async fn fill(&self, element: &ElementHandle, value: &str) -> DriverResult<()> {
        let value = serde_json::to_string(value).map_err(|e| DriverError::Script(e.to_string()))?;
        let ok: bool = self
            .on_node(
                element,
                &format!(
                    "if (!('value' in el)) return false; el.focus(); \
                     const proto = el.tagName === 'TEXTAREA' ? HTMLTextAreaElement.prototype \
                       : el.tagName === 'SELECT' ? HTMLSelectElement.prototype : HTMLInputElement.prototype; \
                     const setter = Object.getOwnPropertyDescriptor(proto, 'value').set; \
                     setter.call(el, {value}); \
                     el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
                     el.dispatchEvent(new Event('change', {{ bubbles: true }})); \
                     el.blur(); return true;"
                ),
            )
            .await?;
        if ok {
            Ok(())
        } else {
            Err(DriverError::NotActionable("element does not accept text".to_string()))
        }
    }

    async fn select_option(&self, element: &ElementHandle, value: &str) -> DriverResult<()> {
        let wanted = serde_json::to_string(value).map_err(|e| DriverError::Script(e.to_string()))?;
        let ok: bool = self
            .on_node(
                element,
                &format!(
                    "if (el.tagName !== 'SELECT') return false; const w = {wanted}; \
                     const norm = s => (s || '').replace(/\\s+/g, ' ').trim().toLowerCase(); \
                     const opt = Array.from(el.options).find(o => o.value === w || norm(o.text) === norm(w)); \
                     if (!opt) return false; el.value = opt.value; \
                     el.dispatchEvent(new Event('change', {{ bubbles: true }})); return true;"
                ),
            )
            .await?;
        if ok {
            Ok(())
        } else {
            Err(DriverError::NotFound(format!("option '{}'", value)))
        }
    }

    async fn remove(&self, element: &ElementHandle) -> DriverResult<()> {
        let _: bool = self.on_node(element, "el.remove(); return true;").await?;
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> DriverResult<Value> {
        self.eval_value(script.to_string()).await
    }

    async fn wait_for_idle(&self, timeout: Duration) -> DriverResult<()> {
        with_timeout(timeout, async {
            self.eval_value(IDLE_JS.to_string()).await.map(|_| ())
        })
        .await
    }

    async fn body_text(&self) -> DriverResult<String> {
        let value = self
            .eval_value("document.body ? document.body.innerText : ''".to_string())
            .await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn pdf(&self) -> DriverResult<Vec<u8>> {
        let params = PrintToPdfParams {
            print_background: Some(true),
            ..Default::default()
        };
        self.page
            .pdf(params)
            .await
            .map_err(|e| DriverError::Render(format!("PDF generation failed: {}", e)))
    }

    async fn screenshot(&self, full_page: bool) -> DriverResult<Vec<u8>> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(full_page)
            .build();
        self.page
            .screenshot(params)
            .await
            .map_err(|e| DriverError::Render(format!("Screenshot failed: {}", e)))
    }

    /// Fetch from within the page so the portal session cookies apply.
    async fn download(&self, url: &str) -> DriverResult<Download> {
        let url_js = serde_json::to_string(url).map_err(|e| DriverError::Script(e.to_string()))?;
        let fetch_script = format!(
            r#"
            (async () => {{
                try {{
                    const response = await fetch({url_js}, {{ method: 'GET', credentials: 'include' }});
                    if (!response.ok) {{
                        return {{ error: `HTTP ${{response.status}}: ${{response.statusText}}` }};
                    }}
                    const contentType = response.headers.get('content-type') || 'application/octet-stream';
                    const disposition = response.headers.get('content-disposition') || '';
                    const bytes = new Uint8Array(await (await response.blob()).arrayBuffer());
                    let binary = '';
                    for (let i = 0; i < bytes.length; i++) {{
                        binary += String.fromCharCode(bytes[i]);
                    }}
                    return {{
                        url: response.url,
                        contentType: contentType,
                        disposition: disposition,
                        data: btoa(binary)
                    }};
                }} catch (e) {{
                    return {{ error: e.toString() }};
                }}
            }})()
            "#
        );

        let result = self
            .eval_value(fetch_script)
            .await
            .map_err(|e| DriverError::Download(e.to_string()))?;

        if let Some(error) = result.get("error").and_then(Value::as_str) {
            return Err(DriverError::Download(format!("{}: {}", url, error)));
        }

        let data_b64 = result.get("data").and_then(Value::as_str).unwrap_or("");
        let data = base64::engine::general_purpose::STANDARD
            .decode(data_b64)
            .map_err(|e| DriverError::Download(format!("invalid payload: {}", e)))?;

        let final_url = result
            .get("url")
            .and_then(Value::as_str)
            .unwrap_or(url)
            .to_string();
        let filename = result
            .get("disposition")
            .and_then(Value::as_str)
            .and_then(crate::utils::mime::filename_from_disposition)
            .or_else(|| crate::utils::mime::filename_from_url(&final_url));

        Ok(Download {
            url: final_url,
            filename,
            content_type: result
                .get("contentType")
                .and_then(Value::as_str)
                .map(str::to_string),
            data,
        })
    }

    async fn open_in_new_tab(
        &self,
        element: &ElementHandle,
    ) -> DriverResult<Option<Box<dyn PageDriver>>> {
        let before: HashSet<_> = {
            let browser = self.browser.lock().await;
            browser
                .pages()
                .await
                .map_err(|e| DriverError::Other(e.to_string()))?
                .iter()
                .map(|p| p.target_id().clone())
                .collect()
        };

        let _: bool = self
            .on_node(
                element,
                "const opts = { bubbles: true, cancelable: true, view: window, \
                 ctrlKey: true, metaKey: true, button: 0 }; \
                 el.dispatchEvent(new MouseEvent('click', opts)); return true;",
            )
            .await?;

        let deadline = tokio::time::Instant::now() + self.tab_timeout;
        while tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(250)).await;
            let opened = {
                let browser = self.browser.lock().await;
                browser
                    .pages()
                    .await
                    .map_err(|e| DriverError::Other(e.to_string()))?
                    .into_iter()
                    .find(|p| !before.contains(p.target_id()))
            };
            if let Some(page) = opened {
                let _ = page.wait_for_navigation().await;
                return Ok(Some(self.wrap_new_page(page).await?));
            }
        }
        debug!("No tab appeared after modifier click");
        Ok(None)
    }

    async fn open_tab(&self, url: &str) -> DriverResult<Box<dyn PageDriver>> {
        let page = {
            let browser = self.browser.lock().await;
            browser
                .new_page(url)
                .await
                .map_err(|e| DriverError::Navigation(format!("{}: {}", url, e)))?
        };
        self.wrap_new_page(page).await
    }

    async fn close(&self) -> DriverResult<()> {
        self.page
            .clone()
            .close()
            .await
            .map_err(|e| DriverError::Other(e.to_string()))
    }
}
