//! Offline page driver over captured HTML snapshots.
//!
//! A [`StaticSite`] is a map of URL → HTML plus downloadable files. Pages
//! opened from it behave like a very small browser:
//!
//! - elements are addressed by document order; every navigation starts a
//!   new generation and invalidates older handles
//! - visibility honours `hidden`, `display:none`, `visibility:hidden`,
//!   `type="hidden"` and the `hidden`/`d-none` classes on the element or
//!   any ancestor
//! - clicks follow `href`, or run the `data-on-click` script:
//!   `remove:<css>`, `remove-closest:<css>`, `goto:<url>`, `noop`
//!   (separated by `;`)
//! - `data-click-block="normal,force,synthetic"` makes the listed click
//!   modes fail as if intercepted by an overlay
//! - opening in a new tab follows link targets; scripted controls run their
//!   click in the current tab instead, like a modifier click would
//!
//! Script evaluation is not supported.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::locator::{normalize_text, Locator};
use super::{resolve_href, ClickMode, Download, ElementHandle, PageDriver};
use crate::error::{DriverError, DriverResult};

const NOT_FOUND_HTML: &str = "<html><head><title>404 Not Found</title></head>\
<body><h1>404 Not Found</h1><p>The requested URL was not found on this server.</p></body></html>";

#[derive(Debug, Clone)]
struct StaticFile {
    content_type: String,
    data: Vec<u8>,
}

#[derive(Debug)]
struct SiteInner {
    base: Url,
    pages: HashMap<String, String>,
    files: HashMap<String, StaticFile>,
    unreachable: HashSet<String>,
    pdf_export: bool,
    screenshots: bool,
    context_menu_tabs: bool,
    generations: AtomicU64,
    open_tabs: AtomicUsize,
    visits: Mutex<Vec<String>>,
}

impl SiteInner {
    fn absolute(&self, url: &str) -> String {
        match self.base.join(url) {
            Ok(u) => u.to_string(),
            Err(_) => url.to_string(),
        }
    }

    fn lookup_page(&self, absolute: &str) -> Option<&String> {
        self.pages.get(absolute).or_else(|| {
            let without_fragment = absolute.split('#').next().unwrap_or(absolute);
            self.pages.get(without_fragment)
        })
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// A set of captured pages and files served to [`StaticPage`]s.
#[derive(Debug, Clone)]
pub struct StaticSite {
    inner: Arc<SiteInner>,
}

/// Builder for [`StaticSite`].
#[derive(Debug)]
pub struct StaticSiteBuilder {
    base: Url,
    pages: HashMap<String, String>,
    files: HashMap<String, StaticFile>,
    unreachable: HashSet<String>,
    pdf_export: bool,
    screenshots: bool,
    context_menu_tabs: bool,
}

impl StaticSiteBuilder {
    fn absolute(&self, path: &str) -> String {
        match self.base.join(path) {
            Ok(u) => u.to_string(),
            Err(_) => path.to_string(),
        }
    }

    pub fn page(mut self, path: &str, html: impl Into<String>) -> Self {
        let key = self.absolute(path);
        self.pages.insert(key, html.into());
        self
    }

    pub fn file(mut self, path: &str, content_type: &str, data: impl Into<Vec<u8>>) -> Self {
        let key = self.absolute(path);
        self.files.insert(
            key,
            StaticFile {
                content_type: content_type.to_string(),
                data: data.into(),
            },
        );
        self
    }

    /// Navigation to `path` fails at the network level.
    pub fn unreachable(mut self, path: &str) -> Self {
        let key = self.absolute(path);
        self.unreachable.insert(key);
        self
    }

    /// Whether PDF export works (headful Chromium cannot print to PDF).
    pub fn pdf_export(mut self, enabled: bool) -> Self {
        self.pdf_export = enabled;
        self
    }

    pub fn screenshots(mut self, enabled: bool) -> Self {
        self.screenshots = enabled;
        self
    }

    /// Whether "open in new tab" produces a tab for links.
    pub fn context_menu_tabs(mut self, enabled: bool) -> Self {
        self.context_menu_tabs = enabled;
        self
    }

    pub fn build(self) -> StaticSite {
        StaticSite {
            inner: Arc::new(SiteInner {
                base: self.base,
                pages: self.pages,
                files: self.files,
                unreachable: self.unreachable,
                pdf_export: self.pdf_export,
                screenshots: self.screenshots,
                context_menu_tabs: self.context_menu_tabs,
                generations: AtomicU64::new(0),
                open_tabs: AtomicUsize::new(0),
                visits: Mutex::new(Vec::new()),
            }),
        }
    }
}

impl StaticSite {
    /// Start a site rooted at `base` (e.g. `https://portal.test/`).
    pub fn builder(base: &str) -> DriverResult<StaticSiteBuilder> {
        let base = Url::parse(base)
            .map_err(|e| DriverError::Navigation(format!("invalid base URL {}: {}", base, e)))?;
        Ok(StaticSiteBuilder {
            base,
            pages: HashMap::new(),
            files: HashMap::new(),
            unreachable: HashSet::new(),
            pdf_export: true,
            screenshots: true,
            context_menu_tabs: true,
        })
    }

    /// Load a directory of `*.html` snapshots; file names map to paths
    /// (`listado.html` → `/listado`, `index.html` → `/`).
    pub fn from_dir(base: &str, dir: &std::path::Path) -> std::io::Result<StaticSite> {
        let mut builder = Self::builder(base)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))?;
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("html") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let route = if stem == "index" {
                "/".to_string()
            } else {
                format!("/{}", stem)
            };
            builder = builder.page(&route, std::fs::read_to_string(&path)?);
        }
        Ok(builder.build())
    }

    /// Open a new tab at `url`.
    pub async fn open(&self, url: &str) -> DriverResult<StaticPage> {
        let page = StaticPage::blank(self.inner.clone());
        if let Err(e) = page.goto(url).await {
            page.close().await?;
            return Err(e);
        }
        Ok(page)
    }

    /// Number of tabs opened and not yet closed.
    pub fn open_tab_count(&self) -> usize {
        self.inner.open_tabs.load(Ordering::SeqCst)
    }

    /// Every URL navigated to, in order.
    pub fn visits(&self) -> Vec<String> {
        self.inner
            .visits
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[derive(Debug)]
struct PageState {
    url: String,
    html: String,
    generation: u64,
    removed: HashSet<usize>,
    values: HashMap<usize, String>,
}

/// One tab over a [`StaticSite`].
#[derive(Debug)]
pub struct StaticPage {
    site: Arc<SiteInner>,
    state: Mutex<PageState>,
    generation: AtomicU64,
    closed: AtomicBool,
}

/// Parsed view of the current HTML, elements in document order.
struct Doc<'a> {
    all: Vec<ElementRef<'a>>,
}

impl<'a> Doc<'a> {
    fn new(html: &'a Html) -> Self {
        let all = html
            .root_element()
            .descendants()
            .filter_map(ElementRef::wrap)
            .collect();
        Self { all }
    }

    fn index_of(&self, el: &ElementRef<'a>) -> Option<usize> {
        self.all.iter().position(|e| e == el)
    }

    fn get(&self, idx: usize) -> Option<ElementRef<'a>> {
        self.all.get(idx).copied()
    }

    fn is_removed(&self, el: ElementRef<'a>, removed: &HashSet<usize>) -> bool {
        if removed.is_empty() {
            return false;
        }
        ancestors_and_self(el).any(|a| self.index_of(&a).is_some_and(|i| removed.contains(&i)))
    }

    fn is_visible(&self, el: ElementRef<'a>, removed: &HashSet<usize>) -> bool {
        !self.is_removed(el, removed) && !ancestors_and_self(el).any(|a| hidden_by_markup(&a))
    }

    fn visible_text(&self, el: ElementRef<'a>, removed: &HashSet<usize>) -> String {
        let mut parts: Vec<&str> = Vec::new();
        for node in el.descendants() {
            let Some(text) = node.value().as_text() else {
                continue;
            };
            let blocked = node.ancestors().filter_map(ElementRef::wrap).any(|a| {
                matches!(a.value().name(), "script" | "style" | "noscript")
                    || hidden_by_markup(&a)
                    || self.index_of(&a).is_some_and(|i| removed.contains(&i))
            });
            if !blocked {
                parts.push(&**text);
            }
        }
        normalize_text(&parts.join(" "))
    }

    fn closest(&self, el: ElementRef<'a>, selector: &Selector) -> Option<ElementRef<'a>> {
        ancestors_and_self(el).find(|a| selector.matches(a))
    }
}

fn ancestors_and_self<'a>(el: ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> {
    std::iter::once(el).chain(el.ancestors().filter_map(ElementRef::wrap))
}

fn hidden_by_markup(el: &ElementRef<'_>) -> bool {
    let v = el.value();
    if v.attr("hidden").is_some() {
        return true;
    }
    if v.name() == "input" && v.attr("type").is_some_and(|t| t.eq_ignore_ascii_case("hidden")) {
        return true;
    }
    if let Some(style) = v.attr("style") {
        let style: String = style
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_lowercase();
        if style.contains("display:none") || style.contains("visibility:hidden") {
            return true;
        }
    }
    v.classes().any(|c| c == "hidden" || c == "d-none")
}

fn is_disabled(el: &ElementRef<'_>) -> bool {
    let v = el.value();
    v.attr("disabled").is_some()
        || v.attr("aria-disabled").is_some_and(|a| a.eq_ignore_ascii_case("true"))
        || v.classes().any(|c| c == "disabled")
}

fn parse_selector(css: &str) -> DriverResult<Selector> {
    Selector::parse(css).map_err(|e| DriverError::InvalidLocator(format!("{}: {:?}", css, e)))
}

/// Effect of a click, applied after the parsed document is dropped.
enum ClickAction {
    Remove(Vec<usize>),
    Goto(String),
}

impl StaticPage {
    fn blank(site: Arc<SiteInner>) -> Self {
        site.open_tabs.fetch_add(1, Ordering::SeqCst);
        Self {
            site,
            state: Mutex::new(PageState {
                url: "about:blank".to_string(),
                html: "<html><body></body></html>".to_string(),
                generation: 0,
                removed: HashSet::new(),
                values: HashMap::new(),
            }),
            generation: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PageState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_open(&self) -> DriverResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DriverError::Navigation("tab is closed".to_string()));
        }
        Ok(())
    }

    /// Run `f` against a fresh parse of the current document.
    fn with_doc<R>(
        &self,
        f: impl for<'a> FnOnce(&Doc<'a>, &mut PageState) -> DriverResult<R>,
    ) -> DriverResult<R> {
        self.ensure_open()?;
        let mut state = self.lock();
        let html = Html::parse_document(&state.html);
        let doc = Doc::new(&html);
        f(&doc, &mut state)
    }

    /// Run `f` against a live element, rejecting stale or detached handles.
    fn with_element<R>(
        &self,
        handle: &ElementHandle,
        f: impl for<'a> FnOnce(&Doc<'a>, ElementRef<'a>, usize, &mut PageState) -> DriverResult<R>,
    ) -> DriverResult<R> {
        self.with_doc(|doc, state| {
            if handle.generation != state.generation {
                return Err(DriverError::StaleElement);
            }
            let idx = handle.id as usize;
            let el = doc.get(idx).ok_or(DriverError::StaleElement)?;
            if doc.is_removed(el, &state.removed) {
                return Err(DriverError::StaleElement);
            }
            f(doc, el, idx, state)
        })
    }

    fn navigate(&self, state: &mut PageState, url: &str) -> DriverResult<()> {
        let absolute = if state.url == "about:blank" {
            self.site.absolute(url)
        } else {
            resolve_href(&state.url, url).unwrap_or_else(|| self.site.absolute(url))
        };

        self.site
            .visits
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(absolute.clone());

        if self.site.unreachable.contains(&absolute) {
            return Err(DriverError::Navigation(format!(
                "net::ERR_CONNECTION_REFUSED at {}",
                absolute
            )));
        }

        let html = self
            .site
            .lookup_page(&absolute)
            .cloned()
            .unwrap_or_else(|| NOT_FOUND_HTML.to_string());

        state.url = absolute;
        state.html = html;
        state.generation = self.site.next_generation();
        state.removed.clear();
        state.values.clear();
        self.generation.store(state.generation, Ordering::SeqCst);
        Ok(())
    }

    fn link_target<'a>(doc: &Doc<'a>, el: ElementRef<'a>, base: &str) -> Option<String> {
        let anchor = match parse_selector("a[href], [data-href]") {
            Ok(sel) => doc.closest(el, &sel),
            Err(_) => None,
        }?;
        let v = anchor.value();
        let href = v.attr("href").or_else(|| v.attr("data-href"))?;
        resolve_href(base, href)
    }

    fn click_actions<'a>(
        doc: &Doc<'a>,
        el: ElementRef<'a>,
        mode: ClickMode,
        state: &PageState,
    ) -> DriverResult<Vec<ClickAction>> {
        let v = el.value();

        let blocked_mode = match mode {
            ClickMode::Normal => "normal",
            ClickMode::Force => "force",
            ClickMode::Synthetic => "synthetic",
        };
        if v
            .attr("data-click-block")
            .is_some_and(|b| b.split(',').any(|m| m.trim() == blocked_mode))
        {
            return Err(DriverError::NotActionable(
                "another element would receive the click".to_string(),
            ));
        }

        if mode == ClickMode::Normal && !doc.is_visible(el, &state.removed) {
            return Err(DriverError::NotActionable("element is not visible".to_string()));
        }

        if is_disabled(&el) {
            return if mode == ClickMode::Normal {
                Err(DriverError::NotActionable("element is disabled".to_string()))
            } else {
                Ok(Vec::new())
            };
        }

        let Some(script) = v.attr("data-on-click") else {
            return Ok(Self::link_target(doc, el, &state.url)
                .map(|url| vec![ClickAction::Goto(url)])
                .unwrap_or_default());
        };

        let mut actions = Vec::new();
        for step in script.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let (verb, arg) = step.split_once(':').unwrap_or((step, ""));
            match verb.trim() {
                "remove" => {
                    let sel = parse_selector(arg.trim())?;
                    let targets: Vec<usize> = doc
                        .all
                        .iter()
                        .enumerate()
                        .filter(|(_, e)| sel.matches(e))
                        .map(|(i, _)| i)
                        .collect();
                    actions.push(ClickAction::Remove(targets));
                }
                "remove-closest" => {
                    let sel = parse_selector(arg.trim())?;
                    if let Some(target) = doc.closest(el, &sel).and_then(|e| doc.index_of(&e)) {
                        actions.push(ClickAction::Remove(vec![target]));
                    }
                }
                "goto" => {
                    let target = resolve_href(&state.url, arg.trim())
                        .ok_or_else(|| DriverError::Navigation(format!("bad target {}", arg)))?;
                    actions.push(ClickAction::Goto(target));
                }
                "noop" => {}
                other => {
                    return Err(DriverError::Script(format!(
                        "unknown click action '{}'",
                        other
                    )))
                }
            }
        }
        Ok(actions)
    }
}

#[async_trait]
impl PageDriver for StaticPage {
    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    async fn url(&self) -> DriverResult<String> {
        self.ensure_open()?;
        Ok(self.lock().url.clone())
    }

    async fn goto(&self, url: &str) -> DriverResult<()> {
        self.ensure_open()?;
        let mut state = self.lock();
        self.navigate(&mut state, url)
    }

    async fn query_all(
        &self,
        locator: &str,
        scope: Option<&ElementHandle>,
    ) -> DriverResult<Vec<ElementHandle>> {
        let loc = Locator::parse(locator)?;
        let selector = parse_selector(loc.css_or_any())?;

        let collect = |doc: &Doc<'_>, root: Option<ElementRef<'_>>, state: &PageState| {
            let candidates: Vec<ElementRef<'_>> = match root {
                Some(root) => root.select(&selector).collect(),
                None => doc.all.iter().copied().filter(|e| selector.matches(e)).collect(),
            };
            let matched: Vec<ElementRef<'_>> = candidates
                .into_iter()
                .filter(|e| !doc.is_removed(*e, &state.removed))
                .filter(|e| !matches!(e.value().name(), "html" | "head" | "script" | "style"))
                .filter(|e| loc.text.is_none() || loc.matches_text(&doc.visible_text(*e, &state.removed)))
                .collect();

            let kept: Vec<&ElementRef<'_>> = if loc.innermost() {
                matched
                    .iter()
                    .filter(|outer| {
                        !matched.iter().any(|inner| {
                            inner != *outer
                                && inner
                                    .ancestors()
                                    .filter_map(ElementRef::wrap)
                                    .any(|a| a == **outer)
                        })
                    })
                    .collect()
            } else {
                matched.iter().collect()
            };

            kept.into_iter()
                .filter_map(|e| doc.index_of(e))
                .map(|idx| ElementHandle {
                    generation: state.generation,
                    id: idx as u64,
                })
                .collect::<Vec<_>>()
        };

        match scope {
            Some(handle) => self.with_element(handle, |doc, el, _, state| Ok(collect(doc, Some(el), state))),
            None => self.with_doc(|doc, state| Ok(collect(doc, None, state))),
        }
    }

    async fn is_visible(&self, element: &ElementHandle) -> DriverResult<bool> {
        self.with_element(element, |doc, el, _, state| Ok(doc.is_visible(el, &state.removed)))
    }

    async fn is_enabled(&self, element: &ElementHandle) -> DriverResult<bool> {
        self.with_element(element, |_, el, _, _| Ok(!is_disabled(&el)))
    }

    async fn text(&self, element: &ElementHandle) -> DriverResult<String> {
        self.with_element(element, |doc, el, _, state| Ok(doc.visible_text(el, &state.removed)))
    }

    async fn attribute(
        &self,
        element: &ElementHandle,
        name: &str,
    ) -> DriverResult<Option<String>> {
        self.with_element(element, |_, el, idx, state| {
            if name == "value" {
                if let Some(v) = state.values.get(&idx) {
                    return Ok(Some(v.clone()));
                }
            }
            Ok(el.value().attr(name).map(str::to_string))
        })
    }

    async fn tag_name(&self, element: &ElementHandle) -> DriverResult<String> {
        self.with_element(element, |_, el, _, _| Ok(el.value().name().to_lowercase()))
    }

    async fn click(&self, element: &ElementHandle, mode: ClickMode) -> DriverResult<()> {
        let actions =
            self.with_element(element, |doc, el, _, state| Self::click_actions(doc, el, mode, state))?;

        let mut state = self.lock();
        for action in actions {
            match action {
                ClickAction::Remove(targets) => state.removed.extend(targets),
                ClickAction::Goto(url) => {
                    self.navigate(&mut state, &url)?;
                    break;
                }
            }
        }
        Ok(())
    }

    async fn fill(&self, element: &ElementHandle, value: &str) -> DriverResult<()> {
        self.with_element(element, |_, el, idx, state| {
            match el.value().name() {
                "input" | "textarea" | "select" => {}
                other => {
                    return Err(DriverError::NotActionable(format!(
                        "cannot fill a <{}> element",
                        other
                    )))
                }
            }
            if is_disabled(&el) {
                return Err(DriverError::NotActionable("element is disabled".to_string()));
            }
            state.values.insert(idx, value.to_string());
            Ok(())
        })
    }

    async fn select_option(&self, element: &ElementHandle, value: &str) -> DriverResult<()> {
        self.with_element(element, |doc, el, idx, state| {
            if el.value().name() != "select" {
                return Err(DriverError::NotActionable("not a <select> element".to_string()));
            }
            let option_sel = parse_selector("option")?;
            let wanted = normalize_text(value).to_lowercase();
            let chosen = el.select(&option_sel).find_map(|opt| {
                let label = doc.visible_text(opt, &state.removed);
                let opt_value = opt.value().attr("value").map(str::to_string).unwrap_or(label.clone());
                if opt_value == value || normalize_text(&label).to_lowercase() == wanted {
                    Some(opt_value)
                } else {
                    None
                }
            });
            match chosen {
                Some(v) => {
                    state.values.insert(idx, v);
                    Ok(())
                }
                None => Err(DriverError::NotFound(format!("option '{}'", value))),
            }
        })
    }

    async fn remove(&self, element: &ElementHandle) -> DriverResult<()> {
        self.with_element(element, |_, _, idx, state| {
            state.removed.insert(idx);
            Ok(())
        })
    }

    async fn evaluate(&self, _script: &str) -> DriverResult<serde_json::Value> {
        Err(DriverError::Unsupported("script evaluation".to_string()))
    }

    async fn wait_for_idle(&self, _timeout: Duration) -> DriverResult<()> {
        self.ensure_open()?;
        tokio::task::yield_now().await;
        Ok(())
    }

    async fn body_text(&self) -> DriverResult<String> {
        self.with_doc(|doc, state| {
            let body = parse_selector("body")?;
            let root = doc
                .all
                .iter()
                .copied()
                .find(|e| body.matches(e))
                .or_else(|| doc.get(0));
            Ok(root
                .map(|r| doc.visible_text(r, &state.removed))
                .unwrap_or_default())
        })
    }

    async fn pdf(&self) -> DriverResult<Vec<u8>> {
        self.ensure_open()?;
        if !self.site.pdf_export {
            return Err(DriverError::Render(
                "PrintToPDF is not implemented".to_string(),
            ));
        }
        let url = self.lock().url.clone();
        Ok(format!("%PDF-1.4\n% snapshot of {}\n%%EOF\n", url).into_bytes())
    }

    async fn screenshot(&self, _full_page: bool) -> DriverResult<Vec<u8>> {
        self.ensure_open()?;
        if !self.site.screenshots {
            return Err(DriverError::Render("unable to capture screenshot".to_string()));
        }
        let url = self.lock().url.clone();
        let mut png = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        png.extend_from_slice(url.as_bytes());
        Ok(png)
    }

    async fn download(&self, url: &str) -> DriverResult<Download> {
        self.ensure_open()?;
        let base = self.lock().url.clone();
        let absolute = resolve_href(&base, url).unwrap_or_else(|| self.site.absolute(url));
        let file = self
            .site
            .files
            .get(&absolute)
            .ok_or_else(|| DriverError::Download(format!("HTTP 404 for {}", absolute)))?;

        let filename = Url::parse(&absolute)
            .ok()
            .and_then(|u| u.path_segments().and_then(|s| s.last().map(str::to_string)))
            .filter(|s| !s.is_empty());

        Ok(Download {
            url: absolute,
            filename,
            content_type: Some(file.content_type.clone()),
            data: file.data.clone(),
        })
    }

    async fn open_in_new_tab(
        &self,
        element: &ElementHandle,
    ) -> DriverResult<Option<Box<dyn PageDriver>>> {
        if !self.site.context_menu_tabs {
            return Ok(None);
        }
        // Scripted controls ignore the modifier and run in this tab.
        let scripted =
            self.with_element(element, |_, el, _, _| Ok(el.value().attr("data-on-click").is_some()))?;
        if scripted {
            self.click(element, ClickMode::Synthetic).await?;
            return Ok(None);
        }
        let target =
            self.with_element(element, |doc, el, _, state| Ok(Self::link_target(doc, el, &state.url)))?;
        match target {
            Some(url) => Ok(Some(self.open_tab(&url).await?)),
            None => Ok(None),
        }
    }

    async fn open_tab(&self, url: &str) -> DriverResult<Box<dyn PageDriver>> {
        self.ensure_open()?;
        let base = self.lock().url.clone();
        let absolute = resolve_href(&base, url).unwrap_or_else(|| self.site.absolute(url));
        let page = StaticPage::blank(self.site.clone());
        let navigated = {
            let mut state = page.lock();
            page.navigate(&mut state, &absolute)
        };
        if let Err(e) = navigated {
            page.close().await?;
            return Err(e);
        }
        Ok(Box::new(page))
    }

    async fn close(&self) -> DriverResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.site.open_tabs.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
