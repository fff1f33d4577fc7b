//! Signature-driven popup and modal dismissal.
//!
//! Each pass walks the signatures in priority order. A matched popup goes
//! through an escalating strategy chain until it disappears:
//!
//! 1. click the nested action control (accept/reject/close/dismiss set)
//! 2. click the popup element itself
//! 3. force-click the control (or the popup if no control was found)
//! 4. dispatch a synthetic click on the same target
//! 5. detach the popup node
//!
//! `Custom` signatures run their script in place of step 1. A signature whose
//! chain was exhausted is not retried in later passes of the same scan.
//!
//! The scan ends after a pass with no actionable match, or after the
//! configured number of passes.

use std::collections::HashSet;
use std::time::Duration;

use regex::{Regex, RegexBuilder};

use super::selector::SelectorResolver;
use crate::browser::{with_timeout, ClickMode, ElementHandle, PageDriver};
use crate::config::{CompanyProfile, PopupAction, PopupSignature, SelectorCandidateSet, SelectorMap};
use crate::error::DriverResult;
use crate::events::{Component, EventLog};

/// Outcome of one popup scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PopupScanReport {
    /// Signature names matched, once per match.
    pub found: Vec<String>,
    /// Signature names successfully dismissed.
    pub handled: Vec<String>,
    /// Signature names whose whole strategy chain failed.
    pub failed: Vec<String>,
    pub passes: u32,
    /// Strategy attempts across the scan.
    pub attempts: u32,
}

impl PopupScanReport {
    pub fn is_clean(&self) -> bool {
        self.found.is_empty()
    }
}

/// Dismissal strategies, in escalation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    Script,
    ActionControl,
    ClickPopup,
    ForceClick,
    SyntheticClick,
    RemoveNode,
}

impl Strategy {
    const CHAIN: [Strategy; 5] = [
        Strategy::ActionControl,
        Strategy::ClickPopup,
        Strategy::ForceClick,
        Strategy::SyntheticClick,
        Strategy::RemoveNode,
    ];

    fn as_str(&self) -> &'static str {
        match self {
            Self::Script => "script",
            Self::ActionControl => "action control",
            Self::ClickPopup => "popup click",
            Self::ForceClick => "force click",
            Self::SyntheticClick => "synthetic click",
            Self::RemoveNode => "node removal",
        }
    }
}

struct CompiledSignature {
    signature: PopupSignature,
    candidates: SelectorCandidateSet,
    patterns: Vec<Regex>,
}

/// Popup scanner for one company profile.
pub struct PopupDismisser {
    signatures: Vec<CompiledSignature>,
    actions: SelectorMap,
    resolver: SelectorResolver,
    max_passes: u32,
    settle: Duration,
}

impl PopupDismisser {
    pub fn new(
        mut signatures: Vec<PopupSignature>,
        actions: SelectorMap,
        resolver: SelectorResolver,
        max_passes: u32,
        settle: Duration,
    ) -> Self {
        signatures.sort_by_key(|s| s.priority);
        let signatures = signatures
            .into_iter()
            .map(|signature| CompiledSignature {
                candidates: SelectorCandidateSet::new(&signature.name, &signature.selectors),
                patterns: signature
                    .text_patterns
                    .iter()
                    .filter_map(|p| compile_pattern(p))
                    .collect(),
                signature,
            })
            .collect();

        Self {
            signatures,
            actions,
            resolver,
            max_passes: max_passes.max(1),
            settle,
        }
    }

    pub fn from_profile(profile: &CompanyProfile, resolver: SelectorResolver) -> Self {
        Self::new(
            profile.popups.clone(),
            profile.selectors.clone(),
            resolver,
            profile.popup_max_passes,
            Duration::from_millis(profile.timeouts.popup_settle_ms),
        )
    }

    /// Scan the page and dismiss whatever matches.
    pub async fn scan(&self, page: &dyn PageDriver, events: &EventLog) -> PopupScanReport {
        let mut report = PopupScanReport::default();
        let mut exhausted: HashSet<&str> = HashSet::new();

        for pass in 1..=self.max_passes {
            report.passes = pass;
            let mut actionable = 0;

            for compiled in &self.signatures {
                let sig = &compiled.signature;
                if exhausted.contains(sig.name.as_str()) {
                    continue;
                }
                let Some(popup) = self.matches(page, compiled).await else {
                    continue;
                };
                report.found.push(sig.name.clone());

                match &sig.action {
                    PopupAction::Ignore => {
                        events.debug(Component::Popup, format!("Ignoring popup '{}'", sig.name));
                        continue;
                    }
                    PopupAction::Wait => {
                        actionable += 1;
                        if wait_until_gone(page, &popup, Duration::from_millis(sig.timeout_ms)).await
                        {
                            events.info(Component::Popup, format!("Popup '{}' went away", sig.name));
                            report.handled.push(sig.name.clone());
                        } else {
                            events.warn(
                                Component::Popup,
                                format!("Popup '{}' still present after {}ms", sig.name, sig.timeout_ms),
                            );
                            report.failed.push(sig.name.clone());
                            exhausted.insert(&sig.name);
                        }
                        continue;
                    }
                    _ => actionable += 1,
                }

                match self.dismiss(page, sig, &popup, &mut report.attempts).await {
                    Some(strategy) => {
                        events.info(
                            Component::Popup,
                            format!("Dismissed '{}' via {}", sig.name, strategy.as_str()),
                        );
                        report.handled.push(sig.name.clone());
                        if !self.settle.is_zero() {
                            tokio::time::sleep(self.settle).await;
                        }
                    }
                    None => {
                        events.warn(
                            Component::Popup,
                            format!("Could not dismiss '{}' with any strategy", sig.name),
                        );
                        report.failed.push(sig.name.clone());
                        exhausted.insert(&sig.name);
                    }
                }
            }

            if actionable == 0 {
                break;
            }
        }

        report
    }

    /// Visible popup element for the signature, honouring text patterns.
    async fn matches(&self, page: &dyn PageDriver, compiled: &CompiledSignature) -> Option<ElementHandle> {
        let popup = self.resolver.resolve(page, &compiled.candidates, None).await?;
        if compiled.patterns.is_empty() {
            return Some(popup);
        }
        let text = with_timeout(self.resolver.timeout(), page.text(&popup)).await.ok()?;
        compiled
            .patterns
            .iter()
            .any(|p| p.is_match(&text))
            .then_some(popup)
    }

    /// Walk the strategy chain; returns the strategy that worked. At most
    /// one attempt per strategy.
    async fn dismiss(
        &self,
        page: &dyn PageDriver,
        sig: &PopupSignature,
        popup: &ElementHandle,
        attempts: &mut u32,
    ) -> Option<Strategy> {
        let budget = Duration::from_millis(sig.timeout_ms);

        let script = match &sig.action {
            PopupAction::Custom(script) => Some(script.as_str()),
            _ => None,
        };

        let control = match sig.action.control_role() {
            Some(role) => {
                self.resolver
                    .resolve(page, &self.actions.get(role), Some(popup))
                    .await
            }
            None => None,
        };

        let chain = Strategy::CHAIN.map(|s| match (s, script) {
            (Strategy::ActionControl, Some(_)) => Strategy::Script,
            _ => s,
        });

        for strategy in chain {
            let target = control.as_ref().unwrap_or(popup);
            let attempt: DriverResult<()> = match strategy {
                Strategy::Script => match script {
                    Some(js) => with_timeout(budget, page.evaluate(js)).await.map(|_| ()),
                    None => continue,
                },
                Strategy::ActionControl => match &control {
                    Some(c) => with_timeout(budget, page.click(c, ClickMode::Normal)).await,
                    None => continue,
                },
                Strategy::ClickPopup => {
                    with_timeout(budget, page.click(popup, ClickMode::Normal)).await
                }
                Strategy::ForceClick => with_timeout(budget, page.click(target, ClickMode::Force)).await,
                Strategy::SyntheticClick => {
                    with_timeout(budget, page.click(target, ClickMode::Synthetic)).await
                }
                Strategy::RemoveNode => with_timeout(budget, page.remove(popup)).await,
            };
            *attempts += 1;

            match attempt {
                Ok(()) if is_gone(page, popup).await => return Some(strategy),
                Ok(()) => tracing::debug!("'{}' survived {}", sig.name, strategy.as_str()),
                Err(e) => tracing::debug!("'{}' {} failed: {}", sig.name, strategy.as_str(), e),
            }
        }
        None
    }
}

/// Case-insensitive regex; invalid patterns match literally.
fn compile_pattern(pattern: &str) -> Option<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .or_else(|_| {
            RegexBuilder::new(&regex::escape(pattern))
                .case_insensitive(true)
                .build()
        })
        .ok()
}

/// Gone means detached, stale or no longer visible.
async fn is_gone(page: &dyn PageDriver, popup: &ElementHandle) -> bool {
    !matches!(page.is_visible(popup).await, Ok(true))
}

async fn wait_until_gone(page: &dyn PageDriver, popup: &ElementHandle, timeout: Duration) -> bool {
    let started = tokio::time::Instant::now();
    loop {
        if is_gone(page, popup).await {
            return true;
        }
        if started.elapsed() >= timeout {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use super::*;
    use crate::browser::{Download, StaticPage, StaticSite};
    use crate::error::DriverError;
    use crate::config::popups::common_signatures;
    use crate::config::roles;

    fn actions() -> SelectorMap {
        let mut map = SelectorMap::new();
        map.set(roles::ACCEPT_BUTTON, &["button.aceptar", "button >> text=Aceptar"]);
        map.set(roles::REJECT_BUTTON, &["button >> text=No, gracias"]);
        map.set(roles::CLOSE_BUTTON, &["button.close"]);
        map.set(roles::DISMISS_BUTTON, &["button >> text=Continuar"]);
        map
    }

    fn dismisser() -> PopupDismisser {
        PopupDismisser::new(
            common_signatures(),
            actions(),
            SelectorResolver::new(Duration::from_millis(200)),
            3,
            Duration::ZERO,
        )
    }

    async fn open(body: &str) -> StaticPage {
        let html = format!("<html><body><div id=\"listado\">Listado</div>{}</body></html>", body);
        StaticSite::builder("https://portal.test/")
            .unwrap()
            .page("/", html)
            .build()
            .open("/")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_no_popups() {
        let page = open("").await;
        let report = dismisser().scan(&page, &EventLog::new()).await;
        assert!(report.found.is_empty());
        assert!(report.handled.is_empty());
        assert_eq!(report.passes, 1);
        assert_eq!(report.attempts, 0);
    }

    #[tokio::test]
    async fn test_unmatched_popup_is_left_alone() {
        let page = open(r#"<div class="promo-flotante">Promo</div>"#).await;
        let report = dismisser().scan(&page, &EventLog::new()).await;
        assert_eq!(report, PopupScanReport { passes: 1, ..Default::default() });
    }

    #[tokio::test]
    async fn test_stacked_popups_each_handled() {
        let page = open(
            r#"<div class="cookie-consent">Usamos cookies
                 <button class="aceptar" data-on-click="remove-closest:.cookie-consent">Aceptar</button></div>
               <div class="modal-encuesta">Califique nuestra encuesta
                 <button data-on-click="remove-closest:.modal-encuesta">No, gracias</button></div>
               <div class="swal2-popup">Aviso importante
                 <button class="close" data-on-click="remove-closest:.swal2-popup">x</button></div>"#,
        )
        .await;
        let events = EventLog::new();
        let report = dismisser().scan(&page, &events).await;
        assert_eq!(
            report.handled,
            vec!["cookie_consent", "satisfaction_survey", "notice_dialog"]
        );
        assert!(report.failed.is_empty());
        assert_eq!(report.attempts, 3);
        assert_eq!(report.passes, 2);
        assert!(page.body_text().await.unwrap().contains("Listado"));
    }

    #[tokio::test]
    async fn test_text_pattern_required() {
        // cookie-ish class but no cookie text
        let page = open(r#"<div class="cookie-consent">Bienvenido</div>"#).await;
        let report = dismisser().scan(&page, &EventLog::new()).await;
        assert!(report.found.is_empty());
    }

    #[tokio::test]
    async fn test_escalates_to_synthetic_click() {
        let page = open(
            r#"<div class="swal2-popup">Aviso
                 <button class="close" data-click-block="normal,force"
                         data-on-click="remove-closest:.swal2-popup">x</button></div>"#,
        )
        .await;
        let report = dismisser().scan(&page, &EventLog::new()).await;
        assert_eq!(report.handled, vec!["notice_dialog"]);
        // control, popup click, force, synthetic
        assert_eq!(report.attempts, 4);
    }

    #[tokio::test]
    async fn test_falls_back_to_node_removal() {
        let page = open(r#"<div class="modal show">Sin botones</div>"#).await;
        let report = dismisser().scan(&page, &EventLog::new()).await;
        assert_eq!(report.handled, vec!["notice_dialog"]);
        // no control: popup click, force, synthetic, remove
        assert_eq!(report.attempts, 4);
    }

    fn single(sig: PopupSignature) -> PopupDismisser {
        PopupDismisser::new(
            vec![sig],
            actions(),
            SelectorResolver::new(Duration::from_millis(200)),
            3,
            Duration::ZERO,
        )
    }

    #[tokio::test]
    async fn test_blocked_clicks_fall_through_to_removal() {
        let d = single(PopupSignature::new("stuck", &["#stuck"], PopupAction::Close, 1));
        // Every click mode is intercepted; only node removal works.
        let page = open(
            r#"<div id="stuck" data-click-block="normal,force,synthetic">A</div>"#,
        )
        .await;
        let report = d.scan(&page, &EventLog::new()).await;
        assert_eq!(report.attempts, 4);
        assert_eq!(report.handled, vec!["stuck"]);
    }

    /// A page with one element that matches every locator and only
    /// disappears when told to.
    #[derive(Default)]
    struct OverlayPage {
        hidden: AtomicBool,
        /// Visibility checks answered before the overlay goes away by itself.
        hide_after_checks: Option<u32>,
        checks: AtomicU32,
        script_hides: bool,
        scripts: AtomicU32,
    }

    #[async_trait::async_trait]
    impl PageDriver for OverlayPage {
        fn generation(&self) -> u64 {
            0
        }
        async fn url(&self) -> DriverResult<String> {
            Ok("https://portal.test/".to_string())
        }
        async fn goto(&self, _url: &str) -> DriverResult<()> {
            Ok(())
        }
        async fn query_all(&self, _locator: &str, _scope: Option<&ElementHandle>) -> DriverResult<Vec<ElementHandle>> {
            Ok(vec![ElementHandle { generation: 0, id: 1 }])
        }
        async fn is_visible(&self, _element: &ElementHandle) -> DriverResult<bool> {
            let checks = self.checks.fetch_add(1, Ordering::SeqCst) + 1;
            if matches!(self.hide_after_checks, Some(n) if checks > n) {
                self.hidden.store(true, Ordering::SeqCst);
            }
            Ok(!self.hidden.load(Ordering::SeqCst))
        }
        async fn is_enabled(&self, _element: &ElementHandle) -> DriverResult<bool> {
            Ok(true)
        }
        async fn text(&self, _element: &ElementHandle) -> DriverResult<String> {
            Ok("Aviso".to_string())
        }
        async fn attribute(&self, _element: &ElementHandle, _name: &str) -> DriverResult<Option<String>> {
            Ok(None)
        }
        async fn tag_name(&self, _element: &ElementHandle) -> DriverResult<String> {
            Ok("div".to_string())
        }
        async fn click(&self, _element: &ElementHandle, _mode: ClickMode) -> DriverResult<()> {
            Ok(())
        }
        async fn fill(&self, _element: &ElementHandle, _value: &str) -> DriverResult<()> {
            Ok(())
        }
        async fn select_option(&self, _element: &ElementHandle, _value: &str) -> DriverResult<()> {
            Ok(())
        }
        async fn remove(&self, _element: &ElementHandle) -> DriverResult<()> {
            Ok(())
        }
        async fn evaluate(&self, _script: &str) -> DriverResult<serde_json::Value> {
            self.scripts.fetch_add(1, Ordering::SeqCst);
            if self.script_hides {
                self.hidden.store(true, Ordering::SeqCst);
            }
            Ok(serde_json::Value::Null)
        }
        async fn wait_for_idle(&self, _timeout: Duration) -> DriverResult<()> {
            Ok(())
        }
        async fn body_text(&self) -> DriverResult<String> {
            Ok(String::new())
        }
        async fn pdf(&self) -> DriverResult<Vec<u8>> {
            Err(DriverError::Unsupported("pdf".to_string()))
        }
        async fn screenshot(&self, _full_page: bool) -> DriverResult<Vec<u8>> {
            Err(DriverError::Unsupported("screenshot".to_string()))
        }
        async fn download(&self, _url: &str) -> DriverResult<Download> {
            Err(DriverError::Unsupported("download".to_string()))
        }
        async fn open_in_new_tab(&self, _element: &ElementHandle) -> DriverResult<Option<Box<dyn PageDriver>>> {
            Ok(None)
        }
        async fn open_tab(&self, _url: &str) -> DriverResult<Box<dyn PageDriver>> {
            Err(DriverError::Unsupported("tabs".to_string()))
        }
        async fn close(&self) -> DriverResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_undismissable_popup_tried_once_per_scan() {
        let d = single(PopupSignature::new("stuck", &["#stuck"], PopupAction::Close, 1));
        let page = OverlayPage::default();
        let report = d.scan(&page, &EventLog::new()).await;
        // control, popup click, force, synthetic, remove
        assert_eq!(report.attempts, 5);
        assert_eq!(report.failed, vec!["stuck"]);
        assert!(report.handled.is_empty());
    }

    #[tokio::test]
    async fn test_wait_reports_popup_that_goes_away() {
        let mut sig = PopupSignature::new("cargando", &["#cargando"], PopupAction::Wait, 1);
        sig.timeout_ms = 2_000;
        let page = OverlayPage {
            hide_after_checks: Some(3),
            ..Default::default()
        };
        let report = single(sig).scan(&page, &EventLog::new()).await;
        assert_eq!(report.handled, vec!["cargando"]);
        assert!(report.failed.is_empty());
        assert_eq!(report.attempts, 0);
    }

    #[tokio::test]
    async fn test_wait_reports_popup_that_stays() {
        let mut sig = PopupSignature::new("cargando", &["#cargando"], PopupAction::Wait, 1);
        sig.timeout_ms = 250;
        let page = OverlayPage::default();
        let report = single(sig).scan(&page, &EventLog::new()).await;
        assert!(report.handled.is_empty());
        assert_eq!(report.failed, vec!["cargando"]);
        assert_eq!(report.found, vec!["cargando"]);
    }

    #[tokio::test]
    async fn test_custom_script_dismisses() {
        let sig = PopupSignature::new(
            "promo",
            &["#promo"],
            PopupAction::Custom("cerrarPromo()".into()),
            1,
        );
        let page = OverlayPage {
            script_hides: true,
            ..Default::default()
        };
        let report = single(sig).scan(&page, &EventLog::new()).await;
        assert_eq!(report.handled, vec!["promo"]);
        assert_eq!(report.attempts, 1);
        assert_eq!(page.scripts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_custom_script_failure_falls_through_to_chain() {
        // Script evaluation is unsupported on static pages.
        let sig = PopupSignature::new(
            "promo",
            &[".promo"],
            PopupAction::Custom("cerrarPromo()".into()),
            1,
        );
        let page = open(
            r#"<div class="promo">Oferta
                 <button data-on-click="remove-closest:.promo">Continuar</button></div>"#,
        )
        .await;
        let report = single(sig).scan(&page, &EventLog::new()).await;
        assert_eq!(report.handled, vec!["promo"]);
        // script, then popup click misses the button, then force-click on it
        assert_eq!(report.attempts, 3);
        assert!(!page.body_text().await.unwrap().contains("Oferta"));
    }

    #[tokio::test]
    async fn test_custom_attempts_stay_within_chain_length() {
        let sig = PopupSignature::new(
            "promo",
            &["#promo"],
            PopupAction::Custom("cerrarPromo()".into()),
            1,
        );
        let page = OverlayPage::default();
        let report = single(sig).scan(&page, &EventLog::new()).await;
        assert_eq!(report.attempts, 5);
        assert_eq!(report.failed, vec!["promo"]);
    }

    #[tokio::test]
    async fn test_ignore_does_not_act() {
        let d = single(PopupSignature::new("chat", &["#chat"], PopupAction::Ignore, 1));
        let page = open(r#"<div id="chat">Chat</div>"#).await;
        let report = d.scan(&page, &EventLog::new()).await;
        assert_eq!(report.found, vec!["chat"]);
        assert!(report.handled.is_empty());
        assert_eq!(report.attempts, 0);
        assert!(page.body_text().await.unwrap().contains("Chat"));
    }

    #[test]
    fn test_invalid_pattern_is_literal() {
        let re = compile_pattern("(encuesta").unwrap();
        assert!(re.is_match("Una (ENCUESTA rápida"));
    }
}
