//! Listing filters: date range and status.

use std::time::Duration;

use chrono::format::{Item, StrftimeItems};
use chrono::{Days, NaiveDate};

use super::selector::SelectorResolver;
use crate::browser::{with_timeout, ClickMode, ElementHandle, PageDriver};
use crate::config::{roles, CompanyProfile, SelectorMap};
use crate::error::{DriverError, DriverResult};
use crate::events::{Component, EventLog};

const ISO_FORMAT: &str = "%Y-%m-%d";

/// Requested listing filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterRequest {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub status: Option<String>,
}

impl FilterRequest {
    /// `[today - days_back, today]`.
    pub fn last_days(today: NaiveDate, days_back: u32, status: Option<String>) -> Self {
        let start = today
            .checked_sub_days(Days::new(days_back as u64))
            .unwrap_or(NaiveDate::MIN);
        Self {
            start,
            end: today,
            status,
        }
    }
}

/// How the portal takes dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputStyle {
    /// `<input type="date">`, ISO values.
    IsoDate,
    /// Free-text inputs in the company's date format.
    SplitText,
    /// `<select>` with one option per date.
    Dropdown,
}

/// Applies [`FilterRequest`]s to a listing page.
pub struct FilterConfigurator {
    resolver: SelectorResolver,
    selectors: SelectorMap,
    date_format: String,
    idle_timeout: Duration,
    action_timeout: Duration,
}

impl FilterConfigurator {
    pub fn new(
        resolver: SelectorResolver,
        selectors: SelectorMap,
        date_format: &str,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            resolver,
            selectors,
            date_format: valid_format(date_format).to_string(),
            idle_timeout,
            action_timeout: resolver.timeout().max(Duration::from_secs(5)),
        }
    }

    pub fn from_profile(profile: &CompanyProfile, resolver: SelectorResolver) -> Self {
        Self::new(
            resolver,
            profile.selectors.clone(),
            &profile.date_format,
            Duration::from_millis(profile.timeouts.network_idle_ms),
        )
    }

    /// Inspect an input element to decide how to fill it.
    pub async fn detect_style(&self, page: &dyn PageDriver, input: &ElementHandle) -> InputStyle {
        let tag = page.tag_name(input).await.unwrap_or_default();
        if tag == "select" {
            return InputStyle::Dropdown;
        }
        let kind = page.attribute(input, "type").await.ok().flatten();
        if kind.is_some_and(|t| t.eq_ignore_ascii_case("date")) {
            InputStyle::IsoDate
        } else {
            InputStyle::SplitText
        }
    }

    /// Apply the filter. `false` means the listing stays unfiltered.
    pub async fn apply(
        &self,
        page: &dyn PageDriver,
        request: &FilterRequest,
        events: &EventLog,
    ) -> bool {
        if request.start > request.end {
            events.warn(
                Component::Filter,
                format!("Empty date range {} > {}, not filtering", request.start, request.end),
            );
            return false;
        }

        let dates_applied = match self.apply_dates(page, request).await {
            Ok(style) => {
                events.info(
                    Component::Filter,
                    format!(
                        "Date range {} .. {} set ({:?} inputs)",
                        request.start, request.end, style
                    ),
                );
                true
            }
            Err(e) => {
                events.warn(Component::Filter, format!("Date filter not applied: {}", e));
                false
            }
        };

        let status_applied = match &request.status {
            Some(status) => match self.apply_status(page, status).await {
                Ok(()) => true,
                Err(e) => {
                    events.warn(
                        Component::Filter,
                        format!("Status filter '{}' not applied: {}", status, e),
                    );
                    false
                }
            },
            None => true,
        };

        if !dates_applied && request.status.is_none() {
            return false;
        }

        if let Some(button) = self
            .resolver
            .resolve(page, &self.selectors.get(roles::APPLY_FILTER), None)
            .await
        {
            if let Err(e) = with_timeout(self.action_timeout, page.click(&button, ClickMode::Normal)).await
            {
                events.warn(Component::Filter, format!("Apply button click failed: {}", e));
                return false;
            }
            if let Err(e) = page.wait_for_idle(self.idle_timeout).await {
                events.debug(Component::Filter, format!("Network idle wait: {}", e));
            }
        }

        dates_applied && status_applied
    }

    async fn apply_dates(&self, page: &dyn PageDriver, request: &FilterRequest) -> DriverResult<InputStyle> {
        let start_input = self
            .resolver
            .resolve(page, &self.selectors.get(roles::START_DATE_INPUT), None)
            .await
            .ok_or_else(|| DriverError::NotFound(roles::START_DATE_INPUT.to_string()))?;
        let style = self.detect_style(page, &start_input).await;
        self.set_date(page, &start_input, style, request.start).await?;

        match self
            .resolver
            .resolve(page, &self.selectors.get(roles::END_DATE_INPUT), None)
            .await
        {
            Some(end_input) => {
                let end_style = self.detect_style(page, &end_input).await;
                self.set_date(page, &end_input, end_style, request.end).await?;
            }
            None if style == InputStyle::SplitText => {
                return Err(DriverError::NotFound(roles::END_DATE_INPUT.to_string()));
            }
            None => {}
        }
        Ok(style)
    }

    async fn set_date(
        &self,
        page: &dyn PageDriver,
        input: &ElementHandle,
        style: InputStyle,
        date: NaiveDate,
    ) -> DriverResult<()> {
        let budget = self.action_timeout;
        match style {
            InputStyle::IsoDate => {
                with_timeout(budget, page.fill(input, &date.format(ISO_FORMAT).to_string())).await
            }
            InputStyle::SplitText => {
                let value = date.format(&self.date_format).to_string();
                with_timeout(budget, page.fill(input, &value)).await
            }
            InputStyle::Dropdown => {
                let local = date.format(&self.date_format).to_string();
                match with_timeout(budget, page.select_option(input, &local)).await {
                    Ok(()) => Ok(()),
                    Err(_) => {
                        let iso = date.format(ISO_FORMAT).to_string();
                        with_timeout(budget, page.select_option(input, &iso)).await
                    }
                }
            }
        }
    }

    async fn apply_status(&self, page: &dyn PageDriver, status: &str) -> DriverResult<()> {
        let select = self
            .resolver
            .resolve(page, &self.selectors.get(roles::STATUS_FILTER), None)
            .await
            .ok_or_else(|| DriverError::NotFound(roles::STATUS_FILTER.to_string()))?;
        with_timeout(self.action_timeout, page.select_option(&select, status)).await
    }
}

/// chrono panics when formatting with a bad pattern.
fn valid_format(format: &str) -> &str {
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        tracing::warn!("Invalid date_format '{}', using %d/%m/%Y", format);
        "%d/%m/%Y"
    } else {
        format
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{StaticPage, StaticSite};

    fn selectors() -> SelectorMap {
        let mut map = SelectorMap::new();
        map.set(roles::START_DATE_INPUT, &["#desde"]);
        map.set(roles::END_DATE_INPUT, &["#hasta"]);
        map.set(roles::STATUS_FILTER, &["#estado"]);
        map.set(roles::APPLY_FILTER, &["#buscar"]);
        map
    }

    fn configurator() -> FilterConfigurator {
        FilterConfigurator::new(
            SelectorResolver::new(Duration::from_millis(200)),
            selectors(),
            "%d/%m/%Y",
            Duration::from_millis(200),
        )
    }

    async fn open(form: &str) -> StaticPage {
        StaticSite::builder("https://portal.test/")
            .unwrap()
            .page("/", format!("<html><body><form>{}</form></body></html>", form))
            .page("/resultados", "<html><body>Resultados</body></html>")
            .build()
            .open("/")
            .await
            .unwrap()
    }

    fn request(status: Option<&str>) -> FilterRequest {
        FilterRequest::last_days(
            NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
            30,
            status.map(str::to_string),
        )
    }

    #[test]
    fn test_last_days() {
        let r = request(None);
        assert_eq!(r.start, NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
        assert_eq!(r.end, NaiveDate::from_ymd_opt(2024, 3, 31).unwrap());
    }

    #[tokio::test]
    async fn test_style_detection() {
        let page = open(
            r#"<input id="desde" type="date"><input id="hasta" type="text">
               <select id="estado"><option>Abierta</option></select>"#,
        )
        .await;
        let c = configurator();
        let all = page.query_all("input, select", None).await.unwrap();
        assert_eq!(c.detect_style(&page, &all[0]).await, InputStyle::IsoDate);
        assert_eq!(c.detect_style(&page, &all[1]).await, InputStyle::SplitText);
        assert_eq!(c.detect_style(&page, &all[2]).await, InputStyle::Dropdown);
    }

    #[tokio::test]
    async fn test_split_text_with_status_and_apply() {
        let page = open(
            r#"<input id="desde" type="text"><input id="hasta" type="text">
               <select id="estado"><option value="A">Abierta</option><option value="C">Cerrada</option></select>
               <button id="buscar" data-on-click="goto:/resultados">Buscar</button>"#,
        )
        .await;
        let inputs = page.query_all("input", None).await.unwrap();
        // read back before the apply click navigates away
        let c = configurator();
        assert!(c.apply_dates(&page, &request(None)).await.is_ok());
        assert_eq!(
            page.attribute(&inputs[0], "value").await.unwrap().as_deref(),
            Some("01/03/2024")
        );

        assert!(c.apply(&page, &request(Some("Cerrada")), &EventLog::new()).await);
        assert!(page.url().await.unwrap().ends_with("/resultados"));
    }

    #[tokio::test]
    async fn test_dropdown_dates_fall_back_to_iso_values() {
        let page = open(
            r#"<select id="desde"><option value="">--</option><option>01/03/2024</option></select>
               <select id="hasta"><option value="2024-03-30">30 mar</option>
                 <option value="2024-03-31">31 mar</option></select>"#,
        )
        .await;
        let selects = page.query_all("select", None).await.unwrap();

        let style = configurator().apply_dates(&page, &request(None)).await.unwrap();
        assert_eq!(style, InputStyle::Dropdown);
        assert_eq!(
            page.attribute(&selects[0], "value").await.unwrap().as_deref(),
            Some("01/03/2024")
        );
        assert_eq!(
            page.attribute(&selects[1], "value").await.unwrap().as_deref(),
            Some("2024-03-31")
        );
    }

    #[tokio::test]
    async fn test_dropdown_without_matching_date_fails() {
        let page = open(
            r#"<select id="desde"><option value="2023-01-01">2023</option></select>
               <select id="hasta"><option value="2023-12-31">2023</option></select>"#,
        )
        .await;
        assert!(configurator().apply_dates(&page, &request(None)).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_inputs_leave_listing_unfiltered() {
        let page = open(r#"<input id="q" type="text">"#).await;
        let events = EventLog::new();
        assert!(!configurator().apply(&page, &request(None), &events).await);
        assert_eq!(page.url().await.unwrap(), "https://portal.test/");
        assert!(events.count_at_least(crate::events::Severity::Warn) >= 1);
    }

    #[tokio::test]
    async fn test_unknown_status_option_reports_false() {
        let page = open(
            r#"<input id="desde" type="date"><input id="hasta" type="date">
               <select id="estado"><option value="A">Abierta</option></select>"#,
        )
        .await;
        assert!(!configurator().apply(&page, &request(Some("Anulada")), &EventLog::new()).await);
    }

    #[test]
    fn test_invalid_format_falls_back() {
        assert_eq!(valid_format("%Q-%d"), "%d/%m/%Y");
        assert_eq!(valid_format("%Y%m%d"), "%Y%m%d");
    }
}
