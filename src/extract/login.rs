//! Credential hand-off for portals behind a login form.

use std::time::Duration;

use super::popup::{PopupDismisser, PopupScanReport};
use super::selector::SelectorResolver;
use crate::browser::{with_timeout, ClickMode, PageDriver};
use crate::config::{roles, CompanyProfile, LoginConfig, SelectorMap};
use crate::error::ExtractionError;
use crate::events::{Component, EventLog};

/// Fills the login form and confirms the session. Every failure is fatal
/// for the run.
pub struct LoginHandOff {
    login_url: String,
    login: LoginConfig,
    resolver: SelectorResolver,
    selectors: SelectorMap,
    navigation_timeout: Duration,
    idle_timeout: Duration,
}

impl LoginHandOff {
    /// `None` when the profile has no login section.
    pub fn from_profile(profile: &CompanyProfile, resolver: SelectorResolver) -> Option<Self> {
        let login = profile.login.clone()?;
        let login_url = profile.login_url()?;
        Some(Self {
            login_url,
            login,
            resolver,
            selectors: profile.selectors.clone(),
            navigation_timeout: Duration::from_millis(profile.timeouts.navigation_ms),
            idle_timeout: Duration::from_millis(profile.timeouts.network_idle_ms),
        })
    }

    /// Log in; returns the popup scan of the login page.
    pub async fn perform(
        &self,
        page: &dyn PageDriver,
        popups: &PopupDismisser,
        events: &EventLog,
    ) -> Result<PopupScanReport, ExtractionError> {
        let fatal = |msg: String| ExtractionError::FatalSetup(format!("login: {}", msg));

        let (Some(username), Some(password)) = (&self.login.username, &self.login.password) else {
            return Err(fatal("no credentials configured".to_string()));
        };

        with_timeout(self.navigation_timeout, page.goto(&self.login_url))
            .await
            .map_err(|e| fatal(format!("{} unreachable: {}", self.login_url, e)))?;
        let _ = page.wait_for_idle(self.idle_timeout).await;
        let report = popups.scan(page, events).await;

        let budget = self.resolver.timeout().max(Duration::from_secs(5));
        for (role, value) in [
            (roles::LOGIN_USERNAME, username),
            (roles::LOGIN_PASSWORD, password),
        ] {
            let input = self
                .resolver
                .resolve(page, &self.selectors.get(role), None)
                .await
                .ok_or_else(|| fatal(format!("{} field not found", role)))?;
            with_timeout(budget, page.fill(&input, value))
                .await
                .map_err(|e| fatal(format!("{} not fillable: {}", role, e)))?;
        }

        let submit = self
            .resolver
            .resolve(page, &self.selectors.get(roles::LOGIN_SUBMIT), None)
            .await
            .ok_or_else(|| fatal("submit control not found".to_string()))?;
        if with_timeout(budget, page.click(&submit, ClickMode::Normal))
            .await
            .is_err()
        {
            with_timeout(budget, page.click(&submit, ClickMode::Force))
                .await
                .map_err(|e| fatal(format!("submit failed: {}", e)))?;
        }
        let _ = page.wait_for_idle(self.idle_timeout).await;

        self.verify(page).await.map_err(fatal)?;
        events.info(Component::Login, format!("Logged in as {}", username));
        Ok(report)
    }

    async fn verify(&self, page: &dyn PageDriver) -> Result<(), String> {
        let logged_in = self.selectors.get(roles::LOGGED_IN);
        let login_error = self.selectors.get(roles::LOGIN_ERROR);

        if !logged_in.is_empty() {
            if self
                .resolver
                .wait_for(page, &logged_in, self.navigation_timeout)
                .await
                .is_some()
            {
                return Ok(());
            }
            let reason = self
                .resolver
                .resolve_text(page, &login_error, None)
                .await
                .unwrap_or_else(|| "no authenticated view appeared".to_string());
            return Err(reason);
        }

        match self.resolver.resolve_text(page, &login_error, None).await {
            Some(message) => Err(format!("portal rejected credentials: {}", message)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{StaticPage, StaticSite};
    use crate::config::CompanyConfig;

    const LOGIN: &str = r#"<html><body><form>
        <input id="usuario" type="text"><input id="clave" type="password">
        <button id="entrar" data-on-click="goto:/inicio">Entrar</button>
    </form></body></html>"#;

    const LOGIN_REJECTS: &str = r#"<html><body><form>
        <input id="usuario" type="text"><input id="clave" type="password">
        <button id="entrar" data-on-click="goto:/login-error">Entrar</button>
    </form></body></html>"#;

    const LOGIN_WITH_COOKIES: &str = r#"<html><body>
        <div class="cookie-consent">Este sitio usa cookies
          <button data-on-click="remove-closest:.cookie-consent">Aceptar</button></div>
        <form><input id="usuario" type="text"><input id="clave" type="password">
        <button id="entrar" data-on-click="goto:/inicio">Entrar</button></form>
    </body></html>"#;

    fn profile(login_page: &str, with_password: bool) -> CompanyProfile {
        let mut toml = format!(
            r##"
base_url = "https://portal.test/"
kind = "custom"

[login]
url = "{}"
username = "operador"

[selectors]
login_username = ["#usuario"]
login_password = ["#clave"]
login_submit = ["#entrar"]
logged_in = ["#menu-usuario"]
login_error = [".alert-danger"]

[[fields]]
name = "radicado"
selectors = ["#radicado"]

[timeouts]
selector_ms = 100
navigation_ms = 300
"##,
            login_page
        );
        if with_password {
            toml = toml.replace("username = \"operador\"", "username = \"operador\"\npassword = \"s3creta\"");
        }
        let config: CompanyConfig = toml::from_str(&toml).unwrap();
        config.resolve("logintest").unwrap()
    }

    async fn page() -> (StaticSite, StaticPage) {
        let site = StaticSite::builder("https://portal.test/")
            .unwrap()
            .page("/login", LOGIN)
            .page("/login-malo", LOGIN_REJECTS)
            .page("/login-aviso", LOGIN_WITH_COOKIES)
            .page("/inicio", r#"<html><body><div id="menu-usuario">operador</div></body></html>"#)
            .page(
                "/login-error",
                r#"<html><body><div class="alert-danger">Usuario o clave inválidos</div></body></html>"#,
            )
            .build();
        let page = site.open("/").await.unwrap();
        (site, page)
    }

    fn run_parts(profile: &CompanyProfile) -> (LoginHandOff, PopupDismisser) {
        let resolver = SelectorResolver::new(Duration::from_millis(100));
        (
            LoginHandOff::from_profile(profile, resolver).unwrap(),
            PopupDismisser::from_profile(profile, resolver),
        )
    }

    #[tokio::test]
    async fn test_successful_login() {
        let profile = profile("login", true);
        let (login, popups) = run_parts(&profile);
        let (_site, page) = page().await;

        let report = login.perform(&page, &popups, &EventLog::new()).await.unwrap();
        assert_eq!(page.url().await.unwrap(), "https://portal.test/inicio");
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn test_login_page_popups_are_reported() {
        let profile = profile("login-aviso", true);
        let (login, popups) = run_parts(&profile);
        let (_site, page) = page().await;

        let report = login.perform(&page, &popups, &EventLog::new()).await.unwrap();
        assert_eq!(report.handled, vec!["cookie_consent"]);
        assert!(report.failed.is_empty());
        assert_eq!(page.url().await.unwrap(), "https://portal.test/inicio");
    }

    #[tokio::test]
    async fn test_rejected_credentials_are_fatal() {
        let profile = profile("login-malo", true);
        let (login, popups) = run_parts(&profile);
        let (_site, page) = page().await;

        let err = login.perform(&page, &popups, &EventLog::new()).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("inválidos"));
    }

    #[tokio::test]
    async fn test_missing_password_is_fatal() {
        let profile = profile("login", false);
        let (login, popups) = run_parts(&profile);
        let (_site, page) = page().await;

        let err = login.perform(&page, &popups, &EventLog::new()).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("credentials"));
    }

    #[test]
    fn test_no_login_section() {
        let config = CompanyConfig::new("https://portal.test/");
        let profile = config.resolve("afinia").unwrap();
        assert!(LoginHandOff::from_profile(&profile, SelectorResolver::default()).is_none());
    }
}
