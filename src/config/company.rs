//! Per-company extraction profiles.
//!
//! A profile is the strategy object the generic pipeline runs with: the
//! company variant supplies default selectors, fields and popups, and the
//! config file overrides any of them.

use std::collections::BTreeMap;
use std::fmt;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use super::popups::{common_signatures, PopupSignature};
use super::selectors::{roles, SelectorCandidateSet, SelectorMap};

/// Supported portal families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompanyKind {
    Afinia,
    Aire,
    /// Everything comes from the config file.
    Custom,
}

impl CompanyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Afinia => "afinia",
            Self::Aire => "aire",
            Self::Custom => "custom",
        }
    }

    /// Infer the variant from a company key.
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "afinia" => Self::Afinia,
            "aire" => Self::Aire,
            _ => Self::Custom,
        }
    }

    /// Built-in selector candidates.
    pub fn default_selectors(&self) -> SelectorMap {
        let mut map = common_action_selectors();
        match self {
            Self::Afinia => {
                map.set(roles::LISTING_READY, &["#gvPQR", "table[id*='gvPqr']", "table.grid-pqr"]);
                map.set(
                    roles::LISTING_ROW,
                    &[
                        "#gvPQR tr.gridRow, #gvPQR tr.gridAltRow",
                        "table[id*='gvPqr'] tr[class*='Row']",
                        "table.grid-pqr tbody tr",
                    ],
                );
                map.set(
                    roles::VIEW_CONTROL,
                    &["a[id*='lnkVer']", "a[title='Ver detalle']", "a >> text=Ver"],
                );
                map.set(roles::ROW_EXTERNAL_ID, &["td.radicado", "span[id*='lblRadicado']"]);
                map.set(
                    roles::START_DATE_INPUT,
                    &["#txtFechaInicial", "input[name*='FechaInicial']"],
                );
                map.set(roles::END_DATE_INPUT, &["#txtFechaFinal", "input[name*='FechaFinal']"]);
                map.set(roles::STATUS_FILTER, &["#ddlEstado", "select[name*='Estado']"]);
                map.set(
                    roles::APPLY_FILTER,
                    &["#btnBuscar", "input[type='submit'][value*='Buscar']", "button >> text=Buscar"],
                );
                map.set(
                    roles::PAGINATION_COUNTER,
                    &["#lblPaginacion", "span[id*='lblRegistros']", ".pager-info"],
                );
                map.set(
                    roles::NEXT_PAGE,
                    &["a[id*='lnkSiguiente']", "a.pager-next", "a >> text=Siguiente"],
                );
                map.set(roles::DETAIL_READY, &["#pnlDetalle", "div.detalle-pqr"]);
                map.set(
                    roles::ATTACHMENT_LINKS,
                    &["#gvAdjuntos a[href]", "a[href*='Descargar']", "a[href$='.pdf']"],
                );
                map.set(roles::DETAIL_MAIN_TAB, &["#tabDetalle", "a >> text=Detalle"]);
                map.set(roles::LOGIN_USERNAME, &["#txtUsuario", "input[name*='Usuario']"]);
                map.set(roles::LOGIN_PASSWORD, &["#txtClave", "input[type='password']"]);
                map.set(roles::LOGIN_SUBMIT, &["#btnIngresar", "input[type='submit']"]);
                map.set(roles::LOGGED_IN, &["#lnkCerrarSesion", "a >> text=Cerrar sesión"]);
                map.set(roles::LOGIN_ERROR, &["#lblErrorLogin", ".validation-summary-errors"]);
            }
            Self::Aire => {
                map.set(
                    roles::LISTING_READY,
                    &["app-pqr-list mat-table", "table.mat-mdc-table", "table.mat-table"],
                );
                map.set(
                    roles::LISTING_ROW,
                    &["mat-row", "tr.mat-mdc-row", "tr.mat-row"],
                );
                map.set(
                    roles::VIEW_CONTROL,
                    &[
                        "a.btn-detalle[href]",
                        "button[aria-label='Ver detalle']",
                        "button >> text=Ver",
                    ],
                );
                map.set(roles::ROW_EXTERNAL_ID, &[".mat-column-radicado", "td.cdk-column-radicado"]);
                map.set(
                    roles::START_DATE_INPUT,
                    &["input[formcontrolname='fechaInicio']", "input[type='date'][name='desde']"],
                );
                map.set(
                    roles::END_DATE_INPUT,
                    &["input[formcontrolname='fechaFin']", "input[type='date'][name='hasta']"],
                );
                map.set(roles::STATUS_FILTER, &["select[formcontrolname='estado']"]);
                map.set(
                    roles::APPLY_FILTER,
                    &["button[type='submit'] >> text=Consultar", "button >> text=Filtrar"],
                );
                map.set(
                    roles::PAGINATION_COUNTER,
                    &[".mat-mdc-paginator-range-label", ".mat-paginator-range-label"],
                );
                map.set(
                    roles::NEXT_PAGE,
                    &[
                        "button.mat-mdc-paginator-navigation-next",
                        "button.mat-paginator-navigation-next",
                        "button[aria-label='Página siguiente']",
                        "button[aria-label='Next page']",
                    ],
                );
                map.set(roles::RELOAD_MARKER, &["mat-progress-bar", ".spinner-listado"]);
                map.set(roles::DETAIL_READY, &["app-pqr-detail", ".detalle-pqr"]);
                map.set(roles::ATTACHMENT_LINKS, &["app-adjuntos a[href]", "a[download]"]);
                map.set(roles::DETAIL_MAIN_TAB, &["div[role='tab'] >> text=Detalle"]);
                map.set(
                    roles::LOGIN_USERNAME,
                    &["input[formcontrolname='usuario']", "input[name='username']"],
                );
                map.set(roles::LOGIN_PASSWORD, &["input[formcontrolname='clave']", "input[type='password']"]);
                map.set(roles::LOGIN_SUBMIT, &["button[type='submit']"]);
                map.set(roles::LOGGED_IN, &["app-toolbar .usuario", "button >> text=Salir"]);
                map.set(roles::LOGIN_ERROR, &["mat-error", ".alert-danger"]);
            }
            Self::Custom => {}
        }
        map
    }

    /// Built-in field map.
    pub fn default_fields(&self) -> Vec<FieldSpec> {
        match self {
            Self::Afinia => vec![
                FieldSpec::new("radicado", &["#lblRadicado", "span[id*='Radicado']"]),
                FieldSpec::new("nic", &["#lblNic", "span[id*='Nic']"]),
                FieldSpec::new("fecha_radicacion", &["#lblFechaRadicacion", "span[id*='FechaRad']"]),
                FieldSpec::new("numero_documento", &["#lblDocumento", "span[id*='Documento']"]),
                FieldSpec::new("nombre", &["#lblNombre", "span[id*='Nombre']"]),
                FieldSpec::new("tipo", &["#lblTipo", "span[id*='TipoPqr']"]),
                FieldSpec::new("estado", &["#lblEstado", "span[id*='Estado']"]),
                FieldSpec::new("descripcion", &["#lblDescripcion", "#txtDescripcion"]),
                FieldSpec::new("respuesta", &["#lblRespuesta", "#txtRespuesta"])
                    .in_tab(&["#tabRespuesta", "a >> text=Respuesta"]),
            ],
            Self::Aire => vec![
                FieldSpec::new("radicado", &["[data-campo='radicado']", ".detalle-radicado"]),
                FieldSpec::new("nic", &["[data-campo='nic']", ".detalle-nic"]),
                FieldSpec::new("fecha_radicacion", &["[data-campo='fecha']", ".detalle-fecha"]),
                FieldSpec::new("numero_documento", &["[data-campo='documento']", ".detalle-documento"]),
                FieldSpec::new("nombre", &["[data-campo='nombre']"]),
                FieldSpec::new("tipo", &["[data-campo='tipo']"]),
                FieldSpec::new("estado", &["[data-campo='estado']"]),
                FieldSpec::new("descripcion", &["[data-campo='descripcion']"]),
                FieldSpec::new("respuesta", &["[data-campo='respuesta']"])
                    .in_tab(&["div[role='tab'] >> text=Respuesta"]),
            ],
            Self::Custom => Vec::new(),
        }
    }
}

impl fmt::Display for CompanyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn common_action_selectors() -> SelectorMap {
    let mut map = SelectorMap::new();
    map.set(
        roles::ACCEPT_BUTTON,
        &[
            "#onetrust-accept-btn-handler",
            "button >> text=Aceptar",
            "button >> text=Acepto",
            "button >> text=Accept",
        ],
    );
    map.set(
        roles::REJECT_BUTTON,
        &[
            "button >> text=No, gracias",
            "button >> text=No gracias",
            "button >> text=Rechazar",
            "button >> text=Ahora no",
        ],
    );
    map.set(
        roles::CLOSE_BUTTON,
        &[
            "button.close",
            ".btn-close",
            ".swal2-close",
            "button[aria-label='Cerrar']",
            "button[aria-label='Close']",
            "button >> text=Cerrar",
        ],
    );
    map.set(
        roles::DISMISS_BUTTON,
        &[
            ".swal2-confirm",
            "button >> text=Entendido",
            "button >> text=Continuar",
            "button >> text=OK",
        ],
    );
    map
}

/// One extracted field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub selectors: Vec<String>,
    /// Detail sub-tab to click before reading this field.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tab: Vec<String>,
    /// Read this attribute instead of the visible text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
}

impl FieldSpec {
    pub fn new(name: &str, selectors: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            selectors: selectors.iter().map(|s| s.to_string()).collect(),
            tab: Vec::new(),
            attribute: None,
        }
    }

    pub fn in_tab(mut self, tab: &[&str]) -> Self {
        self.tab = tab.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn candidates(&self) -> SelectorCandidateSet {
        SelectorCandidateSet::new(&self.name, &self.selectors)
    }

    pub fn tab_candidates(&self) -> Option<SelectorCandidateSet> {
        if self.tab.is_empty() {
            None
        } else {
            Some(SelectorCandidateSet::new(&format!("{}_tab", self.name), &self.tab))
        }
    }
}

/// Field names that feed the content hash and the store key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyFields {
    #[serde(default = "default_nic_field")]
    pub nic: String,
    #[serde(default = "default_date_field")]
    pub date: String,
    #[serde(default = "default_document_field")]
    pub document_id: String,
    #[serde(default = "default_external_id_field")]
    pub external_id: String,
}

fn default_nic_field() -> String {
    "nic".to_string()
}

fn default_date_field() -> String {
    "fecha_radicacion".to_string()
}

fn default_document_field() -> String {
    "numero_documento".to_string()
}

fn default_external_id_field() -> String {
    "radicado".to_string()
}

impl Default for KeyFields {
    fn default() -> Self {
        Self {
            nic: default_nic_field(),
            date: default_date_field(),
            document_id: default_document_field(),
            external_id: default_external_id_field(),
        }
    }
}

/// Wait budgets, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Per selector candidate.
    pub selector_ms: u64,
    pub navigation_ms: u64,
    pub network_idle_ms: u64,
    /// Next-page click until the listing re-renders.
    pub advance_ms: u64,
    /// Detail tab open and load.
    pub detail_ms: u64,
    pub download_ms: u64,
    /// PDF or screenshot render.
    pub render_ms: u64,
    /// Pause after a successful popup dismissal.
    pub popup_settle_ms: u64,
    /// Whole-record ceiling: detail, attachments and artifact together.
    pub record_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            selector_ms: 1_500,
            navigation_ms: 30_000,
            network_idle_ms: 10_000,
            advance_ms: 15_000,
            detail_ms: 30_000,
            download_ms: 60_000,
            render_ms: 30_000,
            popup_settle_ms: 500,
            record_ms: 300_000,
        }
    }
}

/// Detail-page validation keywords (case-insensitive substrings).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Any of these in the page headline marks the page invalid.
    pub negative_indicators: Vec<String>,
    /// Only raise confidence; absence does not invalidate.
    pub positive_indicators: Vec<String>,
    /// How much leading text counts as the headline.
    pub headline_chars: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            negative_indicators: [
                "404",
                "not found",
                "no encontrad",
                "página no existe",
                "error interno",
                "server error",
                "sesión ha expirado",
                "acceso denegado",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            positive_indicators: ["radicado", "nic", "detalle", "pqr"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            headline_chars: 400,
        }
    }
}

/// Login hand-off settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginConfig {
    /// Login page, relative to the base URL.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

/// Company section of the config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyConfig {
    /// Portal family; inferred from the company key when omitted.
    #[serde(default)]
    pub kind: Option<CompanyKind>,
    pub base_url: String,
    /// Listing page, relative to `base_url`.
    #[serde(default)]
    pub listing_url: Option<String>,
    #[serde(default)]
    pub login: Option<LoginConfig>,
    /// Per-role overrides of the built-in candidates.
    #[serde(default)]
    pub selectors: BTreeMap<String, Vec<String>>,
    /// Extra popup signatures, merged with the common ones by name.
    #[serde(default)]
    pub popups: Vec<PopupSignature>,
    /// Replaces the built-in field map when non-empty.
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub keys: KeyFields,
    /// Field whose value names the object-store category.
    #[serde(default = "default_category_field")]
    pub category_field: Option<String>,
    #[serde(default)]
    pub max_records: Option<usize>,
    #[serde(default = "default_true")]
    pub enable_pagination: bool,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_days_back")]
    pub days_back: u32,
    #[serde(default)]
    pub status_filter: Option<String>,
    /// chrono format for free-text date inputs.
    #[serde(default = "default_date_format")]
    pub date_format: String,
    #[serde(default = "default_popup_passes")]
    pub popup_max_passes: u32,
    #[serde(default)]
    pub timeouts: Timeouts,
    #[serde(default)]
    pub validator: ValidatorConfig,
}

fn default_category_field() -> Option<String> {
    Some("tipo".to_string())
}

fn default_true() -> bool {
    true
}

fn default_max_pages() -> u32 {
    50
}

fn default_days_back() -> u32 {
    30
}

fn default_date_format() -> String {
    "%d/%m/%Y".to_string()
}

fn default_popup_passes() -> u32 {
    3
}

impl CompanyConfig {
    /// Minimal config for `base_url`; every other setting at its default.
    pub fn new(base_url: &str) -> Self {
        Self {
            kind: None,
            base_url: base_url.to_string(),
            listing_url: None,
            login: None,
            selectors: BTreeMap::new(),
            popups: Vec::new(),
            fields: Vec::new(),
            keys: KeyFields::default(),
            category_field: default_category_field(),
            max_records: None,
            enable_pagination: true,
            max_pages: default_max_pages(),
            days_back: default_days_back(),
            status_filter: None,
            date_format: default_date_format(),
            popup_max_passes: default_popup_passes(),
            timeouts: Timeouts::default(),
            validator: ValidatorConfig::default(),
        }
    }

    /// Resolve against the built-in defaults for the company variant.
    pub fn resolve(&self, name: &str) -> Result<CompanyProfile> {
        let kind = self.kind.unwrap_or_else(|| CompanyKind::from_name(name));
        let base = url::Url::parse(&self.base_url)
            .map_err(|e| anyhow!("Invalid base_url for {}: {}", name, e))?;

        let listing_url = match &self.listing_url {
            Some(path) => base
                .join(path)
                .map_err(|e| anyhow!("Invalid listing_url for {}: {}", name, e))?
                .to_string(),
            None => base.to_string(),
        };

        let mut popups = common_signatures();
        for sig in &self.popups {
            match popups.iter_mut().find(|p| p.name == sig.name) {
                Some(existing) => *existing = sig.clone(),
                None => popups.push(sig.clone()),
            }
        }
        popups.sort_by_key(|p| p.priority);

        let fields = if self.fields.is_empty() {
            kind.default_fields()
        } else {
            self.fields.clone()
        };
        if fields.is_empty() {
            return Err(anyhow!(
                "Company {} has no field map; add [companies.{}] fields to the config",
                name,
                name
            ));
        }

        let login = self.login.clone().map(|mut login| {
            let prefix = format!("PQR_{}", name.to_uppercase().replace('-', "_"));
            if let Ok(user) = std::env::var(format!("{}_USERNAME", prefix)) {
                login.username = Some(user);
            }
            if let Ok(pass) = std::env::var(format!("{}_PASSWORD", prefix)) {
                login.password = Some(pass);
            }
            login
        });

        Ok(CompanyProfile {
            name: name.to_lowercase(),
            kind,
            base_url: base.to_string(),
            listing_url,
            login,
            selectors: kind.default_selectors().merged_with(&self.selectors),
            popups,
            fields,
            keys: self.keys.clone(),
            category_field: self.category_field.clone(),
            max_records: self.max_records,
            enable_pagination: self.enable_pagination,
            max_pages: self.max_pages.max(1),
            days_back: self.days_back,
            status_filter: self.status_filter.clone(),
            date_format: self.date_format.clone(),
            popup_max_passes: self.popup_max_passes.max(1),
            timeouts: self.timeouts.clone(),
            validator: self.validator.clone(),
        })
    }
}

/// Fully resolved configuration the pipeline runs with.
#[derive(Debug, Clone)]
pub struct CompanyProfile {
    pub name: String,
    pub kind: CompanyKind,
    pub base_url: String,
    pub listing_url: String,
    pub login: Option<LoginConfig>,
    pub selectors: SelectorMap,
    /// Sorted by priority.
    pub popups: Vec<PopupSignature>,
    pub fields: Vec<FieldSpec>,
    pub keys: KeyFields,
    pub category_field: Option<String>,
    pub max_records: Option<usize>,
    pub enable_pagination: bool,
    pub max_pages: u32,
    pub days_back: u32,
    pub status_filter: Option<String>,
    pub date_format: String,
    pub popup_max_passes: u32,
    pub timeouts: Timeouts,
    pub validator: ValidatorConfig,
}

impl CompanyProfile {
    pub fn selector(&self, role: &str) -> SelectorCandidateSet {
        self.selectors.get(role)
    }

    /// Login page URL, if login is configured.
    pub fn login_url(&self) -> Option<String> {
        let login = self.login.as_ref()?;
        let path = login.url.as_deref().unwrap_or("");
        url::Url::parse(&self.base_url)
            .ok()?
            .join(path)
            .ok()
            .map(|u| u.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_name() {
        assert_eq!(CompanyKind::from_name("Afinia"), CompanyKind::Afinia);
        assert_eq!(CompanyKind::from_name("aire"), CompanyKind::Aire);
        assert_eq!(CompanyKind::from_name("electrohuila"), CompanyKind::Custom);
    }

    #[test]
    fn test_resolve_afinia_defaults() {
        let config = CompanyConfig {
            listing_url: Some("/PQR/Consulta.aspx".into()),
            ..CompanyConfig::new("https://pqr.afinia.test/")
        };
        let profile = config.resolve("afinia").unwrap();
        assert_eq!(profile.kind, CompanyKind::Afinia);
        assert_eq!(profile.listing_url, "https://pqr.afinia.test/PQR/Consulta.aspx");
        assert!(profile.selectors.has(roles::NEXT_PAGE));
        assert!(profile.selectors.has(roles::ACCEPT_BUTTON));
        assert!(profile.fields.iter().any(|f| f.name == "nic"));
        assert_eq!(profile.max_pages, 50);
    }

    #[test]
    fn test_custom_without_fields_is_rejected() {
        let config = CompanyConfig::new("https://portal.test/");
        assert!(config.resolve("otra").is_err());
    }

    #[test]
    fn test_popup_override_by_name() {
        let mut config = CompanyConfig::new("https://portal.test/");
        config.fields = vec![FieldSpec::new("radicado", &["#rad"])];
        config.popups = vec![
            PopupSignature::new("notice_dialog", &["#aviso"], super::super::popups::PopupAction::Dismiss, 5),
        ];
        let profile = config.resolve("otra").unwrap();
        assert_eq!(profile.popups[0].name, "notice_dialog");
        assert_eq!(profile.popups[0].selectors, vec!["#aviso"]);
        assert_eq!(
            profile.popups.iter().filter(|p| p.name == "notice_dialog").count(),
            1
        );
    }

    #[test]
    fn test_company_config_from_toml() {
        let config: CompanyConfig = toml::from_str(
            r#"
            base_url = "https://pqr.aire.test"
            max_records = 30
            enable_pagination = false

            [selectors]
            next_page = ["button.siguiente"]

            [timeouts]
            selector_ms = 800
            "#,
        )
        .unwrap();
        assert_eq!(config.max_records, Some(30));
        assert!(!config.enable_pagination);
        assert_eq!(config.timeouts.selector_ms, 800);
        assert_eq!(config.timeouts.navigation_ms, 30_000);
        assert_eq!(config.days_back, 30);

        let profile = config.resolve("aire").unwrap();
        assert_eq!(
            profile.selector(roles::NEXT_PAGE).candidates,
            vec!["button.siguiente"]
        );
    }
}
