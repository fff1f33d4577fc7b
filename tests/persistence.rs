//! Store behaviour across process restarts: reopening, run history and
//! object layout.

use std::sync::Arc;

use pqracquire::browser::StaticSite;
use pqracquire::config::Config;
use pqracquire::models::StopReason;
use pqracquire::pipeline::{ExtractionOrchestrator, RunOptions};
use pqracquire::repository::{self, applied_migrations};
use pqracquire::storage::FilesystemObjectStore;

const CONFIG: &str = r##"
[companies.testco]
kind = "custom"
base_url = "https://portal.test/"
listing_url = "/listado"
days_back = 0

[companies.testco.selectors]
listing_row = ["tr.fila"]
view_control = ["a.ver"]
detail_ready = ["#detalle"]
attachment_links = ["a.adjunto"]

[[companies.testco.fields]]
name = "radicado"
selectors = ["#radicado"]

[[companies.testco.fields]]
name = "tipo"
selectors = ["#tipo"]

[companies.testco.timeouts]
selector_ms = 200
popup_settle_ms = 0
"##;

const LISTING: &str = r#"<html><body><table>
    <tr class="fila"><td>RAD-1</td><td><a class="ver" href="/detalle/1">Ver</a></td></tr>
    <tr class="fila"><td>RAD-2</td><td><a class="ver" href="/detalle/2">Ver</a></td></tr>
</table></body></html>"#;

fn detail(id: &str, tipo: &str) -> String {
    format!(
        r#"<html><body><div id="detalle"><h1>Detalle</h1>
        <span id="radicado">{id}</span><span id="tipo">{tipo}</span>
        <a class="adjunto" href="/files/{id}.pdf">Respuesta</a></div></body></html>"#
    )
}

fn site() -> StaticSite {
    StaticSite::builder("https://portal.test/")
        .unwrap()
        .page("/listado", LISTING)
        .page("/detalle/1", detail("RAD-1", "Queja"))
        .page("/detalle/2", detail("RAD-2", "Reclamo"))
        .file("/files/RAD-1.pdf", "application/pdf", b"%PDF-1.4 uno".to_vec())
        .file("/files/RAD-2.pdf", "application/pdf", b"%PDF-1.4 dos".to_vec())
        .build()
}

#[tokio::test]
async fn test_run_history_and_objects_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}", dir.path().join("pqr.db").display());
    let objects_root = dir.path().join("objects");

    let profile = Config::parse(CONFIG, "toml")
        .unwrap()
        .company_profile("TestCo")
        .unwrap();

    {
        let (records, runs) = repository::open(&url).await.unwrap();
        let orchestrator = ExtractionOrchestrator::new(
            profile,
            Arc::new(records),
            Arc::new(FilesystemObjectStore::new(&objects_root)),
        );
        let site = site();
        let page = site.open("/listado").await.unwrap();
        let options = RunOptions {
            staging_root: Some(dir.path().to_path_buf()),
            ..RunOptions::default()
        };

        let summary = orchestrator.run(&page, &options).await.unwrap();
        assert_eq!(summary.stats.records_inserted, 2);
        assert_eq!(summary.stats.attachments_downloaded, 2);
        runs.save(&summary).await.unwrap();
    }

    let (records, runs) = repository::open(&url).await.unwrap();
    assert_eq!(
        applied_migrations(&url).await.unwrap(),
        vec!["0001_initial_schema", "0002_extraction_runs"]
    );

    assert_eq!(records.counts().await.unwrap(), vec![("testco".to_string(), 2)]);
    let history = runs.recent(Some("testco"), 5).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].stopped_because, StopReason::NoNextPage);
    assert_eq!(history[0].stats.records_inserted, 2);

    let stored = records.list_recent("testco", 5).await.unwrap();
    let queja = stored.iter().find(|r| r.category == "Queja").unwrap();
    assert_eq!(
        queja.attachments[0].stored_key.as_deref(),
        Some("testco/Queja/RAD-1/RAD-1.pdf")
    );
    assert!(queja.attachments[0].local_path.is_none());
    assert!(objects_root.join("testco/Queja/RAD-1/RAD-1.pdf").exists());
    assert!(objects_root.join("testco/Reclamo/RAD-2/detalle.pdf").exists());
}
