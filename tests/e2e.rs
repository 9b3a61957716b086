//! End-to-end tests against a real LibreOffice + unoconv installation.
//!
//! Gated behind the `E2E_ENABLED` environment variable so they do not run in
//! CI unless explicitly requested. They never bootstrap an install.
//!
//! Run with:
//!   E2E_ENABLED=1 cargo test --test e2e -- --nocapture --test-threads=1

use docsconv::{sniff, ConversionService, ConverterConfig, FileKind};
use std::path::{Path, PathBuf};

// ── Test helpers ─────────────────────────────────────────────────────────────

/// Skip unless E2E_ENABLED is set *and* soffice is present.
macro_rules! e2e_skip_unless_ready {
    () => {{
        if std::env::var("E2E_ENABLED").is_err() {
            println!("SKIP — set E2E_ENABLED=1 to run e2e tests");
            return;
        }
        if !Path::new(office_auto::DEFAULT_PROBE).exists() {
            println!("SKIP — {} not found", office_auto::DEFAULT_PROBE);
            return;
        }
    }};
}

fn live_config(port: u16, work: &Path) -> ConverterConfig {
    ConverterConfig::builder()
        .port(port)
        .auto_install(false)
        .task_timeout_ms(90_000)
        .work_dir(work.join("profiles"))
        .build()
        .unwrap()
}

/// A small plain-text document; Writer imports it with its text filter.
fn write_text(dir: &Path) -> PathBuf {
    let p = dir.join("memo.txt");
    std::fs::write(
        &p,
        "Quarterly memo\n\nRevenue grew in every region.\nNorth: 12\nSouth: 9\n",
    )
    .unwrap();
    p
}

fn assert_artifact(path: &Path, kind: FileKind) {
    let meta = std::fs::metadata(path).unwrap();
    assert!(meta.len() > 0, "{} is empty", path.display());
    assert_eq!(sniff(path).unwrap(), kind, "{}", path.display());
}

// ── Round trips ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_docx_to_pdf() {
    e2e_skip_unless_ready!();
    let dir = tempfile::tempdir().unwrap();
    let service = ConversionService::new(live_config(2102, dir.path()));
    service.start().await.unwrap();

    let text = write_text(dir.path());
    let docx = dir.path().join("memo.docx");
    service.convert(&text, &docx).await.unwrap();
    assert_artifact(&docx, FileKind::OfficeOpenXml);

    let pdf = dir.path().join("memo.pdf");
    let out = service.convert(&docx, &pdf).await.unwrap();
    assert_eq!(out.format, FileKind::Pdf);
    assert_artifact(&pdf, FileKind::Pdf);

    service.stop().await.unwrap();
}

#[tokio::test]
async fn test_odt_docx_odt_round_trip() {
    e2e_skip_unless_ready!();
    let dir = tempfile::tempdir().unwrap();
    let service = ConversionService::new(live_config(2103, dir.path()));
    service.start().await.unwrap();

    let text = write_text(dir.path());
    let odt = dir.path().join("memo.odt");
    service.convert(&text, &odt).await.unwrap();
    assert_artifact(&odt, FileKind::OpenDocument);

    let docx = dir.path().join("memo-rt.docx");
    service.convert(&odt, &docx).await.unwrap();
    assert_artifact(&docx, FileKind::OfficeOpenXml);

    let back = dir.path().join("memo-rt.odt");
    service.convert(&docx, &back).await.unwrap();
    assert_artifact(&back, FileKind::OpenDocument);

    service.stop().await.unwrap();
}

#[tokio::test]
async fn test_engine_recycles_between_batches() {
    e2e_skip_unless_ready!();
    let dir = tempfile::tempdir().unwrap();
    let config = live_config(2104, dir.path())
        .into_builder()
        .max_tasks_per_process(1)
        .build()
        .unwrap();
    let service = ConversionService::new(config);
    service.start().await.unwrap();

    let text = write_text(dir.path());
    let a = service.convert(&text, dir.path().join("a.pdf")).await.unwrap();
    let b = service.convert(&text, dir.path().join("b.pdf")).await.unwrap();
    assert_eq!(b.engine_generation, a.engine_generation + 1);

    service.stop().await.unwrap();
    assert!(!service.is_running());
}
