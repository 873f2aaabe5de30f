//! End-to-end pipeline runs over a temporary folder, wired with the
//! in-memory store, the hashing embedder and a scripted OCR engine.

use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::Arc;

use docgate::config::{parse_config, Config};
use docgate::connector::FilesystemConnector;
use docgate::extract::ocr::MockOcrEngine;
use docgate::pipeline::Pipeline;
use docgate::reconcile::reconcile_index;
use docgate::review::resolve_review;
use docgate::search::{search_documents, SearchQuery};
use docgate_core::embedding::HashingEmbedder;
use docgate_core::models::{DocumentStatus, ReviewAction};
use docgate_core::store::memory::InMemoryStore;
use docgate_core::store::Store;
use lopdf::{dictionary, Document, Object, Stream};
use tempfile::TempDir;

fn config_for(root: &Path) -> Arc<Config> {
    let toml = format!(
        r#"[db]
path = "unused.sqlite"

[pipeline]
workers = 2
batch_size = 3

[[triggers]]
category = "safety"
reference_text = "operator injured at press line four"
threshold = 0.8

[connectors.filesystem]
root = "{}"
"#,
        root.display()
    );
    Arc::new(parse_config(&toml).unwrap())
}

async fn pipeline(config: Arc<Config>) -> (Arc<Pipeline>, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let p = Pipeline::new(
        config,
        store.clone(),
        Arc::new(HashingEmbedder::new(128)),
        Arc::new(MockOcrEngine::new("", 0.0)),
    )
    .await
    .unwrap();
    (Arc::new(p), store)
}

fn text_pdf(lines: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let mut kids = Vec::new();
    for line in lines {
        let content = format!("BT /F1 12 Tf 72 712 Td ({}) Tj ET", line);
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            "Contents" => content_id,
            "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
        });
        kids.push(page_id.into());
    }
    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! { "Type" => "Pages", "Kids" => kids, "Count" => count }),
    );
    let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
    doc.trailer.set("Root", catalog_id);
    let mut buf = Vec::new();
    doc.save_to(&mut buf).unwrap();
    buf
}

fn docx(paragraph: &str) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    zip.start_file(
        "word/document.xml",
        zip::write::SimpleFileOptions::default(),
    )
    .unwrap();
    let xml = format!(
        r#"<w:document xmlns:w="w"><w:body><w:p><w:r><w:t>{}</w:t></w:r></w:p></w:body></w:document>"#,
        paragraph
    );
    zip.write_all(xml.as_bytes()).unwrap();
    zip.finish().unwrap().into_inner()
}

fn populate(root: &Path) {
    std::fs::create_dir_all(root.join("incidents")).unwrap();
    std::fs::write(
        root.join("incidents/report.txt"),
        "operator injured at press line four",
    )
    .unwrap();
    std::fs::write(
        root.join("manual.pdf"),
        text_pdf(&["Boiler feed pump overhaul procedure", "Torque flange bolts in a star pattern"]),
    )
    .unwrap();
    std::fs::write(
        root.join("handover.docx"),
        docx("Night shift handover: conveyor C-3 tripped twice"),
    )
    .unwrap();
    std::fs::write(root.join("site.dwg"), b"AC1032\0\0\0\x01binary").unwrap();
    std::fs::write(
        root.join("legacy.doc"),
        [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1, 0, 0, 0, 0],
    )
    .unwrap();
}

async fn status_of(store: &InMemoryStore, filename: &str) -> DocumentStatus {
    let docs = store.list_documents(None).await.unwrap();
    docs.iter()
        .find(|d| d.filename == filename)
        .map(|d| d.status)
        .unwrap_or_else(|| panic!("no document named {}", filename))
}

#[tokio::test]
async fn test_folder_ingest_routes_every_document() {
    let tmp = TempDir::new().unwrap();
    populate(tmp.path());
    let config = config_for(tmp.path());
    let (p, store) = pipeline(config.clone()).await;

    let connector = FilesystemConnector::new(config.connectors.filesystem.clone().unwrap());
    let report = p.ingest_from(&connector, None).await.unwrap();

    assert_eq!(report.fetched, 5);
    assert_eq!(report.indexed, 3);
    assert_eq!(report.needs_review, 2);
    assert_eq!(report.triggers, 1);

    assert_eq!(status_of(&store, "report.txt").await, DocumentStatus::Indexed);
    assert_eq!(status_of(&store, "manual.pdf").await, DocumentStatus::Indexed);
    assert_eq!(status_of(&store, "handover.docx").await, DocumentStatus::Indexed);
    assert_eq!(status_of(&store, "site.dwg").await, DocumentStatus::NeedsReview);
    assert_eq!(status_of(&store, "legacy.doc").await, DocumentStatus::NeedsReview);

    let mut reasons: Vec<String> = store
        .list_reviews()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.reason)
        .collect();
    reasons.sort();
    assert_eq!(reasons, vec!["cad_metadata", "unsupported_type"]);

    let events = store.list_trigger_events(None).await.unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].category, "safety");
}

#[tokio::test]
async fn test_second_run_skips_unchanged() {
    let tmp = TempDir::new().unwrap();
    populate(tmp.path());
    let config = config_for(tmp.path());
    let (p, store) = pipeline(config.clone()).await;
    let fs = config.connectors.filesystem.clone().unwrap();

    p.ingest_from(&FilesystemConnector::new(fs.clone()), None)
        .await
        .unwrap();
    let chunks_before: usize = {
        let mut n = 0;
        for doc in store.list_documents(None).await.unwrap() {
            n += store.list_chunks(&doc.id).await.unwrap().len();
        }
        n
    };

    let again = p
        .ingest_from(&FilesystemConnector::new(fs), None)
        .await
        .unwrap();
    assert_eq!(again.fetched, 5);
    assert_eq!(again.skipped, 5);
    assert_eq!(again.chunks, 0);

    let mut chunks_after = 0;
    for doc in store.list_documents(None).await.unwrap() {
        chunks_after += store.list_chunks(&doc.id).await.unwrap().len();
    }
    assert_eq!(chunks_before, chunks_after);
}

#[tokio::test]
async fn test_limit_caps_fetch() {
    let tmp = TempDir::new().unwrap();
    populate(tmp.path());
    let config = config_for(tmp.path());
    let (p, _store) = pipeline(config.clone()).await;

    let connector = FilesystemConnector::new(config.connectors.filesystem.clone().unwrap());
    let report = p.ingest_from(&connector, Some(2)).await.unwrap();
    assert_eq!(report.fetched, 2);
}

#[tokio::test]
async fn test_search_after_ingest() {
    let tmp = TempDir::new().unwrap();
    populate(tmp.path());
    let config = config_for(tmp.path());
    let (p, store) = pipeline(config.clone()).await;
    let connector = FilesystemConnector::new(config.connectors.filesystem.clone().unwrap());
    p.ingest_from(&connector, None).await.unwrap();

    let embedder = HashingEmbedder::new(128);
    let q = SearchQuery {
        query: "conveyor tripped".into(),
        ..Default::default()
    };
    let hits = search_documents(&config, store.as_ref(), &embedder, &q)
        .await
        .unwrap();
    assert!(!hits.is_empty());
    let top = store.get_document(&hits[0].document_id).await.unwrap().unwrap();
    assert_eq!(top.filename, "handover.docx");
    assert!(hits.iter().all(|h| (0.0..=1.0).contains(&h.score)));
}

#[tokio::test]
async fn test_reprocess_then_reject_through_review() {
    let tmp = TempDir::new().unwrap();
    populate(tmp.path());
    let config = config_for(tmp.path());
    let (p, store) = pipeline(config.clone()).await;
    let fs = config.connectors.filesystem.clone().unwrap();
    p.ingest_from(&FilesystemConnector::new(fs.clone()), None)
        .await
        .unwrap();

    let dwg_id = FilesystemConnector::document_id("site.dwg");
    let res = resolve_review(&config, store.as_ref(), &dwg_id, ReviewAction::Reprocess)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(res.status, DocumentStatus::Pending);

    // Pending documents run again even though their bytes did not change.
    let again = p
        .ingest_from(&FilesystemConnector::new(fs), None)
        .await
        .unwrap();
    assert_eq!(again.skipped, 4);
    assert_eq!(again.needs_review, 1);
    assert_eq!(status_of(&store, "site.dwg").await, DocumentStatus::NeedsReview);

    let res = resolve_review(&config, store.as_ref(), &dwg_id, ReviewAction::Reject)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(res.status, DocumentStatus::Rejected);
    assert_eq!(status_of(&store, "site.dwg").await, DocumentStatus::Rejected);
}

#[tokio::test]
async fn test_deleted_document_chunks_are_reconciled() {
    let tmp = TempDir::new().unwrap();
    populate(tmp.path());
    let config = config_for(tmp.path());
    let (p, store) = pipeline(config.clone()).await;
    let connector = FilesystemConnector::new(config.connectors.filesystem.clone().unwrap());
    p.ingest_from(&connector, None).await.unwrap();

    let pdf_id = FilesystemConnector::document_id("manual.pdf");
    assert!(!store.list_chunks(&pdf_id).await.unwrap().is_empty());
    assert!(store.delete_document(&pdf_id).await.unwrap());

    let report = reconcile_index(&config, store.as_ref(), None).await.unwrap();
    assert_eq!(report.documents, 1);
    assert!(report.chunks_deleted > 0);
    assert!(store.list_chunks(&pdf_id).await.unwrap().is_empty());
}
