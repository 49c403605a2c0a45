use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use supernote_viewer::cache::{CacheIndex, CacheType, JsonCacheFile};
use supernote_viewer::export::{BucketConfig, MarkdownAggregator};
use supernote_viewer::extract::{ExtractOptions, ExtractionReport, Extractor};
use supernote_viewer::test_utils::{
    FakeCompositor, FakeRasterizer, MemoryStorage, NoteFileBuilder,
};

const MEDIA: &str = "/vault/media";
const BUCKETS: &str = "/vault/journal";

const CONFIG: &str = r#"
days:
  - title: "2025-01-01"
    pageNumbers: [3]
    useTemplate: true
  - title: "2025-01-02"
    pageNumbers: [4]
weeks:
  - title: "2025-W01"
    pageNumber: [3, 4, 5]
reflect:
  - title: "2025-daily-log"
    pageNumbers: [5]
"#;

fn storage() -> Arc<MemoryStorage> {
    Arc::new(MemoryStorage::new().with_cwd("/vault"))
}

fn extract_planner(storage: &Arc<MemoryStorage>, marks: &[(&str, u32)]) -> ExtractionReport {
    storage.insert("/vault/planner.pdf", b"%PDF-1.7".to_vec());
    let mut builder = NoteFileBuilder::mark();
    for (number, count) in marks {
        builder = builder.page(number, *count);
    }
    storage.insert("/vault/planner.pdf.mark", builder.build());

    let cache = CacheIndex::new(
        Box::new(JsonCacheFile::new(
            storage.clone(),
            "/vault/media/.supernote-viewer-cache.json",
        )),
        storage.clone(),
        &[CacheType::Pdfs],
    );
    Extractor::new(
        storage.clone(),
        Arc::new(cache),
        Arc::new(FakeRasterizer::new()),
        ExtractOptions::new(MEDIA),
    )
    .with_compositor(Arc::new(FakeCompositor::new(storage.clone(), 10)))
    .extract(Path::new("/vault/planner.pdf"))
    .unwrap()
}

fn aggregator(storage: &Arc<MemoryStorage>) -> MarkdownAggregator {
    MarkdownAggregator::new(storage.clone(), PathBuf::from(BUCKETS), Path::new(MEDIA))
}

fn text(storage: &MemoryStorage, path: &str) -> String {
    String::from_utf8(storage.get(Path::new(path)).unwrap()).unwrap()
}

#[test]
fn touched_pages_update_their_buckets() {
    let storage = storage();
    let report = extract_planner(&storage, &[("3", 1), ("4", 2)]);
    let config = BucketConfig::from_yaml(CONFIG).unwrap();

    let written = aggregator(&storage)
        .update_buckets(&report.artifacts, &report.touched(), &config)
        .unwrap();

    let written: BTreeSet<_> = written.into_iter().collect();
    assert!(written.contains(Path::new("/vault/journal/2025-01-01.md")));
    assert!(written.contains(Path::new("/vault/journal/2025-01-02.md")));
    assert!(written.contains(Path::new("/vault/journal/2025-W01.md")));
    // Page 5 was never extracted, so the reflect log has nothing to show
    assert!(!storage.contains(Path::new("/vault/journal/2025-daily-log.pdf")));

    let week = text(&storage, "/vault/journal/2025-W01.md");
    assert!(week.starts_with("# 2025-W01\n"));
    assert!(week.contains(
        "<!--BEGIN-->\n![Page 3|900](media/planner_page_3.png)\n![Page 4|900](media/planner_page_4.png)\n<!--END-->"
    ));

    let day = text(&storage, "/vault/journal/2025-01-01.md");
    assert!(day.contains("![Page 3|900](media/planner_page_3.png)"));
    assert!(day.contains("janvier"));
}

#[test]
fn hand_written_text_survives_regeneration() {
    let storage = storage();
    let config = BucketConfig::from_yaml(CONFIG).unwrap();
    storage.insert(
        "/vault/journal/2025-01-02.md",
        b"# Thursday\n\nmy own words\n<!--BEGIN-->\nstale\n<!--END-->\nfooter\n".to_vec(),
    );

    let report = extract_planner(&storage, &[("4", 2)]);
    aggregator(&storage)
        .update_buckets(&report.artifacts, &report.touched(), &config)
        .unwrap();

    assert_eq!(
        text(&storage, "/vault/journal/2025-01-02.md"),
        "# Thursday\n\nmy own words\n<!--BEGIN-->\n![Page 4|900](media/planner_page_4.png)\n<!--END-->\nfooter\n"
    );
}

#[test]
fn untouched_buckets_are_left_alone() {
    let storage = storage();
    let config = BucketConfig::from_yaml(CONFIG).unwrap();
    let report = extract_planner(&storage, &[("3", 1), ("4", 1)]);
    let aggregator = aggregator(&storage);
    aggregator
        .update_buckets(&report.artifacts, &report.touched(), &config)
        .unwrap();

    let only_page_4: BTreeSet<u32> = [4].into_iter().collect();
    let written = aggregator
        .update_buckets(&report.artifacts, &only_page_4, &config)
        .unwrap();

    assert!(written.is_empty(), "content unchanged, nothing rewritten");
}

#[test]
fn reflect_bucket_becomes_a_pdf() {
    let storage = storage();
    let config = BucketConfig::from_yaml(CONFIG).unwrap();
    let report = extract_planner(&storage, &[("5", 1)]);

    let written = aggregator(&storage)
        .update_buckets(&report.artifacts, &report.touched(), &config)
        .unwrap();

    assert!(written.contains(&PathBuf::from("/vault/journal/2025-daily-log.pdf")));
    let pdf = storage
        .get(Path::new("/vault/journal/2025-daily-log.pdf"))
        .unwrap();
    assert!(pdf.starts_with(b"%PDF-"));
}

#[test]
fn note_pages_become_sections() {
    let storage = storage();
    storage.insert(
        "/vault/day.note",
        NoteFileBuilder::note().page("1", 2).page("2", 0).page("3", 1).build(),
    );
    let cache = CacheIndex::new(
        Box::new(JsonCacheFile::new(
            storage.clone(),
            "/vault/media/.supernote-viewer-cache.json",
        )),
        storage.clone(),
        &[CacheType::Notes],
    );
    let report = Extractor::new(
        storage.clone(),
        Arc::new(cache),
        Arc::new(FakeRasterizer::new()),
        ExtractOptions::new(MEDIA),
    )
    .extract(Path::new("/vault/day.note"))
    .unwrap();

    let path = aggregator(&storage)
        .write_note_markdown("day", &report.artifacts, Path::new("/vault/notes"))
        .unwrap();

    assert_eq!(path, PathBuf::from("/vault/notes/day.md"));
    assert_eq!(
        text(&storage, "/vault/notes/day.md"),
        "# day\n\n<!--BEGIN-->\n## Page 1\n\n![Page 1](media/day_page_1.png)\n\n\
         ## Page 3\n\n![Page 3](media/day_page_3.png)\n\n<!--END-->\n"
    );
}
