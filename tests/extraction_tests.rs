use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use supernote_viewer::cache::{CacheIndex, CacheType, JsonCacheFile};
use supernote_viewer::extract::{
    ExtractError, ExtractOptions, ExtractStatus, Extractor, KeyedLocks,
};
use supernote_viewer::render::PoolConfig;
use supernote_viewer::storage::{Scope, Storage};
use supernote_viewer::test_utils::{
    FakeCompositor, FakeRasterizer, MemoryStorage, NoteFileBuilder,
};

const CACHE_PATH: &str = "/media/.supernote-viewer-cache.json";

struct Fixture {
    storage: Arc<MemoryStorage>,
    rasterizer: Arc<FakeRasterizer>,
}

impl Fixture {
    fn new(rasterizer: FakeRasterizer) -> Self {
        Self {
            storage: Arc::new(MemoryStorage::new().with_cwd("/notes")),
            rasterizer: Arc::new(rasterizer),
        }
    }

    fn note(&self, path: &str, marks: &[u32]) {
        let mut builder = NoteFileBuilder::note();
        for (i, count) in marks.iter().enumerate() {
            builder = builder.page(&(i + 1).to_string(), *count);
        }
        self.storage.insert(path, builder.build());
    }

    fn options(&self) -> ExtractOptions {
        let mut options = ExtractOptions::new("/media");
        options.pool = PoolConfig {
            workers: 2,
            timeout: Duration::from_secs(10),
        };
        options
    }

    /// Fresh index over the persisted cache file, as a new process would see it
    fn extractor(&self, options: ExtractOptions) -> Extractor {
        let cache = CacheIndex::new(
            Box::new(JsonCacheFile::new(self.storage.clone(), CACHE_PATH)),
            self.storage.clone(),
            &[CacheType::Notes, CacheType::Pdfs],
        );
        Extractor::new(
            self.storage.clone(),
            Arc::new(cache),
            self.rasterizer.clone(),
            options,
        )
    }

    fn cache_bytes(&self) -> Vec<u8> {
        self.storage
            .read(Path::new(CACHE_PATH), Scope::User)
            .unwrap()
    }
}

#[test]
fn only_changed_pages_are_rerendered() {
    let fx = Fixture::new(FakeRasterizer::new());
    fx.note("/notes/day.note", &[0, 5, 5]);

    let first = fx
        .extractor(fx.options())
        .extract(Path::new("/notes/day.note"))
        .unwrap();
    assert_eq!(first.status, ExtractStatus::Success);
    assert_eq!(first.rendered, vec!["2", "3"]);
    assert_eq!(first.blank, vec!["1"]);
    assert_eq!(fx.rasterizer.calls(), vec![1, 2]);

    fx.note("/notes/day.note", &[0, 7, 5]);
    let new_mtime = fx.storage.modified(Path::new("/notes/day.note")).unwrap();
    fx.rasterizer.reset_calls();

    let extractor = fx.extractor(fx.options());
    let second = extractor.extract(Path::new("/notes/day.note")).unwrap();
    assert_eq!(second.rendered, vec!["2"]);
    assert_eq!(second.reused, vec!["3"]);
    assert_eq!(fx.rasterizer.calls(), vec![1]);

    let entry = extractor
        .cache()
        .get(CacheType::Notes, "/notes/day.note")
        .unwrap();
    assert_eq!(entry.last_modified, new_mtime);
    assert_eq!(entry.page("2").unwrap().marks_count, 7);
    assert_eq!(entry.page("2").unwrap().last_modified, Some(new_mtime));
    assert_ne!(entry.page("3").unwrap().last_modified, Some(new_mtime));
}

#[test]
fn second_run_on_unchanged_file_is_a_no_op() {
    let fx = Fixture::new(FakeRasterizer::new());
    fx.note("/notes/day.note", &[1, 2, 3]);

    let first = fx
        .extractor(fx.options())
        .extract(Path::new("/notes/day.note"))
        .unwrap();
    let cache_after_first = fx.cache_bytes();
    fx.rasterizer.reset_calls();

    let second = fx
        .extractor(fx.options())
        .extract(Path::new("/notes/day.note"))
        .unwrap();

    assert!(second.fast_path);
    assert!(fx.rasterizer.calls().is_empty());
    assert_eq!(second.artifacts, first.artifacts);
    assert_eq!(fx.cache_bytes(), cache_after_first);
}

#[test]
fn failing_page_leaves_the_others_cached() {
    // Page 3 of 5 is index 2
    let fx = Fixture::new(FakeRasterizer::new().fail_on(2));
    fx.note("/notes/day.note", &[1, 1, 1, 1, 1]);

    let report = fx
        .extractor(fx.options())
        .extract(Path::new("/notes/day.note"))
        .unwrap();

    assert_eq!(report.status, ExtractStatus::Partial);
    assert_eq!(report.rendered, vec!["1", "2", "4", "5"]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].page_number, "3");
    for n in [1, 2, 4, 5] {
        let path = report.artifacts.get(n).unwrap();
        assert!(fx.storage.contains(path), "page {n} artifact missing");
    }
    assert_eq!(report.artifacts.get(3), None);
}

#[test]
fn failed_page_is_retried_on_next_run() {
    let fx = Fixture::new(FakeRasterizer::new().fail_on(0));
    fx.note("/notes/day.note", &[2, 2]);
    fx.extractor(fx.options())
        .extract(Path::new("/notes/day.note"))
        .unwrap();

    // Touch the file so the fast path does not apply
    fx.storage
        .set_modified("/notes/day.note", 1_800_000_000_000);
    let rasterizer = Arc::new(FakeRasterizer::new());
    let mut options = fx.options();
    options.pool.workers = 1;
    let cache = CacheIndex::new(
        Box::new(JsonCacheFile::new(fx.storage.clone(), CACHE_PATH)),
        fx.storage.clone(),
        &[CacheType::Notes],
    );
    let report = Extractor::new(fx.storage.clone(), Arc::new(cache), rasterizer.clone(), options)
        .extract(Path::new("/notes/day.note"))
        .unwrap();

    assert_eq!(report.rendered, vec!["1"]);
    assert_eq!(report.reused, vec!["2"]);
    assert_eq!(rasterizer.calls(), vec![0]);
}

#[test]
fn relative_spellings_share_one_cache_entry() {
    let fx = Fixture::new(FakeRasterizer::new());
    fx.note("/notes/day.note", &[1]);

    fx.extractor(fx.options())
        .extract(Path::new("/notes/day.note"))
        .unwrap();
    fx.rasterizer.reset_calls();

    let report = fx
        .extractor(fx.options())
        .extract(Path::new("./sub/../day.note"))
        .unwrap();

    assert_eq!(report.file_key, "/notes/day.note");
    assert!(report.fast_path);
    assert!(fx.rasterizer.calls().is_empty());
}

#[test]
fn deleted_artifact_is_rendered_again() {
    let fx = Fixture::new(FakeRasterizer::new());
    fx.note("/notes/day.note", &[3, 4]);
    fx.extractor(fx.options())
        .extract(Path::new("/notes/day.note"))
        .unwrap();
    fx.storage.remove(Path::new("/media/day_page_2.png"));
    fx.storage
        .set_modified("/notes/day.note", 1_800_000_000_000);
    fx.rasterizer.reset_calls();

    let report = fx
        .extractor(fx.options())
        .extract(Path::new("/notes/day.note"))
        .unwrap();

    assert_eq!(report.rendered, vec!["2"]);
    assert!(fx.storage.contains(Path::new("/media/day_page_2.png")));
}

#[test]
fn force_renders_blank_pages_too() {
    let fx = Fixture::new(FakeRasterizer::new());
    fx.note("/notes/day.note", &[0, 1]);
    fx.extractor(fx.options())
        .extract(Path::new("/notes/day.note"))
        .unwrap();
    fx.rasterizer.reset_calls();

    let mut options = fx.options();
    options.force = true;
    let report = fx
        .extractor(options)
        .extract(Path::new("/notes/day.note"))
        .unwrap();

    assert!(!report.fast_path);
    assert_eq!(report.rendered, vec!["1", "2"]);
    assert_eq!(fx.rasterizer.calls(), vec![0, 1]);
}

#[test]
fn removed_pages_lose_their_artifacts() {
    let fx = Fixture::new(FakeRasterizer::new());
    fx.note("/notes/day.note", &[1, 1, 1]);
    fx.extractor(fx.options())
        .extract(Path::new("/notes/day.note"))
        .unwrap();
    assert!(fx.storage.contains(Path::new("/media/day_page_3.png")));

    fx.note("/notes/day.note", &[1, 1]);
    fx.extractor(fx.options())
        .extract(Path::new("/notes/day.note"))
        .unwrap();

    assert!(!fx.storage.contains(Path::new("/media/day_page_3.png")));
    assert!(fx.storage.contains(Path::new("/media/day_page_1.png")));
}

#[test]
fn cache_save_failure_is_a_warning() {
    let fx = Fixture::new(FakeRasterizer::new());
    fx.note("/notes/day.note", &[1]);
    fx.storage.fail_writes_to(CACHE_PATH);

    let extractor = fx.extractor(fx.options());
    let report = extractor.extract(Path::new("/notes/day.note")).unwrap();

    assert!(report.save_warning.is_some());
    assert_eq!(report.rendered, vec!["1"]);
    assert!(
        extractor
            .cache()
            .get(CacheType::Notes, "/notes/day.note")
            .is_some()
    );
}

#[test]
fn corrupt_cache_is_treated_as_empty() {
    let fx = Fixture::new(FakeRasterizer::new());
    fx.note("/notes/day.note", &[1]);
    fx.storage.insert(CACHE_PATH, b"{\"notes\": [".to_vec());

    let report = fx
        .extractor(fx.options())
        .extract(Path::new("/notes/day.note"))
        .unwrap();

    assert_eq!(report.rendered, vec!["1"]);
    let saved: serde_json::Value = serde_json::from_slice(&fx.cache_bytes()).unwrap();
    assert!(saved["notes"]["/notes/day.note"].is_object());
}

#[test]
fn malformed_note_is_fatal() {
    let fx = Fixture::new(FakeRasterizer::new());
    fx.storage
        .insert("/notes/broken.note", b"not a note at all".to_vec());

    let err = fx
        .extractor(fx.options())
        .extract(Path::new("/notes/broken.note"))
        .unwrap_err();
    assert!(matches!(err, ExtractError::Format { .. }));
}

#[test]
fn unsupported_extension_is_rejected() {
    let fx = Fixture::new(FakeRasterizer::new());
    fx.storage.insert("/notes/readme.txt", b"hi".to_vec());

    let err = fx
        .extractor(fx.options())
        .extract(Path::new("/notes/readme.txt"))
        .unwrap_err();
    assert!(matches!(err, ExtractError::UnsupportedFileType { .. }));
}

fn pdf_fixture(marks: &[(&str, u32)]) -> Fixture {
    let fx = Fixture::new(FakeRasterizer::new());
    fx.storage.insert("/docs/planner.pdf", b"%PDF-1.7".to_vec());
    let mut builder = NoteFileBuilder::mark();
    for (number, count) in marks {
        builder = builder.page(number, *count);
    }
    fx.storage.insert("/docs/planner.pdf.mark", builder.build());
    fx
}

#[test]
fn annotated_pdf_pages_are_composited() {
    let fx = pdf_fixture(&[("5", 2), ("9", 0), ("12", 1)]);
    let compositor = Arc::new(FakeCompositor::new(fx.storage.clone(), 20));

    let report = fx
        .extractor(fx.options())
        .with_compositor(compositor.clone())
        .extract(Path::new("/docs/planner.pdf"))
        .unwrap();

    assert_eq!(report.status, ExtractStatus::Success);
    assert_eq!(report.cache_type, CacheType::Pdfs);
    assert_eq!(report.rendered, vec!["5", "12"]);
    assert_eq!(report.blank, vec!["9"]);
    // PDF page index is the page number minus one
    assert_eq!(compositor.extracted(), vec![4, 11]);
    assert_eq!(compositor.overlaid(), vec![4, 11]);
    assert_eq!(
        report.artifacts.get(5),
        Some(Path::new("/media/planner_page_5.png"))
    );
    assert!(fx.storage.contains(Path::new("/media/planner_page_12.png")));
}

#[test]
fn pdf_timestamp_follows_the_newer_of_pdf_and_marks() {
    let fx = pdf_fixture(&[("1", 1)]);
    let compositor = Arc::new(FakeCompositor::new(fx.storage.clone(), 3));
    fx.storage.set_modified("/docs/planner.pdf", 10);
    fx.storage.set_modified("/docs/planner.pdf.mark", 20);

    let extractor = fx
        .extractor(fx.options())
        .with_compositor(compositor.clone());
    extractor.extract(Path::new("/docs/planner.pdf")).unwrap();
    let entry = extractor
        .cache()
        .get(CacheType::Pdfs, "/docs/planner.pdf")
        .unwrap();
    assert_eq!(entry.last_modified, 20);

    // Newer PDF invalidates the fast path
    fx.storage.set_modified("/docs/planner.pdf", 30);
    let report = fx
        .extractor(fx.options())
        .with_compositor(compositor)
        .extract(Path::new("/docs/planner.pdf"))
        .unwrap();
    assert!(!report.fast_path);
    assert_eq!(report.reused, vec!["1"]);
}

#[test]
fn raster_fallback_chain_reaches_base64() {
    let fx = pdf_fixture(&[("2", 1)]);
    let compositor = Arc::new(
        FakeCompositor::new(fx.storage.clone(), 3)
            .fail_mode(supernote_viewer::pdf::RasterMode::DirectSave)
            .fail_mode(supernote_viewer::pdf::RasterMode::Buffer),
    );

    let report = fx
        .extractor(fx.options())
        .with_compositor(compositor)
        .extract(Path::new("/docs/planner.pdf"))
        .unwrap();

    assert_eq!(report.status, ExtractStatus::Success);
    let png = fx
        .storage
        .get(Path::new("/media/planner_page_2.png"))
        .unwrap();
    assert!(png.starts_with(b"\x89PNG"));
}

#[test]
fn exhausted_fallbacks_keep_page_as_pdf() {
    let fx = pdf_fixture(&[("2", 1), ("3", 1)]);
    let compositor = Arc::new(FakeCompositor::new(fx.storage.clone(), 5).fail_all_modes());

    let report = fx
        .extractor(fx.options())
        .with_compositor(compositor)
        .extract(Path::new("/docs/planner.pdf"))
        .unwrap();

    assert_eq!(report.status, ExtractStatus::Partial);
    assert!(report.failures.is_empty());
    assert!(report.artifacts.is_empty());
    assert_eq!(
        report.degraded,
        vec![
            ("2".to_string(), PathBuf::from("/media/planner_page_2.pdf")),
            ("3".to_string(), PathBuf::from("/media/planner_page_3.pdf")),
        ]
    );
    let pdf = fx
        .storage
        .get(Path::new("/media/planner_page_2.pdf"))
        .unwrap();
    assert!(pdf.starts_with(b"%PDF-"));
}

#[test]
fn page_outside_the_pdf_fails_alone() {
    let fx = pdf_fixture(&[("2", 1), ("40", 1)]);
    let compositor = Arc::new(FakeCompositor::new(fx.storage.clone(), 10));

    let report = fx
        .extractor(fx.options())
        .with_compositor(compositor)
        .extract(Path::new("/docs/planner.pdf"))
        .unwrap();

    assert_eq!(report.status, ExtractStatus::Partial);
    assert_eq!(report.rendered, vec!["2"]);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].page_number, "40");
}

#[test]
fn missing_mark_file_is_reported() {
    let fx = Fixture::new(FakeRasterizer::new());
    fx.storage.insert("/docs/plain.pdf", b"%PDF-1.7".to_vec());
    let compositor = Arc::new(FakeCompositor::new(fx.storage.clone(), 1));

    let err = fx
        .extractor(fx.options())
        .with_compositor(compositor)
        .extract(Path::new("/docs/plain.pdf"))
        .unwrap_err();

    match err {
        ExtractError::MissingCompanionFile { path } => {
            assert_eq!(path, PathBuf::from("/docs/plain.pdf.mark"));
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn pdf_without_compositor_is_an_error() {
    let fx = pdf_fixture(&[("1", 1)]);
    let err = fx
        .extractor(fx.options())
        .extract(Path::new("/docs/planner.pdf"))
        .unwrap_err();
    assert!(matches!(err, ExtractError::NoCompositor));
}

#[test]
fn degraded_pdf_is_deleted_with_its_entry() {
    let fx = pdf_fixture(&[("2", 1)]);
    let compositor = Arc::new(FakeCompositor::new(fx.storage.clone(), 5).fail_all_modes());
    let extractor = fx.extractor(fx.options()).with_compositor(compositor);

    extractor.extract(Path::new("/docs/planner.pdf")).unwrap();
    let degraded = Path::new("/media/planner_page_2.pdf");
    let entry = extractor
        .cache()
        .get(CacheType::Pdfs, "/docs/planner.pdf")
        .unwrap();
    assert_eq!(entry.page("2").unwrap().degraded_path.as_deref(), Some(degraded));
    assert!(fx.storage.contains(degraded));

    extractor
        .cache()
        .delete(CacheType::Pdfs, "/docs/planner.pdf")
        .unwrap();
    assert!(!fx.storage.contains(degraded));
}

#[test]
fn degraded_page_is_retried_and_its_pdf_replaced() {
    let fx = pdf_fixture(&[("2", 1)]);
    let failing = Arc::new(FakeCompositor::new(fx.storage.clone(), 5).fail_all_modes());
    fx.extractor(fx.options())
        .with_compositor(failing)
        .extract(Path::new("/docs/planner.pdf"))
        .unwrap();

    fx.storage
        .set_modified("/docs/planner.pdf", 1_800_000_000_000);
    let report = fx
        .extractor(fx.options())
        .with_compositor(Arc::new(FakeCompositor::new(fx.storage.clone(), 5)))
        .extract(Path::new("/docs/planner.pdf"))
        .unwrap();

    assert_eq!(report.status, ExtractStatus::Success);
    assert_eq!(report.rendered, vec!["2"]);
    assert!(fx.storage.contains(Path::new("/media/planner_page_2.png")));
    assert!(!fx.storage.contains(Path::new("/media/planner_page_2.pdf")));
}

#[test]
fn out_of_range_cached_index_is_ignored() {
    let fx = Fixture::new(FakeRasterizer::new());
    fx.note("/notes/day.note", &[1, 1]);
    let mtime = fx.storage.modified(Path::new("/notes/day.note")).unwrap();
    let cache = serde_json::json!({
        "notes": {
            "/notes/day.note": {
                "filePath": "/notes/day.note",
                "lastModified": mtime,
                "pages": [
                    {"pageNumber": "1", "index": u64::MAX, "marksCount": 1,
                     "artifactPath": "/media/day_page_1.png"},
                    {"pageNumber": "2", "index": 1, "marksCount": 1,
                     "artifactPath": "/media/day_page_2.png"}
                ]
            }
        }
    });
    fx.storage
        .insert(CACHE_PATH, serde_json::to_vec(&cache).unwrap());

    let report = fx
        .extractor(fx.options())
        .extract(Path::new("/notes/day.note"))
        .unwrap();

    assert!(report.fast_path);
    assert_eq!(report.artifacts.get(1), None);
    assert_eq!(
        report.artifacts.get(2),
        Some(Path::new("/media/day_page_2.png"))
    );
}

#[test]
fn concurrent_calls_on_one_file_render_once() {
    let fx = Fixture::new(FakeRasterizer::new().with_delay(Duration::from_millis(50)));
    fx.note("/notes/day.note", &[1, 1]);
    let cache = Arc::new(CacheIndex::new(
        Box::new(JsonCacheFile::new(fx.storage.clone(), CACHE_PATH)),
        fx.storage.clone(),
        &[CacheType::Notes],
    ));
    let locks = Arc::new(KeyedLocks::new());
    let extractor = || {
        Extractor::new(
            fx.storage.clone(),
            Arc::clone(&cache),
            fx.rasterizer.clone(),
            fx.options(),
        )
        .with_locks(Arc::clone(&locks))
    };
    let (first, second) = (extractor(), extractor());

    let reports = std::thread::scope(|s| {
        let a = s.spawn(|| first.extract(Path::new("/notes/day.note")).unwrap());
        let b = s.spawn(|| second.extract(Path::new("/notes/day.note")).unwrap());
        [a.join().unwrap(), b.join().unwrap()]
    });

    assert_eq!(reports.iter().filter(|r| r.fast_path).count(), 1);
    assert_eq!(fx.rasterizer.calls(), vec![0, 1]);
    assert_eq!(reports[0].artifacts, reports[1].artifacts);
    let entry = cache.get(CacheType::Notes, "/notes/day.note").unwrap();
    assert_eq!(entry.artifact_paths().count(), 2);
}

#[test]
fn orphans_survive_a_failed_save() {
    let fx = Fixture::new(FakeRasterizer::new());
    fx.note("/notes/day.note", &[1, 1, 1]);
    fx.extractor(fx.options())
        .extract(Path::new("/notes/day.note"))
        .unwrap();

    fx.note("/notes/day.note", &[1, 1]);
    fx.storage.fail_writes_to(CACHE_PATH);
    let report = fx
        .extractor(fx.options())
        .extract(Path::new("/notes/day.note"))
        .unwrap();

    assert!(report.save_warning.is_some());
    // The cache on disk still names page 3
    assert!(fx.storage.contains(Path::new("/media/day_page_3.png")));
}
