//! Builders and fakes shared by unit and integration tests

use std::collections::{BTreeMap, BTreeSet};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};

use crate::note::rle::{self, COLOR_BACKGROUND, COLOR_BLACK};
use crate::note::{DEFAULT_PAGE_SIZE, N5_PAGE_SIZE, PageStrokes, RasterError, StrokeRasterizer};
use crate::pdf::{
    CompositeError, PageComposition, PdfCompositor, RasterMode, RasterOutput, images_to_pdf,
    stack_overlay,
};
use crate::storage::{FileEntry, Scope, Storage, StorageError, normalize_path};

/// Encoded PNG of a white `width` x `height` image
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    encode_png(&RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255])))
}

fn encode_png(image: &RgbaImage) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .expect("PNG encoding of an in-memory image");
    out.into_inner()
}

struct BuilderPage {
    number: String,
    marks: u32,
}

/// Writes `.note` / `.mark` containers the parser accepts
pub struct NoteFileBuilder {
    prefix: &'static str,
    equipment: String,
    pages: Vec<BuilderPage>,
    anchors: Vec<(String, String, String)>,
}

impl NoteFileBuilder {
    pub fn note() -> Self {
        Self::with_prefix("note")
    }

    pub fn mark() -> Self {
        Self::with_prefix("mark")
    }

    fn with_prefix(prefix: &'static str) -> Self {
        Self {
            prefix,
            equipment: "A5X".to_string(),
            pages: Vec::new(),
            anchors: Vec::new(),
        }
    }

    pub fn equipment(mut self, equipment: &str) -> Self {
        self.equipment = equipment.to_string();
        self
    }

    /// Page with footer number `number` and `marks` stroke records
    pub fn page(mut self, number: &str, marks: u32) -> Self {
        self.pages.push(BuilderPage {
            number: number.to_string(),
            marks,
        });
        self
    }

    pub fn title(mut self, key: &str, attr: &str, value: &str) -> Self {
        self.anchors
            .push((key.to_string(), attr.to_string(), value.to_string()));
        self
    }

    pub fn link(self, key: &str, attr: &str, value: &str) -> Self {
        self.title(key, attr, value)
    }

    pub fn build(self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(self.prefix.as_bytes());
        out.extend_from_slice(b"SN_FILE_VER_20230015");

        let header = push_block(
            &mut out,
            format!("<FILE_TYPE:NOTE><APPLY_EQUIPMENT:{}>", self.equipment).as_bytes(),
        );

        let (width, height) = if self.equipment == "N5" {
            N5_PAGE_SIZE
        } else {
            DEFAULT_PAGE_SIZE
        };

        let mut footer = format!("<FILE_FEATURE:{header}>");
        for page in &self.pages {
            let bitmap = push_block(&mut out, &page_bitmap(width, height, page.marks));
            let layer = push_block(
                &mut out,
                format!(
                    "<LAYERTYPE:NOTE><LAYERPROTOCOL:RATTA_RLE><LAYERNAME:MAINLAYER>\
                     <LAYERBITMAP:{bitmap}>"
                )
                .as_bytes(),
            );
            let total_path = if page.marks > 0 {
                let mut strokes = page.marks.to_le_bytes().to_vec();
                strokes.resize(4 + page.marks as usize * 8, 0);
                push_block(&mut out, &strokes)
            } else {
                0
            };
            let block = push_block(
                &mut out,
                format!(
                    "<PAGESTYLE:style_white><LAYERSEQ:MAINLAYER><MAINLAYER:{layer}>\
                     <LAYER1:0><LAYER2:0><LAYER3:0><BGLAYER:0><TOTALPATH:{total_path}>"
                )
                .as_bytes(),
            );
            footer.push_str(&format!("<PAGE{}:{block}>", page.number));
        }

        for (key, attr, value) in &self.anchors {
            let block = push_block(&mut out, format!("<{attr}:{value}>").as_bytes());
            footer.push_str(&format!("<{key}:{block}>"));
        }

        let footer_address = push_block(&mut out, footer.as_bytes());
        out.extend_from_slice(&footer_address.to_le_bytes());
        out
    }
}

fn push_block(out: &mut Vec<u8>, payload: &[u8]) -> u32 {
    let address = out.len() as u32;
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    address
}

/// Main layer with one inked pixel per mark
fn page_bitmap(width: u32, height: u32, marks: u32) -> Vec<u8> {
    let mut pixels = vec![COLOR_BACKGROUND; width as usize * height as usize];
    let inked = (marks as usize).min(pixels.len());
    pixels[..inked].fill(COLOR_BLACK);
    rle::encode(&pixels)
}

const MEMORY_CLOCK_START: i64 = 1_700_000_000_000;

/// In-memory [`Storage`] with a logical clock for modification times
pub struct MemoryStorage {
    files: Mutex<BTreeMap<PathBuf, (Vec<u8>, i64)>>,
    dirs: Mutex<BTreeSet<PathBuf>>,
    failing: Mutex<BTreeSet<PathBuf>>,
    app_root: PathBuf,
    cwd: PathBuf,
    clock: AtomicI64,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            files: Mutex::new(BTreeMap::new()),
            dirs: Mutex::new(BTreeSet::new()),
            failing: Mutex::new(BTreeSet::new()),
            app_root: PathBuf::from("/app"),
            cwd: PathBuf::from("/work"),
            clock: AtomicI64::new(MEMORY_CLOCK_START),
        }
    }

    /// Relative paths given to `canonicalize` resolve against `cwd`
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = cwd.into();
        self
    }

    pub fn app_root(&self) -> &Path {
        &self.app_root
    }

    /// Add or replace a file, stamping it with the next clock tick
    pub fn insert(&self, path: impl AsRef<Path>, bytes: Vec<u8>) {
        let time = self.tick();
        self.files_lock()
            .insert(path.as_ref().to_path_buf(), (bytes, time));
    }

    pub fn set_modified(&self, path: impl AsRef<Path>, millis: i64) {
        if let Some(file) = self.files_lock().get_mut(path.as_ref()) {
            file.1 = millis;
        }
    }

    /// Absolute path, app-scope paths included
    pub fn contains(&self, path: &Path) -> bool {
        self.files_lock().contains_key(path)
    }

    pub fn get(&self, path: &Path) -> Option<Vec<u8>> {
        self.files_lock().get(path).map(|(bytes, _)| bytes.clone())
    }

    pub fn remove(&self, path: &Path) -> bool {
        self.files_lock().remove(path).is_some()
    }

    /// Every stored file path, sorted
    pub fn paths(&self) -> Vec<PathBuf> {
        self.files_lock().keys().cloned().collect()
    }

    /// Make every write to `path` fail
    pub fn fail_writes_to(&self, path: impl AsRef<Path>) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.as_ref().to_path_buf());
    }

    fn tick(&self) -> i64 {
        self.clock.fetch_add(1000, Ordering::SeqCst)
    }

    fn resolve(&self, path: &Path, scope: Scope) -> PathBuf {
        match scope {
            Scope::App => self.app_root.join(path),
            Scope::User => path.to_path_buf(),
        }
    }

    fn files_lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<PathBuf, (Vec<u8>, i64)>> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_dir(&self, path: &Path) -> bool {
        self.dirs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(path)
            || self
                .files_lock()
                .keys()
                .any(|p| p != path && p.starts_with(path))
    }
}

impl Storage for MemoryStorage {
    fn read(&self, path: &Path, scope: Scope) -> Result<Vec<u8>, StorageError> {
        let resolved = self.resolve(path, scope);
        self.files_lock()
            .get(&resolved)
            .map(|(bytes, _)| bytes.clone())
            .ok_or(StorageError::NotFound { path: resolved })
    }

    fn write(&self, path: &Path, bytes: &[u8], scope: Scope) -> Result<(), StorageError> {
        let resolved = self.resolve(path, scope);
        let failing = self
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&resolved);
        if failing {
            return Err(StorageError::io(
                resolved,
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "write refused"),
            ));
        }
        let time = self.tick();
        self.files_lock().insert(resolved, (bytes.to_vec(), time));
        Ok(())
    }

    fn exists(&self, path: &Path, scope: Scope) -> bool {
        let resolved = self.resolve(path, scope);
        self.contains(&resolved) || self.is_dir(&resolved)
    }

    fn delete(&self, path: &Path, scope: Scope) -> Result<(), StorageError> {
        let resolved = self.resolve(path, scope);
        self.files_lock().remove(&resolved);
        Ok(())
    }

    fn create_dir(&self, path: &Path, scope: Scope) -> Result<(), StorageError> {
        let resolved = self.resolve(path, scope);
        self.dirs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(resolved);
        Ok(())
    }

    fn list_files(&self, dir: &Path) -> Result<Vec<FileEntry>, StorageError> {
        if !self.is_dir(dir) {
            return Err(StorageError::NotFound {
                path: dir.to_path_buf(),
            });
        }

        let mut entries: BTreeMap<String, FileEntry> = BTreeMap::new();
        for (path, (bytes, modified)) in self.files_lock().iter() {
            let Ok(rest) = path.strip_prefix(dir) else {
                continue;
            };
            let mut components = rest.components();
            let Some(first) = components.next() else {
                continue;
            };
            let name = first.as_os_str().to_string_lossy().into_owned();
            let is_directory = components.next().is_some();
            entries.entry(name.clone()).or_insert(FileEntry {
                name,
                is_directory,
                byte_size: if is_directory { 0 } else { bytes.len() as u64 },
                modified: *modified,
            });
        }
        for sub in self
            .dirs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
        {
            if sub.parent() == Some(dir) {
                if let Some(name) = sub.file_name() {
                    let name = name.to_string_lossy().into_owned();
                    entries.entry(name.clone()).or_insert(FileEntry {
                        name,
                        is_directory: true,
                        byte_size: 0,
                        modified: 0,
                    });
                }
            }
        }
        Ok(entries.into_values().collect())
    }

    fn modified(&self, path: &Path) -> Result<i64, StorageError> {
        self.files_lock()
            .get(path)
            .map(|(_, time)| *time)
            .ok_or_else(|| StorageError::NotFound {
                path: path.to_path_buf(),
            })
    }

    fn canonicalize(&self, path: &Path) -> Result<PathBuf, StorageError> {
        let normalized = normalize_path(&self.cwd, path);
        if self.contains(&normalized) || self.is_dir(&normalized) {
            Ok(normalized)
        } else {
            Err(StorageError::NotFound {
                path: path.to_path_buf(),
            })
        }
    }
}

/// Rasterizer returning a small image per page, with scripted failures
pub struct FakeRasterizer {
    fail_on: BTreeSet<usize>,
    panic_on: BTreeSet<usize>,
    delay: Option<Duration>,
    calls: Mutex<Vec<usize>>,
}

impl Default for FakeRasterizer {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRasterizer {
    pub const SIZE: (u32, u32) = (8, 10);

    pub fn new() -> Self {
        Self {
            fail_on: BTreeSet::new(),
            panic_on: BTreeSet::new(),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Return an error for the page at `index`
    pub fn fail_on(mut self, index: usize) -> Self {
        self.fail_on.insert(index);
        self
    }

    pub fn panic_on(mut self, index: usize) -> Self {
        self.panic_on.insert(index);
        self
    }

    /// Sleep this long before each page
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Indices rasterized so far, sorted
    pub fn calls(&self) -> Vec<usize> {
        let mut calls = self
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        calls.sort_unstable();
        calls
    }

    pub fn reset_calls(&self) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl StrokeRasterizer for FakeRasterizer {
    fn rasterize(&self, page: &PageStrokes) -> Result<RgbaImage, RasterError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(page.index);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.panic_on.contains(&page.index) {
            panic!("scripted rasterizer panic on page {}", page.index);
        }
        if self.fail_on.contains(&page.index) {
            return Err(RasterError::generic(format!(
                "scripted failure on page {}",
                page.index
            )));
        }
        let shade = (page.index % 200) as u8;
        let (width, height) = Self::SIZE;
        Ok(RgbaImage::from_pixel(width, height, Rgba([shade, shade, shade, 255])))
    }
}

/// PDF compositor over [`MemoryStorage`] with scripted failures
pub struct FakeCompositor {
    storage: Arc<MemoryStorage>,
    page_count: usize,
    failing_modes: Vec<RasterMode>,
    failing_pages: BTreeSet<usize>,
    overlaid: Mutex<Vec<usize>>,
    extracted: Mutex<Vec<usize>>,
}

impl FakeCompositor {
    pub const PAGE_SIZE: (u32, u32) = (12, 16);

    pub fn new(storage: Arc<MemoryStorage>, page_count: usize) -> Self {
        Self {
            storage,
            page_count,
            failing_modes: Vec::new(),
            failing_pages: BTreeSet::new(),
            overlaid: Mutex::new(Vec::new()),
            extracted: Mutex::new(Vec::new()),
        }
    }

    pub fn fail_mode(mut self, mode: RasterMode) -> Self {
        self.failing_modes.push(mode);
        self
    }

    /// Every raster mode fails, forcing the standalone PDF fallback
    pub fn fail_all_modes(mut self) -> Self {
        self.failing_modes = RasterMode::FALLBACK_CHAIN.to_vec();
        self
    }

    /// Page extraction fails for this 0-based PDF page
    pub fn fail_page(mut self, page_index: usize) -> Self {
        self.failing_pages.insert(page_index);
        self
    }

    /// PDF page indices that received a mark overlay, sorted
    pub fn overlaid(&self) -> Vec<usize> {
        sorted(&self.overlaid)
    }

    /// PDF page indices extracted, sorted
    pub fn extracted(&self) -> Vec<usize> {
        sorted(&self.extracted)
    }

    fn raster(page: &PageComposition) -> RgbaImage {
        let (width, height) = Self::PAGE_SIZE;
        let mut base = RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 255]));
        if let Some(overlay) = &page.overlay {
            stack_overlay(&mut base, overlay);
        }
        base
    }
}

fn sorted(calls: &Mutex<Vec<usize>>) -> Vec<usize> {
    let mut calls = calls.lock().unwrap_or_else(PoisonError::into_inner).clone();
    calls.sort_unstable();
    calls
}

impl PdfCompositor for FakeCompositor {
    fn page_count(&self, _pdf: &Path) -> Result<usize, CompositeError> {
        Ok(self.page_count)
    }

    fn page_size(&self, _pdf: &Path, page_index: usize) -> Result<(f32, f32), CompositeError> {
        if page_index >= self.page_count {
            return Err(CompositeError::PageOutOfRange {
                page: page_index,
                count: self.page_count,
            });
        }
        let (width, height) = Self::PAGE_SIZE;
        Ok((width as f32, height as f32))
    }

    fn extract_page(
        &self,
        pdf: &Path,
        page_index: usize,
    ) -> Result<PageComposition, CompositeError> {
        let (width, height) = self.page_size(pdf, page_index)?;
        if self.failing_pages.contains(&page_index) {
            return Err(CompositeError::generic(format!(
                "scripted extraction failure on page {page_index}"
            )));
        }
        self.extracted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(page_index);
        Ok(PageComposition {
            source: pdf.to_path_buf(),
            page_index,
            width,
            height,
            overlay: None,
        })
    }

    fn overlay_marks(
        &self,
        page: &mut PageComposition,
        marks: RgbaImage,
    ) -> Result<(), CompositeError> {
        self.overlaid
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(page.page_index);
        page.overlay = Some(marks);
        Ok(())
    }

    fn rasterize(
        &self,
        page: &PageComposition,
        mode: RasterMode,
        _dpi: u32,
        target: &Path,
    ) -> Result<RasterOutput, CompositeError> {
        if self.failing_modes.contains(&mode) {
            return Err(CompositeError::generic(format!("scripted {mode:?} failure")));
        }
        let png = encode_png(&Self::raster(page));
        Ok(match mode {
            RasterMode::DirectSave => {
                self.storage
                    .write(target, &png, Scope::User)
                    .map_err(|e| CompositeError::generic(e.to_string()))?;
                RasterOutput::Saved(target.to_path_buf())
            }
            RasterMode::Buffer => RasterOutput::Buffer(png),
            RasterMode::Base64 => {
                RasterOutput::Base64(format!("data:image/png;base64,{}", STANDARD.encode(png)))
            }
        })
    }

    fn to_standalone_pdf(&self, page: &PageComposition) -> Result<Vec<u8>, CompositeError> {
        images_to_pdf(&[DynamicImage::ImageRgba8(Self::raster(page))])
            .map_err(|e| CompositeError::generic(e.to_string()))
    }
}
