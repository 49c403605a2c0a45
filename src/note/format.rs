//! Parsed note document types

use std::fmt;

/// Device page size used when the header does not name a larger device
pub const DEFAULT_PAGE_SIZE: (u32, u32) = (1404, 1872);
/// Page size of the A5-sized Manta ("N5") devices
pub const N5_PAGE_SIZE: (u32, u32) = (1920, 2560);

/// Which kind of container was parsed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    /// Standalone handwritten note
    Note,
    /// Annotation sidecar of a PDF (`<file>.pdf.mark`)
    Mark,
}

/// Ordered `<KEY:VALUE>` pairs of a metadata block
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: Vec<(String, String)>,
}

impl Metadata {
    pub fn new(entries: Vec<(String, String)>) -> Self {
        Self { entries }
    }

    /// First value recorded for `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LayerName {
    Main,
    Layer1,
    Layer2,
    Layer3,
    Background,
}

impl LayerName {
    pub const ALL: [LayerName; 5] = [
        LayerName::Background,
        LayerName::Main,
        LayerName::Layer1,
        LayerName::Layer2,
        LayerName::Layer3,
    ];

    pub fn key(self) -> &'static str {
        match self {
            LayerName::Main => "MAINLAYER",
            LayerName::Layer1 => "LAYER1",
            LayerName::Layer2 => "LAYER2",
            LayerName::Layer3 => "LAYER3",
            LayerName::Background => "BGLAYER",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.key() == key)
    }
}

impl fmt::Display for LayerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LayerProtocol {
    RattaRle,
    Png,
    Other(String),
}

impl LayerProtocol {
    pub fn parse(value: &str) -> Self {
        match value {
            "RATTA_RLE" => LayerProtocol::RattaRle,
            "PNG" => LayerProtocol::Png,
            other => LayerProtocol::Other(other.to_string()),
        }
    }
}

/// Encoded bitmap of one layer
#[derive(Clone, Debug)]
pub struct LayerData {
    pub name: LayerName,
    pub protocol: LayerProtocol,
    pub bitmap: Vec<u8>,
}

/// Everything a rasterizer needs to draw one page.
///
/// Owned data so a copy can be shipped to a render worker.
#[derive(Clone, Debug)]
pub struct PageStrokes {
    pub index: usize,
    pub width: u32,
    pub height: u32,
    /// Layers in composition order, bottom first
    pub layers: Vec<LayerData>,
}

impl PageStrokes {
    /// Same page without its background/template layer
    pub fn without_background(&self) -> Self {
        Self {
            index: self.index,
            width: self.width,
            height: self.height,
            layers: self
                .layers
                .iter()
                .filter(|l| l.name != LayerName::Background)
                .cloned()
                .collect(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Page {
    /// 0-based position in the document
    pub index: usize,
    /// External page number from the footer (`PAGE<n>` suffix)
    pub number: String,
    /// Number of stroke records; 0 means no handwriting
    pub marks_count: u32,
    pub style: Option<String>,
    pub strokes: PageStrokes,
}

/// Title, keyword or link record referenced from the footer
#[derive(Clone, Debug)]
pub struct Anchor {
    /// Footer key, e.g. `TITLE_00010123`
    pub key: String,
    pub attributes: Metadata,
}

#[derive(Clone, Debug)]
pub struct NoteDocument {
    pub kind: FileKind,
    pub signature: String,
    pub header: Metadata,
    pub page_width: u32,
    pub page_height: u32,
    pub pages: Vec<Page>,
    pub titles: Vec<Anchor>,
    pub keywords: Vec<Anchor>,
    pub links: Vec<Anchor>,
}

impl NoteDocument {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn page(&self, index: usize) -> Option<&Page> {
        self.pages.get(index)
    }

    pub fn page_by_number(&self, number: &str) -> Option<&Page> {
        self.pages.iter().find(|p| p.number == number)
    }
}
