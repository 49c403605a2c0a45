//! Binary container parser
//!
//! Layout: an optional 4-byte file type (`note`/`mark`), the ASCII signature
//! `SN_FILE_VER_dddddddd`, then blocks addressed by little-endian `u32`
//! offsets. Each block is a `u32` length followed by its payload. The last
//! four bytes of the file point at the footer, a `<KEY:VALUE>` block that
//! indexes the header, pages, titles, keywords and links.

use std::sync::LazyLock;

use log::debug;
use regex::Regex;
use regex::bytes::Regex as BytesRegex;

use super::format::{
    Anchor, DEFAULT_PAGE_SIZE, FileKind, LayerData, LayerName, LayerProtocol, Metadata,
    N5_PAGE_SIZE, NoteDocument, Page, PageStrokes,
};

const ADDRESS_SIZE: usize = 4;

static SIGNATURE_RE: LazyLock<BytesRegex> = LazyLock::new(|| {
    BytesRegex::new(r"^(note|mark)?(SN_FILE_VER_\d{8})")
        .expect("Failed to compile signature regex")
});

static KEY_VALUE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<([^:<>]+):([^<>]*)>").expect("Failed to compile key/value regex")
});

#[derive(Debug, thiserror::Error)]
pub enum FormatError {
    #[error("not a note container (missing SN_FILE_VER signature)")]
    Signature,

    #[error("file is truncated ({len} bytes)")]
    Truncated { len: usize },

    #[error("block at {address:#x} exceeds file length {len}")]
    OutOfBounds { address: usize, len: usize },

    #[error("footer has no {0} entry")]
    MissingKey(&'static str),

    #[error("invalid {key} value {value:?}")]
    InvalidValue { key: String, value: String },

    #[error("metadata block at {address:#x} is not valid UTF-8")]
    Encoding { address: usize },
}

/// Parse a `.note` or `.mark` byte stream
pub fn parse(data: &[u8]) -> Result<NoteDocument, FormatError> {
    let caps = SIGNATURE_RE
        .captures(data)
        .ok_or(FormatError::Signature)?;
    let kind = match caps.get(1).map(|m| m.as_bytes()) {
        Some(b"mark") => FileKind::Mark,
        _ => FileKind::Note,
    };
    let signature = String::from_utf8_lossy(&caps[2]).into_owned();
    let signature_end = caps.get(0).map_or(0, |m| m.end());

    if data.len() < signature_end + ADDRESS_SIZE {
        return Err(FormatError::Truncated { len: data.len() });
    }

    let footer_address = read_u32(data, data.len() - ADDRESS_SIZE)? as usize;
    let footer = metadata_at(data, footer_address)?.ok_or(FormatError::MissingKey("footer"))?;

    let header_address = address_value(&footer, "FILE_FEATURE")?
        .ok_or(FormatError::MissingKey("FILE_FEATURE"))?;
    let header = metadata_at(data, header_address)?.unwrap_or_default();

    let (page_width, page_height) = match header.get("APPLY_EQUIPMENT") {
        Some("N5") => N5_PAGE_SIZE,
        _ => DEFAULT_PAGE_SIZE,
    };

    let mut pages = Vec::new();
    for (index, (number, address)) in page_addresses(&footer)?.into_iter().enumerate() {
        pages.push(parse_page(
            data,
            index,
            number,
            address,
            (page_width, page_height),
        )?);
    }

    let titles = anchors(data, &footer, &["TITLE_"])?;
    let keywords = anchors(data, &footer, &["KEYWORD_"])?;
    let links = anchors(data, &footer, &["LINKO_", "LINKI_"])?;

    debug!(
        "Parsed {signature} ({kind:?}): {} pages, {} titles, {} links",
        pages.len(),
        titles.len(),
        links.len()
    );

    Ok(NoteDocument {
        kind,
        signature,
        header,
        page_width,
        page_height,
        pages,
        titles,
        keywords,
        links,
    })
}

fn read_u32(data: &[u8], offset: usize) -> Result<u32, FormatError> {
    let end = offset
        .checked_add(ADDRESS_SIZE)
        .filter(|&end| end <= data.len())
        .ok_or(FormatError::OutOfBounds {
            address: offset,
            len: data.len(),
        })?;
    let mut buf = [0u8; ADDRESS_SIZE];
    buf.copy_from_slice(&data[offset..end]);
    Ok(u32::from_le_bytes(buf))
}

/// Payload of the block at `address`; `None` for the null address
fn block_at(data: &[u8], address: usize) -> Result<Option<&[u8]>, FormatError> {
    if address == 0 {
        return Ok(None);
    }
    let len = read_u32(data, address)? as usize;
    let start = address + ADDRESS_SIZE;
    let end = start
        .checked_add(len)
        .filter(|&end| end <= data.len())
        .ok_or(FormatError::OutOfBounds {
            address,
            len: data.len(),
        })?;
    Ok(Some(&data[start..end]))
}

fn metadata_at(data: &[u8], address: usize) -> Result<Option<Metadata>, FormatError> {
    let Some(block) = block_at(data, address)? else {
        return Ok(None);
    };
    let text = std::str::from_utf8(block).map_err(|_| FormatError::Encoding { address })?;
    Ok(Some(parse_key_values(text)))
}

pub(crate) fn parse_key_values(text: &str) -> Metadata {
    Metadata::new(
        KEY_VALUE_RE
            .captures_iter(text)
            .map(|caps| (caps[1].to_string(), caps[2].to_string()))
            .collect(),
    )
}

fn address_value(meta: &Metadata, key: &str) -> Result<Option<usize>, FormatError> {
    match meta.get(key) {
        None => Ok(None),
        Some(value) => parse_address(key, value).map(Some),
    }
}

fn parse_address(key: &str, value: &str) -> Result<usize, FormatError> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|_| FormatError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        })
}

/// `PAGE<n>` footer entries: numeric suffixes ascending, the rest in file order
fn page_addresses(footer: &Metadata) -> Result<Vec<(String, usize)>, FormatError> {
    let mut numeric: Vec<(u64, String, usize)> = Vec::new();
    let mut other: Vec<(String, usize)> = Vec::new();

    for (key, value) in footer.iter() {
        let Some(number) = key.strip_prefix("PAGE") else {
            continue;
        };
        if number.is_empty() {
            continue;
        }
        let seen = numeric.iter().any(|(_, n, _)| n == number) || other.iter().any(|(n, _)| n == number);
        if seen {
            continue;
        }
        let address = parse_address(key, value)?;
        match number.parse::<u64>() {
            Ok(n) => numeric.push((n, number.to_string(), address)),
            Err(_) => other.push((number.to_string(), address)),
        }
    }

    numeric.sort_by_key(|(n, _, _)| *n);
    Ok(numeric
        .into_iter()
        .map(|(_, number, address)| (number, address))
        .chain(other)
        .collect())
}

fn parse_page(
    data: &[u8],
    index: usize,
    number: String,
    address: usize,
    (width, height): (u32, u32),
) -> Result<Page, FormatError> {
    let meta = metadata_at(data, address)?.unwrap_or_default();

    let marks_count = match address_value(&meta, "TOTALPATH")? {
        None => 0,
        Some(total_path) => match block_at(data, total_path)? {
            None => 0,
            Some(block) if block.is_empty() => 0,
            Some(block) => read_u32(block, 0)?,
        },
    };

    let mut layers = Vec::new();
    for name in layer_order(meta.get("LAYERSEQ")) {
        let Some(layer_address) = address_value(&meta, name.key())? else {
            continue;
        };
        let Some(layer_meta) = metadata_at(data, layer_address)? else {
            continue;
        };
        let Some(bitmap_address) = address_value(&layer_meta, "LAYERBITMAP")? else {
            continue;
        };
        let Some(bitmap) = block_at(data, bitmap_address)? else {
            continue;
        };
        layers.push(LayerData {
            name,
            protocol: LayerProtocol::parse(layer_meta.get("LAYERPROTOCOL").unwrap_or("RATTA_RLE")),
            bitmap: bitmap.to_vec(),
        });
    }

    Ok(Page {
        index,
        number,
        marks_count,
        style: meta.get("PAGESTYLE").map(str::to_string),
        strokes: PageStrokes {
            index,
            width,
            height,
            layers,
        },
    })
}

/// Composition order, bottom first. `LAYERSEQ` lists layers top first.
fn layer_order(sequence: Option<&str>) -> Vec<LayerName> {
    let mut order: Vec<LayerName> = sequence
        .map(|seq| {
            seq.split(',')
                .filter_map(|s| LayerName::from_key(s.trim()))
                .rev()
                .collect()
        })
        .unwrap_or_default();

    if order.is_empty() {
        return LayerName::ALL.to_vec();
    }
    // Background always sits at the bottom even if the sequence omits it
    if let Some(pos) = order.iter().position(|l| *l == LayerName::Background) {
        order.remove(pos);
    }
    order.insert(0, LayerName::Background);
    order
}

fn anchors(data: &[u8], footer: &Metadata, prefixes: &[&str]) -> Result<Vec<Anchor>, FormatError> {
    let mut out = Vec::new();
    for (key, value) in footer.iter() {
        if !prefixes.iter().any(|p| key.starts_with(p)) {
            continue;
        }
        let address = parse_address(key, value)?;
        out.push(Anchor {
            key: key.to_string(),
            attributes: metadata_at(data, address)?.unwrap_or_default(),
        });
    }
    Ok(out)
}
