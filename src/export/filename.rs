use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;

static INVALID_CHARS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"[<>:"/\\|?*\x00-\x1F]"#).expect("Failed to compile filename regex")
});

static RESERVED_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(CON|PRN|AUX|NUL|COM[1-9]|LPT[1-9])$")
        .expect("Failed to compile reserved name regex")
});

const MAX_NAME_BYTES: usize = 200;

/// File name for a bucket title, safe on Windows, macOS and Linux
pub fn sanitize_filename(name: &str) -> String {
    let sanitized = INVALID_CHARS_RE.replace_all(name, "_");
    let sanitized = sanitized.trim_matches(|c| c == ' ' || c == '.');

    if RESERVED_NAME_RE.is_match(sanitized) {
        return format!("_{sanitized}");
    }

    let mut end = sanitized.len().min(MAX_NAME_BYTES);
    while !sanitized.is_char_boundary(end) {
        end -= 1;
    }
    let sanitized = &sanitized[..end];

    if sanitized.is_empty() {
        "untitled".to_string()
    } else {
        sanitized.to_string()
    }
}

/// `path` relative to `base`, with `/` separators
pub fn relative_link(base: &Path, path: &Path) -> String {
    let base: Vec<Component> = base.components().collect();
    let target: Vec<Component> = path.components().collect();
    let common = base
        .iter()
        .zip(&target)
        .take_while(|(a, b)| a == b)
        .count();

    let mut out = PathBuf::new();
    for _ in common..base.len() {
        out.push("..");
    }
    for component in &target[common..] {
        out.push(component.as_os_str());
    }
    out.to_string_lossy().replace('\\', "/")
}
