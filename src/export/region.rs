//! Generated region inside a hand-edited file

/// Pair of lines delimiting the generated block
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegionMarkers {
    pub begin: String,
    pub end: String,
}

impl Default for RegionMarkers {
    fn default() -> Self {
        Self {
            begin: "<!--BEGIN-->".to_string(),
            end: "<!--END-->".to_string(),
        }
    }
}

impl RegionMarkers {
    pub fn new(begin: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            begin: begin.into(),
            end: end.into(),
        }
    }

    /// `block` wrapped in the markers
    pub fn wrap(&self, block: &str) -> String {
        format!("{}\n{block}\n{}", self.begin, self.end)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegionUpdate {
    Replaced,
    Appended,
}

/// Put `block` between the markers of `content`.
///
/// The first complete marker pair is replaced and every byte outside it is
/// kept. Without a complete pair a new region is appended.
pub fn upsert_region(content: &str, block: &str, markers: &RegionMarkers) -> (String, RegionUpdate) {
    if let Some(begin) = content.find(&markers.begin) {
        let inner_start = begin + markers.begin.len();
        if let Some(end_offset) = content[inner_start..].find(&markers.end) {
            let end = inner_start + end_offset + markers.end.len();
            let mut out = String::with_capacity(content.len() + block.len());
            out.push_str(&content[..begin]);
            out.push_str(&markers.wrap(block));
            out.push_str(&content[end..]);
            return (out, RegionUpdate::Replaced);
        }
    }

    let mut out = content.to_string();
    if !out.is_empty() && !out.ends_with("\n\n") {
        out.push_str(if out.ends_with('\n') { "\n" } else { "\n\n" });
    }
    out.push_str(&markers.wrap(block));
    out.push('\n');
    (out, RegionUpdate::Appended)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_only_between_markers() {
        let content = "# Day\n\nmy notes\n<!--BEGIN-->\nold\n<!--END-->\ntrailing text\n";
        let (out, update) = upsert_region(content, "new line", &RegionMarkers::default());
        assert_eq!(update, RegionUpdate::Replaced);
        assert_eq!(
            out,
            "# Day\n\nmy notes\n<!--BEGIN-->\nnew line\n<!--END-->\ntrailing text\n"
        );
    }

    #[test]
    fn appends_when_absent() {
        let (out, update) = upsert_region("hello", "x", &RegionMarkers::default());
        assert_eq!(update, RegionUpdate::Appended);
        assert_eq!(out, "hello\n\n<!--BEGIN-->\nx\n<!--END-->\n");

        let (out, _) = upsert_region("", "x", &RegionMarkers::default());
        assert_eq!(out, "<!--BEGIN-->\nx\n<!--END-->\n");

        let (out, _) = upsert_region("# Title\n\n", "x", &RegionMarkers::default());
        assert_eq!(out, "# Title\n\n<!--BEGIN-->\nx\n<!--END-->\n");
    }

    #[test]
    fn unterminated_region_gets_a_new_one() {
        let content = "<!--BEGIN-->\ndangling\n";
        let (out, update) = upsert_region(content, "x", &RegionMarkers::default());
        assert_eq!(update, RegionUpdate::Appended);
        assert!(out.starts_with(content));
    }

    #[test]
    fn custom_markers() {
        let markers = RegionMarkers::new("%% start", "%% stop");
        let (out, update) = upsert_region("a\n%% start\nb\n%% stop\nc", "z", &markers);
        assert_eq!(update, RegionUpdate::Replaced);
        assert_eq!(out, "a\n%% start\nz\n%% stop\nc");
    }

    #[test]
    fn replacing_twice_is_stable() {
        let markers = RegionMarkers::default();
        let (once, _) = upsert_region("intro\n", "block", &markers);
        let (twice, update) = upsert_region(&once, "block", &markers);
        assert_eq!(update, RegionUpdate::Replaced);
        assert_eq!(once, twice);
    }
}
