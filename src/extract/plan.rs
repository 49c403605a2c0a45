//! Per-page staleness decisions

use std::path::Path;

use log::debug;

use crate::cache::{FileCacheEntry, PageExtractInfo};

/// What to do with each current page
#[derive(Debug, Default)]
pub struct PagePlan {
    /// Cached state carried over unchanged
    pub reuse: Vec<PageExtractInfo>,
    /// Current descriptors that need rendering
    pub render: Vec<PageExtractInfo>,
    /// Zero-mark pages with nothing to reuse
    pub blank: Vec<PageExtractInfo>,
}

/// Split `current` into reusable, stale and blank pages.
///
/// A page is fresh when the cache holds the same page number with the same
/// mark count and its artifact still exists. `force` renders everything.
pub fn plan_pages(
    current: &[PageExtractInfo],
    cached: Option<&FileCacheEntry>,
    force: bool,
    artifact_exists: impl Fn(&Path) -> bool,
) -> PagePlan {
    let mut plan = PagePlan::default();

    for page in current {
        if force {
            plan.render.push(page.clone());
            continue;
        }

        let cached_page = cached.and_then(|entry| entry.page(&page.page_number));
        let reusable = cached_page.filter(|c| {
            c.marks_count == page.marks_count
                && c.artifact_path.as_deref().is_some_and(&artifact_exists)
        });

        if let Some(c) = reusable {
            debug!("Page {} is up to date", page.page_number);
            let mut kept = c.clone();
            kept.index = page.index;
            plan.reuse.push(kept);
            continue;
        }

        if page.marks_count == 0 {
            plan.blank.push(page.clone());
            continue;
        }

        let reason = match cached_page {
            None => "not in cache",
            Some(c) if c.marks_count != page.marks_count => "marks count changed",
            Some(_) => "cached artifact missing",
        };
        debug!("Page {} needs extraction ({reason})", page.page_number);
        plan.render.push(page.clone());
    }

    plan
}
