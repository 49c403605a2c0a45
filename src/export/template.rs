use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate};
use regex::{Captures, Regex};

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").expect("Failed to compile placeholder regex")
});

/// Seed of a newly created day file
pub const DAY_TEMPLATE: &str = "# {{title}}\n\n[[{{week}}]] [[{{month}}]] [[{{quarter}}]] [[{{year}}]]\n\n";

/// Seed of any other newly created bucket file
pub const PLAIN_TEMPLATE: &str = "# {{title}}\n\n";

const FRENCH_MONTHS: [&str; 12] = [
    "janvier",
    "février",
    "mars",
    "avril",
    "mai",
    "juin",
    "juillet",
    "août",
    "septembre",
    "octobre",
    "novembre",
    "décembre",
];

pub struct TemplateEngine;

impl TemplateEngine {
    /// Replace `{{variable}}` placeholders; unknown ones are left untouched
    pub fn render(template: &str, variables: &BTreeMap<String, String>) -> String {
        PLACEHOLDER_RE
            .replace_all(template, |caps: &Captures| {
                variables
                    .get(&caps[1])
                    .cloned()
                    .unwrap_or_else(|| caps[0].to_string())
            })
            .into_owned()
    }
}

/// Lower-case French month name, 1-based
pub fn french_month(month: u32) -> &'static str {
    FRENCH_MONTHS[(month.clamp(1, 12) - 1) as usize]
}

/// Titles of the week, month, quarter and year buckets containing `date`
pub fn calendar_variables(title: &str, date: NaiveDate) -> BTreeMap<String, String> {
    let iso = date.iso_week();
    let year = date.year();
    let mut vars = BTreeMap::new();
    vars.insert("title".to_string(), title.to_string());
    vars.insert("date".to_string(), date.format("%Y-%m-%d").to_string());
    vars.insert(
        "week".to_string(),
        format!("{}-W{:02}", iso.year(), iso.week()),
    );
    vars.insert(
        "month".to_string(),
        format!("{year}-{}", french_month(date.month())),
    );
    vars.insert(
        "quarter".to_string(),
        format!("{year}-Q{}", (date.month() - 1) / 3 + 1),
    );
    vars.insert("year".to_string(), year.to_string());
    vars
}
