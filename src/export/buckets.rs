//! Calendar buckets of a yearly planner PDF
//!
//! A bucket is a titled group of page numbers. Buckets live in named
//! sections (`year`, `quarters`, `months`, `weeks`, `days`, `reflect`); the
//! `reflect` section is composed into a PDF rather than Markdown.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use super::template::french_month;

pub const REFLECT_SECTION: &str = "reflect";

pub const DEFAULT_PLANNER_YEAR: i32 = 2025;

const PLANNER_DAYS: u32 = 365;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BucketSerde", rename_all = "camelCase")]
pub struct Bucket {
    pub title: String,
    pub page_numbers: Vec<u32>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub use_template: bool,
}

impl Bucket {
    pub fn new(title: impl Into<String>, page_numbers: Vec<u32>) -> Self {
        Self {
            title: title.into(),
            page_numbers,
            use_template: false,
        }
    }

    #[must_use]
    pub fn templated(mut self) -> Self {
        self.use_template = true;
        self
    }

    /// Date a day bucket's title names, if any
    pub fn date(&self) -> Option<NaiveDate> {
        NaiveDate::parse_from_str(&self.title, "%Y-%m-%d").ok()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PageNumberSerde {
    One(u32),
    Many(Vec<u32>),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BucketModernSerde {
    title: String,
    page_numbers: Vec<u32>,
    #[serde(default)]
    use_template: bool,
}

/// Older configs used a singular `pageNumber`
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BucketLegacySerde {
    title: String,
    page_number: PageNumberSerde,
    #[serde(default)]
    use_template: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BucketSerde {
    Modern(BucketModernSerde),
    Legacy(BucketLegacySerde),
}

impl From<BucketSerde> for Bucket {
    fn from(value: BucketSerde) -> Self {
        match value {
            BucketSerde::Modern(m) => Bucket {
                title: m.title,
                page_numbers: m.page_numbers,
                use_template: m.use_template,
            },
            BucketSerde::Legacy(l) => Bucket {
                title: l.title,
                page_numbers: match l.page_number {
                    PageNumberSerde::One(n) => vec![n],
                    PageNumberSerde::Many(v) => v,
                },
                use_template: l.use_template,
            },
        }
    }
}

/// Section name -> buckets
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BucketConfig {
    sections: BTreeMap<String, Vec<Bucket>>,
}

impl BucketConfig {
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Page layout of the yearly planner template
    pub fn planner(year: i32) -> Self {
        let mut sections = BTreeMap::new();

        sections.insert(
            "year".to_string(),
            vec![Bucket::new(year.to_string(), (1170..=1274).collect())],
        );

        sections.insert(
            "quarters".to_string(),
            (1..=4)
                .map(|q| Bucket::new(format!("{year}-Q{q}"), vec![q + 2]))
                .collect(),
        );

        sections.insert(
            "months".to_string(),
            (1..=12)
                .map(|m| Bucket::new(format!("{year}-{}", french_month(m)), vec![m + 6]))
                .collect(),
        );

        sections.insert(
            "weeks".to_string(),
            (1..=52)
                .map(|w| Bucket::new(format!("{year}-W{w:02}"), vec![w + 18]))
                .collect(),
        );

        let first_day = NaiveDate::from_ymd_opt(year, 1, 1).unwrap_or_default();
        sections.insert(
            "days".to_string(),
            (1..=PLANNER_DAYS)
                .map(|day| {
                    let date = first_day + Duration::days(i64::from(day) - 1);
                    Bucket::new(date.format("%Y-%m-%d").to_string(), vec![day + 71]).templated()
                })
                .collect(),
        );

        sections.insert(
            REFLECT_SECTION.to_string(),
            vec![Bucket::new(
                format!("{year}-daily-log"),
                (437..437 + PLANNER_DAYS).collect(),
            )],
        );

        Self { sections }
    }

    pub fn sections(&self) -> impl Iterator<Item = (&str, &[Bucket])> {
        self.sections
            .iter()
            .map(|(name, buckets)| (name.as_str(), buckets.as_slice()))
    }

    pub fn section(&self, name: &str) -> Option<&[Bucket]> {
        self.sections.get(name).map(Vec::as_slice)
    }

    pub fn bucket_count(&self) -> usize {
        self.sections.values().map(Vec::len).sum()
    }
}
