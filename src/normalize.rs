use serde::Deserialize;

use crate::config::RegionRule;
use crate::models::{JobRecord, NOT_AVAILABLE};

const NO_DESCRIPTION: &str = "No description available";

/// One entry of a `google_jobs` result list, as SerpApi sends it.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawJob {
    pub title: Option<String>,
    pub company_name: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub detected_extensions: DetectedExtensions,
    pub share_url: Option<String>,
    pub apply_options: Vec<ApplyOption>,
    pub job_highlights: Vec<JobHighlight>,
    pub job_id: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DetectedExtensions {
    pub salary: Option<String>,
    pub posted_at: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ApplyOption {
    pub title: Option<String>,
    pub link: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct JobHighlight {
    pub title: Option<String>,
    pub items: Vec<String>,
}

pub struct Normalizer {
    regions: Vec<RegionRule>,
    search_date: String,
}

impl Normalizer {
    pub fn new(regions: Vec<RegionRule>) -> Self {
        Self {
            regions,
            search_date: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }

    pub fn normalize(&self, raw: &RawJob, query: &str, region_label: &str) -> JobRecord {
        let location = or_na(&raw.location);
        let region = self
            .match_region(&location)
            .unwrap_or(region_label)
            .to_string();

        JobRecord {
            suitability_score: None,
            suitability_reason: String::new(),
            title: or_na(&raw.title),
            company: or_na(&raw.company_name),
            description: describe(raw),
            salary: or_na(&raw.detected_extensions.salary),
            link: link_for(raw).unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            posted_date: or_na(&raw.detected_extensions.posted_at),
            job_id: or_na(&raw.job_id),
            source: "SerpApi".to_string(),
            query: query.to_string(),
            region,
            search_date: self.search_date.clone(),
            location,
        }
    }

    /// First configured region whose keywords appear in `location`.
    pub fn match_region(&self, location: &str) -> Option<&str> {
        region_for(&self.regions, location)
    }
}

pub fn region_for<'a>(regions: &'a [RegionRule], location: &str) -> Option<&'a str> {
    let location = location.to_lowercase();
    regions
        .iter()
        .find(|rule| {
            rule.keywords
                .iter()
                .any(|keyword| location.contains(&keyword.to_lowercase()))
        })
        .map(|rule| rule.label.as_str())
}

fn or_na(value: &Option<String>) -> String {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => NOT_AVAILABLE.to_string(),
    }
}

fn link_for(raw: &RawJob) -> Option<String> {
    raw.share_url
        .iter()
        .chain(raw.apply_options.first().and_then(|o| o.link.as_ref()))
        .find(|link| !link.trim().is_empty())
        .cloned()
}

fn describe(raw: &RawJob) -> String {
    let description = match raw.description.as_deref() {
        Some(d) if !d.trim().is_empty() => d.to_string(),
        _ => NO_DESCRIPTION.to_string(),
    };
    if raw.job_highlights.is_empty() {
        return description;
    }

    let highlights: Vec<String> = raw
        .job_highlights
        .iter()
        .map(|h| format!("{}:\n{}", h.title.as_deref().unwrap_or("Details"), h.items.join("\n")))
        .collect();
    format!("{description}\n\n{}", highlights.join("\n\n"))
}
