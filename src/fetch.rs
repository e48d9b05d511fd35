use anyhow::{Context, Result};
use scraper::Html;
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

use crate::ai::parse_reply;
use crate::config::RegionRule;
use crate::gateway::{Gateway, Intent, ModelRequest};
use crate::models::{JobRecord, NOT_AVAILABLE, WORLDWIDE, prefix};
use crate::normalize::region_for;

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
(KHTML, like Gecko) Chrome/91.0.4472.114 Safari/537.36";
const SKIPPED_ELEMENTS: [&str; 5] = ["script", "style", "nav", "footer", "header"];
const MAX_PAGE_CHARS: usize = 10_000;

pub const MANUAL_SOURCE: &str = "Manual URL";
pub const MANUAL_QUERY: &str = "Manual Addition";

/// Download a posting page and reduce it to visible text.
pub fn fetch_page_text(url: &str) -> Result<String> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(10))
        .user_agent(USER_AGENT)
        .build()
        .context("Failed to build HTTP client")?;

    let html = client
        .get(url)
        .send()
        .with_context(|| format!("Failed to fetch {url}"))?
        .error_for_status()
        .with_context(|| format!("Request to {url} failed"))?
        .text()
        .context("Failed to read response body")?;

    let text = html_to_text(&html);
    info!(url, chars = text.chars().count(), "Fetched posting page");
    Ok(text)
}

/// Visible text of an HTML page, one phrase per line.
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut raw = String::new();

    for node in document.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|e| SKIPPED_ELEMENTS.contains(&e.name()))
        });
        if !hidden {
            raw.push_str(text);
            raw.push('\n');
        }
    }

    raw.lines()
        .flat_map(|line| line.trim().split("  "))
        .map(str::trim)
        .filter(|chunk| !chunk.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ExtractedJob {
    title: Option<String>,
    company: Option<String>,
    location: Option<String>,
    description: Option<String>,
    salary: Option<String>,
    posted_date: Option<String>,
}

fn extraction_prompt(page_text: &str) -> String {
    format!(
        "Extract the following job details from the text below.\n\
Return a JSON object with these exact keys:\n\
- title\n\
- company\n\
- location\n\
- description (summarize the key parts, max 300 words)\n\
- salary (if found, else \"N/A\")\n\
- posted_date (if found, else \"N/A\")\n\n\
TEXT CONTENT:\n{}\n",
        prefix(page_text, MAX_PAGE_CHARS)
    )
}

/// Have the ranking chain pull structured fields out of page text.
pub fn extract_job(gateway: &mut Gateway, page_text: &str, url: &str, regions: &[RegionRule]) -> Result<JobRecord> {
    let request = ModelRequest::new(Intent::Extract, extraction_prompt(page_text))
        .system("You are a helpful data extraction assistant. Output valid JSON only.")
        .temperature(0.1)
        .json_output();
    let reply = gateway.call(&request)?;
    let extracted: ExtractedJob = parse_reply(&reply).context("Failed to parse extracted job")?;
    Ok(job_from_extraction(extracted, url, regions))
}

fn job_from_extraction(extracted: ExtractedJob, url: &str, regions: &[RegionRule]) -> JobRecord {
    let or_na = |field: Option<String>| {
        field
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| NOT_AVAILABLE.to_string())
    };

    let location = or_na(extracted.location);
    let region = region_for(regions, &location).unwrap_or(WORLDWIDE).to_string();
    let now = chrono::Local::now();

    JobRecord {
        title: or_na(extracted.title),
        company: or_na(extracted.company),
        description: or_na(extracted.description),
        salary: or_na(extracted.salary),
        posted_date: or_na(extracted.posted_date),
        link: url.to_string(),
        job_id: format!("manual_{}", now.timestamp()),
        source: MANUAL_SOURCE.to_string(),
        query: MANUAL_QUERY.to_string(),
        region,
        search_date: now.format("%Y-%m-%d %H:%M:%S").to_string(),
        location,
        ..Default::default()
    }
}
