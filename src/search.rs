use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::rc::Rc;
use std::time::Duration;
use tracing::{info, warn};

use crate::dedupe::dedupe;
use crate::gateway::Pacer;
use crate::models::{JobRecord, SearchQuery, WORLDWIDE};
use crate::normalize::{Normalizer, RawJob};

const SERPAPI_URL: &str = "https://serpapi.com/search";

/// Anything that can turn a query into raw postings.
pub trait JobSource {
    fn fetch(&self, query: &str, location: Option<&str>) -> Result<Vec<RawJob>>;
}

#[derive(Debug, Deserialize)]
struct SerpApiResponse {
    error: Option<String>,
    #[serde(default)]
    jobs_results: Vec<RawJob>,
}

pub struct SerpApiClient {
    api_key: String,
    client: reqwest::blocking::Client,
}

impl SerpApiClient {
    pub fn new(api_key: &str) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            api_key: api_key.to_string(),
            client,
        })
    }
}

impl JobSource for SerpApiClient {
    fn fetch(&self, query: &str, location: Option<&str>) -> Result<Vec<RawJob>> {
        let mut params = vec![
            ("engine", "google_jobs"),
            ("q", query),
            ("api_key", self.api_key.as_str()),
            ("num", "20"),
        ];
        if let Some(location) = location {
            params.push(("location", location));
        }

        let response = self
            .client
            .get(SERPAPI_URL)
            .query(&params)
            .send()
            .context("Failed to send request to SerpApi")?
            .error_for_status()
            .context("SerpApi request failed")?;

        let body: SerpApiResponse = response.json().context("Failed to parse SerpApi response")?;
        if let Some(error) = body.error {
            bail!("SerpApi error: {error}");
        }
        Ok(body.jobs_results)
    }
}

pub struct JobSearcher<'a> {
    source: &'a dyn JobSource,
    normalizer: Normalizer,
    max_results_per_query: usize,
    pacer: Rc<dyn Pacer>,
}

impl<'a> JobSearcher<'a> {
    pub fn new(
        source: &'a dyn JobSource,
        normalizer: Normalizer,
        max_results_per_query: usize,
        pacer: Rc<dyn Pacer>,
    ) -> Self {
        Self {
            source,
            normalizer,
            max_results_per_query,
            pacer,
        }
    }

    /// Run every query worldwide and, when it has a location, once more filtered.
    pub fn search_all(&self, queries: &[SearchQuery]) -> Vec<JobRecord> {
        let mut found = Vec::new();
        for (i, query) in queries.iter().enumerate() {
            info!(query = %query.text, n = i + 1, total = queries.len(), "Searching");
            let mut results = self.search(query);
            results.truncate(self.max_results_per_query);
            found.extend(results);
        }

        let unique = dedupe(found);
        info!(count = unique.len(), "Search complete");
        unique
    }

    fn search(&self, query: &SearchQuery) -> Vec<JobRecord> {
        let mut regions: Vec<Option<&str>> = vec![None];
        if let Some(location) = query.location.as_deref() {
            regions.push(Some(location));
        }

        let mut jobs = Vec::new();
        for location in regions {
            let label = location.unwrap_or(WORLDWIDE);
            match self.source.fetch(&query.text, location) {
                Ok(raw) => {
                    info!(query = %query.text, region = label, found = raw.len(), "Search returned jobs");
                    jobs.extend(raw.iter().map(|r| self.normalizer.normalize(r, &query.text, label)));
                    self.pacer.pause(Duration::from_secs(1));
                }
                Err(e) => warn!(query = %query.text, region = label, error = %format!("{e:#}"), "Search failed"),
            }
        }
        jobs
    }
}
