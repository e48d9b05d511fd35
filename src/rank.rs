use anyhow::{Result, anyhow};
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, warn};

use crate::ai::parse_reply;
use crate::gateway::{Gateway, GatewayError, Intent, ModelRequest};
use crate::models::{JobRecord, parse_score, prefix};

const CV_PROMPT_CHARS: usize = 3000;
const DESCRIPTION_PROMPT_CHARS: usize = 1000;
const SYSTEM_MESSAGE: &str = "You are a helpful career assistant. Output valid JSON only.";

#[derive(Debug, Clone, Copy)]
pub struct RankOptions {
    /// Pause before every model call.
    pub call_delay: Duration,
    pub backoff_step: Duration,
}

impl RankOptions {
    pub fn standard() -> Self {
        Self {
            call_delay: Duration::from_millis(1500),
            backoff_step: Duration::from_secs(5),
        }
    }

    /// Slower pacing for re-ranking a whole CSV.
    pub fn bulk() -> Self {
        Self {
            call_delay: Duration::from_secs(5),
            backoff_step: Duration::from_secs(20),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Assessment {
    #[serde(default)]
    score: serde_json::Value,
    #[serde(default)]
    reason: Option<String>,
}

impl Assessment {
    fn score(&self) -> Option<u8> {
        match &self.score {
            serde_json::Value::Number(n) => n.as_f64().and_then(|f| parse_score(&f.to_string())),
            serde_json::Value::String(s) => parse_score(s),
            _ => None,
        }
    }
}

pub struct Ranker<'g> {
    gateway: &'g mut Gateway,
    options: RankOptions,
}

impl<'g> Ranker<'g> {
    pub fn new(gateway: &'g mut Gateway, options: RankOptions) -> Self {
        Self { gateway, options }
    }

    /// Score every job that has no usable score yet and sort by score, highest first.
    ///
    /// Once the ranking chain reports exhausted quota, the remaining jobs are
    /// passed through unscored so a later re-rank picks them up.
    pub fn rank(&mut self, jobs: Vec<JobRecord>, cv_text: &str) -> Vec<JobRecord> {
        let total = jobs.len();
        let cv_summary = prefix(cv_text, CV_PROMPT_CHARS);
        let mut skipped = 0;
        let mut failed = 0;
        let mut halted = false;

        let mut ranked: Vec<JobRecord> = Vec::with_capacity(total);
        for (i, mut job) in jobs.into_iter().enumerate() {
            if halted || job.is_ranked() {
                skipped += 1;
                ranked.push(job);
                continue;
            }

            self.gateway.pause(self.options.call_delay);
            match self.score(&job, cv_summary) {
                Ok((score, reason)) => {
                    info!(
                        job = i + 1,
                        total,
                        score,
                        title = prefix(&job.title, 30),
                        "Scored job"
                    );
                    job.suitability_score = Some(score);
                    job.suitability_reason = reason;
                }
                Err(e) if e.downcast_ref::<GatewayError>().is_some_and(GatewayError::is_quota) => {
                    warn!(job = i + 1, total, error = %e, "Stopping ranking: API quota exhausted. Re-rank later.");
                    halted = true;
                }
                Err(e) => {
                    let message = e.to_string();
                    warn!(job = i + 1, total, error = %message, "Ranking failed");
                    job.suitability_score = Some(0);
                    job.suitability_reason = format!("Error: {}", prefix(&message, 50));
                    failed += 1;
                }
            }
            ranked.push(job);
        }

        ranked.sort_by(|a, b| b.score().cmp(&a.score()));
        info!(total, skipped, failed, halted, "Ranking complete");
        ranked
    }

    fn score(&mut self, job: &JobRecord, cv_summary: &str) -> Result<(u8, String)> {
        let request = ModelRequest::new(Intent::Rank, ranking_prompt(job, cv_summary))
            .system(SYSTEM_MESSAGE)
            .temperature(0.1)
            .json_output()
            .backoff_step(self.options.backoff_step);

        let reply = self.gateway.call(&request)?;
        let assessment: Assessment = parse_reply(&reply)?;
        let score = assessment
            .score()
            .ok_or_else(|| anyhow!("model reply had no usable score"))?;
        let reason = assessment
            .reason
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| "No reason provided".to_string());
        Ok((score, reason))
    }
}

fn ranking_prompt(job: &JobRecord, cv_summary: &str) -> String {
    format!(
        "Rate the suitability of this job for the candidate on a scale of 0 to 100.\n\n\
        CANDIDATE CV SUMMARY:\n{cv_summary}\n\n\
        JOB DETAILS:\n\
        Title: {}\n\
        Company: {}\n\
        Description: {}\n\n\
        Return ONLY a JSON object with two keys:\n\
        1. \"score\": integer 0-100\n\
        2. \"reason\": short string (max 15 words) explaining why",
        job.title,
        job.company,
        prefix(&job.description, DESCRIPTION_PROMPT_CHARS),
    )
}
