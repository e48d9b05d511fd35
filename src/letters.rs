use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::ai::parse_reply;
use crate::gateway::{Gateway, GatewayError, Intent, ModelRequest};
use crate::models::{JobRecord, RunStatus};
use crate::prompts::PromptBuilder;

/// Letter cap for the full pipeline.
pub const DEFAULT_MAX_JOBS: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail { feedback: String },
}

#[derive(Debug, Deserialize)]
struct JudgeReply {
    #[serde(default)]
    status: String,
    #[serde(default)]
    feedback: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    /// `None` or `Some(0)` means every job.
    pub max_jobs: Option<usize>,
    /// Pause between consecutive jobs.
    pub job_delay: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_jobs: None,
            job_delay: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Default)]
pub struct BatchReport {
    pub successful: usize,
    pub failed: usize,
    /// Stopped early because every drafting provider ran out of quota.
    pub halted: bool,
    pub written: Vec<PathBuf>,
}

impl BatchReport {
    /// A halted batch leaves its run open for a later resume.
    pub fn run_status(&self) -> RunStatus {
        if self.halted { RunStatus::Active } else { RunStatus::Completed }
    }
}

/// Draft, judge and (at most once) refine cover letters.
pub struct LetterPipeline<'g, 'p> {
    gateway: &'g mut Gateway,
    prompts: PromptBuilder<'p>,
}

impl<'g, 'p> LetterPipeline<'g, 'p> {
    pub fn new(gateway: &'g mut Gateway, prompts: PromptBuilder<'p>) -> Self {
        Self { gateway, prompts }
    }

    pub fn generate(&mut self, job: &JobRecord) -> Result<String, GatewayError> {
        let draft_request = ModelRequest::new(Intent::Draft, self.prompts.draft_prompt(job, false)).temperature(0.7);
        let draft = self.gateway.call(&draft_request)?;

        let feedback = match self.judge(&draft) {
            Verdict::Pass => return Ok(draft),
            Verdict::Fail { feedback } => feedback,
        };

        info!(company = %job.company, %feedback, "Judge flagged issues, refining");
        let refine_request =
            ModelRequest::new(Intent::Refine, self.prompts.refine_prompt(&draft, &feedback)).temperature(0.7);
        match self.gateway.call(&refine_request) {
            Ok(refined) => Ok(refined),
            Err(e) => {
                warn!(company = %job.company, error = %e, "Refinement failed, keeping draft");
                Ok(draft)
            }
        }
    }

    /// Any judge failure counts as a pass.
    pub fn judge(&mut self, draft: &str) -> Verdict {
        let request = ModelRequest::new(Intent::Judge, self.prompts.judge_prompt(draft)).temperature(0.1);
        let reply = match self.gateway.call(&request) {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "Judge unavailable, skipping check");
                return Verdict::Pass;
            }
        };

        match parse_reply::<JudgeReply>(&reply) {
            Ok(judged) if judged.status.trim().eq_ignore_ascii_case("FAIL") => Verdict::Fail {
                feedback: judged
                    .feedback
                    .unwrap_or_else(|| "Did not meet the style guidelines.".to_string()),
            },
            Ok(_) => Verdict::Pass,
            Err(e) => {
                warn!(error = %e, "Could not parse judge response, skipping check");
                Verdict::Pass
            }
        }
    }

    /// Generate letters for the first `max_jobs` jobs (all when unset) into `dir`.
    pub fn generate_batch(&mut self, jobs: &[JobRecord], dir: &Path, options: BatchOptions) -> Result<BatchReport> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create cover letter directory: {}", dir.display()))?;

        let limit = options.max_jobs.filter(|&n| n > 0).unwrap_or(jobs.len());
        let batch = &jobs[..jobs.len().min(limit)];
        let mut report = BatchReport::default();
        info!(count = batch.len(), total = jobs.len(), "Generating cover letters");

        for (i, job) in batch.iter().enumerate() {
            let index = i + 1;
            match self.generate(job) {
                Ok(letter) => {
                    let path = dir.join(letter_file_name(index, &job.company));
                    fs::write(&path, letter)
                        .with_context(|| format!("Failed to write cover letter: {}", path.display()))?;
                    info!(job = index, total = batch.len(), company = %job.company, "Cover letter written");
                    report.written.push(path);
                    report.successful += 1;
                }
                Err(e) if e.is_quota() => {
                    warn!(job = index, error = %e, "Stopping batch: API quota exhausted. Resume later.");
                    report.failed += 1;
                    report.halted = true;
                    break;
                }
                Err(e) => {
                    warn!(job = index, company = %job.company, error = %e, "Cover letter failed");
                    report.failed += 1;
                }
            }

            if index < batch.len() {
                self.gateway.pause(options.job_delay);
            }
        }

        Ok(report)
    }
}

/// Company name reduced to alphanumerics, spaces, `-` and `_`, at most 50 characters.
pub fn sanitize_company(company: &str) -> String {
    company
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .take(50)
        .collect()
}

pub fn letter_file_name(index: usize, company: &str) -> String {
    format!("job_{index:03}_{}.txt", sanitize_company(company))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai::ProviderError;
    use crate::gateway::{ChainKind, ProviderChain};
    use crate::models::CandidateProfile;
    use crate::testing::{RecordingPacer, ScriptedProvider, gateway_with, job, quota_exceeded, timed_out};
    use std::cell::Cell;
    use std::rc::Rc;

    type Responder = fn(usize, &ModelRequest) -> Result<String, ProviderError>;

    struct Harness {
        gateway: Gateway,
        drafts: Rc<Cell<usize>>,
        judges: Rc<Cell<usize>>,
        pacer: Rc<RecordingPacer>,
    }

    fn harness(drafter: Responder, judge: Responder) -> Harness {
        let (drafting, drafts) = ScriptedProvider::new("gemini", drafter);
        let (ranking, judges) = ScriptedProvider::new("groq", judge);
        let pacer = Rc::new(RecordingPacer::default());
        let gateway = gateway_with(
            ProviderChain::new(ChainKind::Ranking, Some(ranking), Vec::new()),
            ProviderChain::new(ChainKind::Drafting, Some(drafting), Vec::new()),
            &pacer,
        );
        Harness { gateway, drafts, judges, pacer }
    }

    fn draft_or_refine(_: usize, request: &ModelRequest) -> Result<String, ProviderError> {
        match request.intent {
            Intent::Draft => Ok("DRAFT LETTER".to_string()),
            Intent::Refine => Ok("REFINED LETTER".to_string()),
            other => panic!("unexpected intent on drafting chain: {other:?}"),
        }
    }

    fn always_fail(_: usize, _: &ModelRequest) -> Result<String, ProviderError> {
        Ok("```json\n{\"status\": \"FAIL\", \"feedback\": \"Contains a semicolon\"}\n```".to_string())
    }

    fn always_pass(_: usize, _: &ModelRequest) -> Result<String, ProviderError> {
        Ok(r#"{"status": "PASS", "feedback": "All checks passed"}"#.to_string())
    }

    #[test]
    fn test_fail_verdict_triggers_exactly_one_refinement() {
        let mut h = harness(draft_or_refine, always_fail);
        let profile = CandidateProfile::default();
        let letter = LetterPipeline::new(&mut h.gateway, PromptBuilder::new(&profile))
            .generate(&job("Engineer", "Acme", "l"))
            .unwrap();

        assert_eq!(letter, "REFINED LETTER");
        assert_eq!(h.drafts.get(), 2);
        assert_eq!(h.judges.get(), 1);
    }

    #[test]
    fn test_refine_prompt_carries_judge_feedback() {
        fn check_refine(_: usize, request: &ModelRequest) -> Result<String, ProviderError> {
            match request.intent {
                Intent::Refine => {
                    assert!(request.prompt.contains("DRAFT LETTER"));
                    assert!(request.prompt.contains("Contains a semicolon"));
                    Ok("REFINED LETTER".to_string())
                }
                _ => Ok("DRAFT LETTER".to_string()),
            }
        }
        let mut h = harness(check_refine, always_fail);
        let profile = CandidateProfile::default();
        let letter = LetterPipeline::new(&mut h.gateway, PromptBuilder::new(&profile))
            .generate(&job("Engineer", "Acme", "l"))
            .unwrap();
        assert_eq!(letter, "REFINED LETTER");
    }

    #[test]
    fn test_pass_verdict_returns_draft() {
        let mut h = harness(draft_or_refine, always_pass);
        let profile = CandidateProfile::default();
        let letter = LetterPipeline::new(&mut h.gateway, PromptBuilder::new(&profile))
            .generate(&job("Engineer", "Acme", "l"))
            .unwrap();
        assert_eq!(letter, "DRAFT LETTER");
        assert_eq!(h.drafts.get(), 1);
    }

    #[test]
    fn test_judge_errors_default_to_pass() {
        let mut h = harness(draft_or_refine, |_, _| Err(timed_out("groq")));
        let profile = CandidateProfile::default();
        let mut pipeline = LetterPipeline::new(&mut h.gateway, PromptBuilder::new(&profile));
        assert_eq!(pipeline.judge("letter"), Verdict::Pass);

        let mut h = harness(draft_or_refine, |_, _| Ok("Looks fine to me".to_string()));
        let mut pipeline = LetterPipeline::new(&mut h.gateway, PromptBuilder::new(&profile));
        assert_eq!(pipeline.judge("letter"), Verdict::Pass);

        let mut h = harness(draft_or_refine, |_, _| Ok(r#"{"status": "MAYBE"}"#.to_string()));
        let mut pipeline = LetterPipeline::new(&mut h.gateway, PromptBuilder::new(&profile));
        assert_eq!(pipeline.judge("letter"), Verdict::Pass);
    }

    #[test]
    fn test_failed_refinement_keeps_draft() {
        fn refine_breaks(_: usize, request: &ModelRequest) -> Result<String, ProviderError> {
            match request.intent {
                Intent::Refine => Err(timed_out("gemini")),
                _ => Ok("DRAFT LETTER".to_string()),
            }
        }
        let mut h = harness(refine_breaks, always_fail);
        let profile = CandidateProfile::default();
        let letter = LetterPipeline::new(&mut h.gateway, PromptBuilder::new(&profile))
            .generate(&job("Engineer", "Acme", "l"))
            .unwrap();
        assert_eq!(letter, "DRAFT LETTER");
        assert_eq!(h.judges.get(), 1);
    }

    #[test]
    fn test_batch_writes_files_and_pauses_between_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = harness(draft_or_refine, always_pass);
        let profile = CandidateProfile::default();
        let jobs = vec![
            job("A", "Acme & Sons", "1"),
            job("B", "Globex", "2"),
            job("C", "Initech", "3"),
        ];

        let report = LetterPipeline::new(&mut h.gateway, PromptBuilder::new(&profile))
            .generate_batch(&jobs, dir.path(), BatchOptions { max_jobs: Some(2), ..Default::default() })
            .unwrap();

        assert_eq!(report.successful, 2);
        assert_eq!(report.failed, 0);
        assert!(!report.halted);
        assert_eq!(fs::read_to_string(dir.path().join("job_001_Acme  Sons.txt")).unwrap(), "DRAFT LETTER");
        assert!(dir.path().join("job_002_Globex.txt").exists());
        assert!(!dir.path().join("job_003_Initech.txt").exists());
        assert_eq!(h.pacer.pauses(), vec![Duration::from_secs(5)]);
    }

    #[test]
    fn test_failed_draft_does_not_stop_batch() {
        // The primary drops out after its timeout; the fallback fails once, then recovers.
        let (primary, _) = ScriptedProvider::new("gemini", |_, _| Err(timed_out("gemini")));
        let (fallback, fallback_calls) = ScriptedProvider::new("openrouter", |i, request| match request.intent {
            Intent::Draft if i == 0 => Err(timed_out("openrouter")),
            _ => Ok("LETTER".to_string()),
        });
        let (judge, _) = ScriptedProvider::new("groq", always_pass);
        let pacer = Rc::new(RecordingPacer::default());
        let mut gateway = gateway_with(
            ProviderChain::new(ChainKind::Ranking, Some(judge), Vec::new()),
            ProviderChain::new(ChainKind::Drafting, Some(primary), vec![fallback]),
            &pacer,
        );
        let dir = tempfile::tempdir().unwrap();
        let profile = CandidateProfile::default();
        let jobs = vec![job("A", "Acme", "1"), job("B", "Globex", "2")];

        let report = LetterPipeline::new(&mut gateway, PromptBuilder::new(&profile))
            .generate_batch(&jobs, dir.path(), BatchOptions::default())
            .unwrap();

        assert_eq!(report.successful, 1);
        assert_eq!(report.failed, 1);
        assert!(!report.halted);
        assert_eq!(report.run_status(), RunStatus::Completed);
        assert_eq!(fallback_calls.get(), 2);
        assert!(!dir.path().join("job_001_Acme.txt").exists());
        assert!(dir.path().join("job_002_Globex.txt").exists());
    }

    #[test]
    fn test_unset_or_zero_cap_processes_every_job() {
        let jobs = vec![job("A", "Acme", "1"), job("B", "Globex", "2"), job("C", "Initech", "3")];
        let profile = CandidateProfile::default();

        for max_jobs in [None, Some(0)] {
            let dir = tempfile::tempdir().unwrap();
            let mut h = harness(draft_or_refine, always_pass);
            let report = LetterPipeline::new(&mut h.gateway, PromptBuilder::new(&profile))
                .generate_batch(&jobs, dir.path(), BatchOptions { max_jobs, ..Default::default() })
                .unwrap();

            assert_eq!(report.successful, 3, "max_jobs = {max_jobs:?}");
            assert_eq!(report.written.len(), 3);
            assert_eq!(h.pacer.pauses(), vec![Duration::from_secs(5); 2]);
        }
    }

    #[test]
    fn test_quota_exhaustion_halts_batch() {
        let dir = tempfile::tempdir().unwrap();
        let mut h = harness(|_, _| Err(quota_exceeded("gemini")), always_pass);
        let profile = CandidateProfile::default();
        let jobs = vec![job("A", "Acme", "1"), job("B", "Globex", "2"), job("C", "Initech", "3")];

        let report = LetterPipeline::new(&mut h.gateway, PromptBuilder::new(&profile))
            .generate_batch(&jobs, dir.path(), BatchOptions::default())
            .unwrap();

        assert!(report.halted);
        assert_eq!(report.run_status(), RunStatus::Active);
        assert_eq!(report.successful, 0);
        assert_eq!(h.drafts.get(), 1);
        assert!(h.pacer.pauses().is_empty());
    }

    #[test]
    fn test_sanitize_company() {
        assert_eq!(sanitize_company("Acme, Inc. (UK)"), "Acme Inc UK");
        assert_eq!(sanitize_company("Café-Bar_2"), "Café-Bar_2");
        assert_eq!(sanitize_company(&"x".repeat(80)).len(), 50);
        assert_eq!(letter_file_name(7, "Globex"), "job_007_Globex.txt");
    }
}
