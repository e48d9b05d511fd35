use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{info, warn};

use crate::models::{RunCounts, RunStatus};
use crate::store::{load_jobs, write_atomic};

const METADATA_FILE: &str = "run_metadata.json";
const JOBS_DIR: &str = "jobs";
const LETTERS_DIR: &str = "generated_cover_letters";
const PROMPTS_DIR: &str = "ai_prompts";
const LOGS_DIR: &str = "logs";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    pub cv_name: String,
    pub run_name: String,
    pub created_at: String,
    pub run_dir: String,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<RunCounts>,
}

fn timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

/// One run directory and the artifacts inside it.
#[derive(Debug, Clone)]
pub struct Run {
    name: String,
    dir: PathBuf,
}

impl Run {
    fn at(dir: PathBuf) -> Self {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        Self { name, dir }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn jobs_csv(&self) -> PathBuf {
        self.dir.join(JOBS_DIR).join("jobs.csv")
    }

    pub fn cover_letters_dir(&self) -> PathBuf {
        self.dir.join(LETTERS_DIR)
    }

    pub fn prompts_dir(&self) -> PathBuf {
        self.dir.join(PROMPTS_DIR)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.dir.join(LOGS_DIR)
    }

    pub fn log_file(&self) -> PathBuf {
        self.logs_dir()
            .join(format!("run_{}.log", chrono::Local::now().format("%Y%m%d")))
    }

    pub fn cv_path(&self) -> PathBuf {
        self.dir.join("cv.pdf")
    }

    fn metadata_path(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }

    pub fn metadata(&self) -> Result<RunMetadata> {
        let path = self.metadata_path();
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read run metadata: {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse run metadata: {}", path.display()))
    }

    fn write_metadata(&self, metadata: &RunMetadata) -> Result<()> {
        let json = serde_json::to_string_pretty(metadata)?;
        write_atomic(&self.metadata_path(), json.as_bytes())
    }

    pub fn update_status(&self, status: RunStatus, stats: Option<RunCounts>) -> Result<()> {
        let mut metadata = self.metadata()?;
        metadata.status = status;
        metadata.updated_at = Some(timestamp());
        if stats.is_some() {
            metadata.stats = stats;
        }
        self.write_metadata(&metadata)?;
        info!(run = %self.name, %status, "Updated run status");
        Ok(())
    }

    /// Refresh the recorded counts at a milestone, leaving the status alone.
    pub fn record_progress(&self) -> Result<RunCounts> {
        let counts = self.summary();
        let status = self.metadata()?.status;
        self.update_status(status, Some(counts))?;
        Ok(counts)
    }

    /// Artifact counts read from disk.
    pub fn summary(&self) -> RunCounts {
        let jobs_csv = self.jobs_csv();
        let jobs = if jobs_csv.exists() {
            match load_jobs(&jobs_csv) {
                Ok(jobs) => jobs.len(),
                Err(e) => {
                    warn!(error = %format!("{e:#}"), "Could not parse jobs CSV, using line count");
                    fs::read_to_string(&jobs_csv)
                        .map(|raw| raw.lines().count().saturating_sub(1))
                        .unwrap_or(0)
                }
            }
        } else {
            0
        };

        RunCounts {
            jobs,
            cover_letters_generated: count_txt_files(&self.cover_letters_dir()),
            prompts_created: count_txt_files(&self.prompts_dir()),
        }
    }

    pub fn copy_cv(&self, source: &Path) -> Result<PathBuf> {
        let dest = self.cv_path();
        fs::copy(source, &dest)
            .with_context(|| format!("Failed to copy CV from {} to {}", source.display(), dest.display()))?;
        info!(from = %source.display(), to = %dest.display(), "Copied CV");
        Ok(dest)
    }
}

fn count_txt_files(dir: &Path) -> usize {
    txt_files(dir).len()
}

fn txt_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "txt"))
        .collect()
}

pub struct RunManager {
    base_dir: PathBuf,
}

impl RunManager {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn create(&self, cv_name: &str) -> Result<Run> {
        let run_name = format!("{cv_name}_{}", chrono::Local::now().format("%Y%m%d_%H%M%S"));
        let run = Run::at(self.base_dir.join(&run_name));
        for dir in [run.dir.join(JOBS_DIR), run.cover_letters_dir(), run.prompts_dir(), run.logs_dir()] {
            fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        }

        run.write_metadata(&RunMetadata {
            cv_name: cv_name.to_string(),
            run_name,
            created_at: timestamp(),
            run_dir: run.dir.display().to_string(),
            status: RunStatus::Active,
            updated_at: None,
            stats: None,
        })?;
        info!(run = %run.name, "Created new run");
        Ok(run)
    }

    fn run_dirs_newest_first(&self) -> Result<Vec<PathBuf>> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.base_dir)
            .with_context(|| format!("Failed to read runs directory: {}", self.base_dir.display()))?;

        let mut dirs: Vec<(SystemTime, PathBuf)> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .map(|e| {
                let modified = e
                    .metadata()
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                (modified, e.path())
            })
            .collect();
        dirs.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(dirs.into_iter().map(|(_, path)| path).collect())
    }

    pub fn most_recent(&self) -> Result<Run> {
        match self.run_dirs_newest_first()?.into_iter().next() {
            Some(dir) => {
                let run = Run::at(dir);
                info!(run = %run.name, "Loaded existing run");
                Ok(run)
            }
            None => bail!("No existing runs found. Pass --cv to create a new run."),
        }
    }

    /// Every run that has metadata, newest first.
    pub fn list_all(&self) -> Result<Vec<(Run, RunMetadata)>> {
        let mut runs = Vec::new();
        for dir in self.run_dirs_newest_first()? {
            let run = Run::at(dir);
            if !run.metadata_path().exists() {
                continue;
            }
            match run.metadata() {
                Ok(metadata) => runs.push((run, metadata)),
                Err(e) => warn!(run = %run.name, error = %format!("{e:#}"), "Skipping run with unreadable metadata"),
            }
        }
        Ok(runs)
    }
}

#[derive(Debug)]
pub struct Migration {
    pub run: Run,
    pub migrated: Vec<String>,
    pub counts: RunCounts,
}

/// Copy pre-run artifacts found under `root` into a fresh run marked `migrated`.
pub fn migrate(manager: &RunManager, cv_name: &str, root: &Path) -> Result<Migration> {
    let run = manager.create(cv_name)?;
    let mut migrated = Vec::new();

    let jobs_csv = root.join("jobs.csv");
    if jobs_csv.exists() {
        let dest = run.jobs_csv();
        fs::copy(&jobs_csv, &dest).with_context(|| format!("Failed to copy {}", jobs_csv.display()))?;
        migrated.push(format!("jobs.csv -> {}", dest.display()));
    }

    for (legacy, dest_dir) in [
        (LETTERS_DIR, run.cover_letters_dir()),
        ("generated_emails", run.cover_letters_dir()),
        (PROMPTS_DIR, run.prompts_dir()),
    ] {
        let files = txt_files(&root.join(legacy));
        if files.is_empty() {
            continue;
        }
        for file in &files {
            if let Some(name) = file.file_name() {
                fs::copy(file, dest_dir.join(name))
                    .with_context(|| format!("Failed to copy {}", file.display()))?;
            }
        }
        migrated.push(format!("{legacy}/*.txt -> {} ({} files)", dest_dir.display(), files.len()));
    }

    let mut pdfs: Vec<PathBuf> = fs::read_dir(root)
        .with_context(|| format!("Failed to read {}", root.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("pdf")))
        .collect();
    pdfs.sort();
    if let Some(cv) = pdfs.first() {
        let dest = run.copy_cv(cv)?;
        migrated.push(format!("{} -> {}", cv.display(), dest.display()));
    }

    let counts = run.summary();
    run.update_status(RunStatus::Migrated, Some(counts))?;
    Ok(Migration { run, migrated, counts })
}
