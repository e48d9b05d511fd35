use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::models::{JobRecord, NOT_AVAILABLE};

const RULE: &str = "================================================================================";
const THIN_RULE: &str = "--------------------------------------------------------------------------------";

/// Write `contents` next to `path` and rename it into place.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).with_context(|| format!("Failed to create directory: {}", dir.display()))?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    tmp.write_all(contents).context("Failed to write temp file")?;
    tmp.persist(path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

/// Rewrite the whole CSV with a header row in the fixed column order.
pub fn save_jobs(path: &Path, jobs: &[JobRecord]) -> Result<()> {
    let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(Vec::new());
    writer.write_record(JobRecord::COLUMNS)?;
    for job in jobs {
        writer.serialize(job)?;
    }
    let bytes = writer.into_inner().context("Failed to flush CSV buffer")?;
    write_atomic(path, &bytes)?;
    info!(count = jobs.len(), path = %path.display(), "Saved jobs");
    Ok(())
}

pub fn load_jobs(path: &Path) -> Result<Vec<JobRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("Failed to open jobs CSV: {}", path.display()))?;

    let mut jobs = Vec::new();
    for (i, row) in reader.deserialize().enumerate() {
        let job: JobRecord = row.with_context(|| format!("Bad row {} in {}", i + 2, path.display()))?;
        jobs.push(job);
    }
    Ok(jobs)
}

/// Load, push and save. A missing file starts a new CSV.
pub fn append_job(path: &Path, job: JobRecord) -> Result<usize> {
    let mut jobs = if path.exists() { load_jobs(path)? } else { Vec::new() };
    jobs.push(job);
    save_jobs(path, &jobs)?;
    Ok(jobs.len())
}

/// One readable text file per job plus `_SUMMARY.txt`, under `base/<cv name>`.
pub fn export_text(base: &Path, jobs: &[JobRecord], cv_name: Option<&str>) -> Result<PathBuf> {
    let dir = match cv_name {
        Some(name) => base.join(name),
        None => base.join(format!("jobs_{}", chrono::Local::now().format("%Y%m%d_%H%M%S"))),
    };
    fs::create_dir_all(&dir).with_context(|| format!("Failed to create directory: {}", dir.display()))?;

    for (i, job) in jobs.iter().enumerate() {
        let index = i + 1;
        let name = format!(
            "{index:03}_{}_{}.txt",
            safe_segment(&job.title, 50),
            safe_segment(&job.company, 30)
        );
        let path = dir.join(name);
        fs::write(&path, format_job(job, index))
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    let summary = dir.join("_SUMMARY.txt");
    fs::write(&summary, format_summary(jobs, cv_name))
        .with_context(|| format!("Failed to write {}", summary.display()))?;

    info!(count = jobs.len(), dir = %dir.display(), "Saved job descriptions");
    Ok(dir)
}

fn safe_segment(text: &str, max_chars: usize) -> String {
    let cleaned: String = text
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, ' ' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .take(max_chars)
        .collect();
    cleaned.trim().to_string()
}

fn format_job(job: &JobRecord, index: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{RULE}\nJOB #{index}\n{RULE}\n");
    let _ = writeln!(out, "TITLE: {}", job.title);
    let _ = writeln!(out, "COMPANY: {}", job.company);
    let _ = writeln!(out, "LOCATION: {}", job.location);
    let _ = writeln!(out, "SALARY: {}", job.salary);
    let _ = writeln!(out, "POSTED: {}", job.posted_date);
    if let Some(score) = job.suitability_score {
        let reason = if job.suitability_reason.is_empty() {
            NOT_AVAILABLE
        } else {
            &job.suitability_reason
        };
        let _ = writeln!(out, "MATCH SCORE: {score}/100");
        let _ = writeln!(out, "MATCH REASON: {reason}");
    }
    let _ = writeln!(out, "\nAPPLY LINK:\n{}\n", job.link);
    let _ = writeln!(out, "SEARCH INFO:");
    let _ = writeln!(out, "  Query: {}", job.query);
    let _ = writeln!(out, "  Region: {}", job.region);
    let _ = writeln!(out, "  Source: {}", job.source);
    let _ = writeln!(out, "  Search Date: {}", job.search_date);
    let _ = writeln!(out, "  Job ID: {}\n", job.job_id);
    let _ = writeln!(out, "{THIN_RULE}\nJOB DESCRIPTION:\n{THIN_RULE}\n");
    let _ = writeln!(out, "{}\n", textwrap::fill(&job.description, 80));
    out.push_str(RULE);
    out
}

fn format_summary(jobs: &[JobRecord], cv_name: Option<&str>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{RULE}\nJOB SEARCH SUMMARY\n{RULE}\n");
    let _ = writeln!(out, "Total Jobs: {}", jobs.len());
    let _ = writeln!(out, "Search Date: {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"));
    if let Some(cv) = cv_name {
        let _ = writeln!(out, "CV: {cv}");
    }
    let _ = writeln!(out, "\n{THIN_RULE}\nJOB LIST:\n{THIN_RULE}\n");
    for (i, job) in jobs.iter().enumerate() {
        let _ = writeln!(out, "{:03}. {}", i + 1, job.title);
        let _ = writeln!(out, "     Company: {}", job.company);
        let _ = writeln!(out, "     Location: {}", job.location);
        let _ = writeln!(out, "     Query: {}\n", job.query);
    }
    let _ = writeln!(out, "{RULE}");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::job;

    #[test]
    fn test_save_writes_header_in_column_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.csv");
        let mut ranked = job("Engineer", "Acme", "http://x/1");
        ranked.suitability_score = Some(81);
        ranked.suitability_reason = "Strong match, \"quoted\"".to_string();

        save_jobs(&path, &[ranked.clone(), job("Analyst", "Globex", "http://x/2")]).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        let header = raw.lines().next().unwrap();
        assert_eq!(header, JobRecord::COLUMNS.join(","));
        assert!(raw.lines().nth(2).unwrap().starts_with(",,Analyst,Globex"));

        let loaded = load_jobs(&path).unwrap();
        assert_eq!(loaded[0], ranked);
        assert_eq!(loaded[1].suitability_score, None);
    }

    #[test]
    fn test_load_tolerates_foreign_columns_and_scores() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.csv");
        fs::write(
            &path,
            "title,company,suitability_score,extra\n\
             Engineer,Acme,85.0,x\n\
             Analyst,Globex,,y\n\
             Scientist,Initech,high,z\n",
        )
        .unwrap();

        let jobs = load_jobs(&path).unwrap();
        assert_eq!(jobs.len(), 3);
        assert_eq!(jobs[0].suitability_score, Some(85));
        assert_eq!(jobs[1].suitability_score, None);
        assert_eq!(jobs[2].suitability_score, None);
        assert_eq!(jobs[2].link, "");
    }

    #[test]
    fn test_append_creates_then_extends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("jobs.csv");
        assert_eq!(append_job(&path, job("A", "Acme", "1")).unwrap(), 1);
        assert_eq!(append_job(&path, job("B", "Globex", "2")).unwrap(), 2);
        let titles: Vec<String> = load_jobs(&path).unwrap().into_iter().map(|j| j.title).collect();
        assert_eq!(titles, vec!["A", "B"]);
    }

    #[test]
    fn test_atomic_write_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.json");
        write_atomic(&path, b"{}").unwrap();
        write_atomic(&path, b"{\"a\":1}").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"a\":1}");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_export_text_names_and_summary() {
        let dir = tempfile::tempdir().unwrap();
        let mut scored = job("Sr. ML/AI Engineer", "Acme, Inc.", "http://x/1");
        scored.suitability_score = Some(70);
        scored.suitability_reason = "Good overlap".to_string();

        let out = export_text(dir.path(), &[scored], Some("jane")).unwrap();

        assert_eq!(out, dir.path().join("jane"));
        let text = fs::read_to_string(out.join("001_Sr_ ML_AI Engineer_Acme_ Inc_.txt")).unwrap();
        assert!(text.contains("TITLE: Sr. ML/AI Engineer"));
        assert!(text.contains("MATCH SCORE: 70/100"));
        assert!(text.contains("APPLY LINK:\nhttp://x/1"));
        let summary = fs::read_to_string(out.join("_SUMMARY.txt")).unwrap();
        assert!(summary.contains("Total Jobs: 1"));
        assert!(summary.contains("CV: jane"));
        assert!(summary.contains("001. Sr. ML/AI Engineer"));
    }
}
