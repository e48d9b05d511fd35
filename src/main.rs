mod ai;
mod config;
mod cv;
mod dedupe;
mod fetch;
mod gateway;
mod letters;
mod logging;
mod models;
mod normalize;
mod profile;
mod prompts;
mod rank;
mod runs;
mod search;
mod store;
#[cfg(test)]
mod testing;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use config::{Config, ConfigError, Stage};
use gateway::{ChainKind, Gateway, ThreadPacer};
use letters::{BatchOptions, DEFAULT_MAX_JOBS, LetterPipeline};
use models::JobRecord;
use normalize::Normalizer;
use prompts::PromptBuilder;
use rank::{RankOptions, Ranker};
use runs::{Run, RunManager};
use search::{JobSearcher, SerpApiClient};
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{info, warn};

const ROOT_JOBS_CSV: &str = "jobs.csv";
const CVS_DIR: &str = "cvs";
const CONFIGS_DIR: &str = "configs";

#[derive(Parser)]
#[command(name = "jobhunt")]
#[command(about = "Search, rank and write cover letters for jobs matching a CV")]
struct Cli {
    /// Path to a config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// CV name (uses configs/<CV>.json)
    #[arg(long, global = true)]
    cv: Option<String>,

    /// Directory holding run folders
    #[arg(long, global = true, default_value = "runs")]
    runs_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Full pipeline: search, rank, write cover letters into a new run
    Run {
        /// Maximum number of cover letters (0 means all)
        #[arg(long, default_value_t = DEFAULT_MAX_JOBS)]
        max_jobs: usize,
    },

    /// Search for jobs and save them to CSV
    Search {
        /// Maximum results per query (overrides config)
        #[arg(long)]
        max_results: Option<usize>,

        /// Output CSV file
        #[arg(short, long, default_value = ROOT_JOBS_CSV)]
        output: PathBuf,

        /// Rank jobs against the CV
        #[arg(long)]
        rank: bool,

        /// Also save each job as a text file
        #[arg(long)]
        save_txt: bool,

        /// Directory for text files
        #[arg(long, default_value = "extracted_jobs")]
        txt_dir: PathBuf,

        /// Skip the summary table
        #[arg(long)]
        no_summary: bool,
    },

    /// Re-rank a jobs CSV, retrying unscored and failed entries
    Rerank {
        /// Jobs CSV (default: ./jobs.csv, then the latest run's)
        #[arg(long)]
        jobs: Option<PathBuf>,
    },

    /// Generate cover letters for the jobs in a CSV
    Letters {
        /// Jobs CSV (default: ./jobs.csv, then the run's)
        #[arg(long)]
        jobs: Option<PathBuf>,

        /// Maximum number of cover letters (default: all; 0 also means all)
        #[arg(long)]
        max_jobs: Option<usize>,

        /// Start a new run instead of using the latest one
        #[arg(long)]
        new_run: bool,
    },

    /// Write cover letter prompts for use with any AI assistant
    Prompts {
        /// Jobs CSV (default: ./jobs.csv, then the latest run's)
        #[arg(long)]
        jobs: Option<PathBuf>,
    },

    /// Add a single job posting from its URL
    AddUrl {
        /// Job posting URL
        url: String,

        /// CSV to append to
        #[arg(long, default_value = ROOT_JOBS_CSV)]
        jobs: PathBuf,
    },

    /// Generate configs/<cv>.json from CV PDFs
    GenerateConfig {
        /// A single CV PDF (default: every PDF in cvs/)
        cv_file: Option<PathBuf>,
    },

    /// Extract the text of a CV PDF
    ExtractCv {
        /// CV PDF
        pdf: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = cv::EXTRACTED_CVS_DIR)]
        output_dir: PathBuf,
    },

    /// List all runs
    Runs,

    /// Move pre-run files from the working directory into a new run
    Migrate {
        /// CV name for the new run
        #[arg(default_value = "existing_cv")]
        name: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let manager = RunManager::new(&cli.runs_dir);

    match cli.command {
        Commands::Run { max_jobs } => {
            let config = load_config(&cli.config, &cli.cv)?;
            config.validate(&[Stage::Search, Stage::Rank, Stage::Letters])?;

            let run = manager.create(config.cv_name())?;
            logging::init(Some(run.log_file().as_path()))?;
            println!("Run directory: {}", run.dir().display());

            if let Some(cv_path) = config.cv.file_path.as_deref() {
                if cv_path.is_file() && cv_path.extension().is_some_and(|e| e.eq_ignore_ascii_case("pdf")) {
                    run.copy_cv(cv_path)?;
                }
            }
            let cv_text = load_cv(&config)?;
            let mut gateway = Gateway::from_config(&config, Rc::new(ThreadPacer))?;

            let jobs = search_jobs(&config, None)?;
            let jobs = Ranker::new(&mut gateway, RankOptions::standard()).rank(jobs, &cv_text);
            store::save_jobs(&run.jobs_csv(), &jobs)?;
            store::save_jobs(Path::new(ROOT_JOBS_CSV), &jobs)?;
            run.record_progress()?;
            print_summary(&jobs);

            let report = LetterPipeline::new(&mut gateway, PromptBuilder::new(&config.user_profile)).generate_batch(
                &jobs,
                &run.cover_letters_dir(),
                BatchOptions {
                    max_jobs: Some(max_jobs),
                    ..Default::default()
                },
            )?;
            print_batch(&report, &gateway);

            let counts = run.summary();
            run.update_status(report.run_status(), Some(counts))?;
            println!("\nPipeline complete: {}", run.dir().display());
            println!("  Jobs:          {}", counts.jobs);
            println!("  Cover letters: {}", counts.cover_letters_generated);
        }

        Commands::Search {
            max_results,
            output,
            rank,
            save_txt,
            txt_dir,
            no_summary,
        } => {
            logging::init(None)?;
            let config = load_config(&cli.config, &cli.cv)?;
            let mut stages = vec![Stage::Search];
            if rank {
                stages.push(Stage::Rank);
            }
            config.validate(&stages)?;

            let cv_text = if rank { Some(load_cv(&config)?) } else { None };
            let mut jobs = search_jobs(&config, max_results)?;
            if let Some(cv_text) = cv_text {
                let mut gateway = Gateway::from_config(&config, Rc::new(ThreadPacer))?;
                jobs = Ranker::new(&mut gateway, RankOptions::standard()).rank(jobs, &cv_text);
            }

            store::save_jobs(&output, &jobs)?;
            println!("Saved {} jobs to {}", jobs.len(), output.display());

            if save_txt {
                let dir = store::export_text(&txt_dir, &jobs, config.cv.name.as_deref())?;
                println!("Saved job descriptions to {}", dir.display());
            }
            if !no_summary {
                print_summary(&jobs);
            }
        }

        Commands::Rerank { jobs } => {
            logging::init(None)?;
            let config = load_config(&cli.config, &cli.cv)?;
            config.validate(&[Stage::Rank])?;

            let latest = manager.most_recent().ok();
            let jobs_csv = resolve_jobs_csv(jobs, latest.as_ref())?;
            let jobs = store::load_jobs(&jobs_csv)?;
            let pending = jobs.iter().filter(|j| !j.is_ranked()).count();
            println!("Loaded {} jobs from {} ({} to rank)", jobs.len(), jobs_csv.display(), pending);

            let cv_text = load_cv(&config)?;
            let mut gateway = Gateway::from_config(&config, Rc::new(ThreadPacer))?;
            let ranked = Ranker::new(&mut gateway, RankOptions::bulk()).rank(jobs, &cv_text);
            store::save_jobs(&jobs_csv, &ranked)?;
            print_summary(&ranked);
        }

        Commands::Letters {
            jobs,
            max_jobs,
            new_run,
        } => {
            let config = load_config(&cli.config, &cli.cv)?;
            config.validate(&[Stage::Letters])?;

            let run = if new_run {
                manager.create(config.cv_name())?
            } else {
                manager.most_recent()?
            };
            logging::init(Some(run.log_file().as_path()))?;
            println!("Run directory: {}", run.dir().display());
            println!("Cover letters will be saved to: {}", run.cover_letters_dir().display());

            let jobs_csv = resolve_jobs_csv(jobs, Some(&run))?;
            let jobs = store::load_jobs(&jobs_csv)?;
            info!(path = %jobs_csv.display(), count = jobs.len(), "Loaded jobs");

            let mut gateway = Gateway::from_config(&config, Rc::new(ThreadPacer))?;
            let report = LetterPipeline::new(&mut gateway, PromptBuilder::new(&config.user_profile)).generate_batch(
                &jobs,
                &run.cover_letters_dir(),
                BatchOptions {
                    max_jobs,
                    ..Default::default()
                },
            )?;
            print_batch(&report, &gateway);

            run.update_status(report.run_status(), Some(run.summary()))?;
        }

        Commands::Prompts { jobs } => {
            logging::init(None)?;
            let config = load_config(&cli.config, &cli.cv)?;

            let latest = manager.most_recent().ok();
            let jobs_csv = resolve_jobs_csv(jobs, latest.as_ref())?;
            let jobs = store::load_jobs(&jobs_csv)?;
            let dir = latest
                .as_ref()
                .map(Run::prompts_dir)
                .unwrap_or_else(|| PathBuf::from("ai_prompts"));

            let written = PromptBuilder::new(&config.user_profile).export_prompts(&jobs, &dir)?;
            println!("Wrote {} prompts to {}", written.len(), dir.display());
            println!("Paste any prompt into your AI assistant, then review the letter before sending.");
        }

        Commands::AddUrl { url, jobs } => {
            logging::init(None)?;
            let config = load_config(&cli.config, &cli.cv)?;
            config.validate(&[Stage::AddJob])?;

            let page = fetch::fetch_page_text(&url)?;
            let mut gateway = Gateway::from_config(&config, Rc::new(ThreadPacer))?;
            let job = fetch::extract_job(&mut gateway, &page, &url, &config.region_rules())?;
            println!("Extracted: {} at {}", job.title, job.company);

            let job = match load_cv(&config) {
                Ok(cv_text) => Ranker::new(&mut gateway, RankOptions::standard())
                    .rank(vec![job], &cv_text)
                    .into_iter()
                    .next()
                    .context("Ranker returned no job")?,
                Err(e) => {
                    warn!(error = %format!("{e:#}"), "No CV text, adding job unranked");
                    job
                }
            };
            if let Some(score) = job.suitability_score {
                println!("Scored: {}/100 ({})", score, job.suitability_reason);
            }

            let total = store::append_job(&jobs, job)?;
            println!("Added job to {} ({} jobs)", jobs.display(), total);
        }

        Commands::GenerateConfig { cv_file } => {
            logging::init(None)?;
            let base_path = Config::locate(cli.config.as_deref(), None)?;
            let raw = fs::read_to_string(&base_path)
                .with_context(|| format!("Failed to read config file: {}", base_path.display()))?;
            let base: serde_json::Value = serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse config file: {}", base_path.display()))?;
            let config: Config = serde_json::from_value(base.clone())
                .with_context(|| format!("Failed to parse config file: {}", base_path.display()))?;
            config.validate(&[Stage::GenerateConfig])?;

            let pdfs = match cv_file {
                Some(path) => vec![path],
                None => cv::list_pdfs(Path::new(CVS_DIR))?,
            };
            if pdfs.is_empty() {
                bail!("No CV PDFs found in {CVS_DIR}/");
            }

            let mut gateway = Gateway::from_config(&config, Rc::new(ThreadPacer))?;
            let mut written = 0;
            for pdf in &pdfs {
                let name = cv::cv_stem(pdf);
                println!("Processing {}", pdf.display());
                let result = cv::load_cv_text(&name, Some(pdf.as_path()), Path::new(cv::EXTRACTED_CVS_DIR))
                    .and_then(|text| profile::generate_config(&mut gateway, &name, pdf, &text, &base))
                    .and_then(|generated| {
                        for issue in &generated.issues {
                            println!("  warning: {issue}");
                        }
                        profile::write_config(Path::new(CONFIGS_DIR), &name, &generated.config)
                    });
                match result {
                    Ok(path) => {
                        written += 1;
                        println!("  Saved {}", path.display());
                    }
                    Err(e) => println!("  Failed: {e:#}"),
                }
            }
            println!("\nGenerated {written}/{} configs", pdfs.len());
        }

        Commands::ExtractCv { pdf, output_dir } => {
            logging::init(None)?;
            let path = cv::extract_to_file(&pdf, &output_dir)?;
            println!("Saved CV text to {}", path.display());
        }

        Commands::Runs => {
            let runs = manager.list_all()?;
            if runs.is_empty() {
                println!("No runs found in {}.", cli.runs_dir.display());
            } else {
                println!("{:<40} {:<10} {:<20} {:>6} {:>8} {:>8}", "RUN", "STATUS", "CREATED", "JOBS", "LETTERS", "PROMPTS");
                println!("{}", "-".repeat(97));
                for (run, metadata) in runs {
                    let counts = run.summary();
                    println!(
                        "{:<40} {:<10} {:<20} {:>6} {:>8} {:>8}",
                        truncate(run.name(), 38),
                        metadata.status,
                        truncate(&metadata.created_at, 19),
                        counts.jobs,
                        counts.cover_letters_generated,
                        counts.prompts_created
                    );
                }
            }
        }

        Commands::Migrate { name } => {
            logging::init(None)?;
            let migration = runs::migrate(&manager, &name, Path::new("."))?;
            println!("Created run: {}", migration.run.dir().display());
            if migration.migrated.is_empty() {
                println!("Nothing to migrate.");
            } else {
                for item in &migration.migrated {
                    println!("  {item}");
                }
            }
            println!("\nJobs: {}", migration.counts.jobs);
            println!("Cover letters: {}", migration.counts.cover_letters_generated);
            println!("Prompts: {}", migration.counts.prompts_created);
        }
    }

    Ok(())
}

fn load_config(explicit: &Option<PathBuf>, cv: &Option<String>) -> Result<Config> {
    let path = Config::locate(explicit.as_deref(), cv.as_deref())?;
    info!(path = %path.display(), "Using config");
    Config::load(&path)
}

fn load_cv(config: &Config) -> Result<String> {
    cv::load_cv_text(
        config.cv_name(),
        config.cv.file_path.as_deref(),
        Path::new(cv::EXTRACTED_CVS_DIR),
    )
}

fn search_jobs(config: &Config, max_results: Option<usize>) -> Result<Vec<JobRecord>> {
    let key = config
        .api_keys
        .serpapi()
        .ok_or_else(|| ConfigError::Missing(vec!["api_keys.serpapi_key"]))?;
    let client = SerpApiClient::new(key)?;
    let searcher = JobSearcher::new(
        &client,
        Normalizer::new(config.region_rules()),
        max_results.unwrap_or_else(|| config.max_results_per_query()),
        Rc::new(ThreadPacer),
    );
    Ok(searcher.search_all(&config.search_queries()))
}

/// `--jobs`, else `./jobs.csv`, else the run's own CSV.
fn resolve_jobs_csv(explicit: Option<PathBuf>, run: Option<&Run>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path);
    }
    let root = PathBuf::from(ROOT_JOBS_CSV);
    if root.exists() {
        return Ok(root);
    }
    if let Some(path) = run.map(Run::jobs_csv).filter(|p| p.exists()) {
        return Ok(path);
    }
    bail!("No jobs CSV found. Run `jobhunt search` first or pass --jobs.")
}

fn print_summary(jobs: &[JobRecord]) {
    if jobs.is_empty() {
        println!("No jobs found.");
        return;
    }
    println!("\n{:<6} {:<35} {:<25} {:<20}", "SCORE", "TITLE", "COMPANY", "LOCATION");
    println!("{}", "-".repeat(89));
    for job in jobs.iter().take(20) {
        let score = job.suitability_score.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string());
        println!(
            "{:<6} {:<35} {:<25} {:<20}",
            score,
            truncate(&job.title, 33),
            truncate(&job.company, 23),
            truncate(&job.location, 18)
        );
    }
    if jobs.len() > 20 {
        println!("... and {} more", jobs.len() - 20);
    }
}

fn print_batch(report: &letters::BatchReport, gateway: &Gateway) {
    println!("\nCover letters:");
    println!("  Successful: {}", report.successful);
    println!("  Failed:     {}", report.failed);
    if let Some(dir) = report.written.first().and_then(|p| p.parent()) {
        println!("  Saved to:   {}", dir.display());
    }
    if report.halted {
        println!("  Stopped early: API quota exhausted. Re-run later to continue.");
    }
    for chain in [ChainKind::Ranking, ChainKind::Drafting] {
        if !gateway.primary_available(chain) {
            println!("  Note: primary {chain} model unavailable, fallbacks were used.");
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}
