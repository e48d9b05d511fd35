use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::models::{CandidateProfile, SearchQuery};

pub const DEFAULT_MAX_RESULTS_PER_QUERY: usize = 20;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required config keys: {}", .0.join(", "))]
    Missing(Vec<&'static str>),

    #[error("config not found: configs/{name}.json (available: {})", available_list(.available))]
    UnknownCv { name: String, available: Vec<String> },

    #[error("no config.json found (pass --config or --cv)")]
    NoConfig,
}

fn available_list(available: &[String]) -> String {
    if available.is_empty() {
        "none".to_string()
    } else {
        available.join(", ")
    }
}

/// Pipeline stages, each with its own set of required keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Search,
    Rank,
    Letters,
    AddJob,
    GenerateConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cv: CvConfig,
    pub api_keys: ApiKeys,
    pub job_search: JobSearchConfig,
    pub user_profile: CandidateProfile,
    pub fallback_models: FallbackModels,
    pub models: ModelOverrides,
    pub regions: Option<Vec<RegionRule>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CvConfig {
    pub name: Option<String>,
    pub file_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ApiKeys {
    pub serpapi_key: Option<String>,
    pub groq_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub openrouter_api_key: Option<String>,
    pub together_api_key: Option<String>,
    pub huggingface_api_key: Option<String>,
}

impl ApiKeys {
    pub fn serpapi(&self) -> Option<&str> {
        usable_key(&self.serpapi_key)
    }

    pub fn groq(&self) -> Option<&str> {
        usable_key(&self.groq_api_key)
    }

    pub fn gemini(&self) -> Option<&str> {
        usable_key(&self.gemini_api_key)
    }

    pub fn openrouter(&self) -> Option<&str> {
        usable_key(&self.openrouter_api_key)
    }

    pub fn together(&self) -> Option<&str> {
        usable_key(&self.together_api_key)
    }

    pub fn huggingface(&self) -> Option<&str> {
        usable_key(&self.huggingface_api_key)
    }
}

// Template configs ship with "YOUR_SERPAPI_KEY_HERE" style values.
fn usable_key(key: &Option<String>) -> Option<&str> {
    let key = key.as_deref()?.trim();
    if key.is_empty() || (key.starts_with("YOUR_") && key.ends_with("_HERE")) {
        None
    } else {
        Some(key)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct JobSearchConfig {
    pub queries: Vec<QueryEntry>,
    pub max_results_per_query: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum QueryEntry {
    Text(String),
    Filtered {
        query: String,
        location: Option<String>,
    },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FallbackModels {
    pub gemini_fallback: FallbackModel,
    pub groq_fallback: FallbackModel,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FallbackModel {
    pub enabled: bool,
    pub model: Option<String>,
}

impl Default for FallbackModel {
    fn default() -> Self {
        Self {
            enabled: true,
            model: None,
        }
    }
}

/// Primary model overrides for the two provider chains.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModelOverrides {
    pub ranking: Option<String>,
    pub drafting: Option<String>,
}

/// Keyword set mapping a posting's location to a region label.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RegionRule {
    pub label: String,
    pub keywords: Vec<String>,
}

impl RegionRule {
    pub fn united_kingdom() -> Self {
        let keywords = [
            "United Kingdom",
            "UK",
            "London",
            "England",
            "Scotland",
            "Wales",
            "Northern Ireland",
            "Manchester",
            "Birmingham",
            "Leeds",
            "Glasgow",
            "Edinburgh",
            "Bristol",
            "Liverpool",
        ];
        Self {
            label: "United Kingdom".to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Resolve which config file to use: an explicit path, then
    /// `configs/<cv>.json`, then `./config.json`, then the platform config dir.
    pub fn locate(explicit: Option<&Path>, cv: Option<&str>) -> Result<PathBuf, ConfigError> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }

        if let Some(name) = cv {
            let name = name.strip_suffix(".json").unwrap_or(name);
            let path = PathBuf::from("configs").join(format!("{name}.json"));
            if path.exists() {
                return Ok(path);
            }
            return Err(ConfigError::UnknownCv {
                name: name.to_string(),
                available: available_configs(Path::new("configs")),
            });
        }

        let local = PathBuf::from("config.json");
        if local.exists() {
            return Ok(local);
        }

        if let Some(dirs) = directories::ProjectDirs::from("", "", "jobhunt") {
            let path = dirs.config_dir().join("config.json");
            if path.exists() {
                return Ok(path);
            }
        }

        Err(ConfigError::NoConfig)
    }

    /// Check every key the given stages need, reporting all missing ones at once.
    pub fn validate(&self, stages: &[Stage]) -> Result<(), ConfigError> {
        let mut missing: Vec<&'static str> = Vec::new();
        let mut require = |present: bool, key: &'static str| {
            if !present && !missing.contains(&key) {
                missing.push(key);
            }
        };

        for stage in stages {
            match stage {
                Stage::Search => {
                    require(self.api_keys.serpapi().is_some(), "api_keys.serpapi_key");
                    require(!self.job_search.queries.is_empty(), "job_search.queries");
                }
                Stage::Rank => {
                    require(self.cv.name.is_some(), "cv.name");
                    require(self.api_keys.groq().is_some(), "api_keys.groq_api_key");
                }
                Stage::Letters => {
                    require(self.api_keys.gemini().is_some(), "api_keys.gemini_api_key");
                }
                Stage::AddJob | Stage::GenerateConfig => {
                    require(self.api_keys.groq().is_some(), "api_keys.groq_api_key");
                }
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Missing(missing))
        }
    }

    pub fn cv_name(&self) -> &str {
        self.cv.name.as_deref().unwrap_or("default")
    }

    pub fn max_results_per_query(&self) -> usize {
        self.job_search
            .max_results_per_query
            .unwrap_or(DEFAULT_MAX_RESULTS_PER_QUERY)
    }

    /// Plain string queries take the first profile location as their filter.
    pub fn search_queries(&self) -> Vec<SearchQuery> {
        let primary_location = self.user_profile.locations.first().cloned();
        self.job_search
            .queries
            .iter()
            .map(|entry| match entry {
                QueryEntry::Text(text) => SearchQuery {
                    text: text.clone(),
                    location: primary_location.clone(),
                },
                QueryEntry::Filtered { query, location } => SearchQuery {
                    text: query.clone(),
                    location: location.clone(),
                },
            })
            .collect()
    }

    pub fn region_rules(&self) -> Vec<RegionRule> {
        self.regions
            .clone()
            .unwrap_or_else(|| vec![RegionRule::united_kingdom()])
    }
}

fn available_configs(dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().to_string();
            name.ends_with(".json").then_some(name)
        })
        .collect();
    names.sort();
    names
}
