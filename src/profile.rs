use anyhow::{Context, Result, bail};
use serde_json::{Map, Value, json};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::ai::parse_reply;
use crate::config::DEFAULT_MAX_RESULTS_PER_QUERY;
use crate::gateway::{Gateway, Intent, ModelRequest};

const MIN_CV_CHARS: usize = 100;
const SYSTEM_MESSAGE: &str = "You are a professional CV analyzer. Output only valid JSON with accurate, \
specific information extracted from the CV. Never use placeholders or generic terms.";

const PROFILE_SCHEMA: &str = r#"{
    "user_profile": {
        "name": "Extract the FULL NAME exactly as shown (including titles like Dr., PhD, etc.)",
        "current_title": "Most recent job title or 'Seeking Opportunities' if between jobs",
        "current_company": "Current/most recent company name or 'N/A'",
        "experience_years": "Total years or level (e.g., '8', 'Senior', 'Lead')",
        "education": ["List ALL degrees with institution names, e.g., 'PhD Economics - University College London'"],
        "credentials": ["Short names of the degrees and programmes a cover letter should mention, e.g., 'PhD', 'MBA'"],
        "core_skills": ["List 8-15 specific technical and professional skills"],
        "key_achievements": ["3-5 specific, quantifiable achievements from the CV"],
        "target_roles": ["5-8 specific job titles this person would be qualified for"],
        "locations": ["Specific cities/countries mentioned, 'Remote' if applicable, regions such as 'Europe'"],
        "industries": ["4-6 relevant industries, e.g., 'Legal Tech', 'Energy Regulation'"],
        "experience_level": "Junior/Mid/Senior/Lead/Executive"
    },
    "job_search": {
        "queries": [
            "Generate 15-20 strategic search queries mixing these patterns:",
            "- 'Role Title + Location' (e.g., 'Senior Data Scientist London')",
            "- 'Role + Key Skill' (e.g., 'Data Scientist NLP')",
            "- 'Role + Industry' (e.g., 'Data Scientist Legal Tech')",
            "- 'Senior/Lead + Role + Remote' (e.g., 'Lead ML Engineer Remote')",
            "- 'Specific specialization' (e.g., 'LLMOps Engineer')",
            "- 'Role + Technology' (e.g., 'Data Scientist Azure')"
        ],
        "max_results_per_query": 20
    }
}"#;

#[derive(Debug)]
pub struct GeneratedConfig {
    pub config: Value,
    /// Problems found in the generated profile. Reported, never fatal.
    pub issues: Vec<String>,
}

fn profile_prompt(cv_text: &str) -> String {
    format!(
        "You are an expert CV analyzer and career advisor. Your task is to extract structured information \
from a CV and generate strategic job search queries.\n\n\
IMPORTANT INSTRUCTIONS:\n\
1. Extract EXACT information from the CV - do not use placeholders or generic terms\n\
2. Be specific and detailed in all fields\n\
3. Generate 15-20 diverse, strategic job search queries\n\
4. Output ONLY valid JSON, no additional text\n\n\
REQUIRED JSON STRUCTURE:\n{PROFILE_SCHEMA}\n\n\
Use actual skills, locations, and roles from the CV.\n\n\
Now analyze this CV and output the JSON:\n\n\
CV TEXT:\n{cv_text}\n"
    )
}

/// Ask the model for a profile and query list, then merge it over `base`.
pub fn generate_config(
    gateway: &mut Gateway,
    cv_name: &str,
    cv_path: &Path,
    cv_text: &str,
    base: &Value,
) -> Result<GeneratedConfig> {
    if cv_text.trim().chars().count() < MIN_CV_CHARS {
        bail!("Could not extract sufficient text from {}", cv_path.display());
    }

    let request = ModelRequest::new(Intent::Extract, profile_prompt(cv_text))
        .system(SYSTEM_MESSAGE)
        .temperature(0.3)
        .max_tokens(4000)
        .json_output();
    let reply = gateway.call(&request)?;
    let generated: Value = parse_reply(&reply).context("Failed to parse generated profile")?;

    let issues = validate_generated(&generated);
    for issue in &issues {
        warn!(cv = cv_name, %issue, "Generated config validation issue");
    }

    Ok(GeneratedConfig {
        config: merge_into_base(base, &generated, cv_name, cv_path),
        issues,
    })
}

fn merge_into_base(base: &Value, generated: &Value, cv_name: &str, cv_path: &Path) -> Value {
    let mut merged: Map<String, Value> = base.as_object().cloned().unwrap_or_default();
    merged.insert(
        "cv".to_string(),
        json!({ "name": cv_name, "file_path": cv_path.display().to_string() }),
    );
    merged.insert(
        "user_profile".to_string(),
        generated.get("user_profile").cloned().unwrap_or_else(|| json!({})),
    );

    let mut job_search = generated
        .get("job_search")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    job_search
        .entry("max_results_per_query")
        .or_insert_with(|| json!(DEFAULT_MAX_RESULTS_PER_QUERY));
    merged.insert("job_search".to_string(), Value::Object(job_search));

    Value::Object(merged)
}

pub fn validate_generated(generated: &Value) -> Vec<String> {
    let mut issues = Vec::new();

    match generated.get("user_profile") {
        None => issues.push("Missing 'user_profile' section".to_string()),
        Some(profile) => {
            for field in ["name", "current_title", "core_skills", "target_roles", "locations"] {
                if is_blank(profile.get(field)) {
                    issues.push(format!("Missing or empty user_profile.{field}"));
                }
            }
            if let Some(name) = profile.get("name").and_then(Value::as_str) {
                let lowered = name.trim().to_lowercase();
                if lowered.chars().count() < 3 || ["n/a", "name", "full name"].contains(&lowered.as_str()) {
                    issues.push(format!("Invalid name: '{name}'"));
                }
            }
            let skills = profile.get("core_skills").and_then(Value::as_array).map_or(0, Vec::len);
            if skills < 3 {
                issues.push("Insufficient core_skills (need at least 3)".to_string());
            }
        }
    }

    match generated.get("job_search").and_then(|s| s.get("queries")).and_then(Value::as_array) {
        None => issues.push("Missing or invalid job_search.queries".to_string()),
        Some(queries) if queries.len() < 10 => {
            issues.push(format!("Too few search queries ({}, expected 15-20)", queries.len()))
        }
        Some(_) => {}
    }

    issues
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(_) => false,
    }
}

pub fn write_config(dir: &Path, cv_name: &str, config: &Value) -> Result<PathBuf> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = dir.join(format!("{cv_name}.json"));
    let json = serde_json::to_string_pretty(config)?;
    crate::store::write_atomic(&path, json.as_bytes())?;
    info!(path = %path.display(), "Saved generated config");
    Ok(path)
}
