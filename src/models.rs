use serde::{Deserialize, Deserializer, Serialize};

/// Placeholder for any field a provider did not supply.
pub const NOT_AVAILABLE: &str = "N/A";

/// Region label for postings that match no configured keyword set.
pub const WORLDWIDE: &str = "WORLDWIDE";

/// One discovered job posting. Field order is the CSV column order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobRecord {
    #[serde(deserialize_with = "lenient_score")]
    pub suitability_score: Option<u8>,
    pub suitability_reason: String,
    pub title: String,
    pub company: String,
    pub location: String,
    pub description: String,
    pub salary: String,
    pub link: String,
    pub posted_date: String,
    pub job_id: String,
    pub source: String,
    pub query: String,
    pub region: String,
    pub search_date: String,
}

impl JobRecord {
    pub const COLUMNS: [&'static str; 14] = [
        "suitability_score",
        "suitability_reason",
        "title",
        "company",
        "location",
        "description",
        "salary",
        "link",
        "posted_date",
        "job_id",
        "source",
        "query",
        "region",
        "search_date",
    ];

    /// A link that can serve as an identity key.
    pub fn identity_link(&self) -> Option<&str> {
        let link = self.link.trim();
        if link.is_empty() || link == NOT_AVAILABLE {
            None
        } else {
            Some(link)
        }
    }

    pub fn score(&self) -> u8 {
        self.suitability_score.unwrap_or(0)
    }

    /// Scored on an earlier pass and not carrying an error marker.
    /// A genuine score of 0 is indistinguishable from "not scored" and gets retried.
    pub fn is_ranked(&self) -> bool {
        self.score() > 0 && !self.suitability_reason.contains("Error")
    }
}

// Scores written by other tools show up as "85", "85.0" or blanks.
fn lenient_score<'de, D>(deserializer: D) -> Result<Option<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.and_then(|s| parse_score(&s)))
}

pub fn parse_score(raw: &str) -> Option<u8> {
    let value = raw.trim().parse::<f64>().ok()?;
    if value.is_nan() {
        return None;
    }
    Some(value.round().clamp(0.0, 100.0) as u8)
}

/// The candidate a run is searching for. Read-only to the pipeline.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CandidateProfile {
    pub name: Option<String>,
    #[serde(alias = "current_role")]
    pub current_title: Option<String>,
    pub current_company: Option<String>,
    #[serde(deserialize_with = "string_or_number")]
    pub experience_years: Option<String>,
    pub education: Vec<String>,
    #[serde(alias = "skills")]
    pub core_skills: Vec<String>,
    #[serde(alias = "achievements")]
    pub key_achievements: Vec<String>,
    pub target_roles: Vec<String>,
    pub locations: Vec<String>,
    pub industries: Vec<String>,
    pub experience_level: Option<String>,
    /// Credentials a cover letter must mention. Falls back to `education`.
    pub credentials: Vec<String>,
}

impl CandidateProfile {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Candidate")
    }

    pub fn credentials_to_mention(&self) -> &[String] {
        if self.credentials.is_empty() {
            &self.education
        } else {
            &self.credentials
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// A search string plus an optional location filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub text: String,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Active,
    Completed,
    Migrated,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            RunStatus::Active => "active",
            RunStatus::Completed => "completed",
            RunStatus::Migrated => "migrated",
        };
        f.pad(label)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunCounts {
    pub jobs: usize,
    pub cover_letters_generated: usize,
    pub prompts_created: usize,
}

/// Longest prefix of `text` holding at most `max_chars` characters.
pub fn prefix(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_ranked_requires_positive_score_without_error() {
        let mut job = JobRecord {
            suitability_score: Some(72),
            suitability_reason: "Strong NLP overlap".to_string(),
            ..Default::default()
        };
        assert!(job.is_ranked());

        job.suitability_reason = "Error: timed out".to_string();
        assert!(!job.is_ranked());

        job.suitability_reason = "Poor fit".to_string();
        job.suitability_score = Some(0);
        assert!(!job.is_ranked());

        job.suitability_score = None;
        assert!(!job.is_ranked());
    }

    #[test]
    fn test_identity_link_ignores_placeholder() {
        let mut job = JobRecord {
            link: NOT_AVAILABLE.to_string(),
            ..Default::default()
        };
        assert_eq!(job.identity_link(), None);
        job.link = "https://jobs.example/1".to_string();
        assert_eq!(job.identity_link(), Some("https://jobs.example/1"));
    }

    #[test]
    fn test_parse_score() {
        assert_eq!(parse_score("85"), Some(85));
        assert_eq!(parse_score(" 85.0 "), Some(85));
        assert_eq!(parse_score("140"), Some(100));
        assert_eq!(parse_score("-3"), Some(0));
        assert_eq!(parse_score(""), None);
        assert_eq!(parse_score("high"), None);
    }

    #[test]
    fn test_profile_accepts_legacy_keys() {
        let profile: CandidateProfile = serde_json::from_str(
            r#"{
                "name": "Dr. Jane Smith",
                "current_role": "Lead Data Scientist",
                "experience_years": 10,
                "skills": ["Python", "NLP"],
                "achievements": ["Shipped a search engine"],
                "education": ["PhD Computer Science"]
            }"#,
        )
        .unwrap();
        assert_eq!(profile.current_title.as_deref(), Some("Lead Data Scientist"));
        assert_eq!(profile.experience_years.as_deref(), Some("10"));
        assert_eq!(profile.core_skills, vec!["Python", "NLP"]);
        assert_eq!(profile.key_achievements.len(), 1);
        assert_eq!(profile.credentials_to_mention(), &["PhD Computer Science".to_string()]);
    }

    #[test]
    fn test_prefix_counts_characters() {
        assert_eq!(prefix("héllo", 2), "hé");
        assert_eq!(prefix("abc", 10), "abc");
        assert_eq!(prefix("abc", 0), "");
    }
}
