use std::collections::HashSet;
use tracing::info;

use crate::models::JobRecord;

/// Drop repeated postings, keeping the first occurrence of each.
///
/// A record is a duplicate when its link (other than "N/A") or its
/// `(title, company)` pair was already kept. Two records with "N/A" for both
/// title and company collapse into one.
pub fn dedupe(jobs: Vec<JobRecord>) -> Vec<JobRecord> {
    let total = jobs.len();
    let mut seen_links: HashSet<String> = HashSet::new();
    let mut seen_pairs: HashSet<(String, String)> = HashSet::new();
    let mut unique = Vec::with_capacity(total);

    for job in jobs {
        let link = job.identity_link().map(str::to_string);
        if link.as_ref().is_some_and(|l| seen_links.contains(l)) {
            continue;
        }
        let pair = (job.title.clone(), job.company.clone());
        if seen_pairs.contains(&pair) {
            continue;
        }

        if let Some(link) = link {
            seen_links.insert(link);
        }
        seen_pairs.insert(pair);
        unique.push(job);
    }

    let removed = total - unique.len();
    if removed > 0 {
        info!(removed, kept = unique.len(), "Removed duplicate jobs");
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NOT_AVAILABLE;
    use crate::testing::job;

    fn sample() -> Vec<JobRecord> {
        vec![
            job("Engineer", "Acme", "http://x/1"),
            job("Analyst", "Globex", NOT_AVAILABLE),
            job("Engineer", "Acme", "http://x/2"),
            job("Scientist", "Initech", "http://x/3"),
            job("Analyst", "Globex", "http://x/4"),
            job("Designer", "Umbrella", "http://x/3"),
            job("Engineer", "Hooli", NOT_AVAILABLE),
        ]
    }

    #[test]
    fn test_link_and_pair_duplicates_are_dropped() {
        let jobs = vec![
            job("Engineer", "Acme", "http://x/1"),
            job("Engineer", "Acme", "http://x/2"),
            job("Analyst", "Acme", "http://x/1"),
        ];
        let kept = dedupe(jobs);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].link, "http://x/1");
        assert_eq!(kept[0].title, "Engineer");
    }

    #[test]
    fn test_dedupe_is_idempotent() {
        let once = dedupe(sample());
        let twice = dedupe(once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_dedupe_preserves_first_seen_order() {
        let titles: Vec<(String, String)> = dedupe(sample())
            .into_iter()
            .map(|j| (j.title, j.company))
            .collect();
        assert_eq!(
            titles,
            vec![
                ("Engineer".to_string(), "Acme".to_string()),
                ("Analyst".to_string(), "Globex".to_string()),
                ("Scientist".to_string(), "Initech".to_string()),
                ("Engineer".to_string(), "Hooli".to_string()),
            ]
        );
    }

    #[test]
    fn test_kept_links_and_pairs_are_unique() {
        let kept = dedupe(sample());
        let links: Vec<&str> = kept.iter().filter_map(|j| j.identity_link()).collect();
        let unique_links: HashSet<&str> = links.iter().copied().collect();
        assert_eq!(links.len(), unique_links.len());

        let pairs: HashSet<(&str, &str)> = kept.iter().map(|j| (j.title.as_str(), j.company.as_str())).collect();
        assert_eq!(pairs.len(), kept.len());
    }

    #[test]
    fn test_placeholder_links_do_not_collide() {
        let jobs = vec![
            job("Engineer", "Acme", NOT_AVAILABLE),
            job("Analyst", "Globex", NOT_AVAILABLE),
        ];
        assert_eq!(dedupe(jobs).len(), 2);
    }

    #[test]
    fn test_unknown_title_and_company_collapse() {
        let jobs = vec![
            job(NOT_AVAILABLE, NOT_AVAILABLE, NOT_AVAILABLE),
            job(NOT_AVAILABLE, NOT_AVAILABLE, NOT_AVAILABLE),
        ];
        assert_eq!(dedupe(jobs).len(), 1);
    }
}
