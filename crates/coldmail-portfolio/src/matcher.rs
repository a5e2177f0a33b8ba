use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use coldmail_core::{LinkRecord, MatchResult, PortfolioEntry, PortfolioSummary, SkillCategory};
use tracing::{debug, warn};

use crate::{InMemoryLinkStore, LinkStore, LinkStoreError, SkillCatalog, SkillClassifier};

const MAX_SUGGESTED_SKILLS: usize = 3;
const MAX_PROJECTS_PER_SKILL: usize = 2;
const MAX_RELEVANT_PROJECTS: usize = 4;
const LINK_QUERY_RESULTS: usize = 2;

pub const SUMMARY_TOP_SKILLS: usize = 10;
pub const SUMMARY_CATEGORY_LIMIT: usize = 5;

/// Matches job skills against a portfolio and answers portfolio-wide questions.
pub struct PortfolioMatcher {
    catalog: SkillCatalog,
    classifier: SkillClassifier,
    link_store: Arc<dyn LinkStore>,
}

impl PortfolioMatcher {
    pub fn new(catalog: SkillCatalog, classifier: SkillClassifier, link_store: Arc<dyn LinkStore>) -> Self {
        Self {
            catalog,
            classifier,
            link_store,
        }
    }

    /// Default classifier and an in-memory link index over `entries`.
    pub fn in_memory(entries: Vec<PortfolioEntry>) -> Result<Self, LinkStoreError> {
        let store = InMemoryLinkStore::new();
        store.load_portfolio(&entries)?;
        Ok(Self::new(SkillCatalog::new(entries), SkillClassifier::default(), Arc::new(store)))
    }

    pub fn catalog(&self) -> &SkillCatalog {
        &self.catalog
    }

    pub fn classifier(&self) -> &SkillClassifier {
        &self.classifier
    }

    /// Swap the portfolio snapshot and re-index the link store.
    ///
    /// If indexing the new entries fails, the store is re-indexed from the
    /// current snapshot and the catalog is left untouched.
    pub fn reload(&mut self, entries: Vec<PortfolioEntry>) -> Result<(), LinkStoreError> {
        self.link_store.clear()?;
        if let Err(err) = self.link_store.load_portfolio(&entries) {
            warn!(error = %err, "re-indexing portfolio links failed; restoring previous snapshot");
            self.link_store.clear()?;
            self.link_store.load_portfolio(self.catalog.entries())?;
            return Err(err);
        }
        self.catalog.reload(entries);
        Ok(())
    }

    pub fn extract_all_skills(&self) -> &[String] {
        self.catalog.extract_all_skills()
    }

    pub fn categorize(&self) -> BTreeMap<SkillCategory, Vec<String>> {
        self.classifier.categorize(self.catalog.extract_all_skills())
    }

    pub fn top_skills(&self, n: usize) -> Vec<String> {
        self.catalog.top_skills(n)
    }

    pub fn match_skills<S: AsRef<str>>(&self, job_skills: &[S]) -> MatchResult {
        let known = self
            .catalog
            .extract_all_skills()
            .iter()
            .map(|s| s.to_lowercase())
            .collect::<HashSet<_>>();

        let (matching, missing): (Vec<String>, Vec<String>) = job_skills
            .iter()
            .map(|s| s.as_ref().to_string())
            .partition(|s| known.contains(&s.to_lowercase()));

        let match_percentage = if job_skills.is_empty() {
            0.0
        } else {
            round_one_decimal(100.0 * matching.len() as f64 / job_skills.len() as f64)
        };

        let relevant_projects = self.relevant_projects(&matching);
        debug!(
            matching = matching.len(),
            missing = missing.len(),
            projects = relevant_projects.len(),
            "matched job skills"
        );

        MatchResult {
            matching_skills: matching,
            missing_skills: missing,
            match_percentage,
            relevant_projects,
        }
    }

    fn relevant_projects(&self, matching: &[String]) -> Vec<PortfolioEntry> {
        let mut seen = HashSet::new();
        matching
            .iter()
            .take(MAX_SUGGESTED_SKILLS)
            .flat_map(|skill| {
                self.catalog
                    .find_projects_by_skill(skill)
                    .into_iter()
                    .take(MAX_PROJECTS_PER_SKILL)
            })
            .filter(|entry| seen.insert(entry.link.clone()))
            .take(MAX_RELEVANT_PROJECTS)
            .cloned()
            .collect()
    }

    /// Nearest-neighbour link lookup over free text. Coarser than
    /// [`match_skills`](Self::match_skills) and backed by the link store.
    pub fn query_links(&self, skill_text: &str) -> Result<Vec<LinkRecord>, LinkStoreError> {
        self.link_store.query(skill_text, LINK_QUERY_RESULTS)
    }

    pub fn query_links_for_skills<S: AsRef<str>>(&self, skills: &[S]) -> Result<Vec<LinkRecord>, LinkStoreError> {
        let text = skills.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(", ");
        self.query_links(&text)
    }

    pub fn portfolio_summary(&self) -> PortfolioSummary {
        let buckets = self.categorize();
        let head = |category: SkillCategory| -> Vec<String> {
            buckets
                .get(&category)
                .map(|skills| skills.iter().take(SUMMARY_CATEGORY_LIMIT).cloned().collect())
                .unwrap_or_default()
        };
        PortfolioSummary {
            total_projects: self.catalog.len(),
            total_skills: self.catalog.extract_all_skills().len(),
            top_skills: self.top_skills(SUMMARY_TOP_SKILLS),
            skill_categories: buckets.iter().map(|(c, skills)| (*c, skills.len())).collect(),
            languages: head(SkillCategory::Languages),
            frameworks: head(SkillCategory::Frameworks),
            databases: head(SkillCategory::Databases),
            cloud_platforms: head(SkillCategory::Cloud),
        }
    }
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario_matcher() -> PortfolioMatcher {
        PortfolioMatcher::in_memory(vec![
            PortfolioEntry::new("Python, AWS", "L1"),
            PortfolioEntry::new("React, Node.js", "L2"),
        ])
        .unwrap()
    }

    #[test]
    fn scenario_partial_match() {
        let result = scenario_matcher().match_skills(&["Python", "AWS", "Docker"]);
        assert_eq!(result.matching_skills, vec!["Python", "AWS"]);
        assert_eq!(result.missing_skills, vec!["Docker"]);
        assert_eq!(result.match_percentage, 66.7);
        assert_eq!(result.relevant_projects, vec![PortfolioEntry::new("Python, AWS", "L1")]);
    }

    #[test]
    fn empty_job_skills() {
        let result = scenario_matcher().match_skills::<String>(&[]);
        assert_eq!(result.match_percentage, 0.0);
        assert!(result.matching_skills.is_empty());
        assert!(result.missing_skills.is_empty());
        assert!(result.relevant_projects.is_empty());
    }

    #[test]
    fn matching_ignores_case_but_keeps_job_spelling() {
        let result = scenario_matcher().match_skills(&["react", "NODE.JS", "Kotlin"]);
        assert_eq!(result.matching_skills, vec!["react", "NODE.JS"]);
        assert_eq!(result.match_percentage, 66.7);
    }

    #[test]
    fn empty_catalog_matches_nothing() {
        let matcher = PortfolioMatcher::in_memory(Vec::new()).unwrap();
        let result = matcher.match_skills(&["Rust"]);
        assert_eq!(result.missing_skills, vec!["Rust"]);
        assert_eq!(result.match_percentage, 0.0);
        assert!(matcher.query_links("Rust").unwrap().is_empty());
    }

    #[test]
    fn project_suggestions_are_bounded_and_deduplicated() {
        let matcher = PortfolioMatcher::in_memory(vec![
            PortfolioEntry::new("Python, AWS", "L1"),
            PortfolioEntry::new("Python, Docker", "L2"),
            PortfolioEntry::new("Python", "L3"),
            PortfolioEntry::new("AWS, Docker", "L4"),
            PortfolioEntry::new("Docker, Kafka", "L5"),
            PortfolioEntry::new("Kafka", "L6"),
        ])
        .unwrap();
        let result = matcher.match_skills(&["Python", "AWS", "Docker", "Kafka"]);
        assert_eq!(result.match_percentage, 100.0);
        let links = result
            .relevant_projects
            .iter()
            .map(|p| p.link.as_str())
            .collect::<Vec<_>>();
        // Python -> L1, L2; AWS -> L1 (dup), L4; Docker -> L2 (dup), L4 (dup); Kafka is past the first three.
        assert_eq!(links, vec!["L1", "L2", "L4"]);
    }

    #[test]
    fn suggestions_truncate_to_four() {
        let matcher = PortfolioMatcher::in_memory(vec![
            PortfolioEntry::new("Go", "L1"),
            PortfolioEntry::new("Go", "L2"),
            PortfolioEntry::new("Elm", "L3"),
            PortfolioEntry::new("Elm", "L4"),
            PortfolioEntry::new("Zig", "L5"),
            PortfolioEntry::new("Zig", "L6"),
        ])
        .unwrap();
        let result = matcher.match_skills(&["Go", "Elm", "Zig"]);
        assert_eq!(result.relevant_projects.len(), 4);
        assert_eq!(result.relevant_projects[3].link, "L4");
    }

    #[test]
    fn query_links_is_a_separate_nearest_neighbour_path() {
        let matcher = scenario_matcher();
        let links = matcher.query_links_for_skills(&["React", "Node.js"]).unwrap();
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].link, "L2");
    }

    #[test]
    fn reload_refreshes_catalog_and_links() {
        let mut matcher = scenario_matcher();
        matcher
            .reload(vec![PortfolioEntry::new("Rust, Tokio", "L9")])
            .unwrap();
        assert_eq!(matcher.extract_all_skills(), ["Rust", "Tokio"]);
        let links = matcher.query_links("Rust").unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].link, "L9");
    }

    /// Refuses to index one particular link.
    struct RejectingStore {
        inner: InMemoryLinkStore,
        rejected_link: &'static str,
    }

    impl LinkStore for RejectingStore {
        fn count(&self) -> Result<usize, LinkStoreError> {
            self.inner.count()
        }

        fn add(&self, document: &str, link: &str) -> Result<(), LinkStoreError> {
            if link == self.rejected_link {
                return Err(LinkStoreError::Unavailable(format!("cannot index {link}")));
            }
            self.inner.add(document, link)
        }

        fn clear(&self) -> Result<(), LinkStoreError> {
            self.inner.clear()
        }

        fn query(&self, text: &str, k: usize) -> Result<Vec<LinkRecord>, LinkStoreError> {
            self.inner.query(text, k)
        }
    }

    #[test]
    fn failed_reload_keeps_catalog_and_links_in_step() {
        let entries = vec![
            PortfolioEntry::new("Python, AWS", "L1"),
            PortfolioEntry::new("React, Node.js", "L2"),
        ];
        let store = RejectingStore {
            inner: InMemoryLinkStore::new(),
            rejected_link: "L-bad",
        };
        store.load_portfolio(&entries).unwrap();
        let mut matcher = PortfolioMatcher::new(SkillCatalog::new(entries), SkillClassifier::default(), Arc::new(store));

        let err = matcher
            .reload(vec![
                PortfolioEntry::new("Rust", "L9"),
                PortfolioEntry::new("Go", "L-bad"),
            ])
            .unwrap_err();
        assert!(err.to_string().contains("L-bad"));

        assert_eq!(matcher.extract_all_skills(), ["AWS", "Node.js", "Python", "React"]);
        let links = matcher.query_links("Python").unwrap();
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].link, "L1");
        assert!(matcher.query_links("Rust").unwrap().iter().all(|l| l.link != "L9"));
    }

    #[test]
    fn categorized_buckets_cover_every_skill() {
        let matcher = scenario_matcher();
        let total = matcher.categorize().values().map(Vec::len).sum::<usize>();
        assert_eq!(total, matcher.extract_all_skills().len());
    }

    #[test]
    fn summary_reports_counts_and_heads() {
        let summary = scenario_matcher().portfolio_summary();
        assert_eq!(summary.total_projects, 2);
        assert_eq!(summary.total_skills, 4);
        assert_eq!(summary.top_skills.len(), 4);
        assert_eq!(summary.skill_categories[&SkillCategory::Frameworks], 2);
        assert_eq!(summary.skill_categories[&SkillCategory::Other], 0);
        assert_eq!(summary.languages, vec!["Python"]);
        assert_eq!(summary.frameworks, vec!["Node.js", "React"]);
        assert_eq!(summary.cloud_platforms, vec!["AWS"]);
        assert!(summary.databases.is_empty());
    }
}
