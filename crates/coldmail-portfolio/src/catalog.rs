use std::collections::BTreeSet;
use std::sync::OnceLock;

use coldmail_core::PortfolioEntry;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

static PARENTHETICAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\([^)]*\)").expect("valid regex"));

const DELIMITERS: [char; 4] = [',', ';', '|', '/'];

/// Split raw tech-stack text into skill tokens.
///
/// Fragments are trimmed and stripped of `( ... )` groups; a token must be
/// longer than one character and not made of digits only.
pub fn tokenize_tech_stack(raw: &str) -> impl Iterator<Item = String> + '_ {
    raw.split(DELIMITERS.as_slice()).filter_map(|fragment| {
        let stripped = PARENTHETICAL.replace_all(fragment.trim(), "");
        let token = stripped.trim();
        let admitted = token.chars().count() > 1 && !token.chars().all(|c| c.is_ascii_digit());
        admitted.then(|| token.to_string())
    })
}

/// The portfolio snapshot plus its lazily derived skill vocabulary.
#[derive(Debug, Default)]
pub struct SkillCatalog {
    entries: Vec<PortfolioEntry>,
    skills: OnceLock<Vec<String>>,
}

impl SkillCatalog {
    pub fn new(entries: Vec<PortfolioEntry>) -> Self {
        Self {
            entries,
            skills: OnceLock::new(),
        }
    }

    pub fn entries(&self) -> &[PortfolioEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sorted, de-duplicated skill tokens across every entry. Computed once.
    pub fn extract_all_skills(&self) -> &[String] {
        self.skills.get_or_init(|| {
            let skills = self
                .entries
                .iter()
                .flat_map(|entry| tokenize_tech_stack(&entry.tech_stack))
                .collect::<BTreeSet<_>>();
            debug!(entries = self.entries.len(), skills = skills.len(), "derived skill catalog");
            skills.into_iter().collect()
        })
    }

    /// Drop the cached vocabulary; the next read rescans the entries.
    pub fn invalidate(&mut self) {
        self.skills.take();
    }

    pub fn reload(&mut self, entries: Vec<PortfolioEntry>) {
        self.entries = entries;
        self.invalidate();
    }

    /// Entries whose raw tech stack mentions `skill`, case-insensitively.
    ///
    /// Substring semantics: "Java" also finds "JavaScript" projects.
    pub fn find_projects_by_skill(&self, skill: &str) -> Vec<&PortfolioEntry> {
        let needle = skill.to_lowercase();
        self.entries
            .iter()
            .filter(|entry| entry.tech_stack.to_lowercase().contains(&needle))
            .collect()
    }

    /// Per-skill project counts in catalog order.
    pub fn skill_counts(&self) -> Vec<(String, usize)> {
        let lowered = self
            .entries
            .iter()
            .map(|entry| entry.tech_stack.to_lowercase())
            .collect::<Vec<_>>();
        self.extract_all_skills()
            .iter()
            .map(|skill| {
                let needle = skill.to_lowercase();
                let count = lowered.iter().filter(|stack| stack.contains(&needle)).count();
                (skill.clone(), count)
            })
            .collect()
    }

    /// Up to `n` skills by descending project count; ties keep catalog order.
    pub fn top_skills(&self, n: usize) -> Vec<String> {
        let mut counts = self.skill_counts();
        counts.sort_by(|a, b| b.1.cmp(&a.1));
        counts.into_iter().take(n).map(|(skill, _)| skill).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario_portfolio() -> SkillCatalog {
        SkillCatalog::new(vec![
            PortfolioEntry::new("Python, AWS", "L1"),
            PortfolioEntry::new("React, Node.js", "L2"),
        ])
    }

    #[test]
    fn extracts_sorted_skill_set() {
        let catalog = scenario_portfolio();
        assert_eq!(catalog.extract_all_skills(), ["AWS", "Node.js", "Python", "React"]);
    }

    #[test]
    fn tokenizer_strips_parentheticals_and_rejects_noise() {
        let tokens = tokenize_tech_stack(" Python (3.11) ;Go|C/  R ,2023,  (legacy) ,Rust").collect::<Vec<_>>();
        assert_eq!(tokens, vec!["Python", "Go", "Rust"]);
    }

    #[test]
    fn skill_identity_is_case_sensitive() {
        let catalog = SkillCatalog::new(vec![
            PortfolioEntry::new("AWS, aws", "L1"),
            PortfolioEntry::new("AWS", "L2"),
        ]);
        assert_eq!(catalog.extract_all_skills(), ["AWS", "aws"]);
    }

    #[test]
    fn repeated_extraction_reuses_cache() {
        let catalog = scenario_portfolio();
        let first = catalog.extract_all_skills();
        let second = catalog.extract_all_skills();
        assert_eq!(first, second);
        assert!(std::ptr::eq(first.as_ptr(), second.as_ptr()));
    }

    #[test]
    fn reload_invalidates_cache() {
        let mut catalog = scenario_portfolio();
        assert_eq!(catalog.extract_all_skills().len(), 4);
        catalog.reload(vec![PortfolioEntry::new("Rust", "L9")]);
        assert_eq!(catalog.extract_all_skills(), ["Rust"]);
    }

    #[test]
    fn empty_portfolio_has_no_skills() {
        let catalog = SkillCatalog::default();
        assert!(catalog.extract_all_skills().is_empty());
        assert!(catalog.top_skills(5).is_empty());
        assert!(catalog.find_projects_by_skill("Rust").is_empty());
    }

    #[test]
    fn single_skill_portfolio_round_trip() {
        let catalog = SkillCatalog::new(vec![
            PortfolioEntry::new("Elixir", "L1"),
            PortfolioEntry::new("Elixir", "L2"),
            PortfolioEntry::new("Elixir", "L3"),
        ]);
        assert_eq!(catalog.top_skills(1), vec!["Elixir".to_string()]);
        assert_eq!(catalog.find_projects_by_skill("Elixir").len(), 3);
    }

    #[test]
    fn top_skills_orders_by_count_then_catalog_order() {
        let catalog = SkillCatalog::new(vec![
            PortfolioEntry::new("Python, AWS", "L1"),
            PortfolioEntry::new("Python, Docker", "L2"),
            PortfolioEntry::new("Kafka", "L3"),
        ]);
        assert_eq!(
            catalog.top_skills(3),
            vec!["Python".to_string(), "AWS".to_string(), "Docker".to_string()]
        );
        assert_eq!(catalog.top_skills(10).len(), 4);
    }

    #[test]
    fn substring_counting_over_counts_java_in_javascript() {
        // Known over-count: "Java" is a substring of "JavaScript".
        let catalog = SkillCatalog::new(vec![
            PortfolioEntry::new("Java", "L1"),
            PortfolioEntry::new("JavaScript", "L2"),
            PortfolioEntry::new("JavaScript", "L3"),
        ]);
        let counts = catalog.skill_counts();
        assert_eq!(counts, vec![("Java".to_string(), 3), ("JavaScript".to_string(), 2)]);
        assert_eq!(catalog.find_projects_by_skill("java").len(), 3);
    }
}
