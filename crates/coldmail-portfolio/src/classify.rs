use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use coldmail_core::SkillCategory;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::PortfolioError;

/// One row of the classification table: a category and its keyword substrings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRule {
    pub category: SkillCategory,
    pub contains_any: Vec<String>,
}

pub const RULES_FILE_VERSION: u32 = 1;

#[derive(Debug, Clone, Deserialize)]
struct CategoryRulesFile {
    version: u32,
    #[serde(default)]
    rules: Vec<CategoryRule>,
}

const DEFAULT_RULES: &[(SkillCategory, &[&str])] = &[
    (
        SkillCategory::Languages,
        &[
            "python", "javascript", "typescript", "java", "golang", "rust", "ruby", "php", "swift",
            "kotlin", "scala", "perl", "dart", "c++", "c#", "bash", "html", "css",
        ],
    ),
    (
        SkillCategory::Frameworks,
        &[
            "react", "angular", "vue", "django", "flask", "fastapi", "spring", "express", "node",
            "next.js", "rails", "laravel", ".net", "flutter", "tensorflow", "pytorch", "streamlit",
            "langchain", "svelte",
        ],
    ),
    (
        SkillCategory::Databases,
        &[
            "mysql", "postgres", "mongo", "redis", "sqlite", "oracle", "dynamodb", "cassandra",
            "elasticsearch", "firebase", "mariadb", "neo4j", "chroma", "sql", "graphql",
        ],
    ),
    (
        SkillCategory::Cloud,
        &[
            "aws", "azure", "gcp", "google cloud", "docker", "kubernetes", "terraform", "heroku",
            "jenkins", "lambda", "ansible", "vercel", "ci/cd",
        ],
    ),
    (
        SkillCategory::Tools,
        &[
            "git", "jira", "figma", "postman", "tableau", "power bi", "excel", "webpack", "selenium",
            "linux", "airflow", "kafka", "spark", "hadoop",
        ],
    ),
];

/// Ordered first-match-wins keyword classifier. Unmatched skills land in `other`.
#[derive(Debug, Clone)]
pub struct SkillClassifier {
    rules: Vec<CategoryRule>,
}

impl Default for SkillClassifier {
    fn default() -> Self {
        Self::new(
            DEFAULT_RULES
                .iter()
                .map(|(category, keywords)| CategoryRule {
                    category: *category,
                    contains_any: keywords.iter().map(ToString::to_string).collect(),
                })
                .collect(),
        )
    }
}

impl SkillClassifier {
    /// Rules are evaluated in the given order. Keywords are lower-cased and
    /// blank keywords dropped, since they would match every skill.
    pub fn new(rules: Vec<CategoryRule>) -> Self {
        let rules = rules
            .into_iter()
            .map(|rule| CategoryRule {
                category: rule.category,
                contains_any: rule
                    .contains_any
                    .iter()
                    .map(|k| k.trim().to_lowercase())
                    .filter(|k| !k.is_empty())
                    .collect(),
            })
            .collect();
        Self { rules }
    }

    pub fn from_yaml_str(text: &str, origin: &Path) -> Result<Self, PortfolioError> {
        let file: CategoryRulesFile = serde_yaml::from_str(text).map_err(|source| PortfolioError::Rules {
            path: origin.to_path_buf(),
            source,
        })?;
        if file.version != RULES_FILE_VERSION {
            return Err(PortfolioError::UnsupportedRulesVersion {
                path: origin.to_path_buf(),
                version: file.version,
            });
        }
        Ok(Self::new(file.rules))
    }

    /// Load the table from YAML, or fall back to the built-in table when the
    /// file does not exist.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, PortfolioError> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "no category rules file; using built-in table");
            return Ok(Self::default());
        }
        let text = fs::read_to_string(path).map_err(|source| PortfolioError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let classifier = Self::from_yaml_str(&text, path)?;
        info!(path = %path.display(), rules = classifier.rules.len(), "loaded category rules");
        Ok(classifier)
    }

    pub fn rules(&self) -> &[CategoryRule] {
        &self.rules
    }

    pub fn classify(&self, skill: &str) -> SkillCategory {
        let lowered = skill.to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.contains_any.iter().any(|k| lowered.contains(k.as_str())))
            .map(|rule| rule.category)
            .unwrap_or(SkillCategory::Other)
    }

    /// Bucket every skill into exactly one category. All six buckets are present.
    pub fn categorize<S: AsRef<str>>(&self, skills: &[S]) -> BTreeMap<SkillCategory, Vec<String>> {
        let mut buckets = SkillCategory::ALL
            .iter()
            .map(|c| (*c, Vec::new()))
            .collect::<BTreeMap<_, _>>();
        for skill in skills {
            let skill = skill.as_ref();
            buckets
                .entry(self.classify(skill))
                .or_default()
                .push(skill.to_string());
        }
        buckets
    }
}
