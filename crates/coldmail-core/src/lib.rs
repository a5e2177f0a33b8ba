//! Core domain model for coldmail: portfolio entries, skill categories, job
//! requirements, match results and job leads.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use tracing::warn;

pub const CRATE_NAME: &str = "coldmail-core";

/// One row of the portfolio: the raw tech-stack text of a past project and its link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortfolioEntry {
    pub tech_stack: String,
    pub link: String,
}

impl PortfolioEntry {
    pub fn new(tech_stack: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            tech_stack: tech_stack.into(),
            link: link.into(),
        }
    }
}

/// Skill domains, declared in classification priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillCategory {
    Languages,
    Frameworks,
    Databases,
    Cloud,
    Tools,
    Other,
}

impl SkillCategory {
    pub const ALL: [SkillCategory; 6] = [
        SkillCategory::Languages,
        SkillCategory::Frameworks,
        SkillCategory::Databases,
        SkillCategory::Cloud,
        SkillCategory::Tools,
        SkillCategory::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SkillCategory::Languages => "languages",
            SkillCategory::Frameworks => "frameworks",
            SkillCategory::Databases => "databases",
            SkillCategory::Cloud => "cloud",
            SkillCategory::Tools => "tools",
            SkillCategory::Other => "other",
        }
    }
}

impl fmt::Display for SkillCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured job data handed over by the extraction step.
///
/// Every field is optional on the wire. `skills` accepts a list or a
/// comma-separated string; scalar fields accept numbers as well as strings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JobRequirement {
    #[serde(deserialize_with = "lenient_string")]
    pub role: String,
    #[serde(deserialize_with = "lenient_string")]
    pub experience: String,
    #[serde(deserialize_with = "lenient_skills")]
    pub skills: Vec<String>,
    #[serde(deserialize_with = "lenient_string")]
    pub description: String,
}

impl JobRequirement {
    /// Parse the raw text an extraction model returned.
    ///
    /// Tolerates surrounding code fences and a single-element list wrapper.
    /// Anything unusable yields an empty requirement rather than an error.
    pub fn from_llm_output(text: &str) -> Self {
        let body = strip_code_fence(text);
        let value: JsonValue = match serde_json::from_str(body) {
            Ok(value) => value,
            Err(err) => {
                warn!(error = %err, "job extraction output is not valid JSON; using empty requirement");
                return Self::default();
            }
        };
        let object = match value {
            JsonValue::Array(items) => items.into_iter().find(JsonValue::is_object),
            JsonValue::Object(_) => Some(value),
            _ => None,
        };
        let Some(object) = object else {
            warn!("job extraction output holds no JSON object; using empty requirement");
            return Self::default();
        };
        serde_json::from_value(object).unwrap_or_else(|err| {
            warn!(error = %err, "job extraction output has an unexpected shape; using empty requirement");
            Self::default()
        })
    }

    pub fn is_empty(&self) -> bool {
        self.role.is_empty()
            && self.experience.is_empty()
            && self.skills.is_empty()
            && self.description.is_empty()
    }
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Render a scalar JSON value as text. Containers have no string form.
pub fn json_scalar_to_string(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => Some(String::new()),
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Bool(b) => Some(b.to_string()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Array(_) | JsonValue::Object(_) => None,
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = JsonValue::deserialize(deserializer)?;
    Ok(match &value {
        JsonValue::Array(items) => items
            .iter()
            .filter_map(json_scalar_to_string)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        JsonValue::Object(_) => value.to_string(),
        scalar => json_scalar_to_string(scalar).unwrap_or_default(),
    })
}

fn lenient_skills<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = JsonValue::deserialize(deserializer)?;
    let raw = match value {
        JsonValue::Array(items) => items
            .iter()
            .filter_map(json_scalar_to_string)
            .collect::<Vec<_>>(),
        JsonValue::String(s) => s.split(',').map(ToString::to_string).collect(),
        _ => Vec::new(),
    };
    Ok(raw
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

/// Numbers and numeric strings are scores; anything else scores 0.
fn lenient_score<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = JsonValue::deserialize(deserializer)?;
    Ok(match &value {
        JsonValue::Number(n) => n.as_f64().unwrap_or(0.0),
        JsonValue::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    })
}

/// Overlap between a job's skills and the portfolio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub matching_skills: Vec<String>,
    pub missing_skills: Vec<String>,
    pub match_percentage: f64,
    pub relevant_projects: Vec<PortfolioEntry>,
}

/// A portfolio link returned by a nearest-neighbour lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkRecord {
    pub link: String,
    #[serde(default)]
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSummary {
    pub total_projects: usize,
    pub total_skills: usize,
    pub top_skills: Vec<String>,
    pub skill_categories: BTreeMap<SkillCategory, usize>,
    pub languages: Vec<String>,
    pub frameworks: Vec<String>,
    pub databases: Vec<String>,
    pub cloud_platforms: Vec<String>,
}

/// A job lead discovered by one source. `url` is its identity when non-empty.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JobLead {
    #[serde(deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(deserialize_with = "lenient_string")]
    pub company: String,
    #[serde(deserialize_with = "lenient_string")]
    pub location: String,
    #[serde(deserialize_with = "lenient_string")]
    pub description_snippet: String,
    #[serde(deserialize_with = "lenient_string")]
    pub url: String,
    #[serde(deserialize_with = "lenient_score")]
    pub match_score: f64,
    #[serde(deserialize_with = "lenient_string")]
    pub source: String,
}

impl JobLead {
    /// Clamp the score into [0, 1]; non-finite scores become 0.
    pub fn normalized(mut self) -> Self {
        self.match_score = if self.match_score.is_finite() {
            self.match_score.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.url = self.url.trim().to_string();
        self
    }

    pub fn has_identity(&self) -> bool {
        !self.url.is_empty()
    }
}
