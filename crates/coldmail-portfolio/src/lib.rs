//! Portfolio loading, skill catalog, classification and matching.

use std::fs;
use std::path::{Path, PathBuf};

use coldmail_core::{json_scalar_to_string, PortfolioEntry};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;

mod catalog;
mod classify;
mod links;
mod matcher;

pub use catalog::{tokenize_tech_stack, SkillCatalog};
pub use classify::{CategoryRule, SkillClassifier, RULES_FILE_VERSION};
pub use links::{InMemoryLinkStore, LinkStore, LinkStoreError};
pub use matcher::{PortfolioMatcher, SUMMARY_CATEGORY_LIMIT, SUMMARY_TOP_SKILLS};

pub const CRATE_NAME: &str = "coldmail-portfolio";

pub const TECH_STACK_COLUMN: &str = "TechStack";
pub const LINK_COLUMN: &str = "Portfolio_Link";

#[derive(Debug, Error)]
pub enum PortfolioError {
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing portfolio csv {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("parsing portfolio json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("parsing category rules {path}: {source}")]
    Rules {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("category rules {path}: unsupported version {version}")]
    UnsupportedRulesVersion { path: PathBuf, version: u32 },
    #[error("portfolio row {row} is not an object")]
    RowNotObject { row: usize },
    #[error("portfolio row {row}: `{field}` has no string form")]
    NonStringField { row: usize, field: &'static str },
}

#[derive(Debug, Deserialize)]
struct PortfolioRow {
    #[serde(rename = "TechStack", default)]
    tech_stack: Option<String>,
    #[serde(rename = "Portfolio_Link", default)]
    link: Option<String>,
}

/// Read a `TechStack,Portfolio_Link` CSV file, one entry per row.
pub fn load_portfolio_csv(path: impl AsRef<Path>) -> Result<Vec<PortfolioEntry>, PortfolioError> {
    let path = path.as_ref();
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::Headers)
        .from_path(path)
        .map_err(|source| PortfolioError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
    let mut entries = Vec::new();
    for row in reader.deserialize::<PortfolioRow>() {
        let row = row.map_err(|source| PortfolioError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        entries.push(PortfolioEntry::new(
            row.tech_stack.unwrap_or_default(),
            row.link.unwrap_or_default(),
        ));
    }
    debug!(path = %path.display(), rows = entries.len(), "loaded portfolio csv");
    Ok(entries)
}

/// Build entries from loosely typed JSON rows, coercing scalar cells to text.
pub fn portfolio_from_json_rows(rows: &[JsonValue]) -> Result<Vec<PortfolioEntry>, PortfolioError> {
    rows.iter()
        .enumerate()
        .map(|(row, value)| {
            let object = value.as_object().ok_or(PortfolioError::RowNotObject { row })?;
            let cell = |column: &str, field: &'static str| match object.get(column) {
                None => Ok(String::new()),
                Some(v) => json_scalar_to_string(v).ok_or(PortfolioError::NonStringField { row, field }),
            };
            Ok(PortfolioEntry::new(
                cell(TECH_STACK_COLUMN, "tech_stack")?,
                cell(LINK_COLUMN, "link")?,
            ))
        })
        .collect()
}

pub fn load_portfolio_json(path: impl AsRef<Path>) -> Result<Vec<PortfolioEntry>, PortfolioError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path).map_err(|source| PortfolioError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let rows: Vec<JsonValue> = serde_json::from_str(&text)?;
    portfolio_from_json_rows(&rows)
}

/// Pick the loader by file extension; anything but `.json` is read as CSV.
pub fn load_portfolio(path: impl AsRef<Path>) -> Result<Vec<PortfolioEntry>, PortfolioError> {
    let path = path.as_ref();
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("json") => load_portfolio_json(path),
        _ => load_portfolio_csv(path),
    }
}
