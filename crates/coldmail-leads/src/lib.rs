//! Job-lead source contracts, fixture-backed listing parsers and keyword scoring.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coldmail_core::JobLead;
use scraper::{ElementRef, Html, Selector};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;
use url::Url;
use uuid::Uuid;

pub const CRATE_NAME: &str = "coldmail-leads";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingFormat {
    Html,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceContext {
    pub run_id: Uuid,
    pub fetched_at: DateTime<Utc>,
    pub keywords: Vec<String>,
}

impl SourceContext {
    pub fn new(keywords: Vec<String>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            fetched_at: Utc::now(),
            keywords,
        }
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// A discovery source producing job leads.
#[async_trait]
pub trait LeadSource: Send + Sync {
    fn source_id(&self) -> &str;

    async fn fetch_leads(&self, ctx: &SourceContext) -> Result<Vec<JobLead>, SourceError>;
}

/// A captured listing page plus where it came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListingBundle {
    pub source_id: String,
    pub format: ListingFormat,
    pub captured_from_url: String,
    pub fetched_at: DateTime<Utc>,
    pub raw_artifact: RawArtifact,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawArtifact {
    pub content_type: String,
    pub path: Option<String>,
    pub inline_text: Option<String>,
}

pub fn load_listing_bundle(path: impl AsRef<Path>) -> Result<ListingBundle> {
    let path = path.as_ref();
    let mut bundle: ListingBundle = read_json_file(path)?;
    hydrate_inline_raw_artifact(path, &mut bundle)?;
    Ok(bundle)
}

fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

fn hydrate_inline_raw_artifact(bundle_path: &Path, bundle: &mut ListingBundle) -> Result<()> {
    if bundle.raw_artifact.inline_text.is_some() {
        return Ok(());
    }
    let Some(rel_path) = &bundle.raw_artifact.path else {
        return Ok(());
    };
    let raw_path = bundle_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(rel_path);
    let raw = fs::read_to_string(&raw_path)
        .with_context(|| format!("reading raw listing {}", raw_path.display()))?;
    bundle.raw_artifact.inline_text = Some(raw);
    Ok(())
}

/// Fraction of `keywords` found in the lead's title and snippet, capped at 1.
///
/// Matching is a case-insensitive substring test per keyword. An empty keyword
/// list scores 0.
pub fn keyword_match_score<S: AsRef<str>>(keywords: &[S], title: &str, snippet: &str) -> f64 {
    if keywords.is_empty() {
        return 0.0;
    }
    let haystack = format!("{title} {snippet}").to_lowercase();
    let matched = keywords
        .iter()
        .filter(|k| haystack.contains(&k.as_ref().to_lowercase()))
        .count();
    (matched as f64 / keywords.len() as f64).min(1.0)
}

pub fn score_leads<S: AsRef<str>>(keywords: &[S], leads: &mut [JobLead]) {
    for lead in leads {
        lead.match_score = keyword_match_score(keywords, &lead.title, &lead.description_snippet);
    }
}

fn text_or_none(value: String) -> Option<String> {
    let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

fn selector(css: &str) -> Result<Selector, SourceError> {
    Selector::parse(css).map_err(|e| SourceError::Message(e.to_string()))
}

fn first_text(card: &ElementRef<'_>, sel: &Selector) -> Option<String> {
    card.select(sel)
        .next()
        .and_then(|n| text_or_none(n.text().collect::<String>()))
}

/// Resolve a listing href against the page it was captured from.
///
/// An unparseable base or href yields the trimmed href unchanged.
fn absolutize(base: &str, href: &str) -> String {
    let href = href.trim();
    if href.is_empty() {
        return String::new();
    }
    Url::parse(base)
        .and_then(|base| base.join(href))
        .map(String::from)
        .unwrap_or_else(|_| href.to_string())
}

/// Parse `.job-card` elements out of an HTML listing page.
pub fn parse_html_listing(bundle: &ListingBundle) -> Result<Vec<JobLead>, SourceError> {
    let Some(html) = bundle.raw_artifact.inline_text.as_deref() else {
        return Ok(Vec::new());
    };
    let document = Html::parse_document(html);
    let card_sel = selector(".job-card")?;
    let title_sel = selector(".job-title, h2, h3")?;
    let company_sel = selector(".company")?;
    let location_sel = selector(".location")?;
    let snippet_sel = selector(".snippet, .summary, p")?;
    let link_sel = selector("a[href]")?;

    let leads = document
        .select(&card_sel)
        .map(|card| JobLead {
            title: first_text(&card, &title_sel).unwrap_or_default(),
            company: first_text(&card, &company_sel).unwrap_or_default(),
            location: first_text(&card, &location_sel).unwrap_or_default(),
            description_snippet: first_text(&card, &snippet_sel).unwrap_or_default(),
            url: card
                .select(&link_sel)
                .next()
                .and_then(|a| a.value().attr("href"))
                .map(|href| absolutize(&bundle.captured_from_url, href))
                .unwrap_or_default(),
            match_score: 0.0,
            source: bundle.source_id.clone(),
        })
        .collect::<Vec<_>>();
    debug!(source = %bundle.source_id, leads = leads.len(), "parsed html listing");
    Ok(leads)
}

fn json_text(value: &JsonValue, paths: &[&[&str]]) -> String {
    paths
        .iter()
        .find_map(|path| {
            let mut cur = value;
            for segment in *path {
                cur = cur.get(*segment)?;
            }
            cur.as_str().and_then(|s| text_or_none(s.to_string()))
        })
        .unwrap_or_default()
}

/// Parse a JSON feed: either a top-level array or an object with a `jobs` array.
pub fn parse_json_listing(bundle: &ListingBundle) -> Result<Vec<JobLead>, SourceError> {
    let Some(text) = bundle.raw_artifact.inline_text.as_deref() else {
        return Ok(Vec::new());
    };
    let value: JsonValue = serde_json::from_str(text)
        .map_err(|e| SourceError::Message(format!("invalid JSON listing for {}: {e}", bundle.source_id)))?;
    let items = match &value {
        JsonValue::Array(items) => items.as_slice(),
        other => other
            .get("jobs")
            .and_then(JsonValue::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default(),
    };
    let leads = items
        .iter()
        .filter(|item| item.is_object())
        .map(|item| JobLead {
            title: json_text(item, &[&["title"], &["role"]]),
            company: json_text(item, &[&["company", "name"], &["company"]]),
            location: json_text(item, &[&["location"], &["candidate_required_location"]]),
            description_snippet: json_text(item, &[&["snippet"], &["description"]]),
            url: json_text(item, &[&["url"], &["apply_url"]]),
            match_score: 0.0,
            source: bundle.source_id.clone(),
        })
        .collect::<Vec<_>>();
    debug!(source = %bundle.source_id, leads = leads.len(), "parsed json listing");
    Ok(leads)
}

pub fn parse_listing(bundle: &ListingBundle) -> Result<Vec<JobLead>, SourceError> {
    match bundle.format {
        ListingFormat::Html => parse_html_listing(bundle),
        ListingFormat::Json => parse_json_listing(bundle),
    }
}

/// Reads a captured listing bundle from disk and scores it against the run keywords.
#[derive(Debug, Clone)]
pub struct FixtureLeadSource {
    source_id: String,
    bundle_path: PathBuf,
}

impl FixtureLeadSource {
    pub fn new(source_id: impl Into<String>, bundle_path: impl Into<PathBuf>) -> Self {
        Self {
            source_id: source_id.into(),
            bundle_path: bundle_path.into(),
        }
    }
}

#[async_trait]
impl LeadSource for FixtureLeadSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn fetch_leads(&self, ctx: &SourceContext) -> Result<Vec<JobLead>, SourceError> {
        let bundle = load_listing_bundle(&self.bundle_path)?;
        if bundle.source_id != self.source_id {
            return Err(SourceError::Message(format!(
                "bundle source_id={} does not match source_id={}",
                bundle.source_id, self.source_id
            )));
        }
        let mut leads = parse_listing(&bundle)?;
        score_leads(&ctx.keywords, &mut leads);
        Ok(leads)
    }
}

/// Leads supplied by hand. Scores and sources are taken as given.
#[derive(Debug, Clone)]
pub struct StaticLeadSource {
    source_id: String,
    leads: Vec<JobLead>,
}

impl StaticLeadSource {
    pub fn new(source_id: impl Into<String>, leads: Vec<JobLead>) -> Self {
        Self {
            source_id: source_id.into(),
            leads,
        }
    }

    pub fn from_json_file(source_id: impl Into<String>, path: impl AsRef<Path>) -> Result<Self> {
        let leads: Vec<JobLead> = read_json_file(path)?;
        Ok(Self::new(source_id, leads))
    }
}

#[async_trait]
impl LeadSource for StaticLeadSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    async fn fetch_leads(&self, _ctx: &SourceContext) -> Result<Vec<JobLead>, SourceError> {
        Ok(self.leads.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct GoldenLead {
        title: String,
        company: String,
        url: String,
        match_score: f64,
    }

    fn workspace_root() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../..")
            .canonicalize()
            .expect("workspace root")
    }

    fn fixture_bundle_path(source_id: &str) -> PathBuf {
        workspace_root()
            .join("fixtures")
            .join(source_id)
            .join("sample")
            .join("bundle.json")
    }

    fn expected_snapshot_path(source_id: &str) -> PathBuf {
        workspace_root()
            .join("fixtures")
            .join(source_id)
            .join("sample")
            .join("snapshot.json")
    }

    fn read_snapshot(path: &Path) -> Vec<GoldenLead> {
        let text = fs::read_to_string(path).expect("read snapshot");
        serde_json::from_str(&text).expect("parse snapshot")
    }

    fn to_golden(leads: &[JobLead]) -> Vec<GoldenLead> {
        leads
            .iter()
            .map(|l| GoldenLead {
                title: l.title.clone(),
                company: l.company.clone(),
                url: l.url.clone(),
                match_score: l.match_score,
            })
            .collect()
    }

    fn keywords() -> Vec<String> {
        vec!["rust".to_string(), "python".to_string()]
    }

    #[tokio::test]
    async fn golden_snapshot_remote_board_html() {
        let source = FixtureLeadSource::new("remote-board", fixture_bundle_path("remote-board"));
        let leads = source.fetch_leads(&SourceContext::new(keywords())).await.unwrap();
        assert!(leads.iter().all(|l| l.source == "remote-board"));
        assert_eq!(to_golden(&leads), read_snapshot(&expected_snapshot_path("remote-board")));
    }

    #[tokio::test]
    async fn golden_snapshot_freelance_feed_json() {
        let source = FixtureLeadSource::new("freelance-feed", fixture_bundle_path("freelance-feed"));
        let leads = source.fetch_leads(&SourceContext::new(keywords())).await.unwrap();
        assert_eq!(to_golden(&leads), read_snapshot(&expected_snapshot_path("freelance-feed")));
    }

    #[tokio::test]
    async fn mismatched_bundle_source_is_rejected() {
        let source = FixtureLeadSource::new("someone-else", fixture_bundle_path("remote-board"));
        let err = source.fetch_leads(&SourceContext::new(keywords())).await.unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[tokio::test]
    async fn static_source_keeps_leads_as_given() {
        let source = StaticLeadSource::new(
            "manual",
            vec![JobLead {
                url: "u1".into(),
                match_score: 0.4,
                ..JobLead::default()
            }],
        );
        let leads = source.fetch_leads(&SourceContext::new(keywords())).await.unwrap();
        assert_eq!(source.source_id(), "manual");
        assert_eq!(leads[0].source, "");
        assert_eq!(leads[0].match_score, 0.4);
    }

    #[test]
    fn keyword_score_is_fraction_of_matched_keywords() {
        let kws = ["rust", "tokio", "kafka"];
        assert_eq!(keyword_match_score(&kws, "Senior RUST engineer", "async Tokio services"), 2.0 / 3.0);
        assert_eq!(keyword_match_score(&kws, "Designer", ""), 0.0);
        assert_eq!(keyword_match_score::<&str>(&[], "Rust", "Rust"), 0.0);
    }

    #[test]
    fn keyword_score_never_exceeds_one() {
        let kws = ["rust", "rust"];
        assert_eq!(keyword_match_score(&kws, "Rust", ""), 1.0);
    }

    #[test]
    fn relative_links_resolve_against_capture_url() {
        assert_eq!(absolutize("https://jobs.example.com/remote?page=1", "/jobs/42"), "https://jobs.example.com/jobs/42");
        assert_eq!(absolutize("https://jobs.example.com/list/all", "42"), "https://jobs.example.com/list/42");
        assert_eq!(absolutize("https://jobs.example.com", "42"), "https://jobs.example.com/42");
        assert_eq!(absolutize("https://a.example", "https://b.example/x"), "https://b.example/x");
        assert_eq!(absolutize("https://a.example", ""), "");
        assert_eq!(absolutize("https://a.example/jobs", "//cdn.example/x"), "https://cdn.example/x");
        assert_eq!(absolutize("https://a.example/list?next=/a/b", "42"), "https://a.example/42");
        assert_eq!(absolutize("https://a.example/a/b/c", "../d"), "https://a.example/a/d");
        assert_eq!(absolutize("not a url", "/jobs/1"), "/jobs/1");
    }

    #[test]
    fn html_card_without_link_yields_empty_url() {
        let bundle = ListingBundle {
            source_id: "inline".into(),
            format: ListingFormat::Html,
            captured_from_url: "https://inline.example/jobs".into(),
            fetched_at: Utc::now(),
            raw_artifact: RawArtifact {
                content_type: "text/html".into(),
                path: None,
                inline_text: Some(
                    "<div class=\"job-card\"><h2>  Rust   Dev </h2><span class=\"company\">Acme</span></div>".into(),
                ),
            },
            notes: None,
        };
        let leads = parse_listing(&bundle).unwrap();
        assert_eq!(leads.len(), 1);
        assert_eq!(leads[0].title, "Rust Dev");
        assert_eq!(leads[0].company, "Acme");
        assert!(leads[0].url.is_empty());
    }

    #[test]
    fn json_listing_accepts_jobs_wrapper_and_skips_non_objects() {
        let bundle = ListingBundle {
            source_id: "inline".into(),
            format: ListingFormat::Json,
            captured_from_url: "https://inline.example/api".into(),
            fetched_at: Utc::now(),
            raw_artifact: RawArtifact {
                content_type: "application/json".into(),
                path: None,
                inline_text: Some(r#"{"jobs": [{"role": "Data Engineer", "apply_url": "https://x/1"}, 7]}"#.into()),
            },
            notes: None,
        };
        let leads = parse_listing(&bundle).unwrap();
        assert_eq!(leads.len(), 1);
        assert_eq!(leads[0].title, "Data Engineer");
        assert_eq!(leads[0].url, "https://x/1");
    }
}
