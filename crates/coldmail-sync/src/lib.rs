//! Lead pipeline orchestration, lead aggregation and outreach preparation.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use coldmail_core::{JobLead, JobRequirement, LinkRecord, MatchResult};
use coldmail_leads::{FixtureLeadSource, LeadSource, SourceContext, SourceError, StaticLeadSource};
use coldmail_portfolio::{
    load_portfolio, InMemoryLinkStore, LinkStore, LinkStoreError, PortfolioMatcher, SkillCatalog,
    SkillClassifier,
};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "coldmail-sync";

#[derive(Debug, Clone, Deserialize)]
pub struct SourceRegistry {
    #[serde(default)]
    pub keywords: Vec<String>,
    pub sources: Vec<SourceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub source_id: String,
    pub display_name: String,
    pub enabled: bool,
    pub mode: String,
    #[serde(default)]
    pub listing_urls: Vec<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub workspace_root: PathBuf,
    pub reports_dir: PathBuf,
    pub portfolio_path: PathBuf,
    pub category_rules_path: PathBuf,
    pub source_delay: Duration,
    pub keywords: Option<Vec<String>>,
}

impl SyncConfig {
    pub fn with_workspace_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            reports_dir: root.join("reports"),
            portfolio_path: root.join("portfolio").join("links_portfolio.csv"),
            category_rules_path: root.join("rules").join("skill_categories.yaml"),
            source_delay: Duration::ZERO,
            keywords: None,
            workspace_root: root,
        }
    }

    pub fn from_env() -> Self {
        let root = std::env::var("COLDMAIL_WORKSPACE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));
        let mut config = Self::with_workspace_root(root);
        if let Ok(path) = std::env::var("COLDMAIL_REPORTS_DIR") {
            config.reports_dir = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("COLDMAIL_PORTFOLIO_PATH") {
            config.portfolio_path = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("COLDMAIL_CATEGORY_RULES") {
            config.category_rules_path = PathBuf::from(path);
        }
        config.source_delay = std::env::var("COLDMAIL_SOURCE_DELAY_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(Duration::ZERO);
        config.keywords = std::env::var("COLDMAIL_KEYWORDS")
            .ok()
            .map(|v| parse_keyword_list(&v))
            .filter(|k| !k.is_empty());
        config
    }
}

pub fn parse_keyword_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateStats {
    pub input_leads: usize,
    pub duplicates_dropped: usize,
    pub unkeyed_kept: usize,
}

/// Merges lead lists from several sources into one ranked list.
///
/// Earlier lists win on duplicate URLs. Leads without a URL have no identity
/// and are always kept. The result is stably sorted by score, highest first.
#[derive(Debug, Clone, Copy, Default)]
pub struct LeadAggregator;

impl LeadAggregator {
    pub fn aggregate(&self, lead_lists: Vec<Vec<JobLead>>) -> Vec<JobLead> {
        self.aggregate_with_stats(lead_lists).0
    }

    pub fn aggregate_with_stats(&self, lead_lists: Vec<Vec<JobLead>>) -> (Vec<JobLead>, AggregateStats) {
        let mut stats = AggregateStats::default();
        let mut seen = HashSet::new();
        let mut admitted = Vec::new();

        for lead in lead_lists.into_iter().flatten().map(JobLead::normalized) {
            stats.input_leads += 1;
            if !lead.has_identity() {
                stats.unkeyed_kept += 1;
                admitted.push(lead);
            } else if seen.insert(lead.url.clone()) {
                admitted.push(lead);
            } else {
                stats.duplicates_dropped += 1;
            }
        }

        admitted.sort_by(|a, b| b.match_score.total_cmp(&a.match_score));
        (admitted, stats)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchRunRecord {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: String,
    pub keywords: Vec<String>,
    pub failed_sources: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncRunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub enabled_sources: usize,
    pub failed_sources: Vec<String>,
    pub fetched_leads: usize,
    pub ranked_leads: usize,
    pub stats: AggregateStats,
    pub reports_dir: String,
    pub manifest: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportManifest {
    pub schema_version: u32,
    pub files: Vec<ReportManifestFile>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportManifestFile {
    pub name: String,
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
}

pub fn source_for(config: &SyncConfig, source: &SourceConfig) -> Option<Box<dyn LeadSource>> {
    match source.mode.as_str() {
        "fixture" => Some(Box::new(FixtureLeadSource::new(
            source.source_id.clone(),
            config
                .workspace_root
                .join("fixtures")
                .join(&source.source_id)
                .join("sample")
                .join("bundle.json"),
        ))),
        "manual" => {
            let path = config
                .workspace_root
                .join("manual")
                .join(&source.source_id)
                .join("leads.json");
            match StaticLeadSource::from_json_file(source.source_id.clone(), &path) {
                Ok(s) => Some(Box::new(s)),
                Err(err) => {
                    warn!(source = %source.source_id, error = %err, "manual leads unreadable");
                    None
                }
            }
        }
        _ => None,
    }
}

/// Fetch from `source`, naming it on every lead that carries no source of its own.
pub async fn fetch_labelled(source: &dyn LeadSource, ctx: &SourceContext) -> Result<Vec<JobLead>, SourceError> {
    let mut leads = source.fetch_leads(ctx).await?;
    for lead in leads.iter_mut().filter(|lead| lead.source.is_empty()) {
        lead.source = source.source_id().to_string();
    }
    Ok(leads)
}

pub struct LeadPipeline {
    config: SyncConfig,
    aggregator: LeadAggregator,
}

impl LeadPipeline {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            aggregator: LeadAggregator,
        }
    }

    pub async fn run_once(&self) -> Result<SyncRunSummary> {
        let started_at = Utc::now();
        let run_id = Uuid::new_v4();
        self.run_with_id(run_id, started_at)
            .instrument(info_span!("lead_sync", %run_id))
            .await
    }

    async fn run_with_id(&self, run_id: Uuid, started_at: DateTime<Utc>) -> Result<SyncRunSummary> {
        let registry = self.load_source_registry().await?;
        let keywords = self
            .config
            .keywords
            .clone()
            .unwrap_or_else(|| registry.keywords.clone());
        let enabled_sources: Vec<_> = registry.sources.into_iter().filter(|s| s.enabled).collect();
        let ctx = SourceContext {
            run_id,
            fetched_at: started_at,
            keywords: keywords.clone(),
        };

        let mut lead_lists = Vec::with_capacity(enabled_sources.len());
        let mut failed_sources = Vec::new();
        for (i, source) in enabled_sources.iter().enumerate() {
            if i > 0 && !self.config.source_delay.is_zero() {
                tokio::time::sleep(self.config.source_delay).await;
            }
            let Some(lead_source) = source_for(&self.config, source) else {
                warn!(source = %source.source_id, mode = %source.mode, "no lead source for registry entry");
                failed_sources.push(source.source_id.clone());
                continue;
            };
            match fetch_labelled(lead_source.as_ref(), &ctx).await {
                Ok(leads) => {
                    info!(source = %lead_source.source_id(), leads = leads.len(), "fetched leads");
                    lead_lists.push(leads);
                }
                Err(err) => {
                    warn!(source = %lead_source.source_id(), error = %err, "lead source failed");
                    failed_sources.push(source.source_id.clone());
                }
            }
        }

        let fetched_leads: usize = lead_lists.iter().map(Vec::len).sum();
        let (ranked, stats) = self.aggregator.aggregate_with_stats(lead_lists);
        let finished_at = Utc::now();

        let fetch_run = FetchRunRecord {
            run_id,
            started_at,
            finished_at,
            status: (if failed_sources.is_empty() { "completed" } else { "partial" }).to_string(),
            keywords,
            failed_sources: failed_sources.clone(),
        };
        let reports_dir = self.write_reports(&fetch_run, &enabled_sources, &ranked, stats).await?;
        let manifest_path = write_manifest(&reports_dir).await?;

        Ok(SyncRunSummary {
            run_id,
            started_at,
            finished_at,
            enabled_sources: enabled_sources.len(),
            failed_sources,
            fetched_leads,
            ranked_leads: ranked.len(),
            stats,
            reports_dir: reports_dir.display().to_string(),
            manifest: manifest_path.display().to_string(),
        })
    }

    async fn load_source_registry(&self) -> Result<SourceRegistry> {
        let path = self.config.workspace_root.join("sources.yaml");
        let text = fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    async fn write_reports(
        &self,
        fetch_run: &FetchRunRecord,
        enabled_sources: &[SourceConfig],
        ranked: &[JobLead],
        stats: AggregateStats,
    ) -> Result<PathBuf> {
        let reports_dir = self.config.reports_dir.join(fetch_run.run_id.to_string());
        fs::create_dir_all(&reports_dir)
            .await
            .with_context(|| format!("creating {}", reports_dir.display()))?;

        let mut source_counts: BTreeMap<&str, usize> = BTreeMap::new();
        for lead in ranked {
            *source_counts.entry(lead.source.as_str()).or_default() += 1;
        }

        let top = ranked
            .iter()
            .take(10)
            .map(|l| {
                let url = if l.url.is_empty() { "(no link)" } else { l.url.as_str() };
                format!("- {:.2} {} @ {} <{}>", l.match_score, l.title, l.company, url)
            })
            .collect::<Vec<_>>()
            .join("\n");
        let brief = format!(
            "# Lead Brief\n\n- Run ID: `{}`\n- Started: {}\n- Finished: {}\n- Enabled sources: {}\n- Failed sources: {}\n- Keywords: {}\n- Leads in: {}\n- Duplicates dropped: {}\n- Ranked leads: {}\n\n## Source Counts\n{}\n\n## Top Leads\n{}\n",
            fetch_run.run_id,
            fetch_run.started_at,
            fetch_run.finished_at,
            enabled_sources.len(),
            fetch_run.failed_sources.len(),
            fetch_run.keywords.join(", "),
            stats.input_leads,
            stats.duplicates_dropped,
            ranked.len(),
            source_counts
                .iter()
                .map(|(k, v)| format!("- {}: {}", k, v))
                .collect::<Vec<_>>()
                .join("\n"),
            top
        );
        fs::write(reports_dir.join("brief.md"), brief)
            .await
            .context("writing brief.md")?;

        let leads_json = serde_json::to_vec_pretty(&serde_json::json!({
            "fetch_run": fetch_run,
            "stats": stats,
            "leads": ranked,
        }))
        .context("serializing ranked leads")?;
        fs::write(reports_dir.join("leads.json"), leads_json)
            .await
            .context("writing leads.json")?;

        Ok(reports_dir)
    }
}

async fn write_manifest(reports_dir: &Path) -> Result<PathBuf> {
    let mut files = Vec::new();
    for name in ["leads.json", "brief.md"] {
        let path = reports_dir.join(name);
        let bytes = fs::read(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        files.push(ReportManifestFile {
            name: name.trim_end_matches(".json").trim_end_matches(".md").to_string(),
            path: name.to_string(),
            sha256: hex::encode(hasher.finalize()),
            bytes: bytes.len() as u64,
        });
    }
    let manifest = ReportManifest {
        schema_version: 1,
        files,
    };
    let manifest_path = reports_dir.join("manifest.json");
    let bytes = serde_json::to_vec_pretty(&manifest).context("serializing report manifest")?;
    fs::write(&manifest_path, bytes)
        .await
        .with_context(|| format!("writing {}", manifest_path.display()))?;
    Ok(manifest_path)
}

pub async fn run_sync_once_from_env() -> Result<SyncRunSummary> {
    LeadPipeline::new(SyncConfig::from_env()).run_once().await
}

/// Markdown overview of the most recent `runs` report directories.
pub fn report_recent_runs_markdown(runs: usize, reports_root: &Path) -> Result<String> {
    let mut dirs = std::fs::read_dir(reports_root)
        .with_context(|| format!("reading {}", reports_root.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false))
        .collect::<Vec<_>>();
    dirs.sort_by_key(|e| e.metadata().and_then(|m| m.modified()).ok());
    dirs.reverse();

    let mut lines = vec!["# Lead Runs".to_string(), String::new()];
    for dir in dirs.into_iter().take(runs.max(1)) {
        let run_id = dir.file_name().to_string_lossy().to_string();
        let leads_path = dir.path().join("leads.json");
        let value: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(&leads_path)
                .with_context(|| format!("reading {}", leads_path.display()))?,
        )
        .with_context(|| format!("parsing {}", leads_path.display()))?;
        let count = value
            .get("leads")
            .and_then(|v| v.as_array())
            .map(|a| a.len())
            .unwrap_or(0);
        let status = value
            .get("fetch_run")
            .and_then(|v| v.get("status"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");

        lines.push(format!("## Run `{run_id}`"));
        lines.push(format!("- status: {status}"));
        lines.push(format!("- leads: {count}"));
        lines.push(format!("- leads file: `{}`", leads_path.display()));
        lines.push(String::new());
    }
    Ok(lines.join("\n"))
}

/// Everything an email writer needs about one job: the job itself, how the
/// portfolio covers it, and the nearest portfolio links.
#[derive(Debug, Clone, Serialize)]
pub struct OutreachBrief {
    pub job: JobRequirement,
    pub match_result: MatchResult,
    pub suggested_links: Vec<LinkRecord>,
}

pub fn prepare_outreach(matcher: &PortfolioMatcher, job: JobRequirement) -> Result<OutreachBrief, LinkStoreError> {
    let match_result = matcher.match_skills(&job.skills);
    let suggested_links = if job.skills.is_empty() {
        Vec::new()
    } else {
        matcher.query_links_for_skills(&job.skills)?
    };
    Ok(OutreachBrief {
        job,
        match_result,
        suggested_links,
    })
}

/// Load the portfolio and category table named by `config` into a matcher.
pub fn load_matcher(config: &SyncConfig) -> Result<PortfolioMatcher> {
    let entries = load_portfolio(&config.portfolio_path)
        .with_context(|| format!("loading portfolio {}", config.portfolio_path.display()))?;
    let classifier = SkillClassifier::load_or_default(&config.category_rules_path)?;
    let store = InMemoryLinkStore::new();
    store
        .load_portfolio(&entries)
        .context("indexing portfolio links")?;
    info!(projects = entries.len(), "portfolio ready");
    Ok(PortfolioMatcher::new(
        SkillCatalog::new(entries),
        classifier,
        Arc::new(store),
    ))
}
