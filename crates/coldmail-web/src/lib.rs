//! Axum JSON API over the portfolio matcher and lead aggregator.

use std::path::Path;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use coldmail_core::{JobLead, JobRequirement};
use coldmail_leads::score_leads;
use coldmail_portfolio::{LinkStoreError, PortfolioMatcher};
use coldmail_sync::{load_matcher, prepare_outreach, AggregateStats, LeadAggregator, SyncConfig};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "coldmail-web";

const DEFAULT_TOP_SKILLS: usize = 10;
const DEFAULT_RUN_LIMIT: usize = 20;

#[derive(Clone)]
pub struct AppState {
    pub matcher: Arc<PortfolioMatcher>,
    pub config: SyncConfig,
}

impl AppState {
    pub fn new(matcher: PortfolioMatcher, config: SyncConfig) -> Self {
        Self {
            matcher: Arc::new(matcher),
            config,
        }
    }

    pub fn from_config(config: SyncConfig) -> anyhow::Result<Self> {
        Ok(Self::new(load_matcher(&config)?, config))
    }
}

#[derive(Debug, Deserialize, Default)]
struct TopSkillsQuery {
    n: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct ReportsQuery {
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct AggregateRequest {
    pub sources: Vec<Vec<JobLead>>,
    /// Rescore every lead against these keywords before merging.
    #[serde(default)]
    pub keywords: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct AggregateResponse {
    pub leads: Vec<JobLead>,
    pub stats: AggregateStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReportRow {
    pub run_id: String,
    pub status: String,
    pub leads: usize,
    pub has_manifest: bool,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/portfolio/summary", get(summary_handler))
        .route("/portfolio/skills", get(skills_handler))
        .route("/portfolio/skills/top", get(top_skills_handler))
        .route("/portfolio/categories", get(categories_handler))
        .route("/match", post(match_handler))
        .route("/leads/aggregate", post(aggregate_handler))
        .route("/reports", get(reports_handler))
        .with_state(Arc::new(state))
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let port: u16 = std::env::var("COLDMAIL_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let state = AppState::from_config(SyncConfig::from_env())?;
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "serving coldmail api");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn summary_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(state.matcher.portfolio_summary()).into_response()
}

async fn skills_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(state.matcher.extract_all_skills()).into_response()
}

async fn top_skills_handler(State(state): State<Arc<AppState>>, Query(query): Query<TopSkillsQuery>) -> Response {
    Json(state.matcher.top_skills(query.n.unwrap_or(DEFAULT_TOP_SKILLS))).into_response()
}

async fn categories_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(state.matcher.categorize()).into_response()
}

async fn match_handler(State(state): State<Arc<AppState>>, Json(job): Json<JobRequirement>) -> Response {
    match prepare_outreach(&state.matcher, job) {
        Ok(brief) => Json(brief).into_response(),
        Err(err) => link_store_error(err),
    }
}

async fn aggregate_handler(Json(mut request): Json<AggregateRequest>) -> Response {
    if let Some(keywords) = &request.keywords {
        for leads in &mut request.sources {
            score_leads(keywords.as_slice(), leads);
        }
    }
    let (leads, stats) = LeadAggregator.aggregate_with_stats(request.sources);
    Json(AggregateResponse { leads, stats }).into_response()
}

async fn reports_handler(State(state): State<Arc<AppState>>, Query(query): Query<ReportsQuery>) -> Response {
    match load_runs(&state.config.reports_dir, query.limit.unwrap_or(DEFAULT_RUN_LIMIT)) {
        Ok(runs) => Json(runs).into_response(),
        Err(err) => server_error(err),
    }
}

fn link_store_error(err: LinkStoreError) -> Response {
    warn!(error = %err, "link lookup failed");
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(serde_json::json!({ "error": err.to_string() })),
    )
        .into_response()
}

fn server_error(err: anyhow::Error) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": format!("{err:#}") })),
    )
        .into_response()
}

fn load_runs(reports_root: &Path, limit: usize) -> anyhow::Result<Vec<RunReportRow>> {
    if !reports_root.exists() {
        return Ok(vec![]);
    }
    let mut entries = std::fs::read_dir(reports_root)?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|ft| ft.is_dir()).unwrap_or(false))
        .collect::<Vec<_>>();
    entries.sort_by_key(|e| e.metadata().and_then(|m| m.modified()).ok());
    entries.reverse();

    let mut runs = Vec::new();
    for e in entries.into_iter().take(limit) {
        let leads_path = e.path().join("leads.json");
        let (status, leads) = if leads_path.exists() {
            let v: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&leads_path)?)?;
            (
                v.pointer("/fetch_run/status")
                    .and_then(|s| s.as_str())
                    .unwrap_or("unknown")
                    .to_string(),
                v.get("leads").and_then(|l| l.as_array()).map(|a| a.len()).unwrap_or(0),
            )
        } else {
            ("unknown".to_string(), 0)
        };
        runs.push(RunReportRow {
            run_id: e.file_name().to_string_lossy().to_string(),
            status,
            leads,
            has_manifest: e.path().join("manifest.json").exists(),
        });
    }
    Ok(runs)
}
