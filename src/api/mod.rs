mod market;

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, anyhow};
use axum::{
    Router,
    extract::Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::core::{
    AssetProfile, CorrelationPair, MarketModel, SimError, SimulationConfig, SweepControl,
    TemporalModel, allocation_grid, describe_correlations, run_sharpe_analysis,
    run_simulation_analysis,
};

pub use market::{AssetConfig, MarketConfig, default_market_config, parse_candidates};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum CliTemporalModel {
    YearByYear,
    SingleHorizon,
}

impl From<CliTemporalModel> for TemporalModel {
    fn from(value: CliTemporalModel) -> Self {
        match value {
            CliTemporalModel::YearByYear => TemporalModel::YearByYear,
            CliTemporalModel::SingleHorizon => TemporalModel::SingleHorizon,
        }
    }
}

impl From<TemporalModel> for CliTemporalModel {
    fn from(value: TemporalModel) -> Self {
        match value {
            TemporalModel::YearByYear => CliTemporalModel::YearByYear,
            TemporalModel::SingleHorizon => CliTemporalModel::SingleHorizon,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "allocsim",
    about = "Correlated Monte Carlo portfolio simulator with allocation sweep and Sharpe ranking"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Simulate terminal-value distributions for every candidate allocation
    Simulate(RunArgs),
    /// Rank candidate allocations by closed-form Sharpe ratio
    Sharpe(RunArgs),
    /// Serve the JSON HTTP API
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    #[arg(
        long,
        help = "Market JSON file; defaults to the built-in TS/Wise/ETH market"
    )]
    pub config: Option<PathBuf>,
    #[arg(
        long,
        help = "Candidate weights JSON file in percent; defaults to the allocation grid"
    )]
    pub candidates: Option<PathBuf>,
    #[arg(long, default_value_t = 5, help = "Grid step in percent")]
    pub step: u32,
    #[arg(long, default_value_t = 0, help = "Minimum grid weight in percent")]
    pub min_weight: u32,
    #[arg(long, default_value_t = 100_000.0)]
    pub initial_investment: f64,
    #[arg(long, default_value_t = 10_000)]
    pub simulations: u32,
    #[arg(long, default_value_t = 5)]
    pub horizon_years: u32,
    #[arg(long, value_enum, default_value_t = CliTemporalModel::SingleHorizon)]
    pub model: CliTemporalModel,
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
    #[arg(
        long,
        help = "Risk-free rate in percent; defaults to the first zero-volatility asset's return"
    )]
    pub risk_free_rate: Option<f64>,
    #[arg(
        long,
        value_delimiter = ',',
        help = "Target allocation in percent, e.g. 52,38,10"
    )]
    pub target: Option<Vec<f64>>,
    #[arg(long, default_value_t = false, help = "Skip std-dev and loss probability")]
    pub no_extended_stats: bool,
    #[arg(long, help = "Write the JSON report here instead of stdout")]
    pub output: Option<PathBuf>,
}

// Rates are fractions like `market.riskFreeRate`; weights stay in percent.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RunPayload {
    market: Option<MarketConfig>,
    candidates: Option<Vec<Vec<f64>>>,
    step: Option<u32>,
    min_weight: Option<u32>,
    initial_investment: Option<f64>,
    simulations: Option<u32>,
    horizon_years: Option<u32>,
    model: Option<TemporalModel>,
    seed: Option<u64>,
    risk_free_rate: Option<f64>,
    target: Option<Vec<f64>>,
    extended_stats: Option<bool>,
}

#[derive(Debug)]
struct ApiRequest {
    args: RunArgs,
    market: Option<MarketConfig>,
    risk_free_rate: Option<f64>,
    candidates: Option<Vec<Vec<f64>>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MarketResponse {
    assets: Vec<AssetProfile>,
    correlation: Vec<Vec<f64>>,
    risk_free_rate: f64,
    correlations: Vec<CorrelationPair>,
}

impl From<&MarketModel> for MarketResponse {
    fn from(model: &MarketModel) -> Self {
        Self {
            assets: model.assets().to_vec(),
            correlation: model.correlation().to_vec(),
            risk_free_rate: model.risk_free_rate(),
            correlations: describe_correlations(model),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn build_config(args: &RunArgs) -> Result<SimulationConfig, String> {
    if !args.initial_investment.is_finite() || args.initial_investment <= 0.0 {
        return Err("--initial-investment must be > 0".to_string());
    }

    if args.simulations == 0 {
        return Err("--simulations must be > 0".to_string());
    }

    let temporal_model: TemporalModel = args.model.into();
    if temporal_model == TemporalModel::YearByYear && args.horizon_years == 0 {
        return Err("--horizon-years must be >= 1 with --model year-by-year".to_string());
    }

    Ok(SimulationConfig {
        initial_investment: args.initial_investment,
        num_simulations: args.simulations,
        horizon_years: args.horizon_years,
        temporal_model,
        seed: args.seed,
        extended_stats: !args.no_extended_stats,
    })
}

fn check_grid_args(args: &RunArgs) -> Result<(), String> {
    if args.step == 0 || 100 % args.step != 0 {
        return Err("--step must divide 100".to_string());
    }
    if args.min_weight > 100 || args.min_weight % args.step != 0 {
        return Err("--min-weight must be a multiple of --step between 0 and 100".to_string());
    }
    Ok(())
}

fn target_fractions(args: &RunArgs) -> Result<Option<Vec<f64>>, String> {
    match &args.target {
        None => Ok(None),
        Some(target) => {
            if target.iter().any(|w| !w.is_finite() || *w < 0.0) {
                return Err("--target weights must be finite and >= 0".to_string());
            }
            Ok(Some(target.iter().map(|w| w / 100.0).collect()))
        }
    }
}

fn apply_risk_free_rate(model: MarketModel, args: &RunArgs) -> Result<MarketModel, SimError> {
    match args.risk_free_rate {
        Some(rate) => model.with_risk_free_rate(rate / 100.0),
        None => Ok(model),
    }
}

fn grid_candidates(args: &RunArgs, asset_count: usize) -> Result<Vec<Vec<f64>>, SimError> {
    allocation_grid(asset_count, args.step, args.min_weight)
}

fn default_run_args() -> RunArgs {
    RunArgs {
        config: None,
        candidates: None,
        step: 5,
        min_weight: 0,
        initial_investment: 100_000.0,
        simulations: 10_000,
        horizon_years: 5,
        model: CliTemporalModel::SingleHorizon,
        seed: 42,
        risk_free_rate: None,
        target: None,
        no_extended_stats: false,
        output: None,
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Analysis {
    Simulate,
    Sharpe,
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Simulate(args) => run_cli_analysis(Analysis::Simulate, args).await,
        Command::Sharpe(args) => run_cli_analysis(Analysis::Sharpe, args).await,
        Command::Serve { port } => run_http_server(port)
            .await
            .with_context(|| format!("HTTP server on port {port} failed")),
    }
}

async fn run_cli_analysis(analysis: Analysis, args: RunArgs) -> anyhow::Result<()> {
    let config = build_config(&args).map_err(|e| anyhow!(e))?;
    check_grid_args(&args).map_err(|e| anyhow!(e))?;
    let target = target_fractions(&args).map_err(|e| anyhow!(e))?;

    let market_config = match &args.config {
        Some(path) => load_market_config(path)?,
        None => default_market_config(),
    };
    let market = apply_risk_free_rate(market_config.into_model()?, &args)?;
    info!(
        assets = ?market.asset_names(),
        risk_free_rate = market.risk_free_rate(),
        "market loaded"
    );

    let candidates = match &args.candidates {
        Some(path) => load_candidates(path)?,
        None => grid_candidates(&args, market.asset_count())?,
    };

    let progress = ProgressBar::new(candidates.len() as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("  {msg} [{bar:40}] {pos}/{len} ({eta})")
            .context("invalid progress template")?,
    );
    progress.set_message(match analysis {
        Analysis::Simulate => "simulating",
        Analysis::Sharpe => "ranking",
    });

    let cancel = Arc::new(AtomicBool::new(false));
    let ctrl_c_flag = Arc::clone(&cancel);
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing in-flight candidates");
            ctrl_c_flag.store(true, Ordering::Relaxed);
        }
    });

    let bar = progress.clone();
    let control = SweepControl::new()
        .with_cancel_flag(cancel)
        .with_observer(move |p| bar.set_position(p.processed as u64));

    let report = tokio::task::spawn_blocking(move || -> Result<serde_json::Value, SimError> {
        let value = match analysis {
            Analysis::Simulate => serde_json::to_value(run_simulation_analysis(
                &market,
                config,
                &candidates,
                target,
                &control,
            )?),
            Analysis::Sharpe => {
                serde_json::to_value(run_sharpe_analysis(&market, &candidates, target, &control)?)
            }
        };
        value.map_err(|e| SimError::invalid_config(format!("report serialization failed: {e}")))
    })
    .await
    .context("analysis task panicked")?;

    ctrl_c.abort();
    progress.finish_and_clear();
    let report = report?;

    emit_report(&report, args.output.as_deref())
}

fn load_market_config(path: &Path) -> anyhow::Result<MarketConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read market config {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse market config {}", path.display()))
}

fn load_candidates(path: &Path) -> anyhow::Result<Vec<Vec<f64>>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read candidates {}", path.display()))?;
    parse_candidates(&raw).map_err(|e| anyhow!("{}: {e}", path.display()))
}

fn emit_report(report: &serde_json::Value, output: Option<&Path>) -> anyhow::Result<()> {
    let body = serde_json::to_string_pretty(report).context("failed to encode report")?;
    match output {
        Some(path) => {
            fs::write(path, body)
                .with_context(|| format!("failed to write report {}", path.display()))?;
            info!(path = %path.display(), "report written");
        }
        None => println!("{body}"),
    }
    Ok(())
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = router();

    let listener = TcpListener::bind(addr).await?;
    info!("allocsim HTTP API listening on http://{addr}");

    axum::serve(listener, app).await
}

fn router() -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/market/default", get(default_market_handler))
        .route("/api/sharpe", post(sharpe_handler))
        .route("/api/simulate", post(simulate_handler))
        .fallback(not_found_handler)
}

async fn health_handler() -> Response {
    json_response(StatusCode::OK, serde_json::json!({ "status": "ok" }))
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn default_market_handler() -> Response {
    match default_market_config().into_model() {
        Ok(model) => json_response(StatusCode::OK, MarketResponse::from(&model)),
        Err(err) => sim_error_response(&err),
    }
}

async fn sharpe_handler(Json(payload): Json<RunPayload>) -> Response {
    analysis_handler_impl(Analysis::Sharpe, payload).await
}

async fn simulate_handler(Json(payload): Json<RunPayload>) -> Response {
    analysis_handler_impl(Analysis::Simulate, payload).await
}

async fn analysis_handler_impl(analysis: Analysis, payload: RunPayload) -> Response {
    let request = match api_request_from_payload(payload) {
        Ok(request) => request,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };

    let result = tokio::task::spawn_blocking(move || execute_request(analysis, request)).await;
    match result {
        Ok(Ok(body)) => json_response(StatusCode::OK, body),
        Ok(Err(err)) => sim_error_response(&err),
        Err(err) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            &format!("analysis task failed: {err}"),
        ),
    }
}

fn execute_request(analysis: Analysis, request: ApiRequest) -> Result<serde_json::Value, SimError> {
    let ApiRequest {
        args,
        market,
        risk_free_rate,
        candidates,
    } = request;

    let config = build_config(&args).map_err(SimError::invalid_config)?;
    let target = target_fractions(&args).map_err(SimError::invalid_config)?;
    let model = market.unwrap_or_else(default_market_config).into_model()?;
    let model = match risk_free_rate {
        Some(rate) => model.with_risk_free_rate(rate)?,
        None => model,
    };
    let candidates = match candidates {
        Some(candidates) => candidates,
        None => grid_candidates(&args, model.asset_count())?,
    };

    let control = SweepControl::new().with_observer(|p| {
        debug!(processed = p.processed, total = p.total, "sweep progress");
    });
    let value = match analysis {
        Analysis::Simulate => serde_json::to_value(run_simulation_analysis(
            &model,
            config,
            &candidates,
            target,
            &control,
        )?),
        Analysis::Sharpe => {
            serde_json::to_value(run_sharpe_analysis(&model, &candidates, target, &control)?)
        }
    };
    value.map_err(|e| SimError::invalid_config(format!("report serialization failed: {e}")))
}

fn status_for(err: &SimError) -> StatusCode {
    match err {
        SimError::InvalidConfig { .. } | SimError::InvalidCandidate { .. } => {
            StatusCode::BAD_REQUEST
        }
        SimError::NonPositiveDefinite { .. } | SimError::InsufficientData { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
    }
}

fn sim_error_response(err: &SimError) -> Response {
    error_response(status_for(err), &err.to_string())
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, header::HeaderValue::from_static("no-store"));
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
fn api_request_from_json(json: &str) -> Result<ApiRequest, String> {
    let payload = serde_json::from_str::<RunPayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    api_request_from_payload(payload)
}

fn api_request_from_payload(payload: RunPayload) -> Result<ApiRequest, String> {
    let mut args = default_run_args();

    if let Some(v) = payload.step {
        args.step = v;
    }
    if let Some(v) = payload.min_weight {
        args.min_weight = v;
    }
    if let Some(v) = payload.initial_investment {
        args.initial_investment = v;
    }
    if let Some(v) = payload.simulations {
        args.simulations = v;
    }
    if let Some(v) = payload.horizon_years {
        args.horizon_years = v;
    }
    if let Some(v) = payload.model {
        args.model = v.into();
    }
    if let Some(v) = payload.seed {
        args.seed = v;
    }
    if let Some(v) = payload.extended_stats {
        args.no_extended_stats = !v;
    }
    args.target = payload.target;

    build_config(&args).map_err(to_payload_message)?;
    check_grid_args(&args).map_err(to_payload_message)?;
    target_fractions(&args).map_err(to_payload_message)?;

    if payload.candidates.as_ref().is_some_and(|c| c.is_empty()) {
        return Err("candidates must not be empty".to_string());
    }

    Ok(ApiRequest {
        args,
        market: payload.market,
        risk_free_rate: payload.risk_free_rate,
        candidates: payload.candidates,
    })
}

fn to_payload_message(msg: String) -> String {
    msg.split(' ')
        .map(|word| match word.strip_prefix("--") {
            Some(flag) => kebab_to_camel(flag),
            None => word.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn kebab_to_camel(flag: &str) -> String {
    let mut out = String::with_capacity(flag.len());
    let mut upper = false;
    for c in flag.chars() {
        if c == '-' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}
