#![deny(unsafe_code)]

//! `echopipe-orchestrator`: the daemon that owns the control plane and
//! exposes it over the HTTP Adapter.

use std::{env, net::SocketAddr, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use echopipe_common::{
    control_plane::{ControlPlane, Status},
    echopipe_common_version,
    metrics::Summary,
    models::{FileMetric, MetricStatus},
    prelude::*,
    rest_api::{SearchMetricsQuery, SettingsPatch, StatusMetricsQuery},
    settings::Settings,
    storage::{local::LocalBackend, s3::S3Backend, BucketBackend},
    tracing_support::initialize_tracing,
};

mod util;

use crate::util::{AppState, EchopipeResult};

/// Build the bucket backend named by `STORAGE_BACKEND` (`local`, the
/// default, or `s3`). The local backend roots every bucket under
/// `LOCAL_STORAGE_ROOT` (default `./data`); the S3 backend reads
/// `AWS_S3_BUCKET` and the usual AWS credential chain.
async fn build_backend() -> Result<Box<dyn BucketBackend>> {
    match env_or("STORAGE_BACKEND", "local").as_str() {
        "s3" => {
            let bucket = env::var("AWS_S3_BUCKET")
                .context("AWS_S3_BUCKET must be set for STORAGE_BACKEND=s3")?;
            Ok(Box::new(S3Backend::new(bucket).await?))
        }
        "local" => Ok(Box::new(LocalBackend::new(env_or(
            "LOCAL_STORAGE_ROOT",
            "./data",
        )))),
        other => Err(format_err!(
            "unknown STORAGE_BACKEND {other:?}, expected \"local\" or \"s3\""
        )),
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Report the `echopipe_common` version this binary was built against.
async fn version() -> String {
    echopipe_common_version().to_string()
}

async fn get_status(State(state): State<AppState>) -> Json<Status> {
    Json(state.control_plane.get_status().await)
}

async fn get_config(State(state): State<AppState>) -> Json<Settings> {
    Json(state.control_plane.get_config().await)
}

async fn patch_config(
    State(state): State<AppState>,
    Json(patch): Json<SettingsPatch>,
) -> EchopipeResult<Json<Settings>> {
    let current = state.control_plane.get_config().await;
    let merged = patch.apply_to(&current);
    state.control_plane.update_config(merged.clone()).await?;
    Ok(Json(merged))
}

async fn post_start(State(state): State<AppState>) -> EchopipeResult<()> {
    state.control_plane.start().await?;
    Ok(())
}

async fn post_stop(State(state): State<AppState>) -> EchopipeResult<()> {
    state.control_plane.stop().await?;
    Ok(())
}

async fn post_pause(State(state): State<AppState>) {
    state.control_plane.pause().await;
}

async fn post_resume(State(state): State<AppState>) {
    state.control_plane.resume().await;
}

async fn post_restart(State(state): State<AppState>) -> EchopipeResult<()> {
    state.control_plane.restart().await?;
    Ok(())
}

async fn post_restart_worker_pool(State(state): State<AppState>) -> EchopipeResult<()> {
    state.control_plane.restart_worker_pool().await?;
    Ok(())
}

async fn metrics_summary(State(state): State<AppState>) -> Json<Summary> {
    Json(state.control_plane.metrics().summary().await)
}

async fn metrics_day(State(state): State<AppState>, Path(date): Path<String>) -> Json<Vec<FileMetric>> {
    Json(state.control_plane.metrics().files_by_date(&date).await)
}

/// `GET /metrics/recent/:days`. The collector groups its history by day;
/// flatten the trailing buckets into one list, most recent day first, for
/// callers that just want the last N days of records.
async fn metrics_recent(State(state): State<AppState>, Path(days): Path<u32>) -> Json<Vec<FileMetric>> {
    let buckets = state.control_plane.metrics().last_n_days(days).await;
    let files = buckets.into_iter().flat_map(|(_, bucket)| bucket.files).collect();
    Json(files)
}

fn parse_metric_status(raw: &str) -> Option<MetricStatus> {
    match raw {
        "success" => Some(MetricStatus::Success),
        "failed" => Some(MetricStatus::Failed),
        _ => None,
    }
}

async fn metrics_status(
    State(state): State<AppState>,
    Path(status): Path<String>,
    Query(query): Query<StatusMetricsQuery>,
) -> EchopipeResult<Json<Vec<FileMetric>>> {
    let status = parse_metric_status(&status)
        .ok_or_else(|| format_err!("unknown status {status:?}, expected \"success\" or \"failed\""))?;
    let files = state
        .control_plane
        .metrics()
        .files_by_status(status, query.date.as_deref())
        .await;
    Ok(Json(files))
}

async fn metrics_search(
    State(state): State<AppState>,
    Query(query): Query<SearchMetricsQuery>,
) -> Json<Vec<FileMetric>> {
    Json(state.control_plane.metrics().search_files(&query.q).await)
}

async fn metrics_file(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<FileMetric>, axum::http::StatusCode> {
    state
        .control_plane
        .metrics()
        .file_info(&name)
        .await
        .map(Json)
        .ok_or(axum::http::StatusCode::NOT_FOUND)
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/version", get(version))
        .route("/status", get(get_status))
        .route("/config", get(get_config).patch(patch_config))
        .route("/start", post(post_start))
        .route("/stop", post(post_stop))
        .route("/pause", post(post_pause))
        .route("/resume", post(post_resume))
        .route("/restart", post(post_restart))
        .route("/restart-worker-pool", post(post_restart_worker_pool))
        .route("/metrics/summary", get(metrics_summary))
        .route("/metrics/day/:date", get(metrics_day))
        .route("/metrics/recent/:days", get(metrics_recent))
        .route("/metrics/status/:status", get(metrics_status))
        .route("/metrics/search", get(metrics_search))
        .route("/metrics/file/:name", get(metrics_file))
        .with_state(state)
}

/// Wait for SIGINT/SIGTERM, then drain the pipeline before the process
/// exits so no in-flight object is left half-delivered.
async fn shutdown_signal(control_plane: Arc<ControlPlane>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutting down, draining worker pool");
    if let Err(err) = control_plane.stop().await {
        error!("{:?}", err);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    initialize_tracing();

    let settings = Settings::load_from_env()?;
    let backend = build_backend().await?;
    let control_plane = Arc::new(ControlPlane::new(settings, backend).await?);
    control_plane.start().await?;

    let addr: SocketAddr = env_or("BIND_ADDR", "0.0.0.0:8080")
        .parse()
        .context("BIND_ADDR must be a valid socket address")?;
    info!(%addr, version = echopipe_common_version(), "starting echopipe-orchestrator");

    let app = router(AppState {
        control_plane: control_plane.clone(),
    });

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal(control_plane))
        .await
        .context("server error")?;

    Ok(())
}
