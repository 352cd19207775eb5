// HTTP request handlers for API endpoints

use actix_web::{http::StatusCode, web, HttpResponse, Result};
use tracing::{info, warn};

use crate::api::models::*;
use crate::api::server::AppState;
use crate::database_ops::chzzk::client::VideoRecord;
use crate::error::JobError;
use crate::orchestrator::{run_job, JobKind, JobParams};

/// Health check endpoint
pub async fn health_check(state: web::Data<AppState>) -> Result<HttpResponse> {
    let database = match &state.reader {
        Some(store) if store.ping().await => "connected",
        Some(_) => "disconnected",
        None => "not_configured",
    };

    let response = ApiResponse::success(HealthResponse {
        status: "healthy".to_string(),
        database: database.to_string(),
        write_access: state.writer.is_some(),
        uptime_seconds: state.started.elapsed().as_secs(),
    });

    Ok(HttpResponse::Ok().json(response))
}

async fn run_cron(state: &AppState, slug: &str, params: JobParams) -> HttpResponse {
    let Some(kind) = JobKind::from_slug(slug) else {
        return HttpResponse::NotFound().json(ApiResponse::<()>::error(format!("unknown job: {slug}")));
    };
    let Some(ctx) = state.job_context() else {
        let err = JobError::config("DATABASE_SERVICE_URL is not configured");
        warn!(job = kind.as_str(), error = %err, "cron job refused");
        return HttpResponse::InternalServerError().json(ApiResponse::<()>::error(err.to_string()));
    };
    match run_job(kind, &ctx, &params).await {
        Ok(summary) => HttpResponse::Ok().json(ApiResponse::success(summary)),
        Err(err) => {
            warn!(job = kind.as_str(), error = %err, "cron job failed");
            let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            HttpResponse::build(status).json(ApiResponse::<()>::error(err.to_string()))
        }
    }
}

/// Scheduler trigger with tuning knobs in the query string
pub async fn run_cron_get(
    path: web::Path<String>,
    query: web::Query<JobParams>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    Ok(run_cron(&state, &path.into_inner(), query.into_inner()).await)
}

/// Same as GET; a JSON body, when present, replaces the query parameters
pub async fn run_cron_post(
    path: web::Path<String>,
    query: web::Query<JobParams>,
    body: Option<web::Json<JobParams>>,
    state: web::Data<AppState>,
) -> Result<HttpResponse> {
    let params = body.map(web::Json::into_inner).unwrap_or_else(|| query.into_inner());
    Ok(run_cron(&state, &path.into_inner(), params).await)
}

async fn cached_videos(state: &AppState, q: &VideoQuery, size: usize) -> Vec<VideoRecord> {
    let Some(reader) = &state.reader else {
        return Vec::new();
    };
    match reader.videos_by_category(&q.category_id, size, q.offset).await {
        Ok(rows) => rows,
        Err(err) => {
            warn!(category_id = %q.category_id, error = %err, "videos: cache read failed");
            Vec::new()
        }
    }
}

/// Cached VOD listing for a category, filled from the platform when empty
pub async fn list_videos(query: web::Query<VideoQuery>, state: web::Data<AppState>) -> Result<HttpResponse> {
    let q = query.into_inner();
    let size = q.size.clamp(1, MAX_VIDEO_PAGE);

    let cached = cached_videos(&state, &q, size).await;
    if !cached.is_empty() {
        return Ok(HttpResponse::Ok().json(ApiResponse::success(cached)));
    }

    let live = state
        .sources
        .chzzk
        .videos_by_category(&q.category_id, size, q.offset)
        .await;
    if !live.is_empty() {
        if let Some(writer) = &state.writer {
            match writer.upsert_videos(&live).await {
                Ok(n) => info!(category_id = %q.category_id, written = n, "videos: cache filled"),
                Err(err) => warn!(category_id = %q.category_id, error = %err, "videos: cache write failed"),
            }
        }
    }
    Ok(HttpResponse::Ok().json(ApiResponse::success(live)))
}
