use actix_web::http::header;
use actix_web::{web, HttpResponse, Responder};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::oneshot;
use utoipa::ToSchema;

use crate::engine::EngineStatus;
use crate::report::{RenderError, RenderOptions, ReportRenderer};
use crate::ErrorResponse;

const DEFAULT_DOWNLOAD_NAME: &str = "report";

pub struct ApiState {
    pub renderer: ReportRenderer,
    /// Upper bound on a whole render request.
    pub request_timeout: Duration,
}

impl ApiState {
    pub fn new(renderer: ReportRenderer, request_timeout: Duration) -> Self {
        Self {
            renderer,
            request_timeout,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    #[schema(value_type = String, example = "ready")]
    pub engine: EngineStatus,
}

fn error_response(err: &RenderError) -> HttpResponse {
    let body = ErrorResponse::new(err.kind(), &err.to_string());
    match err {
        RenderError::Validation(_) | RenderError::Template(_) => {
            HttpResponse::BadRequest().json(body)
        }
        RenderError::EngineStart(_) | RenderError::Session(_) => {
            HttpResponse::ServiceUnavailable().json(body)
        }
        RenderError::RenderConfig(_) | RenderError::Export(_) => {
            HttpResponse::InternalServerError().json(body)
        }
    }
}

fn download_name(name: Option<&str>) -> String {
    let sanitized = sanitize_filename::sanitize(name.unwrap_or_default().trim());
    let stem = sanitized.trim_end_matches(".pdf");
    if stem.is_empty() {
        DEFAULT_DOWNLOAD_NAME.to_string()
    } else {
        stem.to_string()
    }
}

#[utoipa::path(
    post,
    path = "/api/reports",
    tag = "Reports",
    request_body = RenderOptions,
    responses(
        (status = 200, description = "Rendered PDF document", content_type = "application/pdf"),
        (status = 400, description = "Missing or malformed template", body = ErrorResponse),
        (status = 503, description = "Rendering engine unavailable or request timed out", body = ErrorResponse)
    )
)]
pub async fn render_report(
    state: web::Data<ApiState>,
    body: web::Json<RenderOptions>,
) -> impl Responder {
    let options = body.into_inner();
    let filename = download_name(options.name.as_deref());

    let (tx, rx) = oneshot::channel();
    state.renderer.render_document(options, move |result| {
        // The receiver is gone once the request timed out; nobody will collect the file.
        if let Err(Ok(report)) = tx.send(result) {
            log::warn!(
                "Discarding {} rendered after the request timed out",
                report.path.display()
            );
            if let Err(e) = std::fs::remove_file(&report.path) {
                log::warn!("Failed to remove {}: {}", report.path.display(), e);
            }
        }
    });

    let report = match tokio::time::timeout(state.request_timeout, rx).await {
        Ok(Ok(Ok(report))) => report,
        Ok(Ok(Err(e))) => return error_response(&e),
        Ok(Err(_)) => {
            log::error!("Render task ended without reporting a result");
            return HttpResponse::InternalServerError()
                .json(ErrorResponse::internal_error("Render task ended unexpectedly"));
        }
        Err(_) => {
            log::error!("Render request timed out after {:?}", state.request_timeout);
            return HttpResponse::ServiceUnavailable()
                .json(ErrorResponse::new("Timeout", "Request timeout"));
        }
    };

    let bytes = match tokio::fs::read(&report.path).await {
        Ok(bytes) => bytes,
        Err(e) => {
            log::error!("Failed to read {}: {}", report.path.display(), e);
            return HttpResponse::InternalServerError()
                .json(ErrorResponse::internal_error("Failed to read rendered document"));
        }
    };
    if let Err(e) = tokio::fs::remove_file(&report.path).await {
        log::warn!("Failed to remove {}: {}", report.path.display(), e);
    }

    HttpResponse::Ok()
        .content_type("application/pdf")
        .insert_header((
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}.pdf\"", filename),
        ))
        .body(bytes)
}

#[utoipa::path(
    get,
    path = "/api/health",
    tag = "Reports",
    responses(
        (status = 200, description = "Rendering engine state", body = HealthResponse)
    )
)]
pub async fn health(state: web::Data<ApiState>) -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        engine: state.renderer.engine().status(),
    })
}

/// Register report routes (mounted under `/api`).
pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/reports").route(web::post().to(render_report)))
        .service(web::resource("/health").route(web::get().to(health)));
}
