use actix_web::middleware::{Compress, Logger};
use actix_web::{web, App, HttpServer};
use actix_web_prometheus::PrometheusMetricsBuilder;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

pub mod api;
pub mod config;
pub mod engine;
pub mod report;

use crate::api::ApiState;
use crate::config::RendererConfig;
use crate::engine::{EngineManager, ProcessLauncher};
use crate::report::ReportRenderer;

/// Largest accepted JSON body; templates with inline assets get big.
const JSON_BODY_LIMIT: usize = 10 * 1024 * 1024;

#[derive(Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(error_type: &str, message: &str) -> Self {
        Self {
            error: error_type.to_string(),
            message: message.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn bad_request(message: &str) -> Self {
        Self::new("BadRequest", message)
    }

    pub fn internal_error(message: &str) -> Self {
        Self::new("InternalServerError", message)
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(crate::api::handlers::render_report, crate::api::handlers::health),
    components(schemas(
        report::RenderOptions,
        report::TemplateOptions,
        report::Orientation,
        report::PageFormat,
        api::HealthResponse,
        ErrorResponse,
    )),
    tags((name = "Reports", description = "Template to PDF rendering."))
)]
pub struct ApiDoc;

/// Build the shared state the HTTP layer runs on.
pub fn build_state(config: &RendererConfig) -> web::Data<ApiState> {
    let launcher = Arc::new(ProcessLauncher::new(config.engine.clone()));
    let engine = Arc::new(EngineManager::new(launcher));
    let renderer = ReportRenderer::new(config, engine);
    web::Data::new(ApiState::new(renderer, config.request_timeout))
}

pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(JSON_BODY_LIMIT)
        .error_handler(|err, _req| {
            let message = err.to_string();
            actix_web::error::InternalError::from_response(
                err,
                actix_web::HttpResponse::BadRequest().json(ErrorResponse::bad_request(&message)),
            )
            .into()
        })
}

pub async fn run() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = RendererConfig::from_env()?;
    let app_state = build_state(&config);

    let prometheus = PrometheusMetricsBuilder::new("report_renderer_server")
        .endpoint("/metrics")
        .build()
        .map_err(|e| anyhow::anyhow!("failed to create Prometheus metrics middleware: {:?}", e))?;

    log::info!(
        "Starting server at http://{}:{} (reports in {})",
        config.host,
        config.port,
        config.temp_dir.display()
    );

    HttpServer::new(move || {
        App::new()
            .wrap(Compress::default())
            .wrap(Logger::default())
            .wrap(prometheus.clone())
            .app_data(app_state.clone())
            .app_data(json_config())
            .service(web::scope("/api").configure(api::config))
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-doc/openapi.json", ApiDoc::openapi()),
            )
    })
    .keep_alive(actix_web::http::KeepAlive::Os)
    .bind((config.host.as_str(), config.port))?
    .run()
    .await?;

    Ok(())
}
