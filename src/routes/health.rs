//! Health check and build info endpoints.
//!
//! Public, unauthenticated, used by load balancers and deployment tooling.

use actix_web::{HttpResponse, web};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

/// Health check response.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct HealthResponse {
    pub status: String,
}

/// Build information response.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BuildInfoResponse {
    pub service: String,
    pub version: String,
    pub git_sha: String,
    pub build_time: String,
}

/// GET /health
#[tracing::instrument(skip(_state))]
pub async fn health(_state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
    })
}

/// GET /build-info
#[tracing::instrument(skip(_state))]
pub async fn build_info(_state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(BuildInfoResponse {
        service: "auth-service".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        git_sha: env!("GIT_SHA").to_string(),
        build_time: env!("BUILD_TIME").to_string(),
    })
}

/// Configure health routes on the given scope.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/build-info", web::get().to(build_info));
}
