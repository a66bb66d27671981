//! HTTP routes for the auth service.
//!
//! Routes are organized by functionality:
//! - `health`: health check and build info
//! - `discovery`: JWKS publication
//! - `session`: game session lifecycle (new/refresh/child/authorize/delete)
//! - `server_join`: grant-to-access-token exchange
//! - `account`: ambient account surface

use actix_web::{HttpRequest, HttpResponse};

pub mod account;
pub mod discovery;
pub mod health;
pub mod server_join;
pub mod session;

pub use health::{build_info, health};

/// Extract a bearer token from the `Authorization` header, if present.
pub(crate) fn extract_bearer(req: &HttpRequest) -> Option<String> {
    let value = req.headers().get("authorization")?.to_str().ok()?;
    value.strip_prefix("Bearer ").map(|s| s.to_string())
}

/// The request's `Host` header, or empty string if missing/malformed.
pub(crate) fn host_header(req: &HttpRequest) -> String {
    req.headers()
        .get("host")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

/// `307` response redirecting to the bearer token's own issuer, used when
/// a presented token's `iss` host disagrees with the request's `Host`.
pub(crate) fn issuer_redirect(bearer_iss: &str, path: &str) -> HttpResponse {
    HttpResponse::TemporaryRedirect()
        .append_header(("Location", format!("{bearer_iss}{path}")))
        .finish()
}

/// Wire every route module onto the given service config.
pub fn configure(cfg: &mut actix_web::web::ServiceConfig) {
    health::configure(cfg);
    discovery::configure(cfg);
    session::configure(cfg);
    server_join::configure(cfg);
    account::configure(cfg);
}
