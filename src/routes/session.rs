//! `/game-session/*` — identify, refresh, child-session, and authorize
//! transitions of the exchange state machine, plus session deletion.

use actix_web::{HttpRequest, HttpResponse, web};
use serde::{Deserialize, Serialize};

use crate::exchange;
use crate::issuer;
use crate::state::AppState;
use crate::token;
use crate::types::Scopes;

use super::{extract_bearer, host_header, issuer_redirect};

#[derive(Debug, Default, Deserialize)]
pub struct NewSessionRequest {
    pub uuid: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshSessionRequest {
    pub session_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChildSessionRequest {
    pub scopes: Option<Scopes>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeRequest {
    pub identity_token: Option<String>,
    pub audience: String,
    #[serde(default)]
    pub scopes: Option<Scopes>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub identity_token: String,
    pub session_token: String,
    pub expires_at: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizeResponse {
    pub authorization_grant: String,
    pub expires_at: i64,
}

impl From<exchange::TokenPair> for SessionResponse {
    fn from(pair: exchange::TokenPair) -> Self {
        Self {
            identity_token: pair.identity_token,
            session_token: pair.session_token,
            expires_at: pair.expires_at,
        }
    }
}

/// POST /game-session/new
#[tracing::instrument(skip(state, req, body))]
pub async fn new_session(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<NewSessionRequest>,
) -> HttpResponse {
    let issuer_url = issuer::resolve_for_request(&host_header(&req), &state.settings);
    let player_id = body
        .uuid
        .clone()
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    match exchange::new_session(
        &player_id,
        body.username.clone(),
        &issuer_url,
        &state.settings,
        &state.keystore,
        &state.storage,
    ) {
        Ok(pair) => HttpResponse::Ok().json(SessionResponse::from(pair)),
        Err(e) => {
            tracing::warn!(error = %e, "new_session failed");
            actix_web::ResponseError::error_response(&e)
        }
    }
}

/// POST /game-session/refresh
#[tracing::instrument(skip(state, req, body))]
pub async fn refresh_session(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<RefreshSessionRequest>,
) -> HttpResponse {
    let issuer_url = issuer::resolve_for_request(&host_header(&req), &state.settings);
    let presented = body
        .session_token
        .clone()
        .or_else(|| extract_bearer(&req))
        .unwrap_or_default();

    match exchange::refresh_session(
        &presented,
        &issuer_url,
        &state.settings,
        &state.keystore,
        &state.storage,
    ) {
        Ok(pair) => HttpResponse::Ok().json(SessionResponse::from(pair)),
        Err(e) => {
            tracing::warn!(error = %e, "refresh_session failed");
            actix_web::ResponseError::error_response(&e)
        }
    }
}

/// POST /game-session/child
#[tracing::instrument(skip(state, req, body))]
pub async fn child_session(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<ChildSessionRequest>,
) -> HttpResponse {
    let Some(bearer) = extract_bearer(&req) else {
        return HttpResponse::Unauthorized().finish();
    };
    let decoded = match token::decode_unverified(&bearer) {
        Ok(d) => d,
        Err(e) => return actix_web::ResponseError::error_response(&e),
    };

    let host = host_header(&req);
    if issuer::issuer_mismatch(&decoded.claims.iss, &host) {
        return issuer_redirect(&decoded.claims.iss, req.path());
    }

    let issuer_url = issuer::resolve_for_request(&host, &state.settings);
    let scopes = body.scopes.clone().unwrap_or(Scopes::None);

    match exchange::child_session(
        &decoded.claims.sub,
        decoded.claims.display_name.clone(),
        &scopes,
        &issuer_url,
        &state.settings,
        &state.keystore,
        &state.storage,
    ) {
        Ok(pair) => HttpResponse::Ok().json(SessionResponse::from(pair)),
        Err(e) => {
            tracing::warn!(error = %e, "child_session failed");
            actix_web::ResponseError::error_response(&e)
        }
    }
}

/// POST /game-session/authorize
#[tracing::instrument(skip(state, req, body))]
pub async fn authorize(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<AuthorizeRequest>,
) -> HttpResponse {
    let issuer_url = issuer::resolve_for_request(&host_header(&req), &state.settings);
    let identity_token = body.identity_token.clone().or_else(|| extract_bearer(&req));
    let scopes = body.scopes.clone().unwrap_or(Scopes::None);

    match exchange::authorize(
        identity_token.as_deref(),
        &body.audience,
        &scopes,
        &issuer_url,
        &state.settings,
        &state.keystore,
        &state.jwks,
        &state.storage,
    )
    .await
    {
        Ok(grant) => HttpResponse::Ok().json(AuthorizeResponse {
            authorization_grant: grant.authorization_grant,
            expires_at: grant.expires_at,
        }),
        Err(e) => {
            tracing::warn!(error = %e, "authorize failed");
            actix_web::ResponseError::error_response(&e)
        }
    }
}

/// DELETE /game-session — always reports success.
#[tracing::instrument(skip(state, req))]
pub async fn delete_session(state: web::Data<AppState>, req: HttpRequest) -> HttpResponse {
    if let Some(bearer) = extract_bearer(&req) {
        let _ = exchange::delete_session(&bearer, &state.storage);
    }
    HttpResponse::NoContent().finish()
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/game-session/new", web::post().to(new_session))
        .route("/game-session/refresh", web::post().to(refresh_session))
        .route("/game-session/child", web::post().to(child_session))
        .route("/game-session/authorize", web::post().to(authorize))
        .route("/game-session", web::delete().to(delete_session));
}
