//! `/my-account/game-profile` — ambient account surface derived from the
//! caller's own session record. Not part of the exchange state machine;
//! this service owns no profile data beyond what a session already holds.

use actix_web::{HttpRequest, HttpResponse, web};
use serde::{Deserialize, Serialize};

use crate::state::AppState;
use crate::token;
use crate::types::SessionRecord;

use super::extract_bearer;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameProfileResponse {
    pub uuid: String,
    pub username: Option<String>,
    pub entitlements: Vec<String>,
    pub created_at: i64,
    pub next_name_change_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skin: Option<String>,
}

/// GET /my-account/game-profile
#[tracing::instrument(skip(state, req))]
pub async fn game_profile(state: web::Data<AppState>, req: HttpRequest) -> HttpResponse {
    let Some(bearer) = extract_bearer(&req) else {
        return HttpResponse::Unauthorized().finish();
    };
    let decoded = match token::decode_unverified(&bearer) {
        Ok(d) => d,
        Err(e) => return actix_web::ResponseError::error_response(&e),
    };

    let record: Option<SessionRecord> = match state.storage.get_session(&decoded.claims.sub) {
        Ok(r) => r,
        Err(e) => return actix_web::ResponseError::error_response(&e),
    };

    let created_at = record.as_ref().map_or(decoded.claims.iat, |r| r.issued_at);
    // No in-house name-change policy; mirrors the "infinite" default other
    // donor services in the pack use when a cooldown feature is out of scope.
    let next_name_change_at = i64::MAX;

    HttpResponse::Ok().json(GameProfileResponse {
        uuid: decoded.claims.sub,
        username: decoded.claims.display_name,
        entitlements: Vec::new(),
        created_at,
        next_name_change_at,
        skin: None,
    })
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/my-account/game-profile", web::get().to(game_profile));
}
