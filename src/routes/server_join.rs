//! `/server-join/auth-token` — exchange an authorization grant for an
//! access token bound to the joining server's audience.

use actix_web::{HttpRequest, HttpResponse, web};
use serde::{Deserialize, Serialize};

use crate::exchange;
use crate::issuer;
use crate::state::AppState;

use super::host_header;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthTokenRequest {
    pub authorization_grant: String,
    pub x509_fingerprint: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthTokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub refresh_token: String,
    pub expires_at: i64,
    pub scope: String,
}

impl From<exchange::AccessTokenResponse> for AuthTokenResponse {
    fn from(r: exchange::AccessTokenResponse) -> Self {
        Self {
            access_token: r.access_token,
            token_type: r.token_type,
            expires_in: r.expires_in,
            refresh_token: r.refresh_token,
            expires_at: r.expires_at,
            scope: r.scope,
        }
    }
}

/// POST /server-join/auth-token
#[tracing::instrument(skip(state, req, body))]
pub async fn auth_token(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<AuthTokenRequest>,
) -> HttpResponse {
    let issuer_url = issuer::resolve_for_request(&host_header(&req), &state.settings);

    match exchange::exchange(
        &body.authorization_grant,
        None,
        body.x509_fingerprint.clone(),
        &issuer_url,
        &state.settings,
        &state.keystore,
        &state.storage,
    ) {
        Ok(access) => HttpResponse::Ok().json(AuthTokenResponse::from(access)),
        Err(e) => {
            tracing::warn!(error = %e, "auth_token exchange failed");
            actix_web::ResponseError::error_response(&e)
        }
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/server-join/auth-token", web::post().to(auth_token));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::exchange as exchange_mod;
    use crate::storage::Storage;
    use actix_web::{App, test};

    fn app_state() -> web::Data<AppState> {
        let settings = Settings::for_tests("auth.hytale.test");
        let storage = Storage::open_memory().unwrap();
        web::Data::new(AppState::new(settings, storage).unwrap())
    }

    #[actix_rt::test]
    async fn test_auth_token_exchange_round_trip() {
        let state = app_state();

        let session = exchange_mod::new_session(
            "player-5",
            None,
            "https://auth.hytale.test",
            &state.settings,
            &state.keystore,
            &state.storage,
        )
        .unwrap();
        let grant = exchange_mod::authorize(
            Some(&session.identity_token),
            "server-5",
            &crate::types::Scopes::None,
            "https://auth.hytale.test",
            &state.settings,
            &state.keystore,
            &state.jwks,
            &state.storage,
        )
        .await
        .unwrap();

        let app = test::init_service(App::new().app_data(state.clone()).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/server-join/auth-token")
            .set_json(&serde_json::json!({"authorizationGrant": grant.authorization_grant}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        let body: AuthTokenResponse = test::read_body_json(resp).await;
        assert_eq!(body.token_type, "Bearer");
    }
}
