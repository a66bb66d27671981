//! `GET /.well-known/jwks.json` — publishes this deployment's own signing
//! key in JWK Set form.

use actix_web::{HttpResponse, web};

use crate::state::AppState;

#[tracing::instrument(skip(state))]
pub async fn jwks(state: web::Data<AppState>) -> HttpResponse {
    HttpResponse::Ok().json(state.keystore.public_key_record())
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/.well-known/jwks.json", web::get().to(jwks));
}
