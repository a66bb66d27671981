//! Federated game-session auth service.
//!
//! Single-role binary: owns one signing key, serves session/grant/access
//! token exchange and JWKS discovery over plain HTTP behind a terminator.

use actix_web::{App, HttpServer, middleware, web};
use auth_service::{config::Settings, routes, state::AppState, storage::Storage, telemetry};
use tracing_actix_web::TracingLogger;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    telemetry::init_tracing();

    let settings = Settings::from_env();

    if let Err(message) = settings.validate() {
        tracing::error!("{message}");
        std::process::exit(1);
    }

    let storage = match Storage::open(settings.db_path()) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to open storage database");
            std::process::exit(1);
        }
    };

    let addr = settings.socket_addr();
    let base_domain = settings.base_domain().to_string();
    let body_limit_bytes = settings.body_limit_bytes();

    let state = match AppState::new(settings, storage) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to initialize application state");
            std::process::exit(1);
        }
    };

    let _ = state.audit.append(
        auth_service::audit::AuditEventType::ServiceStart,
        auth_service::audit::AuditActor::System,
        None,
        auth_service::audit::AuditOutcome::Success,
        None,
    );

    tracing::info!(
        addr = %addr,
        base_domain = %base_domain,
        kid = %state.keystore.key_id(),
        "starting auth service"
    );

    let state_data = web::Data::new(state);

    let server = HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .wrap(
                middleware::DefaultHeaders::new()
                    .add(("X-Service", "auth-service")),
            )
            .app_data(state_data.clone())
            .app_data(web::JsonConfig::default().limit(body_limit_bytes))
            .configure(routes::configure)
    });

    server.bind(addr)?.run().await?;

    telemetry::shutdown_tracing();

    Ok(())
}
