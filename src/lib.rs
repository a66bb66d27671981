// Crate-level lint configuration
// Allow noisy pedantic/cargo lints that aren't worth fixing individually
#![allow(clippy::multiple_crate_versions)] // Transitive deps, can't easily fix
#![allow(clippy::missing_errors_doc)] // Would require extensive doc changes
#![allow(clippy::missing_panics_doc)] // Would require extensive doc changes
#![allow(clippy::must_use_candidate)] // Too many false positives for internal APIs
#![allow(clippy::module_name_repetitions)] // Acceptable for clarity
#![allow(clippy::doc_markdown)] // Too strict about backticks in docs
#![allow(clippy::missing_const_for_fn)] // Often debatable, runtime doesn't benefit

//! Federated game-session auth service
//!
//! Issues and verifies self-contained identity/session/grant/access tokens
//! for a game's player clients and servers, with a hand-rolled Ed25519
//! token codec so headers can carry an embedded JWK for self-signed,
//! offline-issued tokens.
//!
//! ## Architecture
//!
//! A single binary owns one Ed25519 signing key and acts as the issuer for
//! whatever host a request arrives on (`issuer::resolve_for_request`). The
//! exchange state machine (`exchange`) walks identity tokens through
//! `none -> identified -> granted(audience) -> authorized(audience)`,
//! persisting sessions and grants in an embedded ReDB database. Tokens
//! signed by other deployments are verified against keys fetched and
//! cached from their `/.well-known/jwks.json` (`jwks`).
//!
//! ## Security Model
//!
//! - **Self-owned signing key**: one Ed25519 keypair per deployment,
//!   persisted once and reused for the process lifetime.
//! - **Self-signed bypass**: deployments that opt in via
//!   `AUTH_ACCEPT_SELF_SIGNED` accept tokens that embed their own
//!   verification key, substituting a freshly signed access token.
//! - **Hash-chained audit log**: every key lifecycle and session event is
//!   appended to an Ed25519-signed, hash-linked log for tamper evidence.

pub mod audit;
pub mod config;
pub mod error;
pub mod exchange;
pub mod issuer;
pub mod jwks;
pub mod keystore;
pub mod routes;
pub mod selfsigned;
pub mod state;
pub mod storage;
pub mod token;
pub mod types;

#[cfg(feature = "otel")]
pub mod telemetry;

#[cfg(not(feature = "otel"))]
pub mod telemetry {
    //! Stub telemetry module when OpenTelemetry is disabled.

    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

    /// Initialize tracing with console output only.
    pub fn init_tracing() {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "auth_service=info,actix_web=info".into());
        let fmt_layer = tracing_subscriber::fmt::layer();

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();
    }

    /// No-op shutdown when OpenTelemetry is disabled.
    pub fn shutdown_tracing() {}
}

// Re-export commonly used types
pub use config::Settings;
pub use error::AuthError;
pub use state::AppState;
