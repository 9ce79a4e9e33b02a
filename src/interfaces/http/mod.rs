pub mod auth;
pub mod error;
pub mod handlers;
pub mod state;

use anyhow::{Context, Result};
use axum::Router;
use axum::http::HeaderValue;
use axum::routing::{get, patch, post};
use tokio::sync::watch;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::info;

use state::AppState;

pub fn router(state: AppState) -> Router {
    let cors = build_cors(&state.app.config.cors_origins);

    Router::new()
        .route("/health", get(handlers::health::health))
        .route("/health/full", get(handlers::health::health_full))
        .route("/status", get(handlers::health::status))
        .route("/portfolio/current", get(handlers::portfolio::current))
        .route("/portfolio/snapshot", post(handlers::portfolio::manual_snapshot))
        .route("/portfolio/snapshot/force", post(handlers::portfolio::force_snapshot))
        .route("/portfolio/changes", get(handlers::portfolio::changes))
        .route("/approvals", get(handlers::approvals::list).post(handlers::approvals::create))
        .route("/approvals/pending", get(handlers::approvals::pending))
        .route("/approvals/{id}", patch(handlers::approvals::patch))
        .route("/approvals/{id}/verify-mfa", post(handlers::approvals::verify_mfa))
        .route(
            "/kill-switch",
            get(handlers::risk::get_kill_switch).post(handlers::risk::set_kill_switch),
        )
        .route(
            "/objectives",
            get(handlers::risk::get_objectives).put(handlers::risk::put_objectives),
        )
        .route("/rules", get(handlers::rules::list).post(handlers::rules::create))
        .route("/rules/optimize", post(handlers::rules::optimize))
        .route("/rules/evaluate", post(handlers::rules::evaluate))
        .route("/rules/{id}/activate", post(handlers::rules::activate))
        .route("/rules/{id}/metrics", get(handlers::rules::metrics))
        .route("/rules/{id}/backtest", post(handlers::rules::backtest))
        .route("/risk/state", get(handlers::risk::risk_state))
        .route("/live", get(handlers::sse::live))
        .route("/monte-carlo", post(handlers::monte_carlo::run))
        .layer(cors)
        .with_state(state)
}

/// Exact origins plus `*.domain` wildcard-subdomain forms; a bare `*`
/// allows everything.
fn build_cors(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }

    let allowed: Vec<String> = origins.to_vec();
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(move |origin: &HeaderValue, _| {
            let Ok(origin) = origin.to_str() else {
                return false;
            };
            allowed.iter().any(|pattern| {
                if let Some(domain) = pattern.strip_prefix("*.") {
                    origin
                        .rsplit_once("://")
                        .map(|(_, host)| host == domain || host.ends_with(&format!(".{domain}")))
                        .unwrap_or(false)
                } else {
                    origin == pattern
                }
            })
        }))
        .allow_methods(Any)
        .allow_headers(Any)
}

pub async fn serve(
    state: AppState,
    port: u16,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("http api listening on {addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
        .context("http server error")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(origins: &[&str], origin: &str) -> bool {
        // Exercise the predicate logic directly.
        let allowed: Vec<String> = origins.iter().map(|s| s.to_string()).collect();
        allowed.iter().any(|pattern| {
            if let Some(domain) = pattern.strip_prefix("*.") {
                origin
                    .rsplit_once("://")
                    .map(|(_, host)| host == domain || host.ends_with(&format!(".{domain}")))
                    .unwrap_or(false)
            } else {
                origin == pattern
            }
        })
    }

    #[test]
    fn test_exact_origin() {
        assert!(matches(&["https://app.example.com"], "https://app.example.com"));
        assert!(!matches(&["https://app.example.com"], "https://evil.com"));
    }

    #[test]
    fn test_wildcard_subdomain() {
        assert!(matches(&["*.example.com"], "https://app.example.com"));
        assert!(matches(&["*.example.com"], "https://example.com"));
        assert!(!matches(&["*.example.com"], "https://example.com.evil.io"));
    }
}
