mod catalog;
mod config;
mod engine;
mod error;
mod gateway;
mod handlers;
mod ledger;
mod models;
mod notify;
mod reconcile;
mod state;
mod store;
#[cfg(test)]
mod testutil;

use axum::extract::MatchedPath;
use axum::http::{header, header::HeaderName, Method, StatusCode};
use axum::routing::{get, post, put};
use axum::Router;
use config::Config;
use engine::ReservationEngine;
use gateway::{GatewayConfig, PaymentGateway};
use reconcile::PaymentReconciler;
use safar_common::internal_auth::InternalAuthLayer;
use safar_common::request_id::RequestIdLayer;
use state::AppState;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let http = match reqwest::Client::builder()
        .timeout(Duration::from_secs(20))
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "http client init failed");
            std::process::exit(2);
        }
    };

    let catalog = Arc::new(catalog::TripCatalog::new());
    let ledger = Arc::new(ledger::SeatLedger::new());
    let store = Arc::new(store::BookingStore::new());

    let (notifier, notify_rx) = notify::Notifier::new();
    notify::spawn_worker(notify_rx, store.clone(), catalog.clone());

    let engine = Arc::new(ReservationEngine::new(
        catalog.clone(),
        ledger.clone(),
        store.clone(),
        notifier,
        chrono::Duration::minutes(cfg.hold_expiry_minutes),
    ));

    let payment_gateway = PaymentGateway::new(
        http,
        GatewayConfig {
            base_url: cfg.gateway_base_url.clone(),
            client_id: cfg.gateway_client_id.clone(),
            client_secret: cfg.gateway_client_secret.clone(),
            api_version: cfg.gateway_api_version.clone(),
        },
    );
    let reconciler = Arc::new(PaymentReconciler::new(
        engine.clone(),
        store.clone(),
        payment_gateway,
        cfg.currency.clone(),
        cfg.gateway_provider.clone(),
    ));

    let state = AppState {
        env_name: cfg.env_name.clone(),
        env_lower: cfg.env_lower.clone(),
        currency: cfg.currency.clone(),
        catalog,
        ledger,
        store,
        engine: engine.clone(),
        reconciler,
        idempotency: Arc::new(Mutex::new(HashMap::new())),
    };

    if cfg.sweep_interval_seconds > 0 {
        let sweep_engine = engine.clone();
        let secs = cfg.sweep_interval_seconds;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(secs));
            loop {
                interval.tick().await;
                sweep_engine.expire_overdue();
            }
        });
    }

    let internal = InternalAuthLayer::new(cfg.require_internal_secret, cfg.internal_secret.clone())
        .with_allowed_callers(cfg.internal_allowed_callers.clone());

    let admin = Router::new()
        .route("/admin/trips", post(handlers::create_trip))
        .route(
            "/admin/trips/:trip_id",
            put(handlers::update_trip).delete(handlers::delete_trip),
        )
        .route(
            "/admin/trips/:trip_id/reset",
            post(handlers::admin_reset_trip),
        )
        .route("/admin/bookings", get(handlers::list_bookings))
        .route(
            "/admin/bookings/:token/cancel",
            post(handlers::cancel_booking),
        )
        .route("/admin/stats", get(handlers::admin_stats))
        .layer(internal);

    let public = Router::new()
        .route("/trips", get(handlers::list_trips))
        .route("/trips/cities", get(handlers::trip_cities))
        .route("/trips/:trip_id", get(handlers::trip_detail))
        .route("/trips/:trip_id/seats", get(handlers::trip_seats))
        .route("/bookings", post(handlers::create_booking))
        .route("/bookings/:token", get(handlers::booking_status))
        .route("/payments/verify", post(handlers::verify_payment))
        .route("/payments/:order_id", get(handlers::payment_status));

    let cors = if cfg.allowed_origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
            .allow_headers(booking_cors_allowed_headers())
            .allow_credentials(false)
    } else {
        let origins: Vec<axum::http::HeaderValue> = cfg
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
            .allow_headers(booking_cors_allowed_headers())
            // No cookie/session credentials are expected by this service.
            .allow_credentials(false)
            .allow_origin(AllowOrigin::list(origins))
    };

    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(public)
        .merge(admin)
        // Ensure unknown routes return 404, not auth middleware fallback details.
        .fallback(|| async { StatusCode::NOT_FOUND })
        .with_state(state)
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(cfg.max_body_bytes))
        // Log the matched route template when available, never the query
        // string: booking tokens and order ids do not belong in logs.
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
                let path = req
                    .extensions()
                    .get::<MatchedPath>()
                    .map(MatchedPath::as_str)
                    .unwrap_or_else(|| req.uri().path());
                tracing::span!(
                    tracing::Level::INFO,
                    "http_request",
                    method = %req.method(),
                    path = %path
                )
            }),
        )
        .layer(RequestIdLayer::new(HeaderName::from_static("x-request-id")));

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], cfg.port)));
    tracing::info!(%addr, "starting safar_booking_service");

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .unwrap();
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

fn booking_cors_allowed_headers() -> Vec<HeaderName> {
    vec![
        header::ACCEPT,
        header::AUTHORIZATION,
        header::CONTENT_TYPE,
        HeaderName::from_static("x-request-id"),
        HeaderName::from_static("idempotency-key"),
    ]
}
