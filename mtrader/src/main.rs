//! Process entry point: loads settings, wires the pipeline together, and
//! serves the HTTP + WebSocket surface until a shutdown signal arrives.

mod app;
mod http;
mod logging;
mod settings;

use app::App;
use axum::Router;
use mtrader_fanout::connection::ConnectionContext;
use mtrader_fanout::router::AppState;
use settings::Settings;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("fatal: invalid configuration: {err}");
            std::process::exit(1);
        }
    };

    if settings.json_logging {
        logging::init_json_logging();
    } else {
        logging::init_logging();
    }

    let app = match App::build(settings).await {
        Ok(app) => app,
        Err(err) => {
            error!(%err, "fatal: failed to initialize application");
            std::process::exit(1);
        }
    };

    if let Err(err) = app.connector.connect().await {
        error!(%err, "fatal: broker connector failed to connect");
        std::process::exit(1);
    }

    let http_addr = app.settings.http_addr;

    let router = build_router(app.clone());
    let listener = match tokio::net::TcpListener::bind(http_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(%err, %http_addr, "fatal: failed to bind HTTP listener");
            std::process::exit(1);
        }
    };

    info!(%http_addr, "mtrader listening");

    let serve = axum::serve(listener, router.into_make_service_with_connect_info::<std::net::SocketAddr>());
    tokio::select! {
        result = serve => {
            if let Err(err) = result {
                error!(%err, "http server exited with an error");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
    }

    app.shutdown().await;
}

fn build_router(app: app::SharedApp<mtrader_connector::SimulatedBroker>) -> Router {
    let connection_ctx = Arc::new(ConnectionContext {
        bus: app.bus.clone(),
        verifier: app.token_verifier.clone(),
        instance_id: uuid::Uuid::new_v4().to_string(),
        registry: mtrader_fanout::broadcast::ConnectionRegistry::new(),
    });
    mtrader_fanout::broadcast::spawn_broadcast_listener(app.bus.clone(), connection_ctx.registry.clone());

    let ws_router = mtrader_fanout::router::router(AppState { connection: connection_ctx });
    let http_router = http::router(app);

    http_router.merge(ws_router).layer(TraceLayer::new_for_http()).layer(CorsLayer::permissive())
}
