mod api;
mod config;
mod data;
mod error;
mod websocket;

use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use log::{info, warn, error};
use tower_http::cors::CorsLayer;

use crate::config::Config;
use crate::data::{AlphaVantageClient, BackgroundRefresher, FetchCoordinator, ProviderSettings, RefreshCommand};
use crate::websocket::{SessionSettings, WebSocketHandler};
use crate::api::{ApiState, create_api_router};

async fn handle_websocket_connection_with_routing(
    stream: TcpStream,
    peer_addr: String,
    coordinator: FetchCoordinator,
    settings: SessionSettings,
) {
    use tokio_tungstenite::accept_hdr_async;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
    use tokio_tungstenite::tungstenite::http::StatusCode;

    let ws_stream = match accept_hdr_async(stream, |req: &Request, response: Response| {
        let path = req.uri().path();
        info!("WebSocket connection request for path: {} from {}", path, peer_addr);

        if path == "/ws" {
            Ok(response)
        } else {
            warn!("Unknown WebSocket path '{}' from {}", path, peer_addr);
            let mut rejection = ErrorResponse::new(Some("Invalid WebSocket path".to_string()));
            *rejection.status_mut() = StatusCode::NOT_FOUND;
            Err(rejection)
        }
    }).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("WebSocket handshake failed for {}: {:?}", peer_addr, e);
            return;
        }
    };

    let handler = WebSocketHandler::new(coordinator, settings, peer_addr);
    handler.handle_connection(ws_stream).await;
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Pick up API_KEY and friends from .env when present
    dotenvy::dotenv().ok();

    let config = Config::from_env();

    env_logger::init_from_env(env_logger::Env::new().default_filter_or(&config.log_level));

    config.log_config();

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        return Err(e.into());
    }

    // Provider and fetch pipeline
    let provider = AlphaVantageClient::new(ProviderSettings {
        base_url: config.provider_base_url.clone(),
        api_key: config.api_key.clone(),
        interval: config.quote_interval.clone(),
        request_timeout: config.request_timeout,
    })?;

    let mut coordinator = FetchCoordinator::new(Arc::new(provider), config.request_timeout);
    if let Some(limit) = config.max_concurrent_fetches {
        coordinator = coordinator.with_concurrency_limit(limit);
    }
    info!("📡 Using {} provider", coordinator.provider_name());

    // Background refresh of the configured universe
    let refresher = Arc::new(BackgroundRefresher::new(
        coordinator.clone(),
        config.symbols.clone(),
        config.refresh_interval,
    ));

    if config.refresh_on_startup {
        if let Err(e) = refresher.execute_command(RefreshCommand::Start) {
            warn!("Background refresh not started: {}", e);
        }
    } else {
        info!("📊 Background refresh ready - POST /api/refresh/start to begin");
    }

    // Start API server
    let api_router = create_api_router(ApiState {
        refresher: refresher.clone(),
    })
    .layer(CorsLayer::permissive());

    let api_listener = TcpListener::bind(&config.api_bind_address).await?;
    info!("🌐 HTTP API server running at http://{}", config.api_bind_address);

    let api_server = axum::serve(api_listener, api_router);

    // Start WebSocket server
    let ws_listener = TcpListener::bind(&config.bind_address).await?;
    info!("🚀 WebSocket server running at ws://{}/ws", config.bind_address);

    let settings = SessionSettings {
        push_interval: config.push_interval,
        outbound_capacity: config.outbound_queue_size,
    };

    let websocket_server = async move {
        loop {
            let (stream, addr) = match ws_listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                    continue;
                }
            };

            tokio::spawn(handle_websocket_connection_with_routing(
                stream,
                addr.to_string(),
                coordinator.clone(),
                settings.clone(),
            ));
        }
    };

    tokio::select! {
        result = api_server => {
            error!("API server stopped: {:?}", result);
        }
        _ = websocket_server => {
            error!("WebSocket server stopped");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    // Cleanup
    if let Err(e) = refresher.execute_command(RefreshCommand::Stop) {
        warn!("Failed to stop background refresh: {}", e);
    }

    Ok(())
}
