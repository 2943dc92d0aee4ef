use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router, middleware,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use hirewire_api::middleware::require_auth;
use hirewire_api::state::{AppState, AppStateInner};
use hirewire_api::{messages, threads};
use hirewire_gateway::connection::{self, GatewayContext};
use hirewire_gateway::presence::PresenceRegistry;
use hirewire_gateway::rooms::ConversationRouter;
use hirewire_gateway::threads::ThreadAggregator;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hirewire=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("HIREWIRE_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("HIREWIRE_DB_PATH").unwrap_or_else(|_| "hirewire.db".into());
    let host = std::env::var("HIREWIRE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("HIREWIRE_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    // Init database
    let db = Arc::new(hirewire_db::Database::open(&PathBuf::from(&db_path))?);

    // Shared state: the REST surface and the WebSocket gateway operate on
    // the same router, presence registry, and store.
    let router = ConversationRouter::new();
    let presence = PresenceRegistry::new();
    let aggregator = ThreadAggregator::new();

    let app_state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        router: router.clone(),
        presence: presence.clone(),
        threads: aggregator,
        jwt_secret: jwt_secret.clone(),
    });

    let gateway = GatewayContext {
        db,
        router,
        presence,
        jwt_secret,
    };

    // Routes — everything is behind auth; credential issuance lives in an
    // external service.
    let protected_routes = Router::new()
        .route("/threads", get(threads::list_threads))
        .route("/conversations/{counterpart_id}", get(threads::get_conversation))
        .route(
            "/conversations/{counterpart_id}/messages",
            post(messages::send_message),
        )
        .layer(middleware::from_fn_with_state(app_state.clone(), require_auth))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(gateway);

    let app = Router::new()
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Hirewire server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(ctx): State<GatewayContext>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, ctx))
}
