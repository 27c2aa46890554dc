use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use chat_server::auth::jwt;
use chat_server::chat::sweeper::spawn_idle_room_sweeper;
use chat_server::chat::SqliteMessageStore;
use chat_server::config::{generate_config_template, Config};
use chat_server::{db, routes, state};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load()?;

    // Handle --generate-config: print template and exit
    if config.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Initialize tracing/logging
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("chat_server=info"))
    };
    if config.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter()).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(filter()).init();
    }

    tracing::info!("Chat server v{} starting", env!("CARGO_PKG_VERSION"));

    let chat = config.chat();

    // Initialize SQLite database (creates data_dir)
    let db = db::init_db(&config.data_dir)?;

    // Load or generate JWT signing key (256-bit random, stored in data_dir)
    let jwt_secret = jwt::load_or_generate_jwt_secret(&config.data_dir)?;

    // Handle --issue-token: print a token for local testing and exit
    if let Some(user_id) = config.issue_token {
        println!(
            "{}",
            jwt::issue_access_token(&jwt_secret, user_id, chat.token_ttl_secs)?
        );
        return Ok(());
    }

    let store = Arc::new(SqliteMessageStore::new(db));
    let sweep_interval = Duration::from_secs(chat.sweep_interval_secs.max(1));
    let app_state = state::AppState::new(chat, store, jwt_secret);

    spawn_idle_room_sweeper(app_state.dispatcher.clone(), sweep_interval);
    tracing::info!(
        "Idle room sweeper started (interval: {}s)",
        sweep_interval.as_secs()
    );

    // Build router
    let app = routes::build_router(app_state);

    // Bind and serve
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
