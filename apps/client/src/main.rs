use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use jobboard_client::api_client::ApiClient;
use jobboard_client::config::Config;
use jobboard_client::models::user::Role;
use jobboard_client::navigation::TracingNavigator;
use jobboard_client::notifications::TracingNotifier;
use jobboard_client::realtime::events::{CHAT_MESSAGE, INBOUND_EVENTS};
use jobboard_client::realtime::{ChannelConnector, ReconnectPolicy, WebSocketTransport};
use jobboard_client::services::JobService;
use jobboard_client::session::SessionManager;
use jobboard_client::storage::{FileStorage, TokenStore};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting job board client v{}", env!("CARGO_PKG_VERSION"));

    info!(
        video_calls = config.features.video_calls,
        chat = config.features.chat,
        oauth = config.features.oauth,
        "Feature flags loaded"
    );

    let storage = FileStorage::new(&config.token_dir);
    info!("Credentials stored under {}", storage.dir().display());
    let tokens = TokenStore::new(storage);
    let navigator = Arc::new(TracingNavigator);
    let notifier = Arc::new(TracingNotifier);

    let api = ApiClient::new(&config.api_base_url, config.http_timeout, tokens, navigator.clone())?;
    info!("API client initialized ({})", api.base_url());

    let connector = ChannelConnector::new(
        Arc::new(WebSocketTransport::new(&config.socket_url).with_timeout(config.http_timeout)),
        ReconnectPolicy::default(),
        notifier.clone(),
    );
    let session = SessionManager::new(api.clone(), navigator, notifier).with_realtime(connector);

    let mut current = session.bootstrap().await;
    if !current.is_authenticated() {
        if let (Ok(email), Ok(password)) = (
            std::env::var("JOBBOARD_EMAIL"),
            std::env::var("JOBBOARD_PASSWORD"),
        ) {
            current = match session.login(&email, &password).await {
                Ok(signed_in) => signed_in,
                Err(e) => {
                    warn!("Sign-in failed: {e}");
                    session.snapshot()
                }
            };
        }
    }

    let Some(user) = current.user() else {
        info!("No session; set JOBBOARD_EMAIL and JOBBOARD_PASSWORD to sign in");
        return Ok(());
    };
    info!(user = %user.id, role = ?user.role, "Session ready");

    if user.role == Role::Jobseeker {
        match JobService::new(api).recommendations().await {
            Ok(jobs) => info!("{} recommended jobs", jobs.len()),
            Err(e) => warn!("Could not load recommendations: {e}"),
        }
    }

    if let Some(channel) = session.channel() {
        for event in INBOUND_EVENTS {
            if event == CHAT_MESSAGE && !config.features.chat {
                continue;
            }
            channel.on(event, |received| {
                info!(event = %received.name, payload = %received.payload, "Real-time event");
            });
        }
    }

    info!("Listening for real-time events; press Ctrl+C to exit");
    tokio::signal::ctrl_c().await?;

    session.shutdown();
    info!("Shut down");
    Ok(())
}
