use std::sync::Arc;

use playout_daemon::core::{SchedulerCore, SchedulerEvent};
use playout_daemon::driver::PlaybackDriver;
use playout_daemon::engine::{CommandSpeech, MpvVideo};
use playout_daemon::store::{LocalStore, RequestStore};
use playout_daemon::{http, socket, BroadcastMessage};
use playout_proto::config::Config;
use playout_proto::state::StateManager;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// A custom tracing layer that forwards log messages to the broadcast channel
struct BroadcastLayer {
    sender: broadcast::Sender<BroadcastMessage>,
}

impl BroadcastLayer {
    fn new(sender: broadcast::Sender<BroadcastMessage>) -> Self {
        Self { sender }
    }
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        // Only WARN and ERROR reach the operator console
        let level = event.metadata().level();
        if !matches!(*level, tracing::Level::WARN | tracing::Level::ERROR) {
            return;
        }

        let mut message = format!("{} [{}] ", chrono::Local::now().format("%H:%M:%S"), level);
        let mut visitor = MessageVisitor(&mut message);
        event.record(&mut visitor);

        // No receivers is OK
        let _ = self.sender.send(BroadcastMessage::Log(message));
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl<'a> tracing::field::Visit for MessageVisitor<'a> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0.push_str(&format!("{:?}", value));
        } else {
            self.0.push_str(&format!(" {}={:?}", field.name(), value));
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Setup broadcast channel first so we can use it for logging
    let (broadcast_tx, _) = broadcast::channel::<BroadcastMessage>(100);

    let data_dir = playout_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("playoutd.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(BroadcastLayer::new(broadcast_tx.clone()))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,playout_daemon=debug")),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    let store: Arc<dyn RequestStore> = Arc::new(LocalStore::open(config.daemon.store_file.clone())?);
    let state_manager = Arc::new(StateManager::new(
        config.daemon.state_file.clone(),
        config.scheduler.auto_play,
    ));

    let speech = Arc::new(CommandSpeech::from_config(&config.speech));
    let video = Arc::new(MpvVideo::new(&config.video));

    // Mirror video engine health into the shared view
    let mut health_rx = video.health();
    let health_state = state_manager.clone();
    let health_broadcast = broadcast_tx.clone();
    tokio::spawn(async move {
        while health_rx.changed().await.is_ok() {
            let health = health_rx.borrow_and_update().clone();
            health_state.set_video_health(health).await;
            let _ = health_broadcast.send(BroadcastMessage::StateUpdated);
        }
    });

    // Event channel: all external inputs funnel into SchedulerCore
    let (event_tx, event_rx) = mpsc::channel::<SchedulerEvent>(256);
    let (report_tx, report_rx) = mpsc::channel(16);

    let driver = PlaybackDriver::new(speech, video, &config.scheduler, report_tx);
    let core = SchedulerCore::new(
        store.clone(),
        state_manager.clone(),
        driver,
        report_rx,
        event_tx.clone(),
        broadcast_tx.clone(),
    );

    match socket::bind(&config.http.bind_address, playout_proto::platform::DAEMON_TCP_PORT).await {
        Ok(listener) => {
            socket::start_server(
                listener,
                state_manager.clone(),
                event_tx.clone(),
                broadcast_tx.clone(),
            );
        }
        Err(e) => error!("Failed to bind TCP socket: {}", e),
    }

    if config.http.enabled {
        let addr = format!("{}:{}", config.http.bind_address, config.http.port);
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => {
                let app = http::router(state_manager.clone(), store.clone(), event_tx.clone());
                http::start_server(listener, app);
            }
            Err(e) => error!("Failed to bind HTTP server to {}: {}", addr, e),
        }
    }

    // Ctrl-C stops the current session cleanly before exit
    let shutdown_tx = event_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = shutdown_tx.send(SchedulerEvent::Shutdown).await;
        }
    });

    info!("Daemon initialised, running event loop");
    core.run(event_rx).await?;

    Ok(())
}
