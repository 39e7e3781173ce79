//! Application Startup
//!
//! Backend selection, pipeline worker wiring and server initialization.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use futures::future::join_all;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::application::services::{
    DeliveryRouter, IngestPublisher, RealtimeNotifier, Sequencer, StatusIngestor,
};
use crate::config::{BusBackend, Settings, StoreBackend};
use crate::domain::{MessageRepository, RecipientDirectory};
use crate::infrastructure::bus::{
    spawn_consumers, ConsumeMode, ConsumerSpec, InMemoryBus, MessageBus, RedisStreamsBus,
};
use crate::infrastructure::channels::ChannelRegistry;
use crate::infrastructure::database;
use crate::infrastructure::repositories::{
    InMemoryMessageRepository, PgMessageRepository, PgRecipientDirectory,
    StaticRecipientDirectory,
};
use crate::presentation::http::{handlers::health, routes};
use crate::presentation::middleware::{cors, logging};
use crate::presentation::websocket::Gateway;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub bus: Arc<dyn MessageBus>,
    pub messages: Arc<dyn MessageRepository>,
    pub gateway: Arc<Gateway>,
    pub publisher: Arc<IngestPublisher>,
    pub status: Arc<StatusIngestor>,
}

/// External collaborators the pipeline runs against.
pub struct Backends {
    pub messages: Arc<dyn MessageRepository>,
    pub directory: Arc<dyn RecipientDirectory>,
    pub bus: Arc<dyn MessageBus>,
    pub channels: ChannelRegistry,
}

impl Backends {
    /// Connect the store and bus selected in `settings`.
    pub async fn connect(settings: &Settings) -> Result<Self> {
        let (messages, directory): (Arc<dyn MessageRepository>, Arc<dyn RecipientDirectory>) =
            match settings.store.backend {
                StoreBackend::Postgres => {
                    let pool = database::create_pool(&settings.database).await?;
                    info!("Database connection pool created");
                    if settings.database.run_migrations {
                        database::run_migrations(&pool).await?;
                        info!("Database migrations applied");
                    }
                    let messages: Arc<dyn MessageRepository> =
                        Arc::new(PgMessageRepository::new(pool.clone()));
                    let directory: Arc<dyn RecipientDirectory> =
                        Arc::new(PgRecipientDirectory::new(pool));
                    (messages, directory)
                }
                StoreBackend::Memory => {
                    warn!("Using in-memory message store; records are lost on restart");
                    let messages: Arc<dyn MessageRepository> =
                        Arc::new(InMemoryMessageRepository::new());
                    let directory: Arc<dyn RecipientDirectory> =
                        Arc::new(StaticRecipientDirectory::new());
                    (messages, directory)
                }
            };

        let bus: Arc<dyn MessageBus> = match settings.bus.backend {
            BusBackend::Redis => {
                Arc::new(RedisStreamsBus::connect(&settings.redis.url, &settings.bus).await?)
            }
            BusBackend::Memory => {
                warn!("Using in-memory message bus; single process only");
                Arc::new(InMemoryBus::new(settings.bus.partitions))
            }
        };

        Ok(Self {
            messages,
            directory,
            bus,
            channels: ChannelRegistry::loopback(&settings.delivery.channels),
        })
    }
}

/// Running pipeline consumers and their shutdown switch.
pub struct Workers {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Workers {
    /// Ask every loop to stop after its current record and wait for them.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for result in join_all(self.handles).await {
            if let Err(e) = result {
                warn!(error = %e, "Pipeline worker ended abnormally");
            }
        }
        info!("Pipeline workers stopped");
    }
}

/// Wire services over `backends` and spawn the workers enabled in `settings`.
///
/// Must be called from within a Tokio runtime.
pub fn assemble(settings: Settings, backends: Backends) -> (AppState, Workers) {
    let Backends {
        messages,
        directory,
        bus,
        channels,
    } = backends;
    let topics = settings.bus.topics.clone();
    let gateway = Arc::new(Gateway::new());

    let publisher = Arc::new(IngestPublisher::new(
        bus.clone(),
        topics.ingest.clone(),
        &settings.delivery.channels,
    ));
    let status = Arc::new(StatusIngestor::new(messages.clone(), bus.clone(), &settings));

    let (shutdown, shutdown_rx) = watch::channel(false);
    let mut handles = Vec::new();

    if settings.workers.sequencer {
        let sequencer = Arc::new(Sequencer::new(
            messages.clone(),
            bus.clone(),
            topics.routing.clone(),
        ));
        handles.extend(spawn_consumers(
            bus.clone(),
            ConsumerSpec {
                name: "sequencer",
                topic: topics.ingest.clone(),
                mode: ConsumeMode::Group(settings.bus.sequencer_group.clone()),
                partitions: settings.bus.owned_partitions(),
            },
            sequencer,
            &settings.bus,
            shutdown_rx.clone(),
        ));
    }

    if settings.workers.router {
        info!(channels = ?channels.channels(), "Channel adapters registered");
        let router = Arc::new(DeliveryRouter::new(
            messages.clone(),
            directory,
            channels,
            bus.clone(),
            topics.delivery.clone(),
            settings.delivery.adapter_timeout(),
        ));
        handles.extend(spawn_consumers(
            bus.clone(),
            ConsumerSpec {
                name: "router",
                topic: topics.routing.clone(),
                mode: ConsumeMode::Group(settings.bus.router_group.clone()),
                partitions: settings.bus.owned_partitions(),
            },
            router,
            &settings.bus,
            shutdown_rx.clone(),
        ));
    }

    if settings.workers.notifier {
        // Every instance reads every event: its sockets may hold any user.
        let notifier = Arc::new(RealtimeNotifier::new(gateway.clone()));
        let all_partitions: Vec<u32> = (0..bus.partitions()).collect();
        for topic in [&topics.ingest, &topics.delivery, &topics.read] {
            handles.extend(spawn_consumers(
                bus.clone(),
                ConsumerSpec {
                    name: "notifier",
                    topic: topic.clone(),
                    mode: ConsumeMode::Tail,
                    partitions: all_partitions.clone(),
                },
                notifier.clone(),
                &settings.bus,
                shutdown_rx.clone(),
            ));
        }
    }

    info!(loops = handles.len(), "Pipeline workers started");

    let state = AppState {
        settings: Arc::new(settings),
        bus,
        messages,
        gateway,
        publisher,
        status,
    };
    (state, Workers { shutdown, handles })
}

/// Build the HTTP router with the outer middleware stack
pub fn build_router(state: AppState) -> Router {
    let cors = cors::create_cors_layer(&state.settings.cors);
    routes::create_router(state)
        .layer(logging::create_trace_layer())
        .layer(cors)
}

/// Application instance
pub struct Application {
    listener: TcpListener,
    router: Router,
    workers: Workers,
}

impl Application {
    /// Build the application from settings
    pub async fn build(settings: Settings) -> Result<Self> {
        health::init_server_start();

        let backends = Backends::connect(&settings).await?;
        let addr: SocketAddr = settings.server_addr().parse()?;
        let (state, workers) = assemble(settings, backends);
        let router = build_router(state);

        let listener = TcpListener::bind(addr).await?;
        info!("Listening on {}", addr);

        Ok(Self {
            listener,
            router,
            workers,
        })
    }

    /// Serve until Ctrl-C, then drain the pipeline workers
    pub async fn run_until_stopped(self) -> Result<()> {
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        self.workers.shutdown().await;
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
