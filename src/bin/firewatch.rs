use anyhow::Result;
use firewatch::{
    client::{ChatClient, LoggingChatClient},
    config::Config,
    firewall::{FirewallConfig, FirewallPlugin},
    kv::{KvStore, RedisKvStore, create_redis_pool},
    plugin::{PluginHost, RecordStoreSecurityEventSink, SecurityEventSink},
    storage::{
        FirewallConfigStorage, MemoryFirewallConfigStorage, PostgresFirewallConfigStorage,
        PostgresRecordStore, RecordStore,
    },
    tasks::{
        DispatcherConfig, TaskDispatcher, TaskManager, TaskRegistry,
        spawn_cancellable_task,
    },
};
use sqlx::postgres::PgPoolOptions;
use std::{env, sync::Arc, time::Duration};
use tokio::signal;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    let version = firewatch::config::version();

    env::args().for_each(|arg| {
        if arg == "--version" {
            println!("{version}");
            std::process::exit(0);
        }
    });

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("firewatch=info,warn")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::new()?;
    info!(version = %version, "Starting firewatch");

    // Key-value store: Redis pool for queues, task records, and pub/sub.
    let redis_pool = create_redis_pool(&config.redis_url)?;
    let kv: Arc<dyn KvStore> = Arc::new(RedisKvStore::new(redis_pool));

    if !kv.is_healthy().await {
        warn!("Redis did not answer PING at startup; continuing with degraded queueing");
    }

    // Relational store: optional. Without DATABASE_URL the firewall
    // keeps its configuration in memory and security events are not
    // persisted.
    let (config_storage, security_sink): (
        Arc<dyn FirewallConfigStorage>,
        Option<Arc<dyn SecurityEventSink>>,
    ) = match &config.database_url {
        Some(database_url) => {
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await?;

            let record_store: Arc<dyn RecordStore> =
                Arc::new(PostgresRecordStore::new(pool.clone()));
            record_store.create_tables().await?;

            let sink: Arc<dyn SecurityEventSink> =
                Arc::new(RecordStoreSecurityEventSink::new(record_store));

            (
                Arc::new(PostgresFirewallConfigStorage::new(pool)),
                Some(sink),
            )
        }
        None => {
            warn!("DATABASE_URL not set; firewall configuration will not survive restarts");
            (Arc::new(MemoryFirewallConfigStorage::new()), None)
        }
    };

    // Messaging client: the platform connection is provided by the
    // embedding deployment; stand-alone runs log outbound actions.
    let client: Arc<dyn ChatClient> = Arc::new(LoggingChatClient::new());

    let cancel_token = CancellationToken::new();
    let tracker = TaskTracker::new();

    // Firewall plugin and host. Environment settings seed the config
    // when nothing is persisted yet.
    let firewall_defaults = FirewallConfig {
        spam_threshold: *config.spam_threshold.as_ref(),
        spam_window_seconds: config.spam_window.as_duration().as_secs(),
        notify_chat: config.firewall_notify,
        ..FirewallConfig::default()
    };

    let firewall = Arc::new(
        FirewallPlugin::new(
            client.clone(),
            config_storage,
            kv.clone(),
            security_sink,
            firewall_defaults,
        )
        .await,
    );

    let host = Arc::new(PluginHost::new().register(firewall.clone()));
    info!("Registered firewall plugin");

    // Task subsystem: registry populated at startup, lookup fails
    // closed for anything not listed here.
    let firewall_for_tasks = firewall.clone();
    let registry = Arc::new(TaskRegistry::new().register(
        "firewall.persist",
        move |_ctx| {
            let firewall = firewall_for_tasks.clone();
            async move {
                firewall.persist().await?;
                Ok(serde_json::Value::Null)
            }
        },
    ));

    let manager = Arc::new(TaskManager::new(
        kv.clone(),
        registry,
        cancel_token.clone(),
    ));

    let dispatcher = TaskDispatcher::new(
        manager.clone(),
        kv.clone(),
        DispatcherConfig {
            lane_concurrency: *config.lane_concurrency.as_ref(),
            dequeue_timeout: config.dequeue_timeout.as_duration(),
            idle_interval: config.idle_interval.as_duration(),
        },
    );
    dispatcher.spawn_lanes(&tracker, cancel_token.clone());

    // Periodic sweep of aged-out terminal tasks.
    let sweep_manager = manager.clone();
    let sweep_age = config.sweep_age.as_duration();
    spawn_cancellable_task(&tracker, cancel_token.clone(), move |token| async move {
        loop {
            tokio::select! {
                () = token.cancelled() => break,
                () = tokio::time::sleep(Duration::from_secs(60)) => {
                    if let Err(e) = sweep_manager.sweep(sweep_age).await {
                        warn!(error = ?e, "Task sweep failed");
                    }
                }
            }
        }
        Ok(())
    });

    // Periodic pruning of stale spam windows.
    let pruner = firewall.clone();
    spawn_cancellable_task(&tracker, cancel_token.clone(), move |token| {
        pruner.run_pruner(Duration::from_secs(60), token)
    });

    info!("firewatch running; press Ctrl-C to stop");
    shutdown_signal().await;

    info!("Shutdown signal received");
    cancel_token.cancel();

    host.shutdown().await;

    tracker.close();
    tracker.wait().await;

    info!("firewatch stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
