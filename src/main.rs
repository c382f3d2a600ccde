//! Webhook Bridge - relay binary.
//!
//! Wires the configured source and action around one shared dispatcher.
//!
//! ## Configuration
//!
//! - `WEBHOOK_BRIDGE_CONFIG`: path of the TOML config (default:
//!   `config/webhook-bridge.toml`); `${VAR}` references inside it are
//!   substituted from the environment, `.env` included
//! - `RUST_LOG`: overrides `log.level`

use deadpool_redis::{Config as RedisPoolConfig, Pool, Runtime};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use webhook_bridge::actions::{Action, RepublishAction, TriggerAction};
use webhook_bridge::bus::RedisStreamBus;
use webhook_bridge::config::{BridgeConfig, LogConfig, LogFormat, RelayMode, SourceKind};
use webhook_bridge::dispatcher::Dispatcher;
use webhook_bridge::health;
use webhook_bridge::shutdown::ShutdownSignal;
use webhook_bridge::source::{self, redis::default_consumer_name, IngressState, RedisStreamSource};
use webhook_bridge::trigger::TriggerClient;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn init_tracing(log: &LogConfig) -> Result<(), BoxError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&log.level)?,
    };

    match log.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).try_init(),
    }
}

fn create_pool(config: &BridgeConfig) -> Result<Pool, BoxError> {
    let pool = RedisPoolConfig::from_url(config.redis.url.clone())
        .create_pool(Some(Runtime::Tokio1))?;
    Ok(pool)
}

/// Build the action for the configured relay mode.
fn build_action(config: &BridgeConfig, pool: Option<&Pool>) -> Result<Arc<dyn Action>, BoxError> {
    match config.relay.mode {
        RelayMode::Trigger => {
            let client =
                TriggerClient::new(config.trigger_config()?).with_timeout(config.trigger_timeout());
            let policy = config.filter_policy();
            info!(
                url_template = %client.config().url_template(),
                branch = %policy.branch(),
                branch_match = ?policy.branch_match(),
                pull_request_action = %policy.pull_request_action(),
                "Trigger relay configured"
            );
            Ok(Arc::new(TriggerAction::new(policy, Arc::new(client))))
        }
        RelayMode::Republish => {
            let pool = pool.ok_or("republish mode needs a Redis connection")?;
            let routes = config.route_table();
            info!(
                routes = routes.len(),
                dead_letter_topic = %routes.dead_letter_topic(),
                "Republish relay configured"
            );
            Ok(Arc::new(RepublishAction::new(
                Arc::new(routes),
                Arc::new(RedisStreamBus::new(pool.clone())),
            )))
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    dotenvy::dotenv().ok();

    let config = match BridgeConfig::load() {
        Ok(config) => config,
        Err(e) => {
            let _ = init_tracing(&LogConfig::default());
            error!(error = %e, "Fatal error reading configuration");
            return Err(e.into());
        }
    };
    init_tracing(&config.log)?;

    info!(
        mode = ?config.relay.mode,
        source = ?config.source.kind,
        "Webhook bridge starting"
    );

    health::mark_running();

    let needs_redis =
        config.source.kind == SourceKind::Redis || config.relay.mode == RelayMode::Republish;
    let pool = if needs_redis {
        Some(create_pool(&config)?)
    } else {
        None
    };

    let dispatcher = Arc::new(Dispatcher::new(build_action(&config, pool.as_ref())?));
    let shutdown = ShutdownSignal::with_timeout(config.shutdown_timeout());

    let mut task = match config.source.kind {
        SourceKind::Redis => {
            let pool = pool.clone().ok_or("Redis source needs a Redis connection")?;
            let consumer_name = config
                .source
                .consumer_name
                .clone()
                .unwrap_or_else(default_consumer_name);
            let redis_source = RedisStreamSource::new(
                pool,
                config.source.channels.clone(),
                config.source.consumer_group.clone(),
                consumer_name,
            );
            redis_source.subscribe().await?;

            let source_shutdown = shutdown.clone();
            tokio::spawn(async move {
                redis_source.run(dispatcher, source_shutdown).await;
                Ok(())
            })
        }
        SourceKind::Http => {
            let state = IngressState::new(dispatcher, config.server.api_key.clone());
            if !state.requires_auth() {
                warn!("server.api_key not set, HTTP ingress accepts unauthenticated hooks");
            }
            tokio::spawn(source::http::serve(
                state,
                config.server.port,
                shutdown.clone(),
            ))
        }
    };

    info!("Started successfully, waiting for messages...");

    tokio::select! {
        _ = shutdown.listen() => {}
        result = &mut task => {
            // the source stopped without being asked to
            match result {
                Ok(Ok(())) => warn!("Source stopped unexpectedly"),
                Ok(Err(e)) => {
                    error!(error = %e, "Source failed");
                    return Err(e.into());
                }
                Err(e) => {
                    error!(error = %e, "Source task panicked");
                    return Err(e.into());
                }
            }
            return Ok(());
        }
    }

    if !shutdown.drain(&mut task).await {
        task.abort();
    }

    if let Some(pool) = pool {
        info!("Closing connection to Redis");
        pool.close();
    }

    info!("Shutdown complete");
    Ok(())
}
