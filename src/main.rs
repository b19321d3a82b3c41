use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::info;

use locum::engine::{Engine, EngineConfig};
use locum::model::AuthorizationPolicy;
use locum::wire;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = std::env::var("LOCUM_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    locum::observability::init(metrics_port);

    let addr = std::env::var("LOCUM_ADDR").unwrap_or_else(|_| "0.0.0.0:7440".into());
    let wal_path =
        PathBuf::from(std::env::var("LOCUM_WAL").unwrap_or_else(|_| "./locum.wal".into()));
    let max_connections: usize = std::env::var("LOCUM_MAX_CONNECTIONS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(256);

    let mut config = EngineConfig::default();
    if let Some(threshold) = std::env::var("LOCUM_COMPACT_THRESHOLD")
        .ok()
        .and_then(|s| s.parse().ok())
    {
        config.compact_threshold = threshold;
    }
    if let Some(minutes) = std::env::var("LOCUM_UTC_OFFSET_MINUTES")
        .ok()
        .and_then(|s| s.parse::<i32>().ok())
    {
        match chrono::FixedOffset::east_opt(minutes * 60) {
            Some(offset) => config.utc_offset = offset,
            None => tracing::warn!("LOCUM_UTC_OFFSET_MINUTES out of range, staying on UTC"),
        }
    }
    match std::env::var("LOCUM_AUTH_POLICY").ok().as_deref() {
        Some("qualification") => config.policy = AuthorizationPolicy::QualificationSubsumption,
        Some("direct") | None => {}
        Some(other) => {
            tracing::warn!("unknown LOCUM_AUTH_POLICY {other:?}, using direct membership");
        }
    }

    // Ensure the WAL's directory exists
    if let Some(parent) = wal_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }

    let engine = Arc::new(Engine::new(wal_path.clone(), config)?);
    let semaphore = Arc::new(Semaphore::new(max_connections));

    let listener = TcpListener::bind(&addr).await?;
    info!("locum listening on {addr}");
    info!("  wal: {}", wal_path.display());
    info!("  policy: {:?}", config.policy);
    info!("  max_connections: {max_connections}");
    info!(
        "  metrics: {}",
        metrics_port.map_or("disabled".to_string(), |p| format!(
            "http://0.0.0.0:{p}/metrics"
        ))
    );

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight connections
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = listener.accept() => {
                let (socket, peer) = match result {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::error!("accept error: {e}");
                        continue;
                    }
                };

                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        tracing::warn!("connection limit reached, rejecting {peer}");
                        metrics::counter!(locum::observability::CONNECTIONS_REJECTED_TOTAL).increment(1);
                        drop(socket);
                        continue;
                    }
                };

                info!("connection from {peer}");
                metrics::counter!(locum::observability::CONNECTIONS_TOTAL).increment(1);
                metrics::gauge!(locum::observability::CONNECTIONS_ACTIVE).increment(1.0);
                let engine = engine.clone();

                tokio::spawn(async move {
                    let _permit = permit; // held until connection closes
                    if let Err(e) = wire::handle_connection(engine, socket).await {
                        tracing::error!("connection error from {peer}: {e}");
                    }
                    metrics::gauge!(locum::observability::CONNECTIONS_ACTIVE).decrement(1.0);
                });
            }
            _ = &mut shutdown => {
                info!("shutdown signal received, stopping accept loop");
                break;
            }
        }
    }

    // Wait for in-flight connections to finish (up to 10s)
    info!("draining connections...");
    let drain_deadline = tokio::time::sleep(std::time::Duration::from_secs(10));
    tokio::pin!(drain_deadline);

    loop {
        if semaphore.available_permits() == max_connections {
            info!("all connections drained");
            break;
        }
        tokio::select! {
            _ = &mut drain_deadline => {
                let remaining = max_connections - semaphore.available_permits();
                tracing::warn!("drain timeout, {remaining} connections still open");
                break;
            }
            _ = tokio::time::sleep(std::time::Duration::from_millis(100)) => {}
        }
    }

    // Leave a minimal WAL behind so the next start replays fast.
    if let Err(e) = engine.compact().await {
        tracing::warn!("final compaction failed: {e}");
    }

    info!("locum stopped");
    Ok(())
}
