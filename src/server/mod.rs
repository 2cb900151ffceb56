//! Echo server built on the WebSocket transport.
//!
//! This module keeps the `eio-ws-server` binary thin: it loads the layered
//! configuration, installs the tracing subscriber, and runs a Tokio
//! listener. Each accepted socket is read as an HTTP exchange and upgraded.
//! An [`echo`] owner then serves it until the peer leaves or the process
//! is asked to shut down.

pub mod cli;
pub mod echo;

use std::{future::Future, net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result, anyhow};
pub use cli::{AppConfig, Cli, ConfigError};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpStream},
    sync::watch,
    task::JoinSet,
    time::timeout,
};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    transport::{Transport, TransportCallback},
    websocket::{Exchange, HANDSHAKE_TIMEOUT, HandshakeError, WebSocketTransport},
};

/// Load configuration, install logging and serve until shutdown.
///
/// # Errors
///
/// Returns any error raised while loading configuration, installing the
/// subscriber or binding the listener.
pub async fn run() -> Result<()> {
    let config = AppConfig::load()?;
    init_tracing(&config.log_filter)?;
    run_with_config(&config).await
}

/// Install a `fmt` subscriber filtered by `filter`.
///
/// # Errors
///
/// Fails when the filter does not parse or a global subscriber is already
/// installed.
pub fn init_tracing(filter: &str) -> Result<()> {
    let filter = EnvFilter::try_new(filter).with_context(|| format!("invalid log filter {filter:?}"))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| anyhow!(err))
}

/// Bind the configured address and serve until Ctrl-C or SIGTERM.
///
/// # Errors
///
/// Returns an error if the bind address is invalid or cannot be bound.
pub async fn run_with_config(config: &AppConfig) -> Result<()> {
    let bind: SocketAddr = config
        .bind
        .parse()
        .with_context(|| format!("bind address {} is invalid", config.bind))?;
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(addr = %listener.local_addr()?, "eio-ws-server listening");
    accept_connections(listener, shutdown_signal()).await;
    Ok(())
}

/// Accept connections until `shutdown` resolves, then close every live
/// transport and wait for its session to finish.
pub async fn accept_connections<F>(listener: TcpListener, shutdown: F)
where
    F: Future<Output = ()>,
{
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut join_set = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            () = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
            res = listener.accept() => match res {
                Ok((socket, peer)) => {
                    let rx = shutdown_rx.clone();
                    join_set.spawn(async move {
                        if let Err(error) = handle_client(socket, peer, rx).await {
                            debug!(%peer, %error, "connection ended during handshake");
                        }
                    });
                }
                Err(error) => error!(%error, "accept error"),
            },
        }
    }

    // notify all tasks to shut down
    shutdown_tx.send_replace(true);
    while let Some(res) = join_set.join_next().await {
        if let Err(error) = res {
            error!(%error, "connection task failed");
        }
    }
}

async fn handle_client(
    socket: TcpStream,
    peer: SocketAddr,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), HandshakeError> {
    let (callback, session) = echo::echo_session();
    let transport = tokio::select! {
        res = upgrade_within(socket, callback, HANDSHAKE_TIMEOUT) => res?,
        _ = shutdown.wait_for(|stop| *stop) => {
            debug!(%peer, "shutdown before handshake completed");
            return Ok(());
        }
    };
    info!(%peer, "transport open");

    let session = session.run(&transport);
    tokio::pin!(session);
    let interrupted = tokio::select! {
        () = &mut session => false,
        _ = shutdown.wait_for(|stop| *stop) => true,
    };
    if interrupted {
        if let Err(error) = transport.close().await {
            warn!(%peer, %error, "failed to close transport on shutdown");
        }
        session.await;
    }
    info!(%peer, "transport closed");
    Ok(())
}

/// Read the request head and upgrade it, giving up after `limit`.
async fn upgrade_within<S>(
    io: S,
    callback: Arc<dyn TransportCallback>,
    limit: Duration,
) -> Result<WebSocketTransport<S>, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let handshake = async {
        let exchange = Exchange::read_from(io).await?;
        WebSocketTransport::accept(exchange, callback).await
    };
    timeout(limit, handshake)
        .await
        .map_err(|_| HandshakeError::TimedOut)?
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(error) => {
                warn!(%error, "failed to install SIGTERM handler");
                wait_for_ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    wait_for_ctrl_c().await;
}

async fn wait_for_ctrl_c() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "failed to install Ctrl-C handler; running until killed");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use tokio::io::{AsyncWriteExt, duplex};

    use super::*;

    #[rstest]
    #[tokio::test]
    async fn silent_client_times_out_before_upgrade() {
        let (mut client, server) = duplex(1024);
        client
            .write_all(b"GET /engine.io/ HTTP/1.1\r\nHost: localhost\r\n")
            .await
            .expect("write partial head");
        let (callback, _session) = echo::echo_session();

        let err = upgrade_within(server, callback, Duration::from_millis(50))
            .await
            .expect_err("should time out");

        assert!(matches!(err, HandshakeError::TimedOut), "got {err:?}");
        assert_eq!(err.status(), http::StatusCode::REQUEST_TIMEOUT);
    }
}
