//! Accept loops for the three client transports.
//!
//! Each listener is one task: accept, spawn a pump per connection, stop
//! on the shutdown signal. All transports funnel into the same session
//! registry and wire client; only the byte handling differs.

use crate::pump::run_telnet_connection;
use crate::state::GatewayShared;
use crate::ws::run_websocket_connection;
use crate::GatewayError;
use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info};

/// Raw telnet listener. An SSH terminator, when deployed, proxies into
/// this same bind.
pub async fn run_telnet_listener(
    bind: SocketAddr,
    shared: Arc<GatewayShared>,
) -> Result<(), GatewayError> {
    let listener = TcpListener::bind(bind).await?;
    info!("telnet listener on {bind}");
    let mut shutdown = shared.shutdown_signal();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        stream.set_nodelay(true).ok();
                        debug!(%addr, "telnet connection accepted");
                        let shared = shared.clone();
                        tokio::spawn(async move {
                            run_telnet_connection(stream, shared, "telnet", addr.to_string()).await;
                        });
                    }
                    Err(e) => error!("telnet accept failed: {e}"),
                }
            }
            _ = shutdown.recv() => {
                info!("telnet listener shutting down");
                return Ok(());
            }
        }
    }
}

/// TLS-wrapped telnet listener.
pub async fn run_tls_listener(
    bind: SocketAddr,
    acceptor: TlsAcceptor,
    shared: Arc<GatewayShared>,
) -> Result<(), GatewayError> {
    let listener = TcpListener::bind(bind).await?;
    info!("tls telnet listener on {bind}");
    let mut shutdown = shared.shutdown_signal();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        stream.set_nodelay(true).ok();
                        let acceptor = acceptor.clone();
                        let shared = shared.clone();
                        tokio::spawn(async move {
                            match acceptor.accept(stream).await {
                                Ok(tls_stream) => {
                                    run_telnet_connection(
                                        tls_stream,
                                        shared,
                                        "telnet_tls",
                                        addr.to_string(),
                                    )
                                    .await;
                                }
                                Err(e) => debug!(%addr, error = %e, "tls handshake failed"),
                            }
                        });
                    }
                    Err(e) => error!("tls accept failed: {e}"),
                }
            }
            _ = shutdown.recv() => {
                info!("tls listener shutting down");
                return Ok(());
            }
        }
    }
}

/// WebSocket listener for browser clients.
pub async fn run_websocket_listener(
    bind: SocketAddr,
    shared: Arc<GatewayShared>,
) -> Result<(), GatewayError> {
    let listener = TcpListener::bind(bind).await?;
    info!("websocket listener on {bind}");
    let mut shutdown = shared.shutdown_signal();

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, addr)) => {
                        stream.set_nodelay(true).ok();
                        debug!(%addr, "websocket connection accepted");
                        let shared = shared.clone();
                        tokio::spawn(async move {
                            run_websocket_connection(stream, shared, addr.to_string()).await;
                        });
                    }
                    Err(e) => error!("websocket accept failed: {e}"),
                }
            }
            _ = shutdown.recv() => {
                info!("websocket listener shutting down");
                return Ok(());
            }
        }
    }
}

/// Builds the TLS acceptor from PEM certificate and key files.
pub fn load_tls_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor, GatewayError> {
    let mut cert_reader = BufReader::new(File::open(cert_path)?);
    let certs = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| GatewayError::Tls(format!("bad certificate file: {e}")))?;
    if certs.is_empty() {
        return Err(GatewayError::Tls(format!(
            "no certificates found in {}",
            cert_path.display()
        )));
    }

    let mut key_reader = BufReader::new(File::open(key_path)?);
    let key = rustls_pemfile::private_key(&mut key_reader)
        .map_err(|e| GatewayError::Tls(format!("bad key file: {e}")))?
        .ok_or_else(|| {
            GatewayError::Tls(format!("no private key found in {}", key_path.display()))
        })?;

    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| GatewayError::Tls(e.to_string()))?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}
