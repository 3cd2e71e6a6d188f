//! TCP listener and per-connection tasks.
//!
//! Each accepted connection runs a reader (frames in, dispatched through the
//! hub) and a writer (the client's queue out to the socket). Shutdown is a
//! `watch` flag every task selects on.

use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use syncproxy_socket::{Separator, read_frame_with_limit, write_frame};
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};

use crate::config::RouterConfig;
use crate::hub::{Client, Hub};

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("could not open port {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("could not read listener address: {0}")]
    LocalAddr(#[source] std::io::Error),
}

#[derive(Debug, Clone, Copy)]
struct ConnectionSettings {
    separator: Separator,
    max_frame_bytes: usize,
    client_queue: usize,
}

/// A running router. Dropping it without calling [`RouterHandle::shutdown`]
/// stops the router in the background without waiting for it.
pub struct RouterHandle {
    local_addr: SocketAddr,
    hub: Arc<Hub>,
    shutdown_tx: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

impl RouterHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn client_count(&self) -> usize {
        self.hub.client_count()
    }

    /// Stop accepting, close every client and wait for all connection tasks.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.accept_task.await {
            tracing::error!("Accept loop ended abnormally: {}", e);
        }
    }
}

/// Bind the listener and start accepting clients.
pub async fn bind(config: RouterConfig) -> Result<RouterHandle, RouterError> {
    let addr = config.bind_addr();
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| RouterError::Bind { addr, source })?;
    let local_addr = listener.local_addr().map_err(RouterError::LocalAddr)?;

    let hub = Arc::new(Hub::new(config.mode));
    let settings = ConnectionSettings {
        separator: config.separator,
        max_frame_bytes: config.max_frame_bytes,
        client_queue: config.client_queue.max(1),
    };
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tracing::info!(
        port = local_addr.port(),
        mode = %config.mode,
        separator = %config.separator,
        "Listening for clients"
    );
    let accept_task = tokio::spawn(accept_loop(listener, hub.clone(), settings, shutdown_rx));

    Ok(RouterHandle {
        local_addr,
        hub,
        shutdown_tx,
        accept_task,
    })
}

/// Resolves once shutdown has been requested or the handle is gone.
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    hub: Arc<Hub>,
    settings: ConnectionSettings,
    mut shutdown: watch::Receiver<bool>,
) {
    let port = listener.local_addr().map(|a| a.port()).unwrap_or_default();
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = stopped(&mut shutdown) => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    connections.spawn(serve_client(
                        stream,
                        peer,
                        hub.clone(),
                        settings,
                        shutdown.clone(),
                    ));
                }
                Err(e) => {
                    tracing::warn!("Could not connect with client: {}", e);
                }
            },
            Some(finished) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = finished {
                    tracing::error!("Connection task failed: {}", e);
                }
            }
        }
    }

    drop(listener);
    while let Some(finished) = connections.join_next().await {
        if let Err(e) = finished {
            tracing::error!("Connection task failed: {}", e);
        }
    }
    tracing::info!(port, "Stopped listening for clients");
}

async fn serve_client(
    stream: TcpStream,
    peer: SocketAddr,
    hub: Arc<Hub>,
    settings: ConnectionSettings,
    mut shutdown: watch::Receiver<bool>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(%peer, "Could not set TCP_NODELAY: {}", e);
    }

    let (tx, rx) = mpsc::channel(settings.client_queue);
    let client = hub.register(peer, tx);
    let (reader, writer) = stream.into_split();

    let mut writer_task = tokio::spawn(write_loop(
        writer,
        rx,
        settings.separator,
        shutdown.clone(),
        client.name.clone(),
    ));

    let writer_done = tokio::select! {
        _ = read_loop(reader, &client, &hub, settings, &mut shutdown) => false,
        finished = &mut writer_task => {
            if let Err(e) = finished {
                tracing::error!(client = %client.name, "Writer task failed: {}", e);
            }
            true
        }
    };

    hub.unregister(client.id);
    drop(client);

    if !writer_done && let Err(e) = writer_task.await {
        tracing::error!("Writer task failed: {}", e);
    }
}

async fn read_loop(
    reader: OwnedReadHalf,
    client: &Client,
    hub: &Hub,
    settings: ConnectionSettings,
    shutdown: &mut watch::Receiver<bool>,
) {
    let mut reader = BufReader::new(reader);
    let ConnectionSettings {
        separator,
        max_frame_bytes,
        ..
    } = settings;

    loop {
        let frame = tokio::select! {
            _ = stopped(shutdown) => {
                tracing::debug!(client = %client.name, "Closing on shutdown");
                return;
            }
            frame = read_frame_with_limit(&mut reader, separator, max_frame_bytes) => frame,
        };

        match frame {
            Ok(Some(frame)) => {
                tracing::debug!(
                    client = %client.name,
                    bytes = frame.len(),
                    frame = %String::from_utf8_lossy(&frame),
                    "Received frame"
                );
                hub.dispatch(client, Bytes::from(frame)).await;
            }
            Ok(None) => {
                tracing::debug!(client = %client.name, "Detected EOF");
                return;
            }
            Err(e) if is_disconnect(&e) => {
                tracing::debug!(client = %client.name, "Socket closed: {}", e);
                return;
            }
            Err(e) => {
                tracing::warn!(client = %client.name, "Problem reading: {}", e);
                return;
            }
        }
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::Receiver<Bytes>,
    separator: Separator,
    mut shutdown: watch::Receiver<bool>,
    name: String,
) {
    loop {
        let frame = tokio::select! {
            _ = stopped(&mut shutdown) => break,
            frame = rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let written = tokio::select! {
            _ = stopped(&mut shutdown) => break,
            written = write_frame(&mut writer, separator, &frame) => written,
        };
        if let Err(e) = written {
            if is_disconnect(&e) {
                tracing::debug!(client = %name, "Socket closed while writing: {}", e);
            } else {
                tracing::warn!(client = %name, "Writing failed: {}", e);
            }
            return;
        }
    }

    let _ = writer.shutdown().await;
}

fn is_disconnect(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof
    )
}
