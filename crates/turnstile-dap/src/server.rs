//! TCP accept loop and per-connection message pump.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::sync::{mpsc, watch};

use crate::adapter::DebugAdapter;
use crate::error::DapError;
use crate::protocol::{Incoming, Response};
use crate::transport::{read_message, write_message};

/// Listens for debugger connections and serves them one at a time.
pub struct DebugServer {
    adapter: Arc<DebugAdapter>,
    listener: TcpListener,
}

impl DebugServer {
    pub async fn bind(adapter: Arc<DebugAdapter>, addr: impl ToSocketAddrs) -> Result<Self, DapError> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { adapter, listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, DapError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve connections until `shutdown` turns true.
    ///
    /// Paused turns are released when a connection ends and again when the
    /// server stops.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), DapError> {
        let addr = self.local_addr()?;
        tracing::info!(%addr, "debug bridge listening");

        loop {
            let (stream, peer) = tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        continue;
                    }
                },
                _ = wait_for(&mut shutdown) => break,
            };

            tracing::info!(%peer, "debugger connected");
            let (reader, writer) = stream.into_split();
            let served = tokio::select! {
                served = serve_connection(self.adapter.clone(), BufReader::new(reader), writer) => served,
                _ = wait_for(&mut shutdown) => {
                    self.adapter.detach();
                    break;
                }
            };
            match served {
                Ok(()) => tracing::info!(%peer, "debugger disconnected"),
                Err(e) => tracing::warn!(%peer, error = %e, "debugger connection failed"),
            }
        }

        self.adapter.close();
        tracing::info!("debug bridge stopped");
        Ok(())
    }
}

async fn wait_for(shutdown: &mut watch::Receiver<bool>) {
    while !*shutdown.borrow_and_update() {
        if shutdown.changed().await.is_err() {
            // Sender gone: nobody can ask for shutdown any more.
            std::future::pending::<()>().await;
        }
    }
}

/// Pump one debugger connection until it closes or fails.
///
/// Errors raised by a handler become failure responses; read, parse and
/// send errors end the connection.
pub async fn serve_connection<R, W>(
    adapter: Arc<DebugAdapter>,
    mut reader: R,
    mut writer: W,
) -> Result<(), DapError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel();
    adapter.attach(tx);

    let writer_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            if let Err(e) = write_message(&mut writer, &message).await {
                tracing::warn!(error = %e, "write to debugger failed");
                break;
            }
        }
    });

    let result = pump(&adapter, &mut reader).await;
    adapter.detach();
    if let Err(e) = writer_task.await {
        tracing::warn!(error = %e, "writer task failed");
    }
    result
}

async fn pump<R>(adapter: &DebugAdapter, reader: &mut R) -> Result<(), DapError>
where
    R: AsyncBufRead + Unpin,
{
    while let Some(value) = read_message(reader).await? {
        let message =
            Incoming::from_value(value).map_err(|e| DapError::InvalidMessage(e.to_string()))?;
        tracing::debug!(kind = message.kind(), command = message.command(), seq = message.seq(), "received");

        match adapter.dispatch(&message) {
            Ok(reply) => {
                adapter.send(Response::success(message.seq(), message.command(), reply.body))?;
                for event in reply.events {
                    adapter.send(event)?;
                }
            }
            Err(e) => {
                tracing::warn!(command = message.command(), error = %e, "request failed");
                adapter.send(Response::failure(message.seq(), message.command(), e.to_string()))?;
            }
        }
    }
    Ok(())
}
