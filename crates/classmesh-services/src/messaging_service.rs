//! Messaging service: one short JSON text payload per TCP connection.
//!
//! `MessagePayload` (in classmesh-core) is the wire format. There is no
//! connection reuse and no ordering across concurrent senders beyond what
//! each single connection gives.

use std::net::{IpAddr, SocketAddr};

use classmesh_core::wire::MAX_MESSAGE_BYTES;
use classmesh_core::{MeshError, MessagePayload};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use crate::events::{EventSink, ReceivedMessage};
use crate::net::{self, Outbound};

#[derive(Clone)]
pub struct MessagingService {
    port: u16,
    outbound: Outbound,
    events: EventSink,
}

impl MessagingService {
    pub fn new(port: u16, outbound: Outbound, events: EventSink) -> Self {
        Self {
            port,
            outbound,
            events,
        }
    }

    /// Send `text` to `peer_host`. Returns false, after reporting the error,
    /// on refusal or timeout. Never retries.
    pub async fn send_message(&self, peer_host: IpAddr, text: &str, sender_name: &str) -> bool {
        let addr = SocketAddr::new(peer_host, self.port);
        let result = match MessagePayload::new(text, sender_name).encode() {
            Ok(payload) => self.outbound.send_once(addr, &payload).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                tracing::debug!(%addr, len = text.len(), "message sent");
                true
            }
            Err(e) => {
                self.events.error(&e);
                false
            }
        }
    }

    /// Accept message connections until shutdown.
    pub async fn run(&self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(addr = ?listener.local_addr().ok(), "message listener starting");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("message listener shutting down");
                    return;
                }

                accepted = listener.accept() => {
                    let (stream, from) = match accepted {
                        Ok(r) => r,
                        Err(e) => {
                            self.events.error(&MeshError::io("message accept", e));
                            continue;
                        }
                    };

                    let events = self.events.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, from, &events).await {
                            events.error(&e);
                        }
                    });
                }
            }
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    from: SocketAddr,
    events: &EventSink,
) -> Result<(), MeshError> {
    let data = net::read_bounded(&mut stream, MAX_MESSAGE_BYTES).await?;
    let payload = MessagePayload::decode(&data)?;

    events.message_received(&ReceivedMessage {
        text: payload.message,
        sender_host: from.ip(),
        sender_name: payload.sender_name,
    });
    Ok(())
}
