//! Star-topology stream transport.
//!
//! The host accepts one stream per guest and numbers guests from 1; it is
//! always [`PeerId::HOST`]. The first envelope on every stream is the host's
//! `Assign`, telling the guest its identity. After that both directions carry
//! length-prefixed `Frame` envelopes.
//!
//! Each link runs a reader task and a writer task. Readers turn inbound frames
//! into [`TransportEvent`]s on one shared channel, so the driver sees all
//! transport activity on a single task. A reader that hits end-of-stream or a
//! framing error reports the peer as disconnected.
//!
//! Streams are generic so the same code runs over TCP, in-memory duplex pipes
//! and simulated networks.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use penholder_proto::{Envelope, PeerId, WireFrame, read_envelope, write_envelope};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    sync::mpsc,
    task::JoinHandle,
};

use crate::error::NodeError;

/// Activity on the transport, delivered to the driver.
#[derive(Debug)]
pub enum TransportEvent {
    /// A guest connected (host side only).
    Connected {
        /// Identity assigned to the guest.
        peer: PeerId,
        /// Outbound half of the new link.
        link: Link,
    },

    /// A frame arrived.
    Frame {
        /// Sending peer.
        from: PeerId,
        /// Received frame.
        frame: WireFrame,
    },

    /// A link closed or failed.
    Disconnected {
        /// Peer on the other end.
        peer: PeerId,
    },
}

/// Outbound half of a link.
#[derive(Debug)]
pub struct Link {
    outbox: mpsc::UnboundedSender<WireFrame>,
    writer: JoinHandle<()>,
}

impl Link {
    /// Queue a frame. Returns false if the link is gone.
    pub fn send(&self, frame: WireFrame) -> bool {
        self.outbox.send(frame).is_ok()
    }

    /// Stop accepting frames and wait until queued ones are written.
    pub async fn close(self) {
        drop(self.outbox);
        if let Err(error) = self.writer.await {
            tracing::debug!(%error, "link writer ended abnormally");
        }
    }
}

/// Spawn reader and writer tasks for an established stream.
fn spawn_link<S>(stream: S, peer: PeerId, events: mpsc::UnboundedSender<TransportEvent>) -> Link
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let (outbox, mut queued) = mpsc::unbounded_channel::<WireFrame>();

    tokio::spawn(async move {
        loop {
            match read_envelope(&mut reader).await {
                Ok(Envelope::Frame(frame)) => {
                    if events.send(TransportEvent::Frame { from: peer, frame }).is_err() {
                        return;
                    }
                },
                Ok(Envelope::Assign { .. }) => {
                    tracing::warn!(%peer, "unexpected identity assignment, ignoring");
                },
                Err(error) => {
                    tracing::debug!(%peer, %error, "link closed");
                    let _ = events.send(TransportEvent::Disconnected { peer });
                    return;
                },
            }
        }
    });

    let writer = tokio::spawn(async move {
        while let Some(frame) = queued.recv().await {
            if let Err(error) = write_envelope(&mut writer, &Envelope::Frame(frame)).await {
                tracing::debug!(%peer, %error, "link write failed");
                return;
            }
        }
        if let Err(error) = writer.shutdown().await {
            tracing::debug!(%peer, %error, "link shutdown failed");
        }
    });

    Link { outbox, writer }
}

/// Admits guest streams on the host, handing out identities.
#[derive(Debug, Clone)]
pub struct Registrar {
    next_peer: Arc<AtomicU64>,
    events: mpsc::UnboundedSender<TransportEvent>,
}

impl Registrar {
    /// Create a registrar that reports to `events`.
    pub fn new(events: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self { next_peer: Arc::new(AtomicU64::new(1)), events }
    }

    /// Assign the next identity to a freshly accepted stream and start
    /// relaying its frames.
    ///
    /// # Errors
    ///
    /// Returns `NodeError` if the assignment cannot be written.
    pub async fn admit<S>(&self, mut stream: S) -> Result<PeerId, NodeError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let peer = PeerId::new(self.next_peer.fetch_add(1, Ordering::Relaxed));
        write_envelope(&mut stream, &Envelope::Assign { peer_id: peer }).await?;

        let link = spawn_link(stream, peer, self.events.clone());
        tracing::info!(%peer, "guest connected");

        if self.events.send(TransportEvent::Connected { peer, link }).is_err() {
            tracing::debug!(%peer, "driver gone, dropping guest");
        }
        Ok(peer)
    }
}

/// Complete the guest side of the handshake on a connected stream.
///
/// Returns the identity the host assigned and the link to the host.
///
/// # Errors
///
/// Returns `NodeError::Handshake` if the host's first envelope is not an
/// assignment, or an I/O error if the stream fails first.
pub async fn connect<S>(
    mut stream: S,
    events: mpsc::UnboundedSender<TransportEvent>,
) -> Result<(PeerId, Link), NodeError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let local = match read_envelope(&mut stream).await? {
        Envelope::Assign { peer_id } => peer_id,
        Envelope::Frame(frame) => {
            return Err(NodeError::Handshake {
                reason: format!("expected identity assignment, got frame on {}", frame.topic),
            });
        },
    };

    tracing::info!(%local, "connected to host");
    Ok((local, spawn_link(stream, PeerId::HOST, events)))
}

/// Pause between failed accepts, so a listener stuck on a persistent error
/// (out of descriptors, say) does not spin. Doubles per consecutive failure.
#[derive(Debug, Clone)]
pub(crate) struct AcceptBackoff {
    next: Duration,
}

impl AcceptBackoff {
    const MIN: Duration = Duration::from_millis(10);
    const MAX: Duration = Duration::from_secs(1);

    pub(crate) fn new() -> Self {
        Self { next: Self::MIN }
    }

    /// Record a failure and return how long to wait before retrying.
    pub(crate) fn failed(&mut self) -> Duration {
        let delay = self.next;
        self.next = self.next.saturating_mul(2).min(Self::MAX);
        delay
    }

    pub(crate) fn succeeded(&mut self) {
        self.next = Self::MIN;
    }
}
