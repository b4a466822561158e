//! In-process loopback radio.
//!
//! A [`LoopbackNetwork`] hands out [`LoopbackRadio`]s that can open links to
//! each other by address. Each link is a pair of bounded tokio channels.
//! Faults can be injected per radio: dropped connects, corrupted data chunks
//! and links severed after a number of sends.

use super::{ConnectionHandle, RadioEvent, RadioTransport, TransportError, RADIO_EVENT_CAPACITY};
use async_trait::async_trait;
use dashmap::DashMap;
use pairsync_types::{Message, PeerId};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{broadcast, mpsc};

/// Frames buffered per link direction.
const LINK_CAPACITY: usize = 64;

/// Pending incoming links per radio.
const ACCEPT_BACKLOG: usize = 8;

type SharedReceiver<T> = Arc<tokio::sync::Mutex<mpsc::Receiver<T>>>;

/// Registry of loopback radios reachable from each other.
#[derive(Debug, Clone, Default)]
pub struct LoopbackNetwork {
    inner: Arc<NetworkInner>,
}

#[derive(Debug, Default)]
struct NetworkInner {
    radios: DashMap<PeerId, mpsc::Sender<IncomingLink>>,
    next_handle: AtomicU64,
}

impl NetworkInner {
    fn next_handle(&self) -> ConnectionHandle {
        ConnectionHandle::new(self.next_handle.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

#[derive(Debug)]
struct IncomingLink {
    handle: ConnectionHandle,
    from: PeerId,
    tx: mpsc::Sender<Vec<u8>>,
    rx: mpsc::Receiver<Vec<u8>>,
}

impl LoopbackNetwork {
    /// Create an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a radio under `address`.
    ///
    /// Registering the same address again replaces the previous radio.
    pub fn radio(&self, address: impl Into<String>) -> LoopbackRadio {
        let address = PeerId::new(address);
        let (incoming_tx, incoming_rx) = mpsc::channel(ACCEPT_BACKLOG);
        self.inner.radios.insert(address.clone(), incoming_tx);
        let (events, _) = broadcast::channel(RADIO_EVENT_CAPACITY);

        LoopbackRadio {
            address,
            network: Arc::clone(&self.inner),
            links: Arc::new(DashMap::new()),
            incoming: Arc::new(tokio::sync::Mutex::new(incoming_rx)),
            events,
            faults: Arc::new(Faults::default()),
        }
    }

    /// Take a radio off the network; connects to it fail with `PeerNotFound`.
    pub fn remove(&self, address: &PeerId) {
        self.inner.radios.remove(address);
    }
}

#[derive(Debug, Clone)]
struct Link {
    peer: PeerId,
    tx: mpsc::Sender<Vec<u8>>,
    rx: SharedReceiver<Vec<u8>>,
}

#[derive(Debug, Default)]
struct Faults {
    drop_connects: AtomicU32,
    corrupt_chunks: AtomicU32,
    sever_after_sends: Mutex<Option<u32>>,
}

/// One endpoint on a [`LoopbackNetwork`].
#[derive(Debug, Clone)]
pub struct LoopbackRadio {
    address: PeerId,
    network: Arc<NetworkInner>,
    links: Arc<DashMap<ConnectionHandle, Link>>,
    incoming: SharedReceiver<IncomingLink>,
    events: broadcast::Sender<RadioEvent>,
    faults: Arc<Faults>,
}

impl LoopbackRadio {
    /// Address other radios connect to.
    pub fn address(&self) -> &PeerId {
        &self.address
    }

    /// Fail the next `count` outgoing connects.
    pub fn drop_next_connects(&self, count: u32) {
        self.faults.drop_connects.store(count, Ordering::SeqCst);
    }

    /// Flip a payload byte in the next `count` outgoing data chunks.
    pub fn corrupt_next_chunks(&self, count: u32) {
        self.faults.corrupt_chunks.store(count, Ordering::SeqCst);
    }

    /// Sever the link on the send after the next `sends` successful ones.
    pub fn sever_after_sends(&self, sends: u32) {
        *self
            .faults
            .sever_after_sends
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(sends);
    }

    /// Number of live links.
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    fn take_fault(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn should_sever(&self) -> bool {
        let mut guard = self
            .faults
            .sever_after_sends
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match *guard {
            Some(0) => {
                *guard = None;
                true
            }
            Some(n) => {
                *guard = Some(n - 1);
                false
            }
            None => false,
        }
    }

    fn close_link(&self, handle: ConnectionHandle) -> Option<PeerId> {
        let (_, link) = self.links.remove(&handle)?;
        let _ = self.events.send(RadioEvent::Disconnected {
            handle,
            peer: link.peer.clone(),
        });
        Some(link.peer)
    }

    fn open_link(&self, handle: ConnectionHandle, link: Link) {
        let peer = link.peer.clone();
        self.links.insert(handle, link);
        let _ = self.events.send(RadioEvent::Connected { handle, peer });
    }

    fn corrupt(frame: &[u8]) -> Option<Vec<u8>> {
        match Message::from_frame(frame).ok()? {
            Message::DataChunk(mut chunk) if !chunk.payload.is_empty() => {
                chunk.payload[0] ^= 0xFF;
                Message::DataChunk(chunk).to_frame().ok()
            }
            _ => None,
        }
    }
}

#[async_trait]
impl RadioTransport for LoopbackRadio {
    async fn connect(&self, peer: &PeerId) -> Result<ConnectionHandle, TransportError> {
        if Self::take_fault(&self.faults.drop_connects) {
            return Err(TransportError::ConnectionFailed("link dropped".into()));
        }

        let acceptor = self
            .network
            .radios
            .get(peer)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TransportError::PeerNotFound(peer.clone()))?;

        let (to_peer_tx, to_peer_rx) = mpsc::channel(LINK_CAPACITY);
        let (from_peer_tx, from_peer_rx) = mpsc::channel(LINK_CAPACITY);

        let local = self.network.next_handle();
        let remote = self.network.next_handle();

        acceptor
            .send(IncomingLink {
                handle: remote,
                from: self.address.clone(),
                tx: from_peer_tx,
                rx: to_peer_rx,
            })
            .await
            .map_err(|_| TransportError::PeerNotFound(peer.clone()))?;

        self.open_link(
            local,
            Link {
                peer: peer.clone(),
                tx: to_peer_tx,
                rx: Arc::new(tokio::sync::Mutex::new(from_peer_rx)),
            },
        );
        Ok(local)
    }

    async fn accept(&self) -> Result<(ConnectionHandle, PeerId), TransportError> {
        let incoming = self
            .incoming
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| TransportError::ChannelLost("radio removed from network".into()))?;

        let peer = incoming.from.clone();
        self.open_link(
            incoming.handle,
            Link {
                peer: incoming.from,
                tx: incoming.tx,
                rx: Arc::new(tokio::sync::Mutex::new(incoming.rx)),
            },
        );
        Ok((incoming.handle, peer))
    }

    async fn send(&self, handle: ConnectionHandle, data: &[u8]) -> Result<(), TransportError> {
        let tx = self
            .links
            .get(&handle)
            .map(|link| link.tx.clone())
            .ok_or(TransportError::NotConnected)?;

        if self.should_sever() {
            self.close_link(handle);
            return Err(TransportError::ChannelLost("link severed".into()));
        }

        let frame = if self.faults.corrupt_chunks.load(Ordering::SeqCst) > 0 {
            match Self::corrupt(data) {
                Some(corrupted) if Self::take_fault(&self.faults.corrupt_chunks) => corrupted,
                _ => data.to_vec(),
            }
        } else {
            data.to_vec()
        };

        tx.send(frame)
            .await
            .map_err(|_| TransportError::ChannelLost("peer closed the link".into()))
    }

    async fn receive(&self, handle: ConnectionHandle) -> Result<Vec<u8>, TransportError> {
        let rx = self
            .links
            .get(&handle)
            .map(|link| Arc::clone(&link.rx))
            .ok_or(TransportError::NotConnected)?;

        let frame = rx.lock().await.recv().await;
        match frame {
            Some(frame) => Ok(frame),
            None => {
                self.close_link(handle);
                Err(TransportError::ChannelLost("peer closed the link".into()))
            }
        }
    }

    async fn disconnect(&self, handle: ConnectionHandle) -> Result<(), TransportError> {
        self.close_link(handle);
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<RadioEvent> {
        self.events.subscribe()
    }
}
