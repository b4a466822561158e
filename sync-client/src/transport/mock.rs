//! Mock radio for testing.
//!
//! Allows queueing incoming frames and capturing sent frames for verification.

use super::{ConnectionHandle, RadioEvent, RadioTransport, TransportError, RADIO_EVENT_CAPACITY};
use async_trait::async_trait;
use pairsync_types::PeerId;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

/// Mock radio for testing.
///
/// Serves a single scripted link. Frames queued with `queue_response` are
/// returned by `receive` in order; an empty queue reads as a lost channel.
#[derive(Debug)]
pub struct MockRadio {
    inner: Arc<Mutex<MockRadioInner>>,
    events: broadcast::Sender<RadioEvent>,
}

#[derive(Debug, Default)]
struct MockRadioInner {
    next_handle: u64,
    connected: Option<(ConnectionHandle, PeerId)>,
    sent_frames: Vec<Vec<u8>>,
    receive_queue: VecDeque<Vec<u8>>,
    incoming: VecDeque<PeerId>,
    connect_attempts: u32,
    fail_next_connect: Option<String>,
    fail_next_send: Option<String>,
    fail_next_receive: Option<String>,
}

impl MockRadio {
    /// Create a new mock radio.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(RADIO_EVENT_CAPACITY);
        Self {
            inner: Arc::new(Mutex::new(MockRadioInner::default())),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockRadioInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a frame to be returned by the next `receive()` call.
    pub fn queue_response(&self, frame: Vec<u8>) {
        self.lock().receive_queue.push_back(frame);
    }

    /// Queue a peer to be returned by the next `accept()` call.
    pub fn queue_incoming(&self, peer: PeerId) {
        self.lock().incoming.push_back(peer);
    }

    /// Get all frames that were sent.
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.lock().sent_frames.clone()
    }

    /// Get the last frame that was sent.
    pub fn last_sent(&self) -> Option<Vec<u8>> {
        self.lock().sent_frames.last().cloned()
    }

    /// Peer of the current link, if any.
    pub fn connected_peer(&self) -> Option<PeerId> {
        self.lock().connected.as_ref().map(|(_, p)| p.clone())
    }

    /// Number of `connect()` calls so far, failed ones included.
    pub fn connect_attempts(&self) -> u32 {
        self.lock().connect_attempts
    }

    /// Cause the next connect() to fail with the given error.
    pub fn fail_next_connect(&self, error: &str) {
        self.lock().fail_next_connect = Some(error.to_string());
    }

    /// Cause the next send() to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        self.lock().fail_next_send = Some(error.to_string());
    }

    /// Cause the next receive() to fail with the given error.
    pub fn fail_next_receive(&self, error: &str) {
        self.lock().fail_next_receive = Some(error.to_string());
    }

    /// Drop the current link as if the peer walked out of range.
    pub fn drop_link(&self) {
        let dropped = self.lock().connected.take();
        if let Some((handle, peer)) = dropped {
            let _ = self.events.send(RadioEvent::Disconnected { handle, peer });
        }
    }

    /// Clear all state (frames, queue, link).
    pub fn reset(&self) {
        *self.lock() = MockRadioInner::default();
    }

    fn open(&self, peer: PeerId) -> ConnectionHandle {
        let handle = {
            let mut inner = self.lock();
            inner.next_handle += 1;
            let handle = ConnectionHandle::new(inner.next_handle);
            inner.connected = Some((handle, peer.clone()));
            handle
        };
        let _ = self.events.send(RadioEvent::Connected { handle, peer });
        handle
    }

    fn check_link(inner: &MockRadioInner, handle: ConnectionHandle) -> Result<(), TransportError> {
        match &inner.connected {
            Some((h, _)) if *h == handle => Ok(()),
            _ => Err(TransportError::NotConnected),
        }
    }
}

impl Default for MockRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for MockRadio {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            events: self.events.clone(),
        }
    }
}

#[async_trait]
impl RadioTransport for MockRadio {
    async fn connect(&self, peer: &PeerId) -> Result<ConnectionHandle, TransportError> {
        {
            let mut inner = self.lock();
            inner.connect_attempts += 1;

            // Check for forced failure
            if let Some(error) = inner.fail_next_connect.take() {
                return Err(TransportError::ConnectionFailed(error));
            }
        }
        Ok(self.open(peer.clone()))
    }

    async fn accept(&self) -> Result<(ConnectionHandle, PeerId), TransportError> {
        let peer = self
            .lock()
            .incoming
            .pop_front()
            .ok_or_else(|| TransportError::ChannelLost("no incoming link".into()))?;
        Ok((self.open(peer.clone()), peer))
    }

    async fn send(&self, handle: ConnectionHandle, data: &[u8]) -> Result<(), TransportError> {
        let mut inner = self.lock();
        Self::check_link(&inner, handle)?;

        // Check for forced failure
        if let Some(error) = inner.fail_next_send.take() {
            return Err(TransportError::SendFailed(error));
        }

        inner.sent_frames.push(data.to_vec());
        Ok(())
    }

    async fn receive(&self, handle: ConnectionHandle) -> Result<Vec<u8>, TransportError> {
        let mut inner = self.lock();
        Self::check_link(&inner, handle)?;

        // Check for forced failure
        if let Some(error) = inner.fail_next_receive.take() {
            return Err(TransportError::ReceiveFailed(error));
        }

        inner
            .receive_queue
            .pop_front()
            .ok_or_else(|| TransportError::ChannelLost("receive queue empty".into()))
    }

    async fn disconnect(&self, handle: ConnectionHandle) -> Result<(), TransportError> {
        let closed = {
            let mut inner = self.lock();
            match &inner.connected {
                Some((h, _)) if *h == handle => inner.connected.take(),
                _ => None,
            }
        };
        if let Some((handle, peer)) = closed {
            let _ = self.events.send(RadioEvent::Disconnected { handle, peer });
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<RadioEvent> {
        self.events.subscribe()
    }
}
