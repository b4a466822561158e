//! One point-to-point session with a peer.
//!
//! [`PeerSession`] interprets the pure transport state machine from
//! `pairsync-core` over a [`RadioTransport`]:
//!
//! ```text
//! Orchestrator → PeerSession → RadioTransport → radio
//!                    ↓
//!            TransportState::on_event (pure)
//! ```
//!
//! A session opens (or accepts) one link, proves both ends hold the same
//! pairing key, and then moves framed messages and chunked batches. It never
//! retries; that is the orchestrator's job.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pairsync_core::{Action, ChunkBuffer, ChunkVerdict, TransportEvent, TransportState};
use pairsync_types::{
    split_into_chunks, Bye, Challenge, ChallengeResponse, ChunkAck, ChunkRetransmit, DataChunk,
    EntityKind, ErrorMessage, Message, PeerId, ProtocolError,
};
use tokio::sync::{broadcast, Notify};
use tokio::time::{error::Elapsed, timeout};
use tracing::debug;

use crate::config::SessionConfig;
use crate::crypto::{fresh_nonce, PairingKey, ProofRole};
use crate::error::SessionError;
use crate::metrics::SyncMetrics;
use crate::transport::{ConnectionHandle, RadioEvent, RadioTransport, TransportError};

/// Error code sent when a handshake proof does not verify.
pub const ERR_UNAUTHORIZED: u16 = 401;

/// Error code sent when a frame carries an unsupported protocol version.
pub const ERR_UNSUPPORTED_VERSION: u16 = 505;

/// Cooperative cancellation flag shared between the orchestrator and a session.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    /// Create a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation and wake every waiter.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once cancellation is requested.
    pub async fn cancelled(&self) {
        loop {
            // Register before checking so a cancel in between is not missed
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// One session over one radio link.
pub struct PeerSession<R: RadioTransport> {
    radio: Arc<R>,
    key: Arc<PairingKey>,
    config: SessionConfig,
    state: TransportState,
    handle: Option<ConnectionHandle>,
    events: broadcast::Receiver<RadioEvent>,
    metrics: Arc<SyncMetrics>,
    cancel: CancelToken,
    /// Error stashed by an action, returned once the event queue drains.
    failure: Option<SessionError>,
}

impl<R: RadioTransport> std::fmt::Debug for PeerSession<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSession")
            .field("state", &self.state)
            .field("handle", &self.handle)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<R: RadioTransport> PeerSession<R> {
    /// Create an idle session.
    pub fn new(
        radio: Arc<R>,
        key: Arc<PairingKey>,
        config: SessionConfig,
        metrics: Arc<SyncMetrics>,
        cancel: CancelToken,
    ) -> Self {
        let events = radio.subscribe();
        Self {
            radio,
            key,
            config,
            state: TransportState::new(),
            handle: None,
            events,
            metrics,
            cancel,
            failure: None,
        }
    }

    /// Current transport state.
    pub fn state(&self) -> &TransportState {
        &self.state
    }

    /// Peer on the other end, while the link is live.
    pub fn peer(&self) -> Option<&PeerId> {
        self.state.peer()
    }

    /// Open a link to `peer` and run the handshake as initiator.
    pub async fn connect(&mut self, peer: &PeerId) -> Result<(), SessionError> {
        self.drive(TransportEvent::ConnectRequested { peer: peer.clone() })
            .await?;
        self.ensure_connected()
    }

    /// Wait for an incoming link and run the handshake as responder.
    ///
    /// Returns the verified peer.
    pub async fn accept(&mut self) -> Result<PeerId, SessionError> {
        let (handle, peer) = self.radio.accept().await?;
        self.handle = Some(handle);
        self.drive(TransportEvent::IncomingAccepted { peer: peer.clone() })
            .await?;
        self.ensure_connected()?;
        Ok(peer)
    }

    /// Tear the link down from any state. Best effort; never fails.
    pub async fn disconnect(&mut self) {
        if matches!(self.state, TransportState::Idle) && self.handle.is_none() {
            return;
        }
        if let Err(err) = self.drive(TransportEvent::DisconnectRequested).await {
            debug!(error = %err, "disconnect reported an error");
        }
    }

    /// Send one framed message.
    pub async fn send_message(&self, message: &Message) -> Result<(), SessionError> {
        let handle = self.handle.ok_or(SessionError::NotConnected)?;
        let frame = message.to_frame()?;
        match timeout(self.config.receive_timeout(), self.radio.send(handle, &frame)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(TransportError::Timeout.into()),
        }
    }

    /// Receive one framed message within the receive timeout.
    ///
    /// A remote `ErrorMessage` surfaces as an error, as does a `Bye`.
    pub async fn recv_message(&mut self) -> Result<Message, SessionError> {
        self.recv_within(self.config.receive_timeout()).await
    }

    /// Send a batch as stop-and-wait chunks. Returns the number of chunks.
    pub async fn send_batch(&mut self, kind: EntityKind, bytes: &[u8]) -> Result<u32, SessionError> {
        self.ensure_connected()?;
        let chunks = split_into_chunks(kind, bytes);
        let result = self.send_chunks(&chunks).await;
        self.finish_transfer(result).await?;
        Ok(chunks.len() as u32)
    }

    /// Receive a batch of `kind`, acking or re-requesting each chunk.
    pub async fn receive_batch(&mut self, kind: EntityKind) -> Result<Vec<u8>, SessionError> {
        self.ensure_connected()?;
        let result = self.receive_chunks(kind).await;
        self.finish_transfer(result).await
    }

    fn ensure_connected(&self) -> Result<(), SessionError> {
        if self.state.is_connected() {
            Ok(())
        } else {
            Err(SessionError::NotConnected)
        }
    }

    fn check_cancelled(&self) -> Result<(), SessionError> {
        if self.cancel.is_cancelled() {
            Err(SessionError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Feed an event through the state machine and execute the actions.
    async fn drive(&mut self, event: TransportEvent) -> Result<(), SessionError> {
        let mut pending = VecDeque::from([event]);
        while let Some(event) = pending.pop_front() {
            let from = self.state.name();
            let (next, actions) = std::mem::take(&mut self.state).on_event(event);
            if next.name() != from {
                debug!(from, to = next.name(), "transport transition");
            }
            self.state = next;

            for action in actions {
                if let Some(follow_up) = self.execute(action).await {
                    pending.push_back(follow_up);
                }
            }
        }

        match self.failure.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn execute(&mut self, action: Action) -> Option<TransportEvent> {
        match action {
            Action::Connect { peer } => {
                let wait = self.config.connect_timeout();
                match timeout(wait, self.radio.connect(&peer)).await {
                    Ok(Ok(handle)) => {
                        self.handle = Some(handle);
                        Some(TransportEvent::ConnectSucceeded)
                    }
                    Ok(Err(err)) => Some(self.connect_failed(err.into())),
                    Err(_) => Some(self.connect_failed(SessionError::ConnectTimeout(wait))),
                }
            }
            Action::SendChallenge => {
                let result = timeout(self.config.verify_timeout(), self.challenge_peer()).await;
                Some(self.verification_outcome(result))
            }
            Action::AnswerChallenge => {
                let result = timeout(self.config.verify_timeout(), self.answer_challenge()).await;
                Some(self.verification_outcome(result))
            }
            Action::SendBye => {
                let _ = self.send_message(&Message::Bye(Bye { reason: None })).await;
                None
            }
            Action::Disconnect => {
                if let Some(handle) = self.handle.take() {
                    if let Err(err) = self.radio.disconnect(handle).await {
                        debug!(%handle, error = %err, "radio disconnect failed");
                    }
                }
                Some(TransportEvent::LinkClosed)
            }
            Action::EmitEvent(event) => {
                debug!(?event, "session event");
                None
            }
        }
    }

    fn connect_failed(&mut self, err: SessionError) -> TransportEvent {
        let error = err.to_string();
        self.failure = Some(err);
        TransportEvent::ConnectFailed { error }
    }

    fn verification_outcome(
        &mut self,
        result: Result<Result<(), SessionError>, Elapsed>,
    ) -> TransportEvent {
        let err = match result {
            Ok(Ok(())) => return TransportEvent::VerificationSucceeded,
            Ok(Err(SessionError::ReceiveTimeout(_))) | Err(_) => {
                SessionError::SecurityVerificationFailed(format!(
                    "no handshake within {:?}",
                    self.config.verify_timeout()
                ))
            }
            Ok(Err(err)) => err,
        };
        let error = err.to_string();
        self.failure = Some(err);
        TransportEvent::VerificationFailed { error }
    }

    /// Initiator side of the mutual challenge/response.
    async fn challenge_peer(&mut self) -> Result<(), SessionError> {
        let nonce = fresh_nonce()?;
        self.send_message(&Message::Challenge(Challenge { nonce }))
            .await?;

        let response = match self.recv_within(self.config.verify_timeout()).await? {
            Message::ChallengeResponse(response) => response,
            other => return Err(unexpected("ChallengeResponse", &other)),
        };
        if !self.key.verify(ProofRole::Response, &nonce, &response.proof) {
            return Err(self.reject_proof().await);
        }

        let counter = response.counter_challenge.ok_or_else(|| {
            SessionError::SecurityVerificationFailed("peer sent no counter-challenge".into())
        })?;
        let proof = self.key.prove(ProofRole::Confirmation, &counter)?;
        self.send_message(&Message::ChallengeResponse(ChallengeResponse {
            proof,
            counter_challenge: None,
        }))
        .await
    }

    /// Responder side of the mutual challenge/response.
    async fn answer_challenge(&mut self) -> Result<(), SessionError> {
        let challenge = match self.recv_within(self.config.verify_timeout()).await? {
            Message::Challenge(challenge) => challenge,
            other => return Err(unexpected("Challenge", &other)),
        };

        let proof = self.key.prove(ProofRole::Response, &challenge.nonce)?;
        let counter = fresh_nonce()?;
        self.send_message(&Message::ChallengeResponse(ChallengeResponse {
            proof,
            counter_challenge: Some(counter),
        }))
        .await?;

        let confirmation = match self.recv_within(self.config.verify_timeout()).await? {
            Message::ChallengeResponse(confirmation) => confirmation,
            other => return Err(unexpected("ChallengeResponse", &other)),
        };
        if !self
            .key
            .verify(ProofRole::Confirmation, &counter, &confirmation.proof)
        {
            return Err(self.reject_proof().await);
        }
        Ok(())
    }

    async fn reject_proof(&self) -> SessionError {
        let reason = "pairing proof did not verify";
        self.report_error(ERR_UNAUTHORIZED, reason).await;
        SessionError::SecurityVerificationFailed(reason.into())
    }

    /// Tell the peer why we are giving up. Best effort.
    async fn report_error(&self, code: u16, message: &str) {
        let error = Message::ErrorMessage(ErrorMessage {
            code,
            message: message.to_string(),
        });
        if let Err(err) = self.send_message(&error).await {
            debug!(code, error = %err, "could not report error to peer");
        }
    }

    async fn recv_within(&mut self, wait: Duration) -> Result<Message, SessionError> {
        let handle = self.handle.ok_or(SessionError::NotConnected)?;
        let radio = Arc::clone(&self.radio);
        let cancel = self.cancel.clone();

        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SessionError::Cancelled),
            received = timeout(wait, radio.receive(handle)) => match received {
                Ok(frame) => frame?,
                Err(_) => return Err(SessionError::ReceiveTimeout(wait)),
            },
            reason = wait_for_disconnect(&mut self.events, handle) => {
                return Err(TransportError::ChannelLost(reason).into());
            }
        };

        let message = match Message::from_frame(&frame) {
            Ok(message) => message,
            Err(err) => {
                if let ProtocolError::UnsupportedVersion { .. } = err {
                    self.report_error(ERR_UNSUPPORTED_VERSION, &err.to_string())
                        .await;
                }
                return Err(err.into());
            }
        };

        match message {
            Message::ErrorMessage(err) if err.code == ERR_UNAUTHORIZED => {
                Err(SessionError::SecurityVerificationFailed(err.message))
            }
            Message::ErrorMessage(err) => Err(ProtocolError::Remote {
                code: err.code,
                message: err.message,
            }
            .into()),
            Message::Bye(bye) => Err(TransportError::ChannelLost(
                bye.reason
                    .unwrap_or_else(|| "peer closed the session".to_string()),
            )
            .into()),
            other => Ok(other),
        }
    }

    async fn send_chunks(&mut self, chunks: &[DataChunk]) -> Result<(), SessionError> {
        for chunk in chunks {
            self.check_cancelled()?;
            self.drive(TransportEvent::ChunkExchanged).await?;

            let sequence = chunk.sequence_number;
            let mut retransmits = 0;
            loop {
                self.send_message(&Message::DataChunk(chunk.clone()))
                    .await?;
                SyncMetrics::incr(&self.metrics.chunks_sent);

                match self.recv_message().await? {
                    Message::ChunkAck(ack) if ack.sequence_number == sequence => break,
                    Message::ChunkRetransmit(request) if request.sequence_number == sequence => {
                        if retransmits >= self.config.max_retransmits {
                            return Err(SessionError::RetransmitBudgetExhausted {
                                sequence,
                                attempts: retransmits,
                            });
                        }
                        retransmits += 1;
                        SyncMetrics::incr(&self.metrics.chunks_retransmitted);
                        debug!(sequence, retransmits, "peer requested retransmission");
                    }
                    other => return Err(unexpected("ChunkAck", &other)),
                }
            }
        }
        Ok(())
    }

    async fn receive_chunks(&mut self, kind: EntityKind) -> Result<Vec<u8>, SessionError> {
        let mut buffer = ChunkBuffer::new(kind);
        let mut wait = self.config.receive_timeout();

        while !buffer.is_complete() {
            self.check_cancelled()?;

            let message = match self.recv_within(wait).await {
                Ok(message) => message,
                Err(SessionError::ReceiveTimeout(_)) if buffer.received() > 0 => {
                    return Err(SessionError::IncompleteTransfer {
                        received: buffer.received(),
                        expected: buffer.expected().unwrap_or(0),
                    });
                }
                Err(err) => return Err(err),
            };
            let chunk = match message {
                Message::DataChunk(chunk) => chunk,
                other => return Err(unexpected("DataChunk", &other)),
            };
            self.drive(TransportEvent::ChunkExchanged).await?;

            let sequence_number = chunk.sequence_number;
            let reply = match buffer.accept(chunk)? {
                ChunkVerdict::Accepted { .. } | ChunkVerdict::Duplicate => {
                    Message::ChunkAck(ChunkAck { sequence_number })
                }
                ChunkVerdict::Retransmit => {
                    debug!(sequence_number, "chunk failed its checksum");
                    Message::ChunkRetransmit(ChunkRetransmit { sequence_number })
                }
            };
            self.send_message(&reply).await?;
            wait = self.config.chunk_idle_timeout();
        }

        Ok(buffer.finish()?)
    }

    async fn finish_transfer<T>(
        &mut self,
        result: Result<T, SessionError>,
    ) -> Result<T, SessionError> {
        match result {
            Ok(value) => {
                self.drive(TransportEvent::TransferFinished).await?;
                Ok(value)
            }
            Err(err) => {
                let error = err.to_string();
                self.drive(TransportEvent::TransferFailed { error }).await?;
                Err(err)
            }
        }
    }
}

pub(crate) fn unexpected(expected: &str, actual: &Message) -> SessionError {
    ProtocolError::UnexpectedMessage {
        expected: expected.to_string(),
        actual: actual.kind().to_string(),
    }
    .into()
}

/// Resolves when the radio reports `handle` as gone.
async fn wait_for_disconnect(
    events: &mut broadcast::Receiver<RadioEvent>,
    handle: ConnectionHandle,
) -> String {
    loop {
        match events.recv().await {
            Ok(RadioEvent::Disconnected { handle: gone, peer }) if gone == handle => {
                return format!("{peer} went out of range");
            }
            Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
        }
    }
}
