//! A single relay tunnel.
//!
//! The application side blocks in [`Tunnel::send`], [`Tunnel::recv`] and
//! [`Tunnel::close`]. The connection's dispatch path feeds relay events into the
//! non-blocking `handle_*` methods, which update shared state and raise the
//! matching wake signal.
//!
//! Send allowance and the inbound queue live in two independent lock domains
//! that are never held together. Terminal state is a write-once broadcast.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use bytes::Bytes;
use tokio::runtime::Handle;
use tokio::sync::{oneshot, Notify};

use crate::allowance::Allowance;
use crate::chunk;
use crate::deadline::Deadline;
use crate::error::{Result, TunnelError};
use crate::inbound::Inbound;
use crate::relay::Relay;
use crate::signal::Termination;
use crate::TunnelId;

/// Ordered, flow-controlled message stream to a remote endpoint.
///
/// Tunnels are created by a [`Connection`](crate::Connection), never directly.
pub struct Tunnel {
    id: TunnelId,
    relay: Arc<dyn Relay>,
    runtime: Handle,

    chunk_limit: OnceLock<usize>,
    init: Mutex<Option<oneshot::Sender<usize>>>,

    inbound: Inbound,
    outbound: Allowance,

    send_serial: tokio::sync::Mutex<()>,
    recv_serial: tokio::sync::Mutex<()>,

    close_sent: AtomicBool,
    close_failed: Notify,
    term: Termination,
}

impl std::fmt::Debug for Tunnel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tunnel")
            .field("id", &self.id)
            .field("chunk_limit", &self.chunk_limit.get())
            .field("closed", &self.term.is_fired())
            .finish()
    }
}

impl Tunnel {
    /// Creates a locally initiated tunnel that is still waiting for the remote
    /// accept. The receiver resolves with the negotiated chunk limit, `0` on rejection.
    pub(crate) fn pending(
        id: TunnelId,
        relay: Arc<dyn Relay>,
        runtime: Handle,
    ) -> (Arc<Self>, oneshot::Receiver<usize>) {
        let (tx, rx) = oneshot::channel();
        let tunnel = Self::build(id, relay, runtime, OnceLock::new(), Some(tx));
        (Arc::new(tunnel), rx)
    }

    /// Creates a remotely initiated tunnel whose chunk limit is already decided.
    pub(crate) fn accepted(
        id: TunnelId,
        relay: Arc<dyn Relay>,
        runtime: Handle,
        chunk_limit: usize,
    ) -> Arc<Self> {
        let limit = OnceLock::new();
        let _ = limit.set(chunk_limit);
        Arc::new(Self::build(id, relay, runtime, limit, None))
    }

    fn build(
        id: TunnelId,
        relay: Arc<dyn Relay>,
        runtime: Handle,
        chunk_limit: OnceLock<usize>,
        init: Option<oneshot::Sender<usize>>,
    ) -> Self {
        Self {
            id,
            relay,
            runtime,
            chunk_limit,
            init: Mutex::new(init),
            inbound: Inbound::new(),
            outbound: Allowance::new(),
            send_serial: tokio::sync::Mutex::new(()),
            recv_serial: tokio::sync::Mutex::new(()),
            close_sent: AtomicBool::new(false),
            close_failed: Notify::new(),
            term: Termination::new(),
        }
    }

    /// Returns the tunnel identifier.
    pub fn id(&self) -> TunnelId {
        self.id
    }

    /// Returns the negotiated chunk limit, or `None` before the handshake completed.
    pub fn chunk_limit(&self) -> Option<usize> {
        self.chunk_limit.get().copied()
    }

    /// Returns `true` once the tunnel reached terminal state.
    pub fn is_closed(&self) -> bool {
        self.term.is_fired()
    }

    /// Returns the send allowance currently granted by the peer.
    pub fn available_allowance(&self) -> usize {
        self.outbound.available()
    }

    /// Returns the number of complete messages waiting to be received.
    pub fn buffered_messages(&self) -> usize {
        self.inbound.len()
    }

    /// Sends a message to the remote endpoint, blocking until every chunk was
    /// handed to the relay or the timeout elapses.
    ///
    /// A zero timeout blocks indefinitely. A timeout does not close the tunnel,
    /// but chunks already shipped are not recalled; the peer discards the
    /// partial message once the next one starts.
    pub async fn send(&self, message: impl Into<Bytes>, timeout: Duration) -> Result<()> {
        let message = message.into();
        tracing::debug!(tunnel = self.id, len = message.len(), ?timeout, "sending message");

        if message.is_empty() {
            return Err(TunnelError::invalid("nil or empty message"));
        }
        if self.term.is_fired() {
            return Err(TunnelError::Closed);
        }
        let chunk_limit = self
            .chunk_limit()
            .ok_or_else(|| TunnelError::invalid("tunnel not established"))?;
        let deadline = Deadline::after(timeout);

        let _serial = tokio::select! {
            biased;
            _ = self.term.wait() => return Err(TunnelError::Closed),
            guard = self.send_serial.lock() => guard,
            _ = deadline.expired() => return Err(TunnelError::Timeout),
        };
        for (size_or_cont, chunk) in chunk::split(&message, chunk_limit) {
            self.send_chunk(size_or_cont, chunk, &deadline).await?;
        }
        Ok(())
    }

    /// Ships a single chunk once enough allowance is available.
    async fn send_chunk(&self, size_or_cont: usize, chunk: Bytes, deadline: &Deadline) -> Result<()> {
        let need = chunk.len();
        tokio::select! {
            biased;
            _ = self.term.wait() => return Err(TunnelError::Closed),
            _ = self.outbound.acquire(need) => {}
            _ = deadline.expired() => return Err(TunnelError::Timeout),
        }
        self.relay
            .send_tunnel_transfer(self.id, size_or_cont, chunk)
            .await
    }

    /// Receives the next message, blocking until one arrives or the timeout elapses.
    ///
    /// A zero timeout blocks indefinitely. Messages already buffered stay
    /// readable after the tunnel closed; once drained, `Closed` is returned.
    pub async fn recv(&self, timeout: Duration) -> Result<Bytes> {
        let deadline = Deadline::after(timeout);
        let fetch = async {
            let _serial = self.recv_serial.lock().await;
            self.inbound.pop().await
        };

        let message = tokio::select! {
            biased;
            message = fetch => message,
            _ = self.term.wait() => return Err(TunnelError::Closed),
            _ = deadline.expired() => return Err(TunnelError::Timeout),
        };
        tracing::debug!(tunnel = self.id, len = message.len(), "fetching queued message");
        self.grant_in_background(message.len());
        Ok(message)
    }

    /// Closes the tunnel. Blocked sends and receives fail with `Closed`.
    ///
    /// Waits until the relay acknowledges the tear-down, then returns the
    /// closure reason: `Ok` for a graceful close, `Remote` if the peer dropped
    /// the tunnel with an error. Repeated calls return the same result without
    /// notifying the relay again.
    pub async fn close(&self) -> Result<()> {
        loop {
            if self.term.is_fired() {
                return self.closure();
            }
            let failed = self.close_failed.notified();
            tokio::pin!(failed);
            failed.as_mut().enable();

            if !self.close_sent.swap(true, Ordering::AcqRel) {
                tracing::info!(tunnel = self.id, "closing tunnel");
                if let Err(err) = self.relay.send_tunnel_close(self.id).await {
                    self.close_sent.store(false, Ordering::Release);
                    self.close_failed.notify_waiters();
                    return Err(err);
                }
            }
            // A failed notification from another closer sends us back to retry.
            tokio::select! {
                biased;
                _ = self.term.wait() => return self.closure(),
                _ = &mut failed => {
                    tracing::debug!(tunnel = self.id, "concurrent close notification failed, retrying");
                }
            }
        }
    }

    fn closure(&self) -> Result<()> {
        match self.term.reason() {
            Some(Some(reason)) => Err(TunnelError::Remote {
                reason: reason.to_string(),
            }),
            Some(None) => Ok(()),
            None => Err(TunnelError::Closed),
        }
    }

    /// Grants allowance to the peer without blocking the caller. Failures are
    /// only logged; the grant is best effort.
    fn grant_in_background(&self, space: usize) {
        if space == 0 {
            return;
        }
        let relay = Arc::clone(&self.relay);
        let id = self.id;
        self.runtime.spawn(async move {
            if let Err(err) = relay.send_tunnel_allowance(id, space).await {
                tracing::warn!(tunnel = id, space, error = %err, "allowance grant failed");
            }
        });
    }

    /// Finalizes construction of a locally initiated tunnel.
    ///
    /// A positive `chunk_limit` means the remote accepted, `0` a rejection or timeout.
    pub fn handle_init_result(&self, chunk_limit: usize) {
        if chunk_limit > 0 && self.chunk_limit.set(chunk_limit).is_err() {
            tracing::warn!(tunnel = self.id, chunk_limit, "chunk limit already negotiated");
        }
        let waiter = self.init.lock().unwrap().take();
        match waiter {
            Some(tx) => {
                let _ = tx.send(chunk_limit);
            }
            None => tracing::warn!(tunnel = self.id, chunk_limit, "unexpected init result"),
        }
    }

    /// Increases the send allowance granted by the peer.
    pub fn handle_allowance(&self, space: usize) {
        self.outbound.grant(space);
    }

    /// Adds a chunk to the message being assembled, queueing it on completion.
    pub fn handle_transfer(&self, size_or_cont: usize, chunk: &[u8]) {
        if self.term.is_fired() {
            tracing::debug!(tunnel = self.id, len = chunk.len(), "chunk after close dropped");
            return;
        }
        let outcome = self.inbound.push_chunk(size_or_cont, chunk);
        if outcome.discarded > 0 {
            tracing::warn!(
                tunnel = self.id,
                discarded = outcome.discarded,
                "granting allowance of discarded partial message"
            );
            self.grant_in_background(outcome.discarded);
        }
    }

    /// Moves the tunnel to terminal state.
    ///
    /// An empty `reason` is a graceful close, anything else is the peer's error.
    pub fn handle_close(&self, reason: &str) {
        let stored = if reason.is_empty() {
            None
        } else {
            Some(reason.to_string())
        };
        if !self.term.fire(stored) {
            tracing::debug!(tunnel = self.id, "tunnel already closed");
            return;
        }
        if reason.is_empty() {
            tracing::info!(tunnel = self.id, "tunnel closed gracefully");
        } else {
            tracing::warn!(tunnel = self.id, reason, "tunnel dropped");
        }
    }
}
