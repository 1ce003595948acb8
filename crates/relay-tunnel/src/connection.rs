//! Relay connection: registry of live tunnels and dispatch of relay events.
//!
//! The connection hands out tunnel ids, keeps every live tunnel addressable by
//! id for the inbound dispatch path, and tears all of them down when it shuts
//! down. Tunnels themselves never touch the registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::config::TunnelConfig;
use crate::error::{Result, TunnelError};
use crate::relay::Relay;
use crate::signal::Termination;
use crate::tunnel::Tunnel;
use crate::TunnelId;

/// Stream of tunnels initiated by remote endpoints and accepted locally.
pub type IncomingTunnels = mpsc::UnboundedReceiver<Arc<Tunnel>>;

/// One connection to the local relay, multiplexing any number of tunnels.
pub struct Connection {
    pub(crate) relay: Arc<dyn Relay>,
    pub(crate) config: TunnelConfig,
    pub(crate) runtime: Handle,
    /// `None` once the connection is down.
    tunnels: Mutex<Option<HashMap<TunnelId, Arc<Tunnel>>>>,
    next_id: AtomicU64,
    incoming: mpsc::UnboundedSender<Arc<Tunnel>>,
    pub(crate) term: Termination,
}

impl Connection {
    /// Creates a connection on top of `relay`.
    ///
    /// Must be called from within a tokio runtime; background allowance
    /// grants and inbound accepts are spawned onto it.
    pub fn new(relay: Arc<dyn Relay>, config: TunnelConfig) -> (Arc<Self>, IncomingTunnels) {
        let (incoming, accepted) = mpsc::unbounded_channel();
        let conn = Arc::new(Self {
            relay,
            config,
            runtime: Handle::current(),
            tunnels: Mutex::new(Some(HashMap::new())),
            next_id: AtomicU64::new(0),
            incoming,
            term: Termination::new(),
        });
        (conn, accepted)
    }

    /// Returns the configuration shared by this connection's tunnels.
    pub fn config(&self) -> &TunnelConfig {
        &self.config
    }

    /// Assigns a fresh id and stores the tunnel built for it.
    pub(crate) fn register<T>(
        &self,
        build: impl FnOnce(TunnelId) -> (Arc<Tunnel>, T),
    ) -> Result<(Arc<Tunnel>, T)> {
        let mut tunnels = self.tunnels.lock().unwrap();
        let Some(live) = tunnels.as_mut() else {
            return Err(TunnelError::Closed);
        };
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tunnel, extra) = build(id);
        live.insert(id, Arc::clone(&tunnel));
        Ok((tunnel, extra))
    }

    /// Drops a tunnel from the registry.
    pub(crate) fn remove(&self, id: TunnelId) -> Option<Arc<Tunnel>> {
        self.tunnels
            .lock()
            .unwrap()
            .as_mut()
            .and_then(|live| live.remove(&id))
    }

    /// Looks up a live tunnel by id.
    pub fn tunnel(&self, id: TunnelId) -> Option<Arc<Tunnel>> {
        self.tunnels
            .lock()
            .unwrap()
            .as_ref()
            .and_then(|live| live.get(&id).cloned())
    }

    /// Returns the number of registered tunnels, pending ones included.
    pub fn tunnel_count(&self) -> usize {
        self.tunnels
            .lock()
            .unwrap()
            .as_ref()
            .map_or(0, |live| live.len())
    }

    /// Returns `true` once the connection shut down.
    pub fn is_closed(&self) -> bool {
        self.term.is_fired()
    }

    fn dispatch(&self, id: TunnelId, event: &str) -> Option<Arc<Tunnel>> {
        let tunnel = self.tunnel(id);
        if tunnel.is_none() {
            tracing::debug!(tunnel = id, event, "event for unknown tunnel dropped");
        }
        tunnel
    }

    /// Relay event: a remote endpoint asks for a tunnel with the given chunk limit.
    ///
    /// The accept handshake runs in the background; accepted tunnels appear on
    /// the [`IncomingTunnels`] stream.
    pub fn handle_tunnel_request(self: &Arc<Self>, init_id: TunnelId, chunk_limit: usize) {
        let conn = Arc::clone(self);
        self.runtime.spawn(async move {
            let tunnel = match conn.accept_tunnel(init_id, chunk_limit).await {
                Ok(tunnel) => tunnel,
                Err(err) => {
                    tracing::warn!(init_id, error = %err, "inbound tunnel request failed");
                    return;
                }
            };
            if let Err(mpsc::error::SendError(tunnel)) = conn.incoming.send(tunnel) {
                tracing::warn!(tunnel = tunnel.id(), "no listener for inbound tunnels, closing");
                let _ = tunnel.close().await;
            }
        });
    }

    /// Relay event: outcome of a locally initiated tunnel.
    pub fn handle_tunnel_init_result(&self, id: TunnelId, chunk_limit: usize) {
        if let Some(tunnel) = self.dispatch(id, "init_result") {
            tunnel.handle_init_result(chunk_limit);
        }
    }

    /// Relay event: the peer granted more send allowance.
    pub fn handle_tunnel_allowance(&self, id: TunnelId, space: usize) {
        if let Some(tunnel) = self.dispatch(id, "allowance") {
            tunnel.handle_allowance(space);
        }
    }

    /// Relay event: a message chunk arrived.
    pub fn handle_tunnel_transfer(&self, id: TunnelId, size_or_cont: usize, chunk: &[u8]) {
        if let Some(tunnel) = self.dispatch(id, "transfer") {
            tunnel.handle_transfer(size_or_cont, chunk);
        }
    }

    /// Relay event: the tunnel was torn down, gracefully if `reason` is empty.
    pub fn handle_tunnel_close(&self, id: TunnelId, reason: &str) {
        if let Some(tunnel) = self.remove(id) {
            tunnel.handle_close(reason);
        } else {
            tracing::debug!(tunnel = id, "close for unknown tunnel dropped");
        }
    }

    /// Shuts the connection down.
    ///
    /// Pending constructions fail with `Closed`, every live tunnel is closed
    /// with `reason` and new tunnels can no longer be created.
    pub fn shutdown(&self, reason: &str) {
        if !self.term.fire(Some(reason.to_string())) {
            return;
        }
        let live = self.tunnels.lock().unwrap().take();
        let live = live.unwrap_or_default();
        tracing::info!(tunnels = live.len(), reason, "connection shutting down");
        for tunnel in live.into_values() {
            tunnel.handle_close(reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::testing::RecordingRelay;

    fn connection() -> (Arc<Connection>, IncomingTunnels, Arc<RecordingRelay>) {
        let relay = Arc::new(RecordingRelay::new());
        let (conn, incoming) = Connection::new(relay.clone(), TunnelConfig::default());
        (conn, incoming, relay)
    }

    fn accepted(conn: &Connection, chunk_limit: usize) -> Arc<Tunnel> {
        let (tunnel, ()) = conn
            .register(|id| {
                let tunnel = Tunnel::accepted(id, conn.relay.clone(), conn.runtime.clone(), chunk_limit);
                (tunnel, ())
            })
            .unwrap();
        tunnel
    }

    #[tokio::test]
    async fn test_ids_unique_and_sequential() {
        let (conn, _incoming, _relay) = connection();
        let ids: Vec<_> = (0..5).map(|_| accepted(&conn, 16).id()).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
        assert_eq!(conn.tunnel_count(), 5);
    }

    #[tokio::test]
    async fn test_dispatch_reaches_tunnel() {
        let (conn, _incoming, _relay) = connection();
        let tunnel = accepted(&conn, 16);

        conn.handle_tunnel_allowance(tunnel.id(), 100);
        conn.handle_tunnel_transfer(tunnel.id(), 3, b"abc");

        assert_eq!(tunnel.available_allowance(), 100);
        assert_eq!(tunnel.buffered_messages(), 1);
    }

    #[tokio::test]
    async fn test_dispatch_unknown_tunnel_ignored() {
        let (conn, _incoming, _relay) = connection();
        conn.handle_tunnel_allowance(99, 100);
        conn.handle_tunnel_transfer(99, 3, b"abc");
        conn.handle_tunnel_close(99, "");
        conn.handle_tunnel_init_result(99, 16);
        assert_eq!(conn.tunnel_count(), 0);
    }

    #[tokio::test]
    async fn test_close_event_unregisters() {
        let (conn, _incoming, _relay) = connection();
        let tunnel = accepted(&conn, 16);

        conn.handle_tunnel_close(tunnel.id(), "");
        assert!(tunnel.is_closed());
        assert!(conn.tunnel(tunnel.id()).is_none());
        assert!(tunnel.close().await.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_closes_all_tunnels() {
        let (conn, _incoming, _relay) = connection();
        let first = accepted(&conn, 16);
        let second = accepted(&conn, 16);

        conn.shutdown("connection terminating");
        assert!(conn.is_closed());
        assert_eq!(conn.tunnel_count(), 0);
        for tunnel in [first, second] {
            assert!(matches!(
                tunnel.close().await,
                Err(TunnelError::Remote { .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_register_after_shutdown_fails() {
        let (conn, _incoming, _relay) = connection();
        conn.shutdown("gone");

        let result = conn.register(|id| {
            (Tunnel::accepted(id, conn.relay.clone(), conn.runtime.clone(), 16), ())
        });
        assert!(matches!(result, Err(TunnelError::Closed)));
    }

    #[tokio::test]
    async fn test_tunnel_request_yields_incoming() {
        let (conn, mut incoming, relay) = connection();
        conn.handle_tunnel_request(42, 512);

        let tunnel = incoming.recv().await.unwrap();
        assert_eq!(tunnel.chunk_limit(), Some(512));
        assert!(relay
            .calls()
            .contains(&crate::relay::testing::RelayCall::Confirm {
                init_id: 42,
                tunnel_id: tunnel.id(),
            }));
    }
}
