//! In-process relay joining two connections.
//!
//! Plays the relay's part for a pair of [`Connection`]s living in the same
//! process: routes tunnel requests to the opposite side, maps tunnel ids
//! across sides, forwards allowance, transfer and close events, and answers an
//! initiation nobody accepted with a zero chunk limit once its timeout elapses.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::TunnelConfig;
use crate::connection::{Connection, IncomingTunnels};
use crate::error::{Result, TunnelError};
use crate::relay::Relay;
use crate::TunnelId;

/// Two connections wired back to back through a loopback relay.
pub struct Loopback {
    /// The first connection.
    pub left: Arc<Connection>,
    /// Tunnels the right side opened towards the left.
    pub left_incoming: IncomingTunnels,
    /// The second connection.
    pub right: Arc<Connection>,
    /// Tunnels the left side opened towards the right.
    pub right_incoming: IncomingTunnels,
}

/// Builds a connected pair. Accepting sides use `config.chunk_limit`.
///
/// Must be called from within a tokio runtime.
pub fn pair(config: TunnelConfig) -> Loopback {
    let hub = Arc::new(Hub {
        chunk_limit: config.chunk_limit,
        sides: [OnceLock::new(), OnceLock::new()],
        pending: Mutex::new(HashSet::new()),
        links: Mutex::new(HashMap::new()),
    });
    let (left, left_incoming) = Connection::new(
        Arc::new(LoopbackRelay {
            hub: Arc::clone(&hub),
            side: 0,
        }),
        config.clone(),
    );
    let (right, right_incoming) = Connection::new(
        Arc::new(LoopbackRelay {
            hub: Arc::clone(&hub),
            side: 1,
        }),
        config,
    );
    let _ = hub.sides[0].set(Arc::downgrade(&left));
    let _ = hub.sides[1].set(Arc::downgrade(&right));

    Loopback {
        left,
        left_incoming,
        right,
        right_incoming,
    }
}

type Side = usize;

struct Hub {
    chunk_limit: usize,
    sides: [OnceLock<Weak<Connection>>; 2],
    /// Initiations awaiting an accept, keyed by initiating side and tunnel id.
    pending: Mutex<HashSet<(Side, TunnelId)>>,
    /// Local tunnel id on one side to the id of its counterpart on the other.
    links: Mutex<HashMap<(Side, TunnelId), TunnelId>>,
}

impl Hub {
    fn conn(&self, side: Side) -> Result<Arc<Connection>> {
        self.sides[side]
            .get()
            .and_then(Weak::upgrade)
            .ok_or_else(|| TunnelError::Relay {
                reason: "loopback peer connection dropped".to_string(),
            })
    }

    fn peer_of(&self, side: Side, id: TunnelId) -> Result<TunnelId> {
        self.links
            .lock()
            .unwrap()
            .get(&(side, id))
            .copied()
            .ok_or_else(|| TunnelError::Relay {
                reason: format!("unknown tunnel {}", id),
            })
    }
}

/// [`Relay`] implementation for one side of a [`Loopback`] pair.
pub struct LoopbackRelay {
    hub: Arc<Hub>,
    side: Side,
}

impl LoopbackRelay {
    fn other(&self) -> Side {
        1 - self.side
    }
}

#[async_trait]
impl Relay for LoopbackRelay {
    async fn send_tunnel_init(&self, tunnel_id: TunnelId, cluster: &str, timeout_ms: u64) -> Result<()> {
        tracing::debug!(side = self.side, tunnel = tunnel_id, cluster, timeout_ms, "loopback tunnel request");
        self.hub.pending.lock().unwrap().insert((self.side, tunnel_id));

        match self.hub.conn(self.other()) {
            Ok(peer) if !peer.is_closed() => peer.handle_tunnel_request(tunnel_id, self.hub.chunk_limit),
            _ => tracing::debug!(tunnel = tunnel_id, "no loopback peer to accept"),
        }

        let hub = Arc::clone(&self.hub);
        let side = self.side;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(timeout_ms)).await;
            if !hub.pending.lock().unwrap().remove(&(side, tunnel_id)) {
                return;
            }
            if let Ok(origin) = hub.conn(side) {
                origin.handle_tunnel_init_result(tunnel_id, 0);
            }
        });
        Ok(())
    }

    async fn send_tunnel_confirm(&self, init_id: TunnelId, tunnel_id: TunnelId) -> Result<()> {
        let origin_side = self.other();
        if !self.hub.pending.lock().unwrap().remove(&(origin_side, init_id)) {
            return Err(TunnelError::Relay {
                reason: format!("tunnel request {} expired", init_id),
            });
        }
        {
            let mut links = self.hub.links.lock().unwrap();
            links.insert((self.side, tunnel_id), init_id);
            links.insert((origin_side, init_id), tunnel_id);
        }
        let origin = self.hub.conn(origin_side)?;
        origin.handle_tunnel_init_result(init_id, self.hub.chunk_limit);
        Ok(())
    }

    async fn send_tunnel_allowance(&self, tunnel_id: TunnelId, space: usize) -> Result<()> {
        let peer_id = self.hub.peer_of(self.side, tunnel_id)?;
        self.hub.conn(self.other())?.handle_tunnel_allowance(peer_id, space);
        Ok(())
    }

    async fn send_tunnel_transfer(&self, tunnel_id: TunnelId, size_or_cont: usize, chunk: Bytes) -> Result<()> {
        let peer_id = self.hub.peer_of(self.side, tunnel_id)?;
        self.hub
            .conn(self.other())?
            .handle_tunnel_transfer(peer_id, size_or_cont, &chunk);
        Ok(())
    }

    async fn send_tunnel_close(&self, tunnel_id: TunnelId) -> Result<()> {
        let peer_id = {
            let mut links = self.hub.links.lock().unwrap();
            let peer_id = links.remove(&(self.side, tunnel_id));
            if let Some(peer_id) = peer_id {
                links.remove(&(self.other(), peer_id));
            }
            peer_id
        };
        let Some(peer_id) = peer_id else {
            return Err(TunnelError::Relay {
                reason: format!("unknown tunnel {}", tunnel_id),
            });
        };
        if let Ok(peer) = self.hub.conn(self.other()) {
            peer.handle_tunnel_close(peer_id, "");
        }
        self.hub.conn(self.side)?.handle_tunnel_close(tunnel_id, "");
        Ok(())
    }
}
