//! Tunnel construction.
//!
//! A tunnel comes into existence either by local initiation, where it stays
//! pending until the remote side accepts and picks the chunk limit, or by
//! accepting a remote request, where the chunk limit is known up front. Both
//! paths finish by granting the peer the initial send allowance, and both
//! remove the half-built tunnel from the registry on failure.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::connection::Connection;
use crate::error::{Result, TunnelError};
use crate::tunnel::Tunnel;
use crate::TunnelId;

impl Connection {
    /// Opens a tunnel to a remote cluster.
    ///
    /// `timeout` bounds how long the relay searches for an accepting endpoint
    /// and must be at least one millisecond. Fails with `Timeout` if nobody
    /// accepted in time and with `Closed` if the connection went down meanwhile.
    pub async fn init_tunnel(&self, cluster: &str, timeout: Duration) -> Result<Arc<Tunnel>> {
        if cluster.is_empty() {
            return Err(TunnelError::invalid("empty cluster identifier"));
        }
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        if timeout_ms < 1 {
            return Err(TunnelError::invalid(format!("invalid timeout {:?} < 1ms", timeout)));
        }

        let (tunnel, init) = self.register(|id| Tunnel::pending(id, self.relay.clone(), self.runtime.clone()))?;
        let id = tunnel.id();
        tracing::info!(tunnel = id, cluster, ?timeout, "constructing outbound tunnel");

        match self.construct(id, cluster, timeout_ms, init).await {
            Ok(()) => {
                tracing::info!(tunnel = id, chunk_limit = ?tunnel.chunk_limit(), "tunnel construction completed");
                Ok(tunnel)
            }
            Err(err) => {
                self.remove(id);
                tracing::warn!(tunnel = id, reason = %err, "tunnel construction failed");
                Err(err)
            }
        }
    }

    async fn construct(
        &self,
        id: TunnelId,
        cluster: &str,
        timeout_ms: u64,
        init: oneshot::Receiver<usize>,
    ) -> Result<()> {
        self.relay.send_tunnel_init(id, cluster, timeout_ms).await?;

        let chunk_limit = tokio::select! {
            result = init => result.map_err(|_| TunnelError::Closed)?,
            _ = self.term.wait() => return Err(TunnelError::Closed),
        };
        if chunk_limit == 0 {
            return Err(TunnelError::Timeout);
        }
        self.relay
            .send_tunnel_allowance(id, self.config.initial_allowance)
            .await
    }

    /// Accepts a remotely initiated tunnel and confirms its local id to the relay.
    pub async fn accept_tunnel(&self, init_id: TunnelId, chunk_limit: usize) -> Result<Arc<Tunnel>> {
        if chunk_limit == 0 {
            return Err(TunnelError::invalid("zero chunk limit"));
        }
        let (tunnel, ()) = self.register(|id| {
            let tunnel = Tunnel::accepted(id, self.relay.clone(), self.runtime.clone(), chunk_limit);
            (tunnel, ())
        })?;
        let id = tunnel.id();
        tracing::info!(tunnel = id, init_id, chunk_limit, "accepting inbound tunnel");

        let confirmed = async {
            self.relay.send_tunnel_confirm(init_id, id).await?;
            self.relay
                .send_tunnel_allowance(id, self.config.initial_allowance)
                .await
        };
        match confirmed.await {
            Ok(()) => {
                tracing::info!(tunnel = id, "tunnel acceptance completed");
                Ok(tunnel)
            }
            Err(err) => {
                self.remove(id);
                tracing::warn!(tunnel = id, reason = %err, "tunnel acceptance failed");
                Err(err)
            }
        }
    }
}
