//! Outbound side of the relay connection as seen by tunnels.
//!
//! The connection layer owns the physical transport and the wire encoding of
//! tunnel control messages. Tunnels only need the five primitives below.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::TunnelId;

/// Outbound tunnel primitives supplied by the relay connection.
///
/// Every call may fail with a transport error, which aborts the calling
/// tunnel operation.
#[async_trait]
pub trait Relay: Send + Sync + 'static {
    /// Requests a new tunnel to `cluster`, identified locally by `tunnel_id`.
    async fn send_tunnel_init(&self, tunnel_id: TunnelId, cluster: &str, timeout_ms: u64)
        -> Result<()>;

    /// Confirms a remotely initiated tunnel, binding the remote `init_id` to `tunnel_id`.
    async fn send_tunnel_confirm(&self, init_id: TunnelId, tunnel_id: TunnelId) -> Result<()>;

    /// Grants the peer `space` more bytes of send allowance.
    async fn send_tunnel_allowance(&self, tunnel_id: TunnelId, space: usize) -> Result<()>;

    /// Ships one chunk. `size_or_cont` is the full message length on the first
    /// chunk of a message and zero on continuations.
    async fn send_tunnel_transfer(
        &self,
        tunnel_id: TunnelId,
        size_or_cont: usize,
        chunk: Bytes,
    ) -> Result<()>;

    /// Asks the relay to tear the tunnel down.
    async fn send_tunnel_close(&self, tunnel_id: TunnelId) -> Result<()>;
}
