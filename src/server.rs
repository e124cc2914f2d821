//! Listener/Supervisor: binds the well-known port and spawns one dispatcher
//! task per inbound datagram. The listener itself never performs a
//! transfer; it only reads and hands off.

use tokio::net::UdpSocket;
use tracing::{error, info};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::session::{self, SessionContext};
use crate::store::BlobStore;

/// Largest datagram the listener will read. Anything longer is truncated
/// by the kernel before it reaches us and will fail to decode as a
/// request, which the dispatcher already drops silently.
const MAX_DATAGRAM: usize = 4 + crate::packet::MAX_PAYLOAD;

/// Bind the well-known port and serve forever. Returns only on a fatal
/// read error on the listening socket itself — per-session errors never
/// propagate here.
pub async fn run(config: ServerConfig, store: BlobStore) -> Result<()> {
    let socket = UdpSocket::bind((config.bind_addr, config.port)).await?;
    info!(
        bind_addr = %config.bind_addr,
        port = config.port,
        "memtftpd listening"
    );

    let ctx = SessionContext {
        store,
        bind_addr: config.bind_addr,
        timeout: config.timeout(),
        log_packets: config.op_log_path.is_some(),
    };

    let mut buf = vec![0u8; config.max_packet_size.max(MAX_DATAGRAM)];
    loop {
        let (n, peer) = socket.recv_from(&mut buf).await?;
        let datagram = buf[..n].to_vec();
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if let Err(err) = session::dispatch(ctx, datagram, peer).await {
                error!(%peer, error = %err, "session ended in error");
            }
        });
    }
}
