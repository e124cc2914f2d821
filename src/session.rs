//! Session Dispatcher: turns one initial RRQ/WRQ datagram into a
//! dedicated session endpoint and hands it to the Transfer Engine.
//!
//! A fresh, peer-connected `UdpSocket` per request becomes this session's
//! unique TID; mode validation is a case-insensitive `octet` check.

use std::net::{IpAddr, SocketAddr};

use tokio::net::UdpSocket;
use tracing::{info, warn};

use crate::audit::OperationLogger;
use crate::endpoint::{DatagramEndpoint, Endpoint};
use crate::error::{Result, TftpError};
use crate::packet::{self, Packet, RequestKind};
use crate::store::BlobStore;
use crate::transfer;

const ERR_UNDEFINED: u16 = 0;
const ERR_FILE_NOT_FOUND: u16 = 1;

/// Everything a session needs that outlives the initial datagram.
#[derive(Clone)]
pub struct SessionContext {
    pub store: BlobStore,
    pub bind_addr: IpAddr,
    pub timeout: std::time::Duration,
    pub log_packets: bool,
}

/// Handle exactly one inbound datagram addressed to the well-known port.
/// An unparseable datagram is dropped silently; a well-formed packet with
/// any opcode other than RRQ/WRQ draws an `illegal operation` ERROR.
/// Everything past that point runs on a brand-new ephemeral socket
/// connected to `peer`, which is this session's TID.
pub async fn dispatch(ctx: SessionContext, datagram: Vec<u8>, peer: SocketAddr) -> Result<()> {
    let parsed = match packet::parse(&datagram) {
        Ok(packet) => packet,
        Err(_) => {
            warn!(%peer, "dropping datagram that failed to decode");
            return Ok(());
        }
    };

    let socket = UdpSocket::bind((ctx.bind_addr, 0)).await?;
    socket.connect(peer).await?;

    let (kind, filename, mode) = match parsed {
        Packet::Request {
            kind,
            filename,
            mode,
        } => (kind, filename, mode),
        _ => {
            warn!(%peer, "rejecting non-request opcode at dispatch");
            let reply = packet::serialize(&Packet::error(
                ERR_UNDEFINED,
                b"illegal operation".to_vec(),
            ));
            let _ = socket.send(&reply).await;
            return Ok(());
        }
    };

    if !mode.eq_ignore_ascii_case(b"octet") {
        let message = b"Only octet mode is supported".to_vec();
        let reply = packet::serialize(&Packet::error(ERR_UNDEFINED, message.clone()));
        let _ = socket.send(&reply).await;
        return Err(TftpError::Protocol(String::from_utf8_lossy(&message).into_owned()));
    }

    let endpoint = if ctx.log_packets {
        Endpoint::Logged(OperationLogger::new(socket, peer))
    } else {
        Endpoint::Plain(socket)
    };

    match kind {
        RequestKind::Read => {
            let Some(blob) = ctx.store.get(&filename) else {
                let mut message = b"File ".to_vec();
                message.extend_from_slice(&filename);
                message.extend_from_slice(b" not found");
                let reply = packet::serialize(&Packet::error(ERR_FILE_NOT_FOUND, message.clone()));
                let _ = endpoint.send(&reply).await;
                return Err(TftpError::Protocol(String::from_utf8_lossy(&message).into_owned()));
            };
            info!(%peer, filename = %String::from_utf8_lossy(&filename), "starting read transfer");
            transfer::send(&endpoint, &blob, ctx.timeout).await
        }
        RequestKind::Write => {
            info!(%peer, filename = %String::from_utf8_lossy(&filename), "starting write transfer");
            transfer::receive(&endpoint, filename, &ctx.store, ctx.timeout).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_ctx(store: BlobStore) -> SessionContext {
        SessionContext {
            store,
            bind_addr: IpAddr::from([127, 0, 0, 1]),
            timeout: Duration::from_millis(500),
            log_packets: false,
        }
    }

    #[tokio::test]
    async fn unreadable_request_is_dropped_silently() {
        let ctx = test_ctx(BlobStore::new());
        let peer: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let result = dispatch(ctx, vec![0, 9, 0, 0], peer).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn non_request_opcode_gets_illegal_operation_error() {
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let ctx = test_ctx(BlobStore::new());
        let stray_ack = packet::serialize(&Packet::Ack { block: 1 });
        let peer = client.local_addr().unwrap();

        let handle = tokio::spawn(dispatch(ctx, stray_ack, peer));

        let mut buf = [0u8; 516];
        let n = client.recv(&mut buf).await.unwrap();
        let reply = packet::parse(&buf[..n]).unwrap();
        assert_eq!(
            reply,
            Packet::Error {
                code: ERR_UNDEFINED,
                message: b"illegal operation".to_vec()
            }
        );
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn rrq_for_missing_file_sends_error_with_filename() {
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let ctx = test_ctx(BlobStore::new());
        let request = packet::serialize(&Packet::Request {
            kind: RequestKind::Read,
            filename: b"missing".to_vec(),
            mode: b"octet".to_vec(),
        });
        let peer = client.local_addr().unwrap();

        let handle = tokio::spawn(dispatch(ctx, request, peer));

        let mut buf = [0u8; 516];
        let n = client.recv(&mut buf).await.unwrap();
        let reply = packet::parse(&buf[..n]).unwrap();
        assert_eq!(
            reply,
            Packet::Error {
                code: ERR_FILE_NOT_FOUND,
                message: b"File missing not found".to_vec()
            }
        );
        assert!(handle.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn unsupported_mode_sends_error() {
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let ctx = test_ctx(BlobStore::new());
        let request = packet::serialize(&Packet::Request {
            kind: RequestKind::Read,
            filename: b"x".to_vec(),
            mode: b"netascii".to_vec(),
        });
        let peer = client.local_addr().unwrap();

        let handle = tokio::spawn(dispatch(ctx, request, peer));

        let mut buf = [0u8; 516];
        let n = client.recv(&mut buf).await.unwrap();
        let reply = packet::parse(&buf[..n]).unwrap();
        assert_eq!(
            reply,
            Packet::Error {
                code: ERR_UNDEFINED,
                message: b"Only octet mode is supported".to_vec()
            }
        );
        assert!(handle.await.unwrap().is_err());
    }
}
