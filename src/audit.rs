//! Operation Logger: a datagram-endpoint decorator whose only behavioral
//! effect is a structured log line per read and per write. Each record
//! carries a timestamp, hostname, and severity envelope around a
//! JSON-serialized event, emitted through `tracing`. The only operations
//! this abstraction can observe are packets sent and packets received on
//! a session's endpoint.

use std::io;
use std::net::SocketAddr;

use serde::Serialize;
use tracing::{Level, event};
use uuid::Uuid;

use crate::endpoint::DatagramEndpoint;
use crate::packet;

/// Fields common to every audit record (NIST 800-53 AU-3: content of
/// audit records).
#[derive(Debug, Clone, Serialize)]
struct CommonFields {
    event_id: Uuid,
    timestamp: String,
    hostname: String,
    service: &'static str,
}

impl CommonFields {
    fn now() -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            hostname: hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown".to_string()),
            service: "memtftpd",
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
enum PacketEvent {
    PacketSent {
        #[serde(flatten)]
        common: CommonFields,
        peer: String,
        bytes: usize,
        packet: String,
    },
    PacketReceived {
        #[serde(flatten)]
        common: CommonFields,
        peer: String,
        bytes: usize,
        packet: String,
    },
    DecodeFailed {
        #[serde(flatten)]
        common: CommonFields,
        peer: String,
        bytes: usize,
        reason: String,
        direction: &'static str,
    },
}

impl PacketEvent {
    fn log(&self) {
        let json = serde_json::to_string(self)
            .unwrap_or_else(|e| format!("{{\"error\":\"audit serialization failed: {e}\"}}"));
        event!(Level::INFO, audit_event = %json);
    }
}

/// Human-readable summary of a decoded packet for the audit log. Never
/// fails: an undecodable payload is its own event ([`PacketEvent::DecodeFailed`]).
fn describe(bytes: &[u8]) -> (String, Option<String>) {
    match packet::parse(bytes) {
        Ok(p) => (format!("{:?}", p), None),
        Err(e) => ("<undecodable>".to_string(), Some(e.to_string())),
    }
}

/// Wraps a [`DatagramEndpoint`], logging every send and receive.
/// Logging failures (a `tracing` subscriber panicking is the only way
/// this could happen) must not affect the transfer outcome, so `log()`
/// never returns a `Result` the caller has to handle.
pub struct OperationLogger<E> {
    inner: E,
    peer: SocketAddr,
}

impl<E: DatagramEndpoint> OperationLogger<E> {
    pub fn new(inner: E, peer: SocketAddr) -> Self {
        Self { inner, peer }
    }

    pub async fn send(&self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.send(buf).await?;
        let (packet, decode_err) = describe(buf);
        match decode_err {
            Some(reason) => PacketEvent::DecodeFailed {
                common: CommonFields::now(),
                peer: self.peer.to_string(),
                bytes: buf.len(),
                reason,
                direction: "sent",
            }
            .log(),
            None => PacketEvent::PacketSent {
                common: CommonFields::now(),
                peer: self.peer.to_string(),
                bytes: buf.len(),
                packet,
            }
            .log(),
        }
        Ok(n)
    }

    pub async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.recv(buf).await?;
        let (packet, decode_err) = describe(&buf[..n]);
        match decode_err {
            Some(reason) => PacketEvent::DecodeFailed {
                common: CommonFields::now(),
                peer: self.peer.to_string(),
                bytes: n,
                reason,
                direction: "received",
            }
            .log(),
            None => PacketEvent::PacketReceived {
                common: CommonFields::now(),
                peer: self.peer.to_string(),
                bytes: n,
                packet,
            }
            .log(),
        }
        Ok(n)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.inner.local_addr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describes_a_well_formed_packet() {
        let bytes = packet::serialize(&packet::Packet::Ack { block: 1 });
        let (desc, err) = describe(&bytes);
        assert!(err.is_none());
        assert!(desc.contains("Ack"));
    }

    #[test]
    fn flags_an_undecodable_packet() {
        let (desc, err) = describe(&[0, 9, 0, 0]);
        assert_eq!(desc, "<undecodable>");
        assert!(err.is_some());
    }
}
