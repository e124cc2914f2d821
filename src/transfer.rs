//! Transfer Engine: the two stop-and-wait state machines that drive a
//! session to completion over a [`DatagramEndpoint`].
//!
//! Each state machine is a bounded inner loop racing a single deadline:
//! one timer per attempt, ignore everything that doesn't match, and never
//! let a duplicate or stray packet reset or shorten the deadline.

use std::time::Duration;

use tokio::time::Instant;

use crate::endpoint::{self, DatagramEndpoint};
use crate::error::{Result, TftpError};
use crate::packet::{self, Packet};
use crate::store::{Blob, BlobStore};

/// Largest datagram the engine ever needs to read: a full DATA packet
/// (4-byte header + 512-byte payload).
const MAX_DATAGRAM: usize = 4 + packet::MAX_PAYLOAD;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

enum AckOutcome {
    Matched,
    TimedOut,
    PeerError,
}

/// Await a matching ACK for `expected_block`, silently discarding anything
/// else, for up to `timeout` total. Duplicate or stray packets never reset
/// or shorten the deadline, and — critically — never trigger a
/// retransmission themselves (Sorcerer's Apprentice avoidance;
/// retransmission is the caller's job on [`AckOutcome::TimedOut`]).
async fn await_ack<E: DatagramEndpoint>(
    endpoint: &E,
    expected_block: u16,
    timeout: Duration,
) -> Result<AckOutcome> {
    let deadline = Instant::now() + timeout;
    let mut buf = [0u8; MAX_DATAGRAM];
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(AckOutcome::TimedOut);
        }
        let n = match endpoint::recv_timeout(endpoint, &mut buf, remaining).await {
            Err(io_err) => return Err(TftpError::Io(io_err)),
            Ok(None) => return Ok(AckOutcome::TimedOut),
            Ok(Some(n)) => n,
        };
        match packet::parse(&buf[..n]) {
            Ok(Packet::Ack { block }) if block == expected_block => return Ok(AckOutcome::Matched),
            Ok(Packet::Error { .. }) => return Ok(AckOutcome::PeerError),
            // Duplicate ACK for a prior block, or any other stray/malformed
            // datagram: ignored, keep waiting.
            _ => continue,
        }
    }
}

/// Server-side response to RRQ: push `blob` to the peer one block at a
/// time, stop-and-wait.
pub async fn send<E: DatagramEndpoint>(
    endpoint: &E,
    blob: &Blob,
    timeout: Duration,
) -> Result<()> {
    let blocks = blob.blocks();
    // A blob committed by the Receiver always carries at least one block:
    // an empty file is still "a single DATA with block 1 and empty
    // payload"; a store seeded any other way must uphold that invariant.
    let blocks: &[Vec<u8>] = if blocks.is_empty() { &[Vec::new()] } else { blocks };

    for (i, payload) in blocks.iter().enumerate() {
        // Block numbers are 1-indexed and wrap mod 2^16 past 65535.
        let block_num = (i as u32).wrapping_add(1) as u16;
        let data_packet = packet::serialize(&Packet::Data {
            block: block_num,
            payload: payload.clone(),
        });

        loop {
            endpoint.send(&data_packet).await.map_err(TftpError::Io)?;
            match await_ack(endpoint, block_num, timeout).await? {
                AckOutcome::Matched => break,
                AckOutcome::TimedOut => continue, // retransmit the same DATA
                AckOutcome::PeerError => return Ok(()), // abort silently, no reply
            }
        }
    }
    Ok(())
}

enum DataOutcome {
    Matched(Vec<u8>),
    TimedOut,
    PeerError,
}

/// Await either the next expected DATA block or a duplicate of the
/// previous one, for up to `timeout` total. A duplicate is re-ACKed inline
/// without ever leaving this function or resetting the deadline; only a
/// genuine timeout hands control back to the caller.
async fn await_data<E: DatagramEndpoint>(
    endpoint: &E,
    expected_block: u16,
    prev_ack: &[u8],
    timeout: Duration,
) -> Result<DataOutcome> {
    let deadline = Instant::now() + timeout;
    let mut buf = [0u8; MAX_DATAGRAM];
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(DataOutcome::TimedOut);
        }
        let n = match endpoint::recv_timeout(endpoint, &mut buf, remaining).await {
            Err(io_err) => return Err(TftpError::Io(io_err)),
            Ok(None) => return Ok(DataOutcome::TimedOut),
            Ok(Some(n)) => n,
        };
        match packet::parse(&buf[..n]) {
            Ok(Packet::Data { block, payload }) if block == expected_block => {
                return Ok(DataOutcome::Matched(payload));
            }
            Ok(Packet::Data { block, .. }) if block == expected_block.wrapping_sub(1) => {
                // Duplicate of the block we already committed: re-ACK,
                // never re-append.
                endpoint.send(prev_ack).await.map_err(TftpError::Io)?;
                continue;
            }
            Ok(Packet::Error { .. }) => return Ok(DataOutcome::PeerError),
            // Wrong block number (ahead of expectation), wrong opcode, or
            // malformed: discarded silently.
            _ => continue,
        }
    }
}

/// Server-side response to WRQ: pull blocks from the peer until EOF,
/// committing the whole blob to `store` only on success.
pub async fn receive<E: DatagramEndpoint>(
    endpoint: &E,
    filename: Vec<u8>,
    store: &BlobStore,
    timeout: Duration,
) -> Result<()> {
    let mut expected: u16 = 1;
    let mut blocks: Vec<Vec<u8>> = Vec::new();

    loop {
        let ack_block = expected.wrapping_sub(1);
        let ack_packet = packet::serialize(&Packet::Ack { block: ack_block });

        loop {
            endpoint.send(&ack_packet).await.map_err(TftpError::Io)?;
            match await_data(endpoint, expected, &ack_packet, timeout).await? {
                DataOutcome::Matched(payload) => {
                    let is_eof = payload.len() < packet::MAX_PAYLOAD;
                    blocks.push(payload);
                    if is_eof {
                        let final_ack = packet::serialize(&Packet::Ack { block: expected });
                        endpoint.send(&final_ack).await.map_err(TftpError::Io)?;
                        store.put(filename, Blob::from_blocks(blocks));
                        return Ok(());
                    }
                    expected = expected.wrapping_add(1);
                    break; // re-emit ACK for the new `expected - 1` (= just-acked block)
                }
                DataOutcome::TimedOut => continue, // retransmit the same ACK
                DataOutcome::PeerError => return Ok(()), // abort, nothing committed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UdpSocket;

    async fn connected_pair() -> (UdpSocket, UdpSocket) {
        let a = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let b = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        a.connect(b.local_addr().unwrap()).await.unwrap();
        b.connect(a.local_addr().unwrap()).await.unwrap();
        (a, b)
    }

    #[tokio::test]
    async fn sends_two_blocks_and_completes_on_ack() {
        let (server, client) = connected_pair().await;
        let blob = Blob::from_blocks(vec![vec![0u8; 512], vec![0xffu8; 3]]);

        let send_task = tokio::spawn(async move {
            send(&server, &blob, Duration::from_millis(500)).await
        });

        let mut buf = [0u8; MAX_DATAGRAM];
        let n = client.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..4], &[0, 3, 0, 1]);
        assert_eq!(n, 4 + 512);
        client
            .send(&packet::serialize(&Packet::Ack { block: 1 }))
            .await
            .unwrap();

        let n = client.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..4], &[0, 3, 0, 2]);
        assert_eq!(n, 4 + 3);
        client
            .send(&packet::serialize(&Packet::Ack { block: 2 }))
            .await
            .unwrap();

        send_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn duplicate_ack_does_not_trigger_retransmit() {
        let (server, client) = connected_pair().await;
        let blob = Blob::from_blocks(vec![vec![1u8; 10]]);

        let send_task =
            tokio::spawn(async move { send(&server, &blob, Duration::from_millis(300)).await });

        let mut buf = [0u8; MAX_DATAGRAM];
        client.recv(&mut buf).await.unwrap();

        // A stray duplicate ACK for a block we haven't sent yet — ignored.
        client
            .send(&packet::serialize(&Packet::Ack { block: 0 }))
            .await
            .unwrap();

        // No retransmission should have been sent in response; the real
        // ACK still completes the transfer before the timeout fires.
        client
            .send(&packet::serialize(&Packet::Ack { block: 1 }))
            .await
            .unwrap();

        send_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn retransmits_data_after_timeout() {
        let (server, client) = connected_pair().await;
        let blob = Blob::from_blocks(vec![vec![7u8; 4]]);

        let send_task =
            tokio::spawn(async move { send(&server, &blob, Duration::from_millis(150)).await });

        let mut buf = [0u8; MAX_DATAGRAM];
        let first = client.recv(&mut buf).await.unwrap();
        let first_bytes = buf[..first].to_vec();

        // Let the first attempt time out without acking.
        let second = client.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..second], &first_bytes[..]);

        client
            .send(&packet::serialize(&Packet::Ack { block: 1 }))
            .await
            .unwrap();
        send_task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn receives_two_blocks_and_commits_once() {
        let (server, client) = connected_pair().await;
        let store = BlobStore::new();
        let store_clone = store.clone();

        let recv_task = tokio::spawn(async move {
            receive(&server, b"x".to_vec(), &store_clone, Duration::from_millis(500)).await
        });

        let mut buf = [0u8; MAX_DATAGRAM];
        let n = client.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &packet::serialize(&Packet::Ack { block: 0 })[..]);

        client
            .send(&packet::serialize(&Packet::Data {
                block: 1,
                payload: vec![1, 2, 3],
            }))
            .await
            .unwrap();
        let n = client.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &packet::serialize(&Packet::Ack { block: 1 })[..]);

        recv_task.await.unwrap().unwrap();
        let blob = store.get(b"x").unwrap();
        assert_eq!(blob.blocks(), &[vec![1u8, 2, 3]]);
    }

    #[tokio::test]
    async fn duplicate_data_reacks_without_reappending() {
        let (server, client) = connected_pair().await;
        let store = BlobStore::new();
        let store_clone = store.clone();

        let recv_task = tokio::spawn(async move {
            receive(&server, b"x".to_vec(), &store_clone, Duration::from_millis(500)).await
        });

        let mut buf = [0u8; MAX_DATAGRAM];
        client.recv(&mut buf).await.unwrap(); // ACK 0

        let block1 = packet::serialize(&Packet::Data {
            block: 1,
            payload: vec![9],
        });
        client.send(&block1).await.unwrap();
        client.recv(&mut buf).await.unwrap(); // ACK 1

        // Resend the same block (simulating a lost ACK on the wire).
        client.send(&block1).await.unwrap();
        let n = client.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &packet::serialize(&Packet::Ack { block: 1 })[..]);

        // Finish with a short final block.
        client
            .send(&packet::serialize(&Packet::Data {
                block: 2,
                payload: vec![],
            }))
            .await
            .unwrap();
        client.recv(&mut buf).await.unwrap(); // final ACK 2

        recv_task.await.unwrap().unwrap();
        let blob = store.get(b"x").unwrap();
        assert_eq!(blob.blocks(), &[vec![9u8], vec![]]);
    }

    #[tokio::test]
    async fn peer_error_aborts_send_without_commit_side_effects() {
        let (server, client) = connected_pair().await;
        let blob = Blob::from_blocks(vec![vec![0u8; 512], vec![1u8; 1]]);

        let send_task =
            tokio::spawn(async move { send(&server, &blob, Duration::from_millis(300)).await });

        let mut buf = [0u8; MAX_DATAGRAM];
        client.recv(&mut buf).await.unwrap();
        client
            .send(&packet::serialize(&Packet::error(0, *b"nope")))
            .await
            .unwrap();

        send_task.await.unwrap().unwrap();
    }
}
