//! Relay Dialer (C8)
//!
//! Runs alongside a direct TCP dialer; the swarm engine races both and takes
//! whichever succeeds first. This dialer's job is to avoid relaying when it
//! isn't needed (own-address guard, direct-reachable cache, recent-fail
//! cache) and, when it is needed, to hand back a socket that behaves exactly
//! like a direct connection to the target.

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use dashmap::{DashMap, DashSet};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadBuf};
use tokio::net::TcpStream;

use crate::error::{RelayError, Result};
use crate::protocol::ControlMessage;

pub const DIRECT_REACHABLE_TTL: Duration = Duration::from_secs(10 * 60);
pub const RECENT_FAIL_TTL: Duration = Duration::from_secs(90);
pub const DIAL_DELAY: Duration = Duration::from_secs(1);
pub const RELAY_DIAL_TIMEOUT: Duration = Duration::from_secs(10);
pub const DATA_CONN_SETUP_TIMEOUT: Duration = Duration::from_secs(15);
pub const SOCKET_BUFFER_SIZE: usize = 256 * 1024;
pub const KEEPALIVE_PERIOD: Duration = Duration::from_secs(30);

/// A socket handed back to the caller as if it were a direct connection,
/// draining any bytes the control-read buffer over-read from the peer's
/// handshake before passing further reads through to the raw socket.
pub struct RelayedStream {
    leftover: Vec<u8>,
    leftover_pos: usize,
    inner: TcpStream,
}

impl AsyncRead for RelayedStream {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<std::io::Result<()>> {
        if self.leftover_pos < self.leftover.len() {
            let remaining = &self.leftover[self.leftover_pos..];
            let n = remaining.len().min(buf.remaining());
            buf.put_slice(&remaining[..n]);
            self.leftover_pos += n;
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for RelayedStream {
    fn poll_write(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

#[derive(Default)]
pub struct DialerCounters {
    pub attempts: AtomicU64,
    pub successes: AtomicU64,
    pub skips: AtomicU64,
}

pub struct RelayDialer {
    own_addrs: DashSet<SocketAddr>,
    direct_reachable: DashMap<SocketAddr, Instant>,
    recent_fail: DashMap<SocketAddr, Instant>,
    nat_peers: DashMap<SocketAddr, Instant>,
    counters: DialerCounters,
}

impl Default for RelayDialer {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayDialer {
    pub fn new() -> Self {
        Self {
            own_addrs: DashSet::new(),
            direct_reachable: DashMap::new(),
            recent_fail: DashMap::new(),
            nat_peers: DashMap::new(),
            counters: DialerCounters::default(),
        }
    }

    pub fn add_own_addr(&self, addr: SocketAddr) {
        self.own_addrs.insert(addr);
    }

    /// Recorded by the paired direct dialer on a successful direct connect.
    pub fn mark_direct_reachable(&self, addr: SocketAddr) {
        self.direct_reachable.insert(addr, Instant::now());
    }

    pub fn counters(&self) -> &DialerCounters {
        &self.counters
    }

    /// Dials `target_addr` through the relay at `relay_addr`.
    pub async fn dial(
        &self,
        relay_addr: SocketAddr,
        target_addr: SocketAddr,
        cancel: &AtomicBool,
    ) -> Result<RelayedStream> {
        if self.own_addrs.contains(&target_addr) {
            return Err(RelayError::OwnAddress(target_addr));
        }

        if let Some(seen) = self.direct_reachable.get(&target_addr) {
            if seen.elapsed() < DIRECT_REACHABLE_TTL {
                self.counters.skips.fetch_add(1, Ordering::Relaxed);
                return Err(RelayError::Internal("direct_reachable".to_string()));
            }
        }

        if let Some(failed_at) = self.recent_fail.get(&target_addr) {
            if failed_at.elapsed() < RECENT_FAIL_TTL {
                self.counters.skips.fetch_add(1, Ordering::Relaxed);
                return Err(RelayError::FailedRecently);
            }
        }

        let skip_delay = self.nat_peers.contains_key(&target_addr);
        if !skip_delay {
            tokio::select! {
                _ = tokio::time::sleep(DIAL_DELAY) => {}
                _ = wait_for_cancel(cancel) => return Err(RelayError::Cancelled),
            }
        }
        if cancel.load(Ordering::SeqCst) {
            return Err(RelayError::Cancelled);
        }

        self.counters.attempts.fetch_add(1, Ordering::Relaxed);

        let result = self.attempt(relay_addr, target_addr, cancel).await;
        match &result {
            Ok(_) => {
                self.counters.successes.fetch_add(1, Ordering::Relaxed);
                self.nat_peers.insert(target_addr, Instant::now());
            }
            Err(RelayError::Cancelled) => {}
            Err(_) => {
                self.recent_fail.insert(target_addr, Instant::now());
            }
        }
        result
    }

    async fn attempt(
        &self,
        relay_addr: SocketAddr,
        target_addr: SocketAddr,
        cancel: &AtomicBool,
    ) -> Result<RelayedStream> {
        let socket = tokio::select! {
            connected = tokio::time::timeout(RELAY_DIAL_TIMEOUT, TcpStream::connect(relay_addr)) => {
                connected.map_err(|_| RelayError::Internal("relay dial timed out".to_string()))??
            }
            _ = wait_for_cancel(cancel) => return Err(RelayError::Cancelled),
        };

        let mut reader = BufReader::new(socket);
        let request = ControlMessage::Connect(target_addr).encode() + "\n";
        reader.get_mut().write_all(request.as_bytes()).await?;

        let mut line = String::new();
        tokio::time::timeout(DATA_CONN_SETUP_TIMEOUT, reader.read_line(&mut line))
            .await
            .map_err(|_| RelayError::Internal("relay response timed out".to_string()))??;

        let response = ControlMessage::parse(&line)?;
        let _session_id = match response {
            ControlMessage::OkSession(id) => id,
            ControlMessage::Error(reason) => return Err(RelayError::Internal(reason)),
            other => return Err(RelayError::Protocol(format!("unexpected relay response: {other:?}"))),
        };

        let leftover = reader.buffer().to_vec();
        let inner = reader.into_inner();
        tune_socket(&inner)?;

        Ok(RelayedStream {
            leftover,
            leftover_pos: 0,
            inner,
        })
    }
}

async fn wait_for_cancel(cancel: &AtomicBool) {
    loop {
        if cancel.load(Ordering::SeqCst) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn tune_socket(stream: &TcpStream) -> Result<()> {
    stream.set_nodelay(true)?;
    let sock_ref = socket2::SockRef::from(stream);
    sock_ref.set_keepalive(true)?;
    let _ = sock_ref.set_tcp_keepalive(
        &socket2::TcpKeepalive::new().with_time(KEEPALIVE_PERIOD),
    );
    sock_ref.set_recv_buffer_size(SOCKET_BUFFER_SIZE)?;
    sock_ref.set_send_buffer_size(SOCKET_BUFFER_SIZE)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn own_address_is_rejected_before_any_io() {
        let dialer = RelayDialer::new();
        let own: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        dialer.add_own_addr(own);

        let cancel = AtomicBool::new(false);
        // relay_addr is garbage — if the guard didn't short-circuit, this
        // would hang or error on connect instead of returning OwnAddress.
        let bogus_relay: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let result = dialer.dial(bogus_relay, own, &cancel).await;
        assert!(matches!(result, Err(RelayError::OwnAddress(_))));
        assert_eq!(dialer.counters().attempts.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn recent_fail_cache_skips_without_dialing() {
        let dialer = RelayDialer::new();
        let target: SocketAddr = "198.51.100.7:5000".parse().unwrap();
        dialer.recent_fail.insert(target, Instant::now());

        let cancel = AtomicBool::new(false);
        let bogus_relay: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let result = dialer.dial(bogus_relay, target, &cancel).await;
        assert!(matches!(result, Err(RelayError::FailedRecently)));
        assert_eq!(dialer.counters().attempts.load(Ordering::Relaxed), 0);
        assert_eq!(dialer.counters().skips.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn cancellation_during_delay_aborts() {
        let dialer = RelayDialer::new();
        let target: SocketAddr = "198.51.100.9:5000".parse().unwrap();
        let cancel = AtomicBool::new(true);
        let bogus_relay: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let result = dialer.dial(bogus_relay, target, &cancel).await;
        assert!(matches!(result, Err(RelayError::Cancelled)));
    }
}
