//! Relay Server (C7)
//!
//! Brokers TCP sessions between a seeder and a downloader that can't reach
//! each other directly. One listener accepts three kinds of connections,
//! distinguished by their opening line: a seeder's long-lived control
//! connection (`RELAY-REGISTER`), a downloader's connect request
//! (`RELAY-CONNECT`), and a seeder's data connection answering a pending
//! session (`RELAY-SESSION`).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{RelayError, Result};
use crate::protocol::ControlMessage;

pub const CONTROL_READ_TIMEOUT: Duration = Duration::from_secs(90);
pub const CONTROL_WRITE_TIMEOUT: Duration = Duration::from_secs(10);
pub const SESSION_SETUP_TIMEOUT: Duration = Duration::from_secs(30);
pub const NEGATIVE_CACHE_TTL: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_SESSIONS: usize = 100;

struct RegisteredPeer {
    control_tx: mpsc::Sender<ControlMessage>,
    registered_at: Instant,
}

enum PendingSession {
    AwaitingData(oneshot::Sender<TcpStream>),
}

#[derive(Default)]
pub struct RelayMetrics {
    pub registrations: AtomicU64,
    pub sessions_bridged: AtomicU64,
    pub sessions_failed: AtomicU64,
}

pub struct RelayServer {
    registered: DashMap<SocketAddr, RegisteredPeer>,
    sessions: DashMap<Uuid, PendingSession>,
    recent_fail: DashMap<SocketAddr, Instant>,
    max_sessions: usize,
    metrics: RelayMetrics,
}

impl RelayServer {
    pub fn new(max_sessions: usize) -> Arc<Self> {
        Arc::new(Self {
            registered: DashMap::new(),
            sessions: DashMap::new(),
            recent_fail: DashMap::new(),
            max_sessions,
            metrics: RelayMetrics::default(),
        })
    }

    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    pub async fn run(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        loop {
            let (socket, peer_addr) = listener.accept().await?;
            let server = self.clone();
            tokio::spawn(async move {
                if let Err(err) = server.handle_connection(socket).await {
                    debug!(%peer_addr, "relay connection ended: {err}");
                }
            });
        }
    }

    async fn handle_connection(self: Arc<Self>, socket: TcpStream) -> Result<()> {
        let mut reader = BufReader::new(socket);
        let mut line = String::new();
        let n = tokio::time::timeout(CONTROL_READ_TIMEOUT, reader.read_line(&mut line))
            .await
            .map_err(|_| RelayError::Protocol("opening line timed out".to_string()))??;
        if n == 0 {
            return Ok(());
        }
        let message = ControlMessage::parse(&line)?;

        match message {
            ControlMessage::Register(addr) => self.serve_registration(addr, reader).await,
            ControlMessage::Connect(target) => self.serve_connect(target, reader).await,
            ControlMessage::Session(session_id) => self.serve_session_data(session_id, reader.into_inner()).await,
            other => Err(RelayError::Protocol(format!("unexpected opening message: {other:?}"))),
        }
    }

    /// Owns a seeder's control connection for its lifetime: replies `OK` to
    /// the registration, then relays `RELAY-PING`/`RELAY-PONG` and forwards
    /// queued `SESSION-REQUEST`s until the connection falls silent or closes.
    async fn serve_registration(
        self: Arc<Self>,
        addr: SocketAddr,
        mut reader: BufReader<TcpStream>,
    ) -> Result<()> {
        write_line(reader.get_mut(), &ControlMessage::Ok).await?;

        // A new registration supersedes any stale one for this address; the
        // old control task notices its channel is closed and exits.
        let (tx, mut rx) = mpsc::channel(8);
        self.registered.insert(
            addr,
            RegisteredPeer {
                control_tx: tx,
                registered_at: Instant::now(),
            },
        );
        self.metrics.registrations.fetch_add(1, Ordering::Relaxed);
        info!(%addr, "seeder registered");

        let mut line = String::new();
        loop {
            line.clear();
            tokio::select! {
                outgoing = rx.recv() => {
                    let Some(outgoing) = outgoing else { break };
                    write_line(reader.get_mut(), &outgoing).await?;
                }
                read = tokio::time::timeout(CONTROL_READ_TIMEOUT, reader.read_line(&mut line)) => {
                    let n = match read {
                        Ok(r) => r?,
                        Err(_) => {
                            warn!(%addr, "control connection silent past timeout, deregistering");
                            break;
                        }
                    };
                    if n == 0 {
                        break;
                    }
                    match ControlMessage::parse(&line) {
                        Ok(ControlMessage::Ping) => write_line(reader.get_mut(), &ControlMessage::Pong).await?,
                        Ok(other) => debug!(%addr, "ignoring unexpected message on control conn: {other:?}"),
                        Err(err) => debug!(%addr, "malformed control line: {err}"),
                    }
                }
            }
        }

        // Only remove the registration if it's still ours — a concurrent
        // re-registration must not be clobbered by this task's cleanup.
        if let Some(entry) = self.registered.get(&addr) {
            if entry.control_tx.is_closed() {
                drop(entry);
                self.registered.remove(&addr);
            }
        }
        Ok(())
    }

    /// Owns a downloader's connect request: looks up the target, brokers a
    /// session with its control connection, and splices bytes once the
    /// seeder's data connection arrives.
    async fn serve_connect(self: Arc<Self>, target: SocketAddr, mut reader: BufReader<TcpStream>) -> Result<()> {
        if let Some(failed_at) = self.recent_fail.get(&target) {
            if failed_at.elapsed() < NEGATIVE_CACHE_TTL {
                write_line(reader.get_mut(), &ControlMessage::Error("not_registered".to_string())).await?;
                return Err(RelayError::NotRegistered);
            }
        }

        let control_tx = match self.registered.get(&target) {
            Some(peer) => peer.control_tx.clone(),
            None => {
                self.recent_fail.insert(target, Instant::now());
                write_line(reader.get_mut(), &ControlMessage::Error("not_registered".to_string())).await?;
                return Err(RelayError::NotRegistered);
            }
        };

        if self.sessions.len() >= self.max_sessions {
            write_line(reader.get_mut(), &ControlMessage::Error("capacity".to_string())).await?;
            return Err(RelayError::Capacity);
        }

        let session_id = Uuid::new_v4();
        let (data_tx, data_rx) = oneshot::channel();
        self.sessions.insert(session_id, PendingSession::AwaitingData(data_tx));

        if control_tx.send(ControlMessage::SessionRequest(session_id)).await.is_err() {
            self.sessions.remove(&session_id);
            write_line(reader.get_mut(), &ControlMessage::Error("not_registered".to_string())).await?;
            return Err(RelayError::NotRegistered);
        }

        let data_socket = match tokio::time::timeout(SESSION_SETUP_TIMEOUT, data_rx).await {
            Ok(Ok(socket)) => socket,
            _ => {
                self.sessions.remove(&session_id);
                self.metrics.sessions_failed.fetch_add(1, Ordering::Relaxed);
                write_line(reader.get_mut(), &ControlMessage::Error("session_timeout".to_string())).await?;
                return Err(RelayError::SessionTimeout);
            }
        };

        write_line(reader.get_mut(), &ControlMessage::OkSession(session_id)).await?;

        let mut downloader_socket = reader.into_inner();
        let mut data_socket = data_socket;
        let result = tokio::io::copy_bidirectional(&mut downloader_socket, &mut data_socket).await;
        match result {
            Ok((a_to_b, b_to_a)) => {
                self.metrics.sessions_bridged.fetch_add(1, Ordering::Relaxed);
                debug!(%session_id, a_to_b, b_to_a, "session bridge closed");
            }
            Err(err) => debug!(%session_id, "session bridge error: {err}"),
        }
        Ok(())
    }

    async fn serve_session_data(self: Arc<Self>, session_id: Uuid, socket: TcpStream) -> Result<()> {
        match self.sessions.remove(&session_id) {
            Some((_, PendingSession::AwaitingData(tx))) => {
                let _ = tx.send(socket);
                Ok(())
            }
            None => Err(RelayError::Internal(format!("no pending session {session_id}"))),
        }
    }
}

async fn write_line(socket: &mut TcpStream, message: &ControlMessage) -> Result<()> {
    let mut line = message.encode();
    line.push('\n');
    tokio::time::timeout(CONTROL_WRITE_TIMEOUT, socket.write_all(line.as_bytes()))
        .await
        .map_err(|_| RelayError::Internal("control write timed out".to_string()))??;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt as _, BufReader as TokioBufReader};

    async fn spawn_server() -> (Arc<RelayServer>, SocketAddr) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = RelayServer::new(DEFAULT_MAX_SESSIONS);
        let server_for_task = server.clone();
        tokio::spawn(async move {
            let _ = server_for_task.run(listener).await;
        });
        (server, addr)
    }

    #[tokio::test]
    async fn unregistered_target_is_rejected_and_cached() {
        let (server, addr) = spawn_server().await;
        let unused: SocketAddr = "203.0.113.5:9999".parse().unwrap();

        let mut conn = TcpStream::connect(addr).await.unwrap();
        conn.write_all(format!("RELAY-CONNECT {unused}\n").as_bytes()).await.unwrap();
        let mut reader = TokioBufReader::new(conn);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        assert_eq!(line.trim(), "ERROR not_registered");

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(server.recent_fail.contains_key(&unused));
    }

    #[tokio::test]
    async fn registration_then_bridge_roundtrip() {
        let (_, addr) = spawn_server().await;
        let seeder_addr: SocketAddr = "127.0.0.1:40000".parse().unwrap();

        let mut seeder_control = TcpStream::connect(addr).await.unwrap();
        seeder_control
            .write_all(format!("RELAY-REGISTER {seeder_addr}\n").as_bytes())
            .await
            .unwrap();
        let mut seeder_reader = TokioBufReader::new(seeder_control);
        let mut line = String::new();
        seeder_reader.read_line(&mut line).await.unwrap();
        assert_eq!(line.trim(), "OK");

        let mut downloader = TcpStream::connect(addr).await.unwrap();
        downloader
            .write_all(format!("RELAY-CONNECT {seeder_addr}\n").as_bytes())
            .await
            .unwrap();

        line.clear();
        seeder_reader.read_line(&mut line).await.unwrap();
        assert!(line.starts_with("SESSION-REQUEST "));
        let session_id = line.trim().strip_prefix("SESSION-REQUEST ").unwrap().to_string();

        let mut seeder_data = TcpStream::connect(addr).await.unwrap();
        seeder_data
            .write_all(format!("RELAY-SESSION {session_id}\n").as_bytes())
            .await
            .unwrap();

        let mut downloader_reader = TokioBufReader::new(downloader);
        let mut ok_line = String::new();
        downloader_reader.read_line(&mut ok_line).await.unwrap();
        assert_eq!(ok_line.trim(), format!("OK {session_id}"));

        seeder_data.write_all(b"hello").await.unwrap();
        let mut buf = [0u8; 5];
        use tokio::io::AsyncReadExt;
        downloader_reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hello");
    }
}
