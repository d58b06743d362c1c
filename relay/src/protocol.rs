//! Relay control protocol (C7/C8 wire format)
//!
//! Newline-delimited ASCII on the control connection. Each line is one
//! message; there is no length prefix and no binary framing — the data
//! connection that follows a `RELAY-SESSION` handoff is the only place raw
//! bytes appear on a socket this module owns.

use std::net::SocketAddr;

use uuid::Uuid;

use crate::error::{RelayError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Register(SocketAddr),
    Ok,
    OkSession(Uuid),
    Error(String),
    Ping,
    Pong,
    Connect(SocketAddr),
    SessionRequest(Uuid),
    Session(Uuid),
}

impl ControlMessage {
    pub fn encode(&self) -> String {
        match self {
            ControlMessage::Register(addr) => format!("RELAY-REGISTER {addr}"),
            ControlMessage::Ok => "OK".to_string(),
            ControlMessage::OkSession(id) => format!("OK {id}"),
            ControlMessage::Error(reason) => format!("ERROR {reason}"),
            ControlMessage::Ping => "RELAY-PING".to_string(),
            ControlMessage::Pong => "RELAY-PONG".to_string(),
            ControlMessage::Connect(addr) => format!("RELAY-CONNECT {addr}"),
            ControlMessage::SessionRequest(id) => format!("SESSION-REQUEST {id}"),
            ControlMessage::Session(id) => format!("RELAY-SESSION {id}"),
        }
    }

    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim_end_matches(['\r', '\n']);
        let mut parts = line.splitn(2, ' ');
        let verb = parts.next().unwrap_or("");
        let rest = parts.next().unwrap_or("").trim();

        match verb {
            "RELAY-REGISTER" => Ok(ControlMessage::Register(parse_addr(rest)?)),
            "OK" if rest.is_empty() => Ok(ControlMessage::Ok),
            "OK" => Ok(ControlMessage::OkSession(parse_uuid(rest)?)),
            "ERROR" => Ok(ControlMessage::Error(rest.to_string())),
            "RELAY-PING" => Ok(ControlMessage::Ping),
            "RELAY-PONG" => Ok(ControlMessage::Pong),
            "RELAY-CONNECT" => Ok(ControlMessage::Connect(parse_addr(rest)?)),
            "SESSION-REQUEST" => Ok(ControlMessage::SessionRequest(parse_uuid(rest)?)),
            "RELAY-SESSION" => Ok(ControlMessage::Session(parse_uuid(rest)?)),
            other => Err(RelayError::Protocol(format!("unknown verb: {other}"))),
        }
    }
}

fn parse_addr(s: &str) -> Result<SocketAddr> {
    s.parse()
        .map_err(|_| RelayError::Protocol(format!("bad address: {s}")))
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|_| RelayError::Protocol(format!("bad session id: {s}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_register() {
        let addr: SocketAddr = "1.2.3.4:10852".parse().unwrap();
        let msg = ControlMessage::Register(addr);
        let line = msg.encode();
        assert_eq!(line, "RELAY-REGISTER 1.2.3.4:10852");
        assert_eq!(ControlMessage::parse(&line).unwrap(), msg);
    }

    #[test]
    fn round_trips_session_handoff() {
        let id = Uuid::new_v4();
        let req = ControlMessage::SessionRequest(id);
        assert_eq!(ControlMessage::parse(&req.encode()).unwrap(), req);

        let session = ControlMessage::Session(id);
        assert_eq!(ControlMessage::parse(&session.encode()).unwrap(), session);

        let ok = ControlMessage::OkSession(id);
        assert_eq!(ControlMessage::parse(&ok.encode()).unwrap(), ok);
    }

    #[test]
    fn rejects_unknown_verb() {
        assert!(ControlMessage::parse("GARBAGE foo").is_err());
    }

    #[test]
    fn plain_ok_has_no_session_id() {
        assert_eq!(ControlMessage::parse("OK").unwrap(), ControlMessage::Ok);
    }
}
