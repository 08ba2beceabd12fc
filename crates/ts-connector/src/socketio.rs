//! A minimal hand-rolled Socket.IO v4 (EIO4/SIO4) framing layer.
//!
//! No published Socket.IO client crate appears anywhere in the retrieval
//! pack, so this is implemented directly against the documented wire
//! framing rather than pulled in — the same way the teacher hand-rolls its
//! own WS frame protocol in `rt-protocol` instead of depending on a
//! framework. Only what spec §4.4/§6 needs is implemented: the connect
//! handshake, ping/pong keepalive, and unwrapping `EVENT` packets filtered
//! by event name.
//!
//! Engine.IO packet types (first character of every text frame):
//! `0` open, `1` close, `2` ping, `3` pong, `4` message, `5` upgrade,
//! `6` noop. A `4` (message) packet's payload is itself a Socket.IO packet
//! whose first character is the SIO type: `0` CONNECT, `1` DISCONNECT,
//! `2` EVENT, `3` ACK, `4` CONNECT_ERROR.

use serde_json::Value;

/// An Engine.IO-level frame, as received over the WebSocket transport.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineFrame {
    Open,
    Close,
    Ping,
    Pong,
    Message(SocketIoFrame),
    Upgrade,
    Noop,
    Unknown,
}

/// A Socket.IO-level frame nested inside an Engine.IO `message` packet.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketIoFrame {
    Connect,
    Disconnect,
    /// `(event_name, args)` — `args` is the JSON array following the event
    /// name in the wire payload (e.g. `["tick", {...}]` → `args == [{...}]`).
    Event { name: String, args: Vec<Value> },
    ConnectError,
    Other(String),
}

/// Parses one raw text frame received over the WebSocket.
pub fn parse_frame(frame: &str) -> EngineFrame {
    let Some(eio_type) = frame.chars().next() else {
        return EngineFrame::Unknown;
    };
    let rest = &frame[1..];
    match eio_type {
        '0' => EngineFrame::Open,
        '1' => EngineFrame::Close,
        '2' => EngineFrame::Ping,
        '3' => EngineFrame::Pong,
        '4' => EngineFrame::Message(parse_sio_frame(rest)),
        '5' => EngineFrame::Upgrade,
        '6' => EngineFrame::Noop,
        _ => EngineFrame::Unknown,
    }
}

fn parse_sio_frame(payload: &str) -> SocketIoFrame {
    let Some(sio_type) = payload.chars().next() else {
        return SocketIoFrame::Other(payload.to_owned());
    };
    let rest = &payload[1..];
    match sio_type {
        '0' => SocketIoFrame::Connect,
        '1' => SocketIoFrame::Disconnect,
        '2' => parse_event(rest),
        '4' => SocketIoFrame::ConnectError,
        _ => SocketIoFrame::Other(payload.to_owned()),
    }
}

fn parse_event(rest: &str) -> SocketIoFrame {
    // Packets may be namespaced (`/ns,[...]`); skip past the comma if present.
    let array_json = match rest.find(',') {
        Some(idx) if !rest[..idx].is_empty() && rest.starts_with('/') => &rest[idx + 1..],
        _ => rest,
    };
    let Ok(Value::Array(mut items)) = serde_json::from_str::<Value>(array_json) else {
        return SocketIoFrame::Other(array_json.to_owned());
    };
    if items.is_empty() {
        return SocketIoFrame::Other(String::new());
    }
    let name = match items.remove(0) {
        Value::String(s) => s,
        other => other.to_string(),
    };
    SocketIoFrame::Event { name, args: items }
}

/// The client → server Engine.IO pong reply to a server ping.
pub const PONG: &str = "3";

/// The client → server Socket.IO CONNECT packet (default namespace, no
/// auth payload). Sent immediately after the Engine.IO `open` packet.
pub const CONNECT: &str = "40";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ping_and_pong() {
        assert_eq!(parse_frame("2"), EngineFrame::Ping);
        assert_eq!(parse_frame("3"), EngineFrame::Pong);
    }

    #[test]
    fn parses_connect_ack() {
        let frame = parse_frame(r#"40{"sid":"abc123"}"#);
        assert_eq!(frame, EngineFrame::Message(SocketIoFrame::Connect));
    }

    #[test]
    fn parses_event_with_single_payload() {
        let frame = parse_frame(r#"42["tick",{"price":101.5}]"#);
        match frame {
            EngineFrame::Message(SocketIoFrame::Event { name, args }) => {
                assert_eq!(name, "tick");
                assert_eq!(args.len(), 1);
                assert_eq!(args[0]["price"], 101.5);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn parses_event_with_namespace() {
        let frame = parse_frame(r#"42/market,["tick",{"price":1}]"#);
        match frame {
            EngineFrame::Message(SocketIoFrame::Event { name, args }) => {
                assert_eq!(name, "tick");
                assert_eq!(args.len(), 1);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[test]
    fn unknown_leading_byte_is_unknown() {
        assert_eq!(parse_frame("z garbage"), EngineFrame::Unknown);
    }
}
