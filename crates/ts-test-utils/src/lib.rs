//! Test-only helpers shared across crate and integration tests: scriptable
//! mock upstream servers and DTO fixture builders. Grounded in the
//! teacher's own `rt-test-utils` (`mock_ws_server.rs`), generalized from a
//! fixed timing-protocol handshake to an arbitrary scripted frame sequence
//! covering both raw WebSocket and Socket.IO v4 transports.

pub mod fixtures;
pub mod mock_http_server;
pub mod mock_ws_server;

pub use mock_http_server::MockHttpServer;
pub use mock_ws_server::{MockUpstreamServer, ScriptedFrame};
