// GhostBridge gateway daemon library
//
// Terminates client traffic on HTTP/2 (TCP+TLS) and HTTP/3 (QUIC),
// demultiplexes requests into service channels and embeds the ZNS
// resolution subsystem.

pub mod channels;
pub mod config;
pub mod daemon;
pub mod multiplexer;
pub mod response_cache;
pub mod transport;

pub use config::BridgeConfig;
pub use daemon::BridgeDaemon;
pub use multiplexer::{GatewayRequest, GatewayResponse, Multiplexer};
