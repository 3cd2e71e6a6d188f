//! Sync Proxy Server
//!
//! A TCP relay: every frame a client sends is forwarded to all other
//! connected clients, optionally filtered down to the models each client
//! shares. The routing rules live in `syncproxy-core`, the wire framing in
//! `syncproxy-socket`.

pub mod config;
mod hub;
mod router;

pub use config::{Args, LogFormat, RouterConfig};
pub use router::{RouterError, RouterHandle, bind};
pub use syncproxy_core::RoutingMode;
pub use syncproxy_socket::Separator;
