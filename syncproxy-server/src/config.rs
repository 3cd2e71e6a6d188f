//! Command line and runtime configuration.

use clap::{Parser, ValueEnum};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use syncproxy_core::{DEFAULT_PORT, RoutingMode};
use syncproxy_socket::{DEFAULT_MAX_FRAME_BYTES, Separator};

pub const DEFAULT_CLIENT_QUEUE: usize = 1024;

/// Sync Proxy - relays frames between connected clients
#[derive(Debug, Parser)]
#[command(name = "syncproxy-server")]
#[command(version)]
#[command(about = "Sync Proxy - relays frames between connected clients")]
pub struct Args {
    /// Log every relayed frame (takes precedence over RUST_LOG)
    #[arg(short, long)]
    pub verbose: bool,

    /// TCP port to listen on (0 picks a free port)
    #[arg(env = "SYNCPROXY_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Frame separator: one single-byte character, or \n, \r, \t, \0
    #[arg(default_value = "\\n")]
    pub separator: Separator,

    /// Address to bind
    #[arg(long, env = "SYNCPROXY_HOST", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    /// Routing mode: plain, share-all or shared-models
    #[arg(long, env = "SYNCPROXY_MODE", default_value_t = RoutingMode::SharedModels)]
    pub mode: RoutingMode,

    /// Largest frame a client may send before it is disconnected
    #[arg(long, default_value_t = DEFAULT_MAX_FRAME_BYTES)]
    pub max_frame_bytes: usize,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Args {
    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            host: self.host,
            port: self.port,
            separator: self.separator,
            mode: self.mode,
            max_frame_bytes: self.max_frame_bytes,
            client_queue: DEFAULT_CLIENT_QUEUE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub host: IpAddr,
    pub port: u16,
    pub separator: Separator,
    pub mode: RoutingMode,
    pub max_frame_bytes: usize,
    /// Frames buffered per client before senders wait for it.
    pub client_queue: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            separator: Separator::NEWLINE,
            mode: RoutingMode::default(),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            client_queue: DEFAULT_CLIENT_QUEUE,
        }
    }
}

impl RouterConfig {
    /// Loopback config on an ephemeral port.
    pub fn local(mode: RoutingMode) -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            mode,
            ..Default::default()
        }
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}
