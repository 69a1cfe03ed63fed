//! Diagnostic records over UDP
//!
//! A deployed node has no console; its log is the only account of what a
//! cycle did. [`UdpLogSink`] sends every record as one datagram, by default
//! to the broadcast address on port 1337, so anyone on the segment can
//! listen:
//!
//! ```text
//! nc -klu 1337
//! ```
//!
//! Records are sent without blocking. A datagram that cannot be sent is
//! dropped; logging never stalls a cycle.

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};

use log::{LevelFilter, Log, Metadata, Record};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default listener port
pub const DEFAULT_UDP_LOG_PORT: u16 = 1337;

fn default_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::BROADCAST)
}

fn default_port() -> u16 {
    DEFAULT_UDP_LOG_PORT
}

/// Where UDP records go
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UdpLogConfig {
    /// Destination address, broadcast by default
    #[serde(default = "default_address")]
    pub address: IpAddr,
    /// Destination port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for UdpLogConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_port(),
        }
    }
}

impl UdpLogConfig {
    /// Destination socket address
    pub fn target(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

/// Logging could not be installed
#[derive(Error, Debug)]
pub enum LoggingError {
    /// The UDP socket could not be prepared
    #[error("cannot open UDP log socket for {target}: {source}")]
    Socket {
        /// Destination that was configured
        target: SocketAddr,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// Another logger is already installed
    #[error("logger already installed: {0}")]
    AlreadyInstalled(#[from] log::SetLoggerError),
}

/// Sends each record as one datagram
#[derive(Debug)]
pub struct UdpLogSink {
    socket: UdpSocket,
    target: SocketAddr,
}

impl UdpLogSink {
    /// Bind an ephemeral local socket aimed at `config.target()`
    pub fn bind(config: &UdpLogConfig) -> Result<Self, LoggingError> {
        let target = config.target();
        let socket_error = |source| LoggingError::Socket { target, source };

        let local: SocketAddr = match target {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (std::net::Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(local).map_err(socket_error)?;
        if matches!(target.ip(), IpAddr::V4(ip) if ip.is_broadcast()) {
            socket.set_broadcast(true).map_err(socket_error)?;
        }
        socket.set_nonblocking(true).map_err(socket_error)?;

        Ok(Self { socket, target })
    }

    /// Destination of every datagram
    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

fn format_record(record: &Record) -> String {
    format!("{} {}: {}\n", record.level(), record.target(), record.args())
}

impl Log for UdpLogSink {
    fn enabled(&self, _: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        let _ = self.socket.send_to(format_record(record).as_bytes(), self.target);
    }

    fn flush(&self) {}
}

/// Console logger plus an optional UDP copy of everything it accepts
struct TeeLogger {
    console: env_logger::Logger,
    remote: Option<UdpLogSink>,
}

impl Log for TeeLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.console.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if !self.console.matches(record) {
            return;
        }
        self.console.log(record);
        if let Some(remote) = &self.remote {
            remote.log(record);
        }
    }

    fn flush(&self) {
        self.console.flush();
    }
}

/// Install the process logger
///
/// The console follows `RUST_LOG` (default `info`); when `udp` is given the
/// same records are also sent there.
pub fn init(udp: Option<&UdpLogConfig>) -> Result<(), LoggingError> {
    let console = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).build();
    let max_level: LevelFilter = console.filter();
    let remote = udp.map(UdpLogSink::bind).transpose()?;

    log::set_boxed_logger(Box::new(TeeLogger { console, remote }))?;
    log::set_max_level(max_level);
    Ok(())
}
