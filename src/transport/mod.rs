//! Transport collaborators.
//!
//! The engine only needs two primitives: write a line, and write a line then
//! read one reply line. Both exist in a blocking and a future-based flavour;
//! which one a device uses decides its execution mode.
//!
//! Transports own line termination. Callers pass the bare request text and
//! receive the reply without its terminator. Reconnection and retries are a
//! transport concern and are not attempted by the engine.

use crate::error::{PaceError, PaceResult};
use anyhow::Result;
use async_trait::async_trait;
use std::fmt;
use std::str::FromStr;

pub mod mock;
pub mod tcp;

pub use mock::MockTransport;
pub use tcp::{BlockingTcpTransport, StreamTransport, TcpTransport};

/// Default SCPI port of PACE controllers.
pub const DEFAULT_PORT: u16 = 5025;

/// Blocking line transport.
pub trait BlockingTransport: Send {
    /// Send a line without reading a reply.
    fn write(&mut self, line: &str) -> Result<()>;

    /// Send a line and read one reply line.
    fn write_readline(&mut self, line: &str) -> Result<String>;

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Future-based line transport.
#[async_trait]
pub trait AsyncTransport: Send {
    /// Send a line without reading a reply.
    async fn write(&mut self, line: &str) -> Result<()>;

    /// Send a line and read one reply line.
    async fn write_readline(&mut self, line: &str) -> Result<String>;

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Network address of a controller, written `tcp://host[:port]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub host: String,
    pub port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host:port`, suitable for socket APIs.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl FromStr for Address {
    type Err = PaceError;

    fn from_str(text: &str) -> PaceResult<Self> {
        let rest = match text.split_once("://") {
            Some(("tcp", rest)) => rest,
            Some((scheme, _)) => {
                return Err(PaceError::Config(format!(
                    "Unsupported address scheme '{}' in '{}'",
                    scheme, text
                )))
            }
            None => text,
        };
        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| PaceError::Config(format!("Invalid port in address '{}'", text)))?;
                (host, port)
            }
            None => (rest, DEFAULT_PORT),
        };
        if host.is_empty() {
            return Err(PaceError::Config(format!("Missing host in address '{}'", text)));
        }
        Ok(Address::new(host, port))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tcp://{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_parsing() {
        let address: Address = "tcp://pace.lab:5000".parse().unwrap();
        assert_eq!(address, Address::new("pace.lab", 5000));

        let address: Address = "tcp://10.0.0.7".parse().unwrap();
        assert_eq!(address.port, DEFAULT_PORT);
        assert_eq!(address.to_string(), "tcp://10.0.0.7:5025");

        let address: Address = "localhost:1234".parse().unwrap();
        assert_eq!(address.authority(), "localhost:1234");
    }

    #[test]
    fn test_address_rejects_bad_input() {
        assert!("serial:///dev/ttyS0".parse::<Address>().is_err());
        assert!("tcp://host:notaport".parse::<Address>().is_err());
        assert!("tcp://:5025".parse::<Address>().is_err());
    }
}
