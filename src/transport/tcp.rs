//! SCPI over TCP.
//!
//! [`StreamTransport`] speaks the newline-terminated line protocol over any
//! tokio byte stream; [`TcpTransport`] is its TCP instantiation.
//! [`BlockingTcpTransport`] does the same on a std socket for blocking
//! devices.
//!
//! A reply that misses its timeout may still arrive later. Both transports
//! count such replies and discard them, together with any other unsolicited
//! input, before the next query is written.

use super::{Address, AsyncTransport, BlockingTransport};
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures::FutureExt;
use std::io::{BufRead, ErrorKind, Read, Write};
use std::net::ToSocketAddrs;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Default connection timeout in milliseconds
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 1000;

/// Default reply timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Line transport over an async byte stream.
pub struct StreamTransport<S> {
    stream: BufReader<S>,
    timeout: Duration,
    // replies owed to queries that timed out
    stale: usize,
}

/// Async transport over TCP.
pub type TcpTransport = StreamTransport<TcpStream>;

impl StreamTransport<TcpStream> {
    /// Connect to a controller.
    pub async fn connect(address: &Address, connect_timeout: Duration, reply_timeout: Duration) -> Result<Self> {
        let authority = address.authority();
        let stream = timeout(connect_timeout, TcpStream::connect(authority.as_str()))
            .await
            .with_context(|| format!("Connection timeout to {}", address))?
            .with_context(|| format!("Failed to connect to {}", address))?;

        stream.set_nodelay(true)?;

        tracing::info!(%address, "Connected to PACE controller");

        Ok(Self::from_stream(stream, reply_timeout))
    }
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn from_stream(stream: S, reply_timeout: Duration) -> Self {
        Self {
            stream: BufReader::new(stream),
            timeout: reply_timeout,
            stale: 0,
        }
    }

    /// Set the reply timeout.
    pub fn set_timeout(&mut self, duration: Duration) {
        self.timeout = duration;
    }

    async fn send(&mut self, line: &str) -> Result<()> {
        let data = format!("{}\n", line);
        self.stream
            .get_mut()
            .write_all(data.as_bytes())
            .await
            .with_context(|| format!("Failed to write: {}", line))?;
        self.stream
            .get_mut()
            .flush()
            .await
            .context("Failed to flush stream")
    }

    /// Drop late replies and anything else received since the last query.
    async fn discard_stale(&mut self) -> Result<()> {
        while self.stale > 0 {
            let mut line = String::new();
            match timeout(self.timeout, self.stream.read_line(&mut line)).await {
                Ok(Ok(0)) => bail!("Connection closed by device"),
                Ok(Ok(_)) => {
                    tracing::debug!(reply = line.trim_end(), "Discarding late reply");
                    self.stale -= 1;
                }
                Ok(Err(e)) => return Err(e).context("Failed to read late reply"),
                Err(_) => bail!("Still waiting for {} late replies", self.stale),
            }
        }

        while let Some(buffered) = self.stream.fill_buf().now_or_never() {
            let len = buffered.context("Failed to read stream")?.len();
            if len == 0 {
                break;
            }
            tracing::debug!(bytes = len, "Flushing unsolicited input");
            self.stream.consume(len);
        }
        Ok(())
    }
}

#[async_trait]
impl<S> AsyncTransport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write(&mut self, line: &str) -> Result<()> {
        self.send(line).await
    }

    async fn write_readline(&mut self, line: &str) -> Result<String> {
        self.discard_stale().await?;
        self.send(line).await?;

        let mut reply = String::new();
        match timeout(self.timeout, self.stream.read_line(&mut reply)).await {
            Ok(Ok(0)) => bail!("Connection closed by device"),
            Ok(Ok(_)) => Ok(reply.trim_end().to_string()),
            Ok(Err(e)) => Err(e).context("Failed to read reply"),
            Err(_) => {
                self.stale += 1;
                bail!("Timeout waiting for reply to: {}", line)
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.stream
            .get_mut()
            .shutdown()
            .await
            .context("Failed to shut down stream")
    }
}

/// Blocking transport over a std TCP socket.
pub struct BlockingTcpTransport {
    stream: std::io::BufReader<std::net::TcpStream>,
    stale: usize,
}

impl BlockingTcpTransport {
    pub fn connect(address: &Address, connect_timeout: Duration, reply_timeout: Duration) -> Result<Self> {
        let socket = address
            .authority()
            .to_socket_addrs()
            .with_context(|| format!("Failed to resolve {}", address))?
            .next()
            .ok_or_else(|| anyhow!("No socket address for {}", address))?;

        let stream = std::net::TcpStream::connect_timeout(&socket, connect_timeout)
            .with_context(|| format!("Failed to connect to {}", address))?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(reply_timeout))?;
        stream.set_write_timeout(Some(reply_timeout))?;

        tracing::info!(%address, "Connected to PACE controller");

        Ok(Self {
            stream: std::io::BufReader::new(stream),
            stale: 0,
        })
    }

    fn send(&mut self, line: &str) -> Result<()> {
        let writer = self.stream.get_mut();
        writer
            .write_all(format!("{}\n", line).as_bytes())
            .with_context(|| format!("Failed to write: {}", line))?;
        writer.flush().context("Failed to flush stream")
    }

    /// Drop late replies and anything else received since the last query.
    fn discard_stale(&mut self) -> Result<()> {
        while self.stale > 0 {
            let mut line = String::new();
            match self.stream.read_line(&mut line) {
                Ok(0) => bail!("Connection closed by device"),
                Ok(_) => {
                    tracing::debug!(reply = line.trim_end(), "Discarding late reply");
                    self.stale -= 1;
                }
                Err(e) if is_timeout(&e) => bail!("Still waiting for {} late replies", self.stale),
                Err(e) => return Err(e).context("Failed to read late reply"),
            }
        }

        let buffered = self.stream.buffer().len();
        if buffered > 0 {
            tracing::debug!(bytes = buffered, "Flushing unsolicited input");
            self.stream.consume(buffered);
        }

        let socket = self.stream.get_mut();
        socket.set_nonblocking(true)?;
        let mut discard = [0u8; 256];
        let drained = loop {
            match socket.read(&mut discard) {
                Ok(0) => break Ok(()),
                Ok(n) => tracing::debug!(bytes = n, "Flushing unsolicited input"),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        socket.set_nonblocking(false)?;
        drained.context("Failed to flush stream")
    }
}

fn is_timeout(error: &std::io::Error) -> bool {
    matches!(error.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

impl BlockingTransport for BlockingTcpTransport {
    fn write(&mut self, line: &str) -> Result<()> {
        self.send(line)
    }

    fn write_readline(&mut self, line: &str) -> Result<String> {
        self.discard_stale()?;
        self.send(line)?;

        let mut reply = String::new();
        match self.stream.read_line(&mut reply) {
            Ok(0) => bail!("Connection closed by device"),
            Ok(_) => Ok(reply.trim_end().to_string()),
            Err(e) if is_timeout(&e) => {
                self.stale += 1;
                bail!("Timeout waiting for reply to: {}", line)
            }
            Err(e) => Err(e).with_context(|| format!("Failed to read reply to: {}", line)),
        }
    }

    fn close(&mut self) -> Result<()> {
        self.stream
            .get_ref()
            .shutdown(std::net::Shutdown::Both)
            .context("Failed to shut down socket")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_write_readline_over_duplex() {
        let (client, mut device) = tokio::io::duplex(256);
        let mut transport = StreamTransport::from_stream(client, Duration::from_millis(500));

        let responder = tokio::spawn(async move {
            let mut buf = vec![0u8; 64];
            let n = device.read(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b":SENS1:PRES?\n");
            device.write_all(b":SENS1:PRES 1013.25\r\n").await.unwrap();
            device
        });

        let reply = transport.write_readline(":SENS1:PRES?").await.unwrap();
        assert_eq!(reply, ":SENS1:PRES 1013.25");
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_stream_is_an_error() {
        let (client, device) = tokio::io::duplex(64);
        drop(device);
        let mut transport = StreamTransport::from_stream(client, Duration::from_millis(100));
        assert!(transport.write_readline("*IDN?").await.is_err());
    }

    #[tokio::test]
    async fn test_reply_timeout() {
        let (client, _device) = tokio::io::duplex(64);
        let mut transport = StreamTransport::from_stream(client, Duration::from_millis(20));
        let err = transport.write_readline("*IDN?").await.unwrap_err();
        assert!(err.to_string().contains("Timeout"));
    }

    #[tokio::test]
    async fn test_late_reply_is_not_taken_for_the_next() {
        let (client, device) = tokio::io::duplex(256);
        let mut transport = StreamTransport::from_stream(client, Duration::from_millis(80));

        let responder = tokio::spawn(async move {
            let (reader, mut writer) = tokio::io::split(device);
            let mut lines = BufReader::new(reader).lines();
            let first = lines.next_line().await.unwrap().unwrap();
            assert_eq!(first, ":SOUR1:PRES:LEV:IMM:AMPL?");
            tokio::time::sleep(Duration::from_millis(120)).await;
            writer.write_all(b":SOUR1:PRES:LEV:IMM:AMPL 1500.0\n").await.unwrap();
            let second = lines.next_line().await.unwrap().unwrap();
            assert_eq!(second, ":SENS1:PRES?");
            writer.write_all(b":SENS1:PRES 34.567\n").await.unwrap();
        });

        let err = transport
            .write_readline(":SOUR1:PRES:LEV:IMM:AMPL?")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Timeout"));

        let reply = transport.write_readline(":SENS1:PRES?").await.unwrap();
        assert_eq!(reply, ":SENS1:PRES 34.567");
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_late_reply_blocks_next_query() {
        let (client, mut device) = tokio::io::duplex(256);
        let mut transport = StreamTransport::from_stream(client, Duration::from_millis(20));

        assert!(transport.write_readline("*IDN?").await.is_err());
        let err = transport.write_readline(":SENS1:PRES?").await.unwrap_err();
        assert!(err.to_string().contains("late replies"));

        // the second query never went out
        let mut buf = vec![0u8; 64];
        let n = device.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"*IDN?\n");
    }

    #[tokio::test]
    async fn test_unsolicited_input_is_flushed_before_query() {
        let (client, device) = tokio::io::duplex(256);
        let mut transport = StreamTransport::from_stream(client, Duration::from_millis(500));

        let responder = tokio::spawn(async move {
            let (reader, mut writer) = tokio::io::split(device);
            let mut lines = BufReader::new(reader).lines();
            assert_eq!(lines.next_line().await.unwrap().unwrap(), ":CAL1:ZERO 1");
            writer.write_all(b"NACK\n").await.unwrap();
            assert_eq!(lines.next_line().await.unwrap().unwrap(), "*IDN?");
            writer.write_all(b"*IDN GE Druck,PACE5000\n").await.unwrap();
        });

        // a rejected set answers even though nothing reads it
        transport.write(":CAL1:ZERO 1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let reply = transport.write_readline("*IDN?").await.unwrap();
        assert_eq!(reply, "*IDN GE Druck,PACE5000");
        responder.await.unwrap();
    }

    #[test]
    fn test_blocking_late_reply_is_discarded() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let device = std::thread::spawn(move || {
            let (socket, _) = listener.accept().unwrap();
            let mut writer = socket.try_clone().unwrap();
            let mut lines = std::io::BufReader::new(socket).lines();
            assert_eq!(lines.next().unwrap().unwrap(), ":SOUR1:PRES:LEV:IMM:AMPL?");
            std::thread::sleep(Duration::from_millis(100));
            writer.write_all(b":SOUR1:PRES:LEV:IMM:AMPL 1500.0\n").unwrap();
            assert_eq!(lines.next().unwrap().unwrap(), ":SENS1:PRES?");
            writer.write_all(b":SENS1:PRES 34.567\n").unwrap();
        });

        let address = Address::new("127.0.0.1", port);
        let mut transport =
            BlockingTcpTransport::connect(&address, Duration::from_secs(1), Duration::from_millis(50))
                .unwrap();
        assert!(BlockingTransport::write_readline(&mut transport, ":SOUR1:PRES:LEV:IMM:AMPL?").is_err());
        std::thread::sleep(Duration::from_millis(150));

        let reply = BlockingTransport::write_readline(&mut transport, ":SENS1:PRES?").unwrap();
        assert_eq!(reply, ":SENS1:PRES 34.567");
        device.join().unwrap();
    }

    #[tokio::test]
    async fn test_connect_to_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });

        let address = Address::new("127.0.0.1", port);
        let transport =
            TcpTransport::connect(&address, Duration::from_secs(1), Duration::from_secs(1)).await;
        assert!(transport.is_ok());
        accept.await.unwrap();
    }
}
