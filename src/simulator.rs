//! In-process PACE simulator.
//!
//! Answers the same line protocol the engine speaks, so devices can be
//! exercised without hardware. It can be plugged in directly as a blocking
//! or async transport, or served over TCP for external clients:
//!
//! ```text
//! $ pace simulate --port 5025
//! $ nc localhost 5025
//! *IDN?
//! *IDN GE Druck,PACE5000,10388796,DK0367  v02.02.14
//! ```
//!
//! Every `;`-separated sub-request is either a query (`HEADER?`, answered
//! with `HEADER value`) or a set (`HEADER value`, stored silently). Unknown
//! headers and malformed requests answer `NACK`.

use crate::transport::{AsyncTransport, BlockingTransport};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

const NACK: &str = "NACK";

/// Simulator settings. Supplied explicitly; nothing is merged from
/// process-wide state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Full `*IDN?` reply, including the echoed mnemonic
    #[serde(default = "default_idn")]
    pub idn: String,
    /// Full `:SYST:ERR?` reply
    #[serde(default = "default_sys_error")]
    pub sys_error: String,
    /// Initial payload per command header; only seeded headers are known
    #[serde(default = "default_values")]
    pub values: BTreeMap<String, String>,
}

fn default_idn() -> String {
    "*IDN GE Druck,PACE5000,10388796,DK0367  v02.02.14".to_string()
}

fn default_sys_error() -> String {
    ":SYST:ERR 0, No error".to_string()
}

fn default_values() -> BTreeMap<String, String> {
    let mut values = BTreeMap::new();
    let mut seed = |header: String, value: &str| {
        values.insert(header, value.to_string());
    };
    for id in [1, 2] {
        seed(format!(":SENS{}:PRES", id), "1013.25");
        seed(format!(":SENS{}:PRES:RANG", id), "\"20.00bar\"");
        seed(format!(":SENS{}:PRES:INL", id), "1013.25,1");
        seed(format!(":SENS{}:PRES:BAR", id), "1013.25");
        seed(format!(":SENS{}:PRES:RES", id), "5");
        seed(format!(":SOUR{}:PRES:COMP1", id), "2000.0");
        seed(format!(":SOUR{}:PRES:COMP2", id), "0.0");
        seed(format!(":SOUR{}:PRES:EFF", id), "0.0");
        seed(format!(":SOUR{}:PRES:LEV:IMM:AMPL", id), "1000.0");
        seed(format!(":SOUR{}:PRES:SLEW", id), "10.0");
        seed(format!(":SOUR{}:PRES:SLEW:MODE", id), "LIN");
        seed(format!(":SOUR{}:PRES:SLEW:OVER", id), "0");
        seed(format!(":OUTP{}:STAT", id), "0");
        for relay in 1..=3 {
            seed(format!(":OUTP{}:LOG{}", id, relay), "0");
        }
        seed(format!(":UNIT{}:PRES", id), "MBAR");
    }
    seed("*TST".to_string(), "1");
    seed(":INST:MAC".to_string(), "\"00:0B:3C:00:12:34\"");
    seed(":INST:TASK".to_string(), "CONT");
    seed(":SYST:VERS".to_string(), "\"02.02.14\"");
    seed(":SYST:AREA".to_string(), "EUROPE");
    seed(":SYST:SET".to_string(), "MEAS,0.0");
    for n in 1..=7 {
        seed(format!(":INST:SN{}", n), &format!("{}", 1_038_870 + n));
    }
    values
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            idn: default_idn(),
            sys_error: default_sys_error(),
            values: default_values(),
        }
    }
}

impl SimulatorConfig {
    /// Seed (or override) one header.
    pub fn with_value(mut self, header: &str, value: impl Into<String>) -> Self {
        self.values.insert(header.to_string(), value.into());
        self
    }
}

/// Canonical form of a command header: uppercase, rooted with `:` and every
/// mnemonic in SCPI short form (`SYSTem:ERRor` -> `:SYST:ERR`).
pub fn normalize_header(header: &str) -> String {
    let header = header.trim().to_uppercase();
    if header.starts_with('*') {
        return header;
    }
    let tokens: Vec<String> = header
        .trim_start_matches(':')
        .split(':')
        .map(short_form)
        .collect();
    format!(":{}", tokens.join(":"))
}

fn short_form(token: &str) -> String {
    let word = token.trim_end_matches(|c: char| c.is_ascii_digit());
    let digits = &token[word.len()..];
    if word.len() <= 4 || !word.is_ascii() {
        return token.to_string();
    }
    let cut = if matches!(word.as_bytes()[3], b'A' | b'E' | b'I' | b'O' | b'U') {
        3
    } else {
        4
    };
    format!("{}{}", &word[..cut], digits)
}

struct State {
    config: SimulatorConfig,
    values: BTreeMap<String, String>,
}

/// Simulated controller. Clones share state.
#[derive(Clone)]
pub struct PaceSimulator {
    state: Arc<Mutex<State>>,
}

impl Default for PaceSimulator {
    fn default() -> Self {
        Self::new(SimulatorConfig::default())
    }
}

impl PaceSimulator {
    pub fn new(config: SimulatorConfig) -> Self {
        let values = config
            .values
            .iter()
            .map(|(header, value)| (normalize_header(header), value.clone()))
            .collect();
        Self {
            state: Arc::new(Mutex::new(State { config, values })),
        }
    }

    /// Current payload of a header, as a later query would report it.
    pub fn value(&self, header: &str) -> Option<String> {
        self.state.lock().values.get(&normalize_header(header)).cloned()
    }

    /// Answer one protocol line. `None` when nothing is to be sent back.
    pub fn handle_line(&self, line: &str) -> Option<String> {
        debug!(request = line, "simulator request");
        let results: Vec<String> = line
            .split(';')
            .map(str::trim)
            .filter(|request| !request.is_empty())
            .filter_map(|request| self.handle_request(request))
            .collect();
        if results.is_empty() {
            None
        } else {
            let reply = results.join(";");
            debug!(reply = reply.as_str(), "simulator reply");
            Some(reply)
        }
    }

    fn handle_request(&self, request: &str) -> Option<String> {
        let mut state = self.state.lock();
        if let Some(header) = request.strip_suffix('?') {
            let header = normalize_header(header);
            let reply = match header.as_str() {
                "*IDN" => state.config.idn.clone(),
                ":SYST:ERR" => state.config.sys_error.clone(),
                ":SYST:DATE" => chrono::Local::now().format("\"%m/%d/%Y\"").to_string(),
                ":SYST:TIME" => chrono::Local::now().format("\"%H:%M:%S\"").to_string(),
                _ => match state.values.get(&header) {
                    Some(value) => format!("{} {}", header, value),
                    None => NACK.to_string(),
                },
            };
            return Some(reply);
        }

        let Some((header, value)) = request.split_once(char::is_whitespace) else {
            return Some(NACK.to_string());
        };
        let header = normalize_header(header);
        match header.as_str() {
            // the host clock cannot be changed
            ":SYST:DATE" | ":SYST:TIME" => None,
            "*IDN" | ":SYST:ERR" => Some(NACK.to_string()),
            _ => match state.values.get_mut(&header) {
                Some(slot) => {
                    *slot = value.trim().to_string();
                    None
                }
                None => Some(NACK.to_string()),
            },
        }
    }

    /// Serve one client over any byte stream until it disconnects.
    pub async fn serve_stream<S>(&self, stream: S) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines.next_line().await? {
            if let Some(reply) = self.handle_line(&line) {
                writer.write_all(format!("{}\n", reply).as_bytes()).await?;
                writer.flush().await?;
            }
        }
        Ok(())
    }

    /// Accept clients forever, one task per connection.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let address = listener.local_addr()?;
        info!(%address, "PACE simulator listening");
        loop {
            let (socket, peer) = listener.accept().await?;
            info!(%peer, "client connected");
            let simulator = self.clone();
            tokio::spawn(async move {
                if let Err(e) = simulator.serve_stream(socket).await {
                    warn!(%peer, error = %e, "client connection failed");
                }
                info!(%peer, "client disconnected");
            });
        }
    }

    fn reply_to(&self, line: &str) -> Result<String> {
        self.handle_line(line)
            .ok_or_else(|| anyhow!("Simulator sent no reply to: {}", line))
    }
}

impl BlockingTransport for PaceSimulator {
    fn write(&mut self, line: &str) -> Result<()> {
        self.handle_line(line);
        Ok(())
    }

    fn write_readline(&mut self, line: &str) -> Result<String> {
        self.reply_to(line)
    }
}

#[async_trait]
impl AsyncTransport for PaceSimulator {
    async fn write(&mut self, line: &str) -> Result<()> {
        self.handle_line(line);
        Ok(())
    }

    async fn write_readline(&mut self, line: &str) -> Result<String> {
        self.reply_to(line)
    }
}
