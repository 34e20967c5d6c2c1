//! Structured capture log.
//!
//! One JSON object per line for every scheduled send (not every received
//! packet), written when the send is enqueued:
//!
//! ```text
//! {"ts":1718000000.12,"direction":"client_to_server","len":4,"src":"127.0.0.1:40000","dst":"127.0.0.1:5301","hex":"0000002A","delay_ms":412.7}
//! ```

use std::convert::Infallible;
use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::impair::PendingSend;
use crate::types::Direction;

/// Destination of the capture log.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CaptureTarget {
    /// Standard output (`-`).
    #[default]
    Stdout,
    /// A file, truncated on open.
    File(PathBuf),
}

impl FromStr for CaptureTarget {
    type Err = Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(if s == "-" {
            CaptureTarget::Stdout
        } else {
            CaptureTarget::File(PathBuf::from(s))
        })
    }
}

impl From<String> for CaptureTarget {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(target) => target,
            Err(never) => match never {},
        }
    }
}

impl From<CaptureTarget> for String {
    fn from(target: CaptureTarget) -> Self {
        target.to_string()
    }
}

impl fmt::Display for CaptureTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureTarget::Stdout => write!(f, "-"),
            CaptureTarget::File(path) => write!(f, "{}", path.display()),
        }
    }
}

/// A single capture log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureRecord {
    /// Wall-clock seconds since the Unix epoch when the send was scheduled.
    #[serde(rename = "ts")]
    pub timestamp: f64,
    pub direction: Direction,
    #[serde(rename = "len")]
    pub length: usize,
    #[serde(rename = "src")]
    pub source: SocketAddr,
    #[serde(rename = "dst")]
    pub destination: SocketAddr,
    /// Uppercase hex of the payload.
    #[serde(rename = "hex")]
    pub payload_hex: String,
    /// Natural delay drawn for the packet.
    pub delay_ms: f64,
}

impl CaptureRecord {
    pub fn new(direction: Direction, send: &PendingSend) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();

        Self {
            timestamp,
            direction,
            length: send.payload.len(),
            source: send.source,
            destination: send.destination,
            payload_hex: hex::encode_upper(&send.payload),
            delay_ms: send.natural_delay_ms,
        }
    }
}

/// Line-oriented JSON writer for [`CaptureRecord`]s.
pub struct CaptureLog<W: Write = Box<dyn Write + Send>> {
    writer: W,
    records: u64,
}

impl CaptureLog {
    /// Open the configured target.
    pub fn open(target: &CaptureTarget) -> Result<Self> {
        let writer: Box<dyn Write + Send> = match target {
            CaptureTarget::Stdout => Box::new(io::stdout()),
            CaptureTarget::File(path) => {
                let file = File::create(path).map_err(|e| {
                    Error::Capture(format!("failed to create {}: {e}", path.display()))
                })?;
                Box::new(BufWriter::new(file))
            }
        };
        Ok(Self::new(writer))
    }
}

impl<W: Write> CaptureLog<W> {
    pub fn new(writer: W) -> Self {
        Self { writer, records: 0 }
    }

    /// Append a record for `send` and flush it so readers see it immediately.
    pub fn record(&mut self, direction: Direction, send: &PendingSend) -> Result<()> {
        let record = CaptureRecord::new(direction, send);
        serde_json::to_writer(&mut self.writer, &record)
            .map_err(|e| Error::Capture(e.to_string()))?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        self.records += 1;
        Ok(())
    }

    /// Number of records written.
    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> fmt::Debug for CaptureLog<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureLog")
            .field("records", &self.records)
            .finish_non_exhaustive()
    }
}
