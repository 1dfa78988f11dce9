//! SNMP session capability
//!
//! Collectors only ever talk to a device through the [`Session`] trait:
//! a scalar `get` and an ordered subtree `walk`. Sessions are produced by a
//! [`SessionFactory`], once per polling task, so no two tasks share a socket.
//!
//! ## Implementations
//!
//! - [`udp::UdpSession`]: SNMP v1/v2c over UDP with the BER codec in [`ber`]
//! - [`memory::MemorySession`]: in-process agent backed by an OID tree, used by
//!   tests and dry runs

pub mod ber;
pub mod memory;
pub mod oids;
pub mod udp;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result type alias for protocol operations
pub type SnmpResult<T> = Result<T, SnmpError>;

/// Object identifier, stored as its numeric arcs
///
/// Ordering is lexicographic by arc, which is the order agents walk in.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Oid(Vec<u32>);

impl Oid {
    pub fn new(arcs: Vec<u32>) -> Self {
        Self(arcs)
    }

    pub fn arcs(&self) -> &[u32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn starts_with(&self, prefix: &Oid) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Arcs remaining after `prefix`, if this OID lives under it
    pub fn suffix_after(&self, prefix: &Oid) -> Option<Oid> {
        self.0
            .strip_prefix(prefix.0.as_slice())
            .map(|rest| Oid(rest.to_vec()))
    }

    /// Append a single arc (`ifDescr` + `.3` -> `ifDescr.3`)
    pub fn child(&self, arc: u32) -> Oid {
        let mut arcs = self.0.clone();
        arcs.push(arc);
        Oid(arcs)
    }

    /// Append a dotted suffix such as a table row index
    pub fn join(&self, suffix: &Oid) -> Oid {
        let mut arcs = self.0.clone();
        arcs.extend_from_slice(&suffix.0);
        Oid(arcs)
    }

    pub fn last(&self) -> Option<u32> {
        self.0.last().copied()
    }

    /// The trailing `n` arcs (or all of them if shorter)
    pub fn tail(&self, n: usize) -> Oid {
        let start = self.0.len().saturating_sub(n);
        Oid(self.0[start..].to_vec())
    }
}

impl From<&[u32]> for Oid {
    fn from(arcs: &[u32]) -> Self {
        Oid(arcs.to_vec())
    }
}

impl fmt::Display for Oid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for arc in &self.0 {
            if !first {
                f.write_str(".")?;
            }
            write!(f, "{arc}")?;
            first = false;
        }
        Ok(())
    }
}

impl FromStr for Oid {
    type Err = SnmpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('.');
        if trimmed.is_empty() {
            return Ok(Oid::default());
        }

        trimmed
            .split('.')
            .map(|arc| {
                arc.parse::<u32>()
                    .map_err(|_| SnmpError::InvalidOid(s.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Oid)
    }
}

/// A value returned by an agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnmpValue {
    Integer(i64),
    OctetString(Vec<u8>),
    Null,
    ObjectIdentifier(Oid),
    IpAddress([u8; 4]),
    Counter32(u32),
    Gauge32(u32),
    TimeTicks(u32),
    Opaque(Vec<u8>),
    Counter64(u64),
    NoSuchObject,
    NoSuchInstance,
    EndOfMibView,
}

impl SnmpValue {
    /// Convenience constructor for text values
    pub fn text(s: impl AsRef<str>) -> Self {
        SnmpValue::OctetString(s.as_ref().as_bytes().to_vec())
    }

    /// Whether this is one of the v2c exception markers
    pub fn is_exception(&self) -> bool {
        matches!(
            self,
            SnmpValue::NoSuchObject | SnmpValue::NoSuchInstance | SnmpValue::EndOfMibView
        )
    }

    /// Whether the value carries no usable data (exceptions, null, empty string)
    pub fn is_empty(&self) -> bool {
        match self {
            SnmpValue::Null => true,
            SnmpValue::OctetString(bytes) | SnmpValue::Opaque(bytes) => bytes.is_empty(),
            other => other.is_exception(),
        }
    }

    /// Lenient integer view: numeric types, or decimal text with surrounding whitespace
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SnmpValue::Integer(v) => Some(*v),
            SnmpValue::Counter32(v) | SnmpValue::Gauge32(v) | SnmpValue::TimeTicks(v) => {
                Some(i64::from(*v))
            }
            SnmpValue::Counter64(v) => i64::try_from(*v).ok(),
            SnmpValue::OctetString(bytes) => std::str::from_utf8(bytes).ok()?.trim().parse().ok(),
            _ => None,
        }
    }

    /// Lenient unsigned view; negative values are rejected
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            SnmpValue::Counter64(v) => Some(*v),
            other => other.as_i64().and_then(|v| u64::try_from(v).ok()),
        }
    }

    /// Text view; octet strings are decoded lossily
    pub fn as_text(&self) -> String {
        match self {
            SnmpValue::OctetString(bytes) | SnmpValue::Opaque(bytes) => {
                String::from_utf8_lossy(bytes).into_owned()
            }
            SnmpValue::Integer(v) => v.to_string(),
            SnmpValue::Counter32(v) | SnmpValue::Gauge32(v) | SnmpValue::TimeTicks(v) => {
                v.to_string()
            }
            SnmpValue::Counter64(v) => v.to_string(),
            SnmpValue::ObjectIdentifier(oid) => oid.to_string(),
            SnmpValue::IpAddress([a, b, c, d]) => format!("{a}.{b}.{c}.{d}"),
            SnmpValue::Null => String::new(),
            SnmpValue::NoSuchObject => "noSuchObject".to_string(),
            SnmpValue::NoSuchInstance => "noSuchInstance".to_string(),
            SnmpValue::EndOfMibView => "endOfMibView".to_string(),
        }
    }
}

/// Errors produced by a protocol session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnmpError {
    /// No response within the timeout, retries included
    Timeout { host: String },

    /// Socket-level failure (bind, resolve, send, receive)
    Io(String),

    /// The host could not be reached at all
    Unreachable(String),

    /// Malformed packet on the wire
    Decode(String),

    /// The agent answered with a non-zero error-status
    ErrorStatus { status: i64, index: i64 },

    /// The agent has no value at this OID
    NoSuchObject(Oid),

    /// Dotted OID text that does not parse
    InvalidOid(String),
}

impl SnmpError {
    /// Network-level failures (as opposed to the agent answering "no")
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SnmpError::Timeout { .. } | SnmpError::Io(_) | SnmpError::Unreachable(_)
        )
    }
}

impl fmt::Display for SnmpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnmpError::Timeout { host } => write!(f, "timeout while waiting for {host}"),
            SnmpError::Io(msg) => write!(f, "socket error: {msg}"),
            SnmpError::Unreachable(msg) => write!(f, "host unreachable: {msg}"),
            SnmpError::Decode(msg) => write!(f, "malformed SNMP packet: {msg}"),
            SnmpError::ErrorStatus { status, index } => {
                write!(f, "agent returned error-status {status} at index {index}")
            }
            SnmpError::NoSuchObject(oid) => write!(f, "no value for OID {oid}"),
            SnmpError::InvalidOid(oid) => write!(f, "invalid OID '{oid}'"),
        }
    }
}

impl std::error::Error for SnmpError {}

impl From<std::io::Error> for SnmpError {
    fn from(err: std::io::Error) -> Self {
        SnmpError::Io(err.to_string())
    }
}

/// Protocol version spoken to the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SnmpVersion {
    #[serde(rename = "v1", alias = "1")]
    V1,
    #[default]
    #[serde(rename = "v2c", alias = "2c", alias = "2")]
    V2c,
}

impl SnmpVersion {
    /// Value of the `version` field in the message header
    pub fn wire_value(self) -> i64 {
        match self {
            SnmpVersion::V1 => 0,
            SnmpVersion::V2c => 1,
        }
    }
}

/// Parameters of a single session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub host: String,
    pub port: u16,
    pub community: String,
    pub version: SnmpVersion,
    pub timeout: Duration,
    pub retries: u32,
}

impl SessionOptions {
    pub fn new(host: impl Into<String>, community: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: oids::DEFAULT_PORT,
            community: community.into(),
            version: SnmpVersion::default(),
            timeout: Duration::from_secs(1),
            retries: 0,
        }
    }
}

/// Request/response access to one agent
#[async_trait]
pub trait Session: Send + Sync {
    /// Read a single scalar
    async fn get(&self, oid: &Oid) -> SnmpResult<SnmpValue>;

    /// Enumerate a subtree in agent order, returning `(suffix, value)` pairs
    /// where `suffix` is relative to `oid`
    async fn walk(&self, oid: &Oid) -> SnmpResult<Vec<(Oid, SnmpValue)>>;
}

/// Opens sessions; invoked once per polling task
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self, options: &SessionOptions) -> SnmpResult<Box<dyn Session>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oid_parse_and_display() {
        let oid: Oid = ".1.3.6.1.2.1.1.5.0".parse().unwrap();
        assert_eq!(oid.arcs(), &[1, 3, 6, 1, 2, 1, 1, 5, 0]);
        assert_eq!(oid.to_string(), "1.3.6.1.2.1.1.5.0");
        assert!("1.3.x".parse::<Oid>().is_err());
    }

    #[test]
    fn test_oid_suffix_and_ordering() {
        let base: Oid = "1.3.6.1.2.1.2.2.1.2".parse().unwrap();
        let row = base.child(10);
        assert_eq!(row.suffix_after(&base), Some(Oid::new(vec![10])));
        assert_eq!(base.suffix_after(&row), None);

        // 1.3.6.1.2.1.2.2.1.2.9 sorts before .10 by arc, not by text
        assert!(base.child(9) < base.child(10));
        assert_eq!(row.tail(2).to_string(), "2.10");
    }

    #[test]
    fn test_value_lenient_numeric_views() {
        assert_eq!(SnmpValue::text(" 42 ").as_i64(), Some(42));
        assert_eq!(SnmpValue::Counter32(7).as_u64(), Some(7));
        assert_eq!(SnmpValue::Integer(-1).as_u64(), None);
        assert_eq!(SnmpValue::text("abc").as_i64(), None);
        assert!(SnmpValue::text("").is_empty());
        assert!(SnmpValue::NoSuchInstance.is_empty());
    }

    #[test]
    fn test_transport_classification() {
        assert!(SnmpError::Timeout { host: "h".into() }.is_transport());
        assert!(!SnmpError::NoSuchObject(Oid::default()).is_transport());
    }
}
