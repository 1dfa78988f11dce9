//! SNMP v1/v2c over UDP

use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{UdpSocket, lookup_host};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use super::ber::{Message, Pdu, PduType};
use super::{Oid, Session, SessionFactory, SessionOptions, SnmpError, SnmpResult, SnmpValue};

/// Upper bound on rows returned by a single walk
const MAX_WALK_ROWS: usize = 10_000;

const RECV_BUFFER: usize = 65_535;

/// A connected UDP socket bound to one agent
pub struct UdpSession {
    socket: UdpSocket,
    host: String,
    community: Vec<u8>,
    version: i64,
    timeout: Duration,
    retries: u32,
    next_request_id: AtomicI32,

    /// One request in flight at a time so responses are never interleaved
    exchange: Mutex<()>,
}

impl UdpSession {
    pub async fn connect(options: &SessionOptions) -> SnmpResult<Self> {
        let target = lookup_host((options.host.as_str(), options.port))
            .await
            .map_err(|e| SnmpError::Unreachable(format!("{}: {e}", options.host)))?
            .next()
            .ok_or_else(|| SnmpError::Unreachable(format!("{}: no address", options.host)))?;

        let bind = if target.is_ipv4() { "0.0.0.0:0" } else { "[::]:0" };
        let socket = UdpSocket::bind(bind).await?;
        socket.connect(target).await?;

        debug!(host = %options.host, %target, "opened SNMP session");

        Ok(Self {
            socket,
            host: options.host.clone(),
            community: options.community.as_bytes().to_vec(),
            version: options.version.wire_value(),
            timeout: options.timeout,
            retries: options.retries,
            next_request_id: AtomicI32::new(seed_request_id()),
            exchange: Mutex::new(()),
        })
    }

    fn request_id(&self) -> i32 {
        // Request ids stay positive so they survive agents that mangle the sign bit
        self.next_request_id.fetch_add(1, Ordering::Relaxed) & i32::MAX
    }

    async fn exchange(&self, pdu_type: PduType, oid: &Oid) -> SnmpResult<Pdu> {
        let _guard = self.exchange.lock().await;

        let request_id = self.request_id();
        let request = Message {
            version: self.version,
            community: self.community.clone(),
            pdu: Pdu::request(pdu_type, request_id, std::slice::from_ref(oid)),
        }
        .encode();

        let mut buf = vec![0u8; RECV_BUFFER];
        for attempt in 0..=self.retries {
            trace!(host = %self.host, %oid, attempt, request_id, "sending {:?}", pdu_type);
            self.socket.send(&request).await?;

            let deadline = tokio::time::Instant::now() + self.timeout;
            loop {
                let received = tokio::time::timeout_at(deadline, self.socket.recv(&mut buf)).await;
                let len = match received {
                    Ok(Ok(len)) => len,
                    Ok(Err(e)) => return Err(e.into()),
                    Err(_) => break,
                };

                let response = match Message::decode(&buf[..len]) {
                    Ok(message) => message,
                    Err(e) => {
                        debug!(host = %self.host, error = %e, "discarding undecodable datagram");
                        continue;
                    }
                };

                if response.pdu.request_id != request_id {
                    trace!(
                        host = %self.host,
                        expected = request_id,
                        got = response.pdu.request_id,
                        "discarding stale response"
                    );
                    continue;
                }

                return Ok(response.pdu);
            }
        }

        Err(SnmpError::Timeout {
            host: self.host.clone(),
        })
    }
}

fn seed_request_id() -> i32 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(1);
    (nanos & 0x3FFF_FFFF) as i32
}

fn first_varbind(pdu: Pdu) -> SnmpResult<(Oid, SnmpValue)> {
    pdu.varbinds
        .into_iter()
        .next()
        .ok_or_else(|| SnmpError::Decode("response without varbinds".to_string()))
}

#[async_trait]
impl Session for UdpSession {
    async fn get(&self, oid: &Oid) -> SnmpResult<SnmpValue> {
        let pdu = self.exchange(PduType::GetRequest, oid).await?;
        match pdu.error_status {
            0 => {}
            // v1 noSuchName
            2 => return Err(SnmpError::NoSuchObject(oid.clone())),
            status => {
                return Err(SnmpError::ErrorStatus {
                    status,
                    index: pdu.error_index,
                });
            }
        }

        let (_, value) = first_varbind(pdu)?;
        if value.is_exception() {
            return Err(SnmpError::NoSuchObject(oid.clone()));
        }
        Ok(value)
    }

    async fn walk(&self, oid: &Oid) -> SnmpResult<Vec<(Oid, SnmpValue)>> {
        let mut rows = Vec::new();
        let mut cursor = oid.clone();

        while rows.len() < MAX_WALK_ROWS {
            let pdu = self.exchange(PduType::GetNextRequest, &cursor).await?;
            if pdu.error_status == 2 {
                // v1 agents signal the end of the MIB with noSuchName
                break;
            }
            if pdu.error_status != 0 {
                return Err(SnmpError::ErrorStatus {
                    status: pdu.error_status,
                    index: pdu.error_index,
                });
            }

            let (next, value) = first_varbind(pdu)?;
            if value == SnmpValue::EndOfMibView || next <= cursor {
                break;
            }
            let Some(suffix) = next.suffix_after(oid) else {
                break;
            };

            rows.push((suffix, value));
            cursor = next;
        }

        trace!(host = %self.host, %oid, rows = rows.len(), "walk finished");
        Ok(rows)
    }
}

/// Opens a fresh [`UdpSession`] per call
#[derive(Debug, Clone, Copy, Default)]
pub struct UdpSessionFactory;

#[async_trait]
impl SessionFactory for UdpSessionFactory {
    async fn open(&self, options: &SessionOptions) -> SnmpResult<Box<dyn Session>> {
        Ok(Box::new(UdpSession::connect(options).await?))
    }
}
