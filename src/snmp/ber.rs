//! BER encoding of SNMP v1/v2c messages
//!
//! Only the subset needed for `get` / `get-next` requests and their responses:
//!
//! ```text
//! Message ::= SEQUENCE { version INTEGER, community OCTET STRING, pdu PDU }
//! PDU     ::= [tag] { request-id, error-status, error-index, SEQUENCE OF VarBind }
//! VarBind ::= SEQUENCE { name OBJECT IDENTIFIER, value ANY }
//! ```

use super::{Oid, SnmpError, SnmpResult, SnmpValue};

const TAG_INTEGER: u8 = 0x02;
const TAG_OCTET_STRING: u8 = 0x04;
const TAG_NULL: u8 = 0x05;
const TAG_OID: u8 = 0x06;
const TAG_SEQUENCE: u8 = 0x30;
const TAG_IP_ADDRESS: u8 = 0x40;
const TAG_COUNTER32: u8 = 0x41;
const TAG_GAUGE32: u8 = 0x42;
const TAG_TIMETICKS: u8 = 0x43;
const TAG_OPAQUE: u8 = 0x44;
const TAG_COUNTER64: u8 = 0x46;
const TAG_NO_SUCH_OBJECT: u8 = 0x80;
const TAG_NO_SUCH_INSTANCE: u8 = 0x81;
const TAG_END_OF_MIB_VIEW: u8 = 0x82;

/// PDU kinds understood by the codec
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduType {
    GetRequest,
    GetNextRequest,
    Response,
    Report,
}

impl PduType {
    fn tag(self) -> u8 {
        match self {
            PduType::GetRequest => 0xA0,
            PduType::GetNextRequest => 0xA1,
            PduType::Response => 0xA2,
            PduType::Report => 0xA8,
        }
    }

    fn from_tag(tag: u8) -> SnmpResult<Self> {
        match tag {
            0xA0 => Ok(PduType::GetRequest),
            0xA1 => Ok(PduType::GetNextRequest),
            0xA2 => Ok(PduType::Response),
            0xA8 => Ok(PduType::Report),
            other => Err(SnmpError::Decode(format!("unsupported PDU tag 0x{other:02X}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pdu {
    pub pdu_type: PduType,
    pub request_id: i32,
    pub error_status: i64,
    pub error_index: i64,
    pub varbinds: Vec<(Oid, SnmpValue)>,
}

impl Pdu {
    /// Request PDU with `Null` placeholders for every OID
    pub fn request(pdu_type: PduType, request_id: i32, oids: &[Oid]) -> Self {
        Self {
            pdu_type,
            request_id,
            error_status: 0,
            error_index: 0,
            varbinds: oids.iter().map(|oid| (oid.clone(), SnmpValue::Null)).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub version: i64,
    pub community: Vec<u8>,
    pub pdu: Pdu,
}

impl Message {
    pub fn encode(&self) -> Vec<u8> {
        let mut varbinds = Vec::new();
        for (oid, value) in &self.pdu.varbinds {
            let mut varbind = Vec::new();
            push_tlv(TAG_OID, &oid_content(oid), &mut varbind);
            push_value(value, &mut varbind);
            push_tlv(TAG_SEQUENCE, &varbind, &mut varbinds);
        }

        let mut pdu = Vec::new();
        push_tlv(TAG_INTEGER, &integer_content(i64::from(self.pdu.request_id)), &mut pdu);
        push_tlv(TAG_INTEGER, &integer_content(self.pdu.error_status), &mut pdu);
        push_tlv(TAG_INTEGER, &integer_content(self.pdu.error_index), &mut pdu);
        push_tlv(TAG_SEQUENCE, &varbinds, &mut pdu);

        let mut body = Vec::new();
        push_tlv(TAG_INTEGER, &integer_content(self.version), &mut body);
        push_tlv(TAG_OCTET_STRING, &self.community, &mut body);
        push_tlv(self.pdu.pdu_type.tag(), &pdu, &mut body);

        let mut out = Vec::with_capacity(body.len() + 4);
        push_tlv(TAG_SEQUENCE, &body, &mut out);
        out
    }

    pub fn decode(buf: &[u8]) -> SnmpResult<Self> {
        let mut outer = Reader::new(buf);
        let body = outer.expect(TAG_SEQUENCE)?;

        let mut body = Reader::new(body);
        let version = decode_integer(body.expect(TAG_INTEGER)?)?;
        let community = body.expect(TAG_OCTET_STRING)?.to_vec();
        let (tag, pdu) = body.read_tlv()?;
        let pdu_type = PduType::from_tag(tag)?;

        let mut pdu = Reader::new(pdu);
        let request_id = decode_integer(pdu.expect(TAG_INTEGER)?)?;
        let request_id = i32::try_from(request_id)
            .map_err(|_| SnmpError::Decode(format!("request-id {request_id} out of range")))?;
        let error_status = decode_integer(pdu.expect(TAG_INTEGER)?)?;
        let error_index = decode_integer(pdu.expect(TAG_INTEGER)?)?;

        let mut list = Reader::new(pdu.expect(TAG_SEQUENCE)?);
        let mut varbinds = Vec::new();
        while !list.is_done() {
            let mut varbind = Reader::new(list.expect(TAG_SEQUENCE)?);
            let oid = decode_oid(varbind.expect(TAG_OID)?)?;
            let (tag, content) = varbind.read_tlv()?;
            varbinds.push((oid, decode_value(tag, content)?));
        }

        Ok(Message {
            version,
            community,
            pdu: Pdu {
                pdu_type,
                request_id,
                error_status,
                error_index,
                varbinds,
            },
        })
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn is_done(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn byte(&mut self) -> SnmpResult<u8> {
        let b = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| SnmpError::Decode("unexpected end of packet".to_string()))?;
        self.pos += 1;
        Ok(b)
    }

    fn length(&mut self) -> SnmpResult<usize> {
        let first = self.byte()?;
        if first & 0x80 == 0 {
            return Ok(usize::from(first));
        }

        let count = usize::from(first & 0x7F);
        if count == 0 || count > 4 {
            return Err(SnmpError::Decode(format!("unsupported length form 0x{first:02X}")));
        }

        let mut len = 0usize;
        for _ in 0..count {
            len = (len << 8) | usize::from(self.byte()?);
        }
        Ok(len)
    }

    fn read_tlv(&mut self) -> SnmpResult<(u8, &'a [u8])> {
        let tag = self.byte()?;
        let len = self.length()?;
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| SnmpError::Decode(format!("length {len} overruns packet")))?;
        let content = &self.buf[self.pos..end];
        self.pos = end;
        Ok((tag, content))
    }

    fn expect(&mut self, expected: u8) -> SnmpResult<&'a [u8]> {
        let (tag, content) = self.read_tlv()?;
        if tag != expected {
            return Err(SnmpError::Decode(format!(
                "expected tag 0x{expected:02X}, found 0x{tag:02X}"
            )));
        }
        Ok(content)
    }
}

fn push_length(len: usize, out: &mut Vec<u8>) {
    if len < 0x80 {
        out.push(len as u8);
        return;
    }

    let bytes = len.to_be_bytes();
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
    out.push(0x80 | (bytes.len() - start) as u8);
    out.extend_from_slice(&bytes[start..]);
}

fn push_tlv(tag: u8, content: &[u8], out: &mut Vec<u8>) {
    out.push(tag);
    push_length(content.len(), out);
    out.extend_from_slice(content);
}

fn push_value(value: &SnmpValue, out: &mut Vec<u8>) {
    match value {
        SnmpValue::Integer(v) => push_tlv(TAG_INTEGER, &integer_content(*v), out),
        SnmpValue::OctetString(bytes) => push_tlv(TAG_OCTET_STRING, bytes, out),
        SnmpValue::Null => push_tlv(TAG_NULL, &[], out),
        SnmpValue::ObjectIdentifier(oid) => push_tlv(TAG_OID, &oid_content(oid), out),
        SnmpValue::IpAddress(octets) => push_tlv(TAG_IP_ADDRESS, octets, out),
        SnmpValue::Counter32(v) => push_tlv(TAG_COUNTER32, &unsigned_content(u64::from(*v)), out),
        SnmpValue::Gauge32(v) => push_tlv(TAG_GAUGE32, &unsigned_content(u64::from(*v)), out),
        SnmpValue::TimeTicks(v) => push_tlv(TAG_TIMETICKS, &unsigned_content(u64::from(*v)), out),
        SnmpValue::Opaque(bytes) => push_tlv(TAG_OPAQUE, bytes, out),
        SnmpValue::Counter64(v) => push_tlv(TAG_COUNTER64, &unsigned_content(*v), out),
        SnmpValue::NoSuchObject => push_tlv(TAG_NO_SUCH_OBJECT, &[], out),
        SnmpValue::NoSuchInstance => push_tlv(TAG_NO_SUCH_INSTANCE, &[], out),
        SnmpValue::EndOfMibView => push_tlv(TAG_END_OF_MIB_VIEW, &[], out),
    }
}

/// Minimal two's complement representation
fn integer_content(v: i64) -> Vec<u8> {
    let bytes = v.to_be_bytes();
    let mut start = 0;
    while start < bytes.len() - 1 {
        let redundant_zero = bytes[start] == 0x00 && bytes[start + 1] & 0x80 == 0;
        let redundant_ones = bytes[start] == 0xFF && bytes[start + 1] & 0x80 != 0;
        if !(redundant_zero || redundant_ones) {
            break;
        }
        start += 1;
    }
    bytes[start..].to_vec()
}

/// Minimal unsigned representation, with a leading zero when the high bit is set
fn unsigned_content(v: u64) -> Vec<u8> {
    let bytes = v.to_be_bytes();
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len() - 1);
    let mut out = Vec::with_capacity(9);
    if bytes[start] & 0x80 != 0 {
        out.push(0);
    }
    out.extend_from_slice(&bytes[start..]);
    out
}

fn push_base128(v: u64, out: &mut Vec<u8>) {
    let mut groups = [0u8; 10];
    let mut i = groups.len();
    let mut rest = v;
    loop {
        i -= 1;
        groups[i] = (rest & 0x7F) as u8;
        rest >>= 7;
        if rest == 0 {
            break;
        }
    }
    let last = groups.len() - 1;
    for (n, group) in groups[i..].iter().enumerate() {
        if i + n == last {
            out.push(*group);
        } else {
            out.push(group | 0x80);
        }
    }
}

fn oid_content(oid: &Oid) -> Vec<u8> {
    let arcs = oid.arcs();
    let mut out = Vec::with_capacity(arcs.len() + 2);
    match arcs {
        [] => out.push(0),
        [first] => push_base128(u64::from(*first) * 40, &mut out),
        [first, second, rest @ ..] => {
            push_base128(u64::from(*first) * 40 + u64::from(*second), &mut out);
            for arc in rest {
                push_base128(u64::from(*arc), &mut out);
            }
        }
    }
    out
}

fn decode_integer(content: &[u8]) -> SnmpResult<i64> {
    if content.is_empty() || content.len() > 8 {
        return Err(SnmpError::Decode(format!(
            "integer of {} bytes",
            content.len()
        )));
    }

    let mut value: i64 = if content[0] & 0x80 != 0 { -1 } else { 0 };
    for b in content {
        value = (value << 8) | i64::from(*b);
    }
    Ok(value)
}

fn decode_unsigned(content: &[u8]) -> SnmpResult<u64> {
    let digits = match content {
        [0, rest @ ..] if !rest.is_empty() => rest,
        other => other,
    };
    if digits.is_empty() || digits.len() > 8 {
        return Err(SnmpError::Decode(format!(
            "unsigned integer of {} bytes",
            content.len()
        )));
    }

    Ok(digits.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

fn decode_u32(content: &[u8]) -> SnmpResult<u32> {
    let value = decode_unsigned(content)?;
    u32::try_from(value).map_err(|_| SnmpError::Decode(format!("{value} exceeds 32 bits")))
}

fn decode_oid(content: &[u8]) -> SnmpResult<Oid> {
    let mut subids = Vec::new();
    let mut current: u64 = 0;
    for b in content {
        current = (current << 7) | u64::from(b & 0x7F);
        if current > u64::from(u32::MAX) + 80 {
            return Err(SnmpError::Decode("OID arc overflow".to_string()));
        }
        if b & 0x80 == 0 {
            subids.push(current);
            current = 0;
        }
    }
    if current != 0 || content.last().is_some_and(|b| b & 0x80 != 0) {
        return Err(SnmpError::Decode("truncated OID".to_string()));
    }

    let Some((first, rest)) = subids.split_first() else {
        return Ok(Oid::default());
    };

    let (a, b) = match *first {
        v if v < 40 => (0, v),
        v if v < 80 => (1, v - 40),
        v => (2, v - 80),
    };

    let mut arcs = Vec::with_capacity(subids.len() + 1);
    arcs.push(a as u32);
    arcs.push(u32::try_from(b).map_err(|_| SnmpError::Decode("OID arc overflow".to_string()))?);
    for arc in rest {
        arcs.push(u32::try_from(*arc).map_err(|_| SnmpError::Decode("OID arc overflow".to_string()))?);
    }
    Ok(Oid::new(arcs))
}

fn decode_value(tag: u8, content: &[u8]) -> SnmpResult<SnmpValue> {
    let value = match tag {
        TAG_INTEGER => SnmpValue::Integer(decode_integer(content)?),
        TAG_OCTET_STRING => SnmpValue::OctetString(content.to_vec()),
        TAG_NULL => SnmpValue::Null,
        TAG_OID => SnmpValue::ObjectIdentifier(decode_oid(content)?),
        TAG_IP_ADDRESS => {
            let octets: [u8; 4] = content
                .try_into()
                .map_err(|_| SnmpError::Decode(format!("IpAddress of {} bytes", content.len())))?;
            SnmpValue::IpAddress(octets)
        }
        TAG_COUNTER32 => SnmpValue::Counter32(decode_u32(content)?),
        TAG_GAUGE32 => SnmpValue::Gauge32(decode_u32(content)?),
        TAG_TIMETICKS => SnmpValue::TimeTicks(decode_u32(content)?),
        TAG_OPAQUE => SnmpValue::Opaque(content.to_vec()),
        TAG_COUNTER64 => SnmpValue::Counter64(decode_unsigned(content)?),
        TAG_NO_SUCH_OBJECT => SnmpValue::NoSuchObject,
        TAG_NO_SUCH_INSTANCE => SnmpValue::NoSuchInstance,
        TAG_END_OF_MIB_VIEW => SnmpValue::EndOfMibView,
        other => {
            return Err(SnmpError::Decode(format!("unsupported value tag 0x{other:02X}")));
        }
    };
    Ok(value)
}
