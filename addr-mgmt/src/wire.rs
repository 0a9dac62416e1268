// Copyright (c) 2024 The dep2p Authors

//! Wire framing for the address-record protocol.
//!
//! Every message is `[type:1][body_length:4 BE][body]`. The `RefreshNotify`
//! body is:
//!
//! ```text
//! [id_len:1][id_bytes]
//! [realm_len:2 BE][realm_bytes]
//! [sequence:8 BE]
//! [timestamp_nanos:8 BE]
//! [addr_count:2 BE]
//! repeat addr_count times: [addr_len:2 BE][addr_bytes]
//! [signature_bytes...]            (rest of body)
//! ```
//!
//! `QueryResponse` carries only id, sequence and addresses; an empty body
//! means "no record known". Bounds: 64 KiB per message, 100 addresses per
//! record; anything beyond aborts decoding.

use crate::record::{AddressRecord, MAX_RECORD_ADDRS};
use dep2p_common::{NodeId, RealmId, NODE_ID_LEN};
use displaydoc::Display;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on one framed message, header included.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Frame header: one type byte plus a four-byte length.
pub const FRAME_HEADER_LEN: usize = 5;

/// Message types on the address-management stream.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(u8)]
pub enum MessageType {
    /// Push a fresh signed record.
    RefreshNotify = 0x01,
    /// Ask for the record of one node.
    QueryRequest = 0x02,
    /// Answer to a query.
    QueryResponse = 0x03,
}

impl MessageType {
    /// Decode a type byte. Unknown types are dropped by the caller.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(MessageType::RefreshNotify),
            0x02 => Some(MessageType::QueryRequest),
            0x03 => Some(MessageType::QueryResponse),
            _ => None,
        }
    }
}

/// Errors produced by the codec.
#[derive(Clone, Debug, Display, Error, Eq, PartialEq)]
pub enum WireError {
    /// Message is truncated
    Truncated,
    /// Message exceeds the 64 KiB bound: {0} bytes
    Oversize(usize),
    /// Record carries too many addresses: {0}
    TooManyAddresses(usize),
    /// Unknown message type: {0:#04x}
    UnknownMessageType(u8),
    /// A length field is inconsistent with the payload
    InvalidFieldLength,
    /// Address bytes are not valid UTF-8
    InvalidUtf8,
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        let end = self.pos.checked_add(n).ok_or(WireError::Truncated)?;
        if end > self.buf.len() {
            return Err(WireError::Truncated);
        }
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, WireError> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn u64(&mut self) -> Result<u64, WireError> {
        let bytes = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(bytes);
        Ok(u64::from_be_bytes(arr))
    }

    fn rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos..];
        self.pos = self.buf.len();
        out
    }
}

fn read_node_id(reader: &mut Reader<'_>) -> Result<NodeId, WireError> {
    let id_len = reader.u8()? as usize;
    if id_len != NODE_ID_LEN {
        return Err(WireError::InvalidFieldLength);
    }
    let bytes = reader.take(id_len)?;
    let mut arr = [0u8; NODE_ID_LEN];
    arr.copy_from_slice(bytes);
    Ok(NodeId::from_bytes(arr))
}

fn write_addrs(out: &mut Vec<u8>, addrs: &[String]) -> Result<(), WireError> {
    if addrs.len() > MAX_RECORD_ADDRS {
        return Err(WireError::TooManyAddresses(addrs.len()));
    }
    out.extend_from_slice(&(addrs.len() as u16).to_be_bytes());
    for addr in addrs {
        if addr.len() > u16::MAX as usize {
            return Err(WireError::InvalidFieldLength);
        }
        out.extend_from_slice(&(addr.len() as u16).to_be_bytes());
        out.extend_from_slice(addr.as_bytes());
    }
    Ok(())
}

fn read_addrs(reader: &mut Reader<'_>) -> Result<Vec<String>, WireError> {
    let count = reader.u16()? as usize;
    if count > MAX_RECORD_ADDRS {
        return Err(WireError::TooManyAddresses(count));
    }
    let mut addrs = Vec::with_capacity(count);
    for _ in 0..count {
        let len = reader.u16()? as usize;
        let bytes = reader.take(len)?;
        let addr = std::str::from_utf8(bytes).map_err(|_| WireError::InvalidUtf8)?;
        addrs.push(addr.to_string());
    }
    Ok(addrs)
}

/// Frame a body under a message type.
pub fn encode_frame(msg_type: MessageType, body: &[u8]) -> Result<Vec<u8>, WireError> {
    let total = FRAME_HEADER_LEN + body.len();
    if total > MAX_MESSAGE_SIZE {
        return Err(WireError::Oversize(total));
    }
    let mut out = Vec::with_capacity(total);
    out.push(msg_type as u8);
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(body);
    Ok(out)
}

/// Split a full frame into its type and body.
pub fn decode_frame(buf: &[u8]) -> Result<(MessageType, &[u8]), WireError> {
    if buf.len() < FRAME_HEADER_LEN {
        return Err(WireError::Truncated);
    }
    if buf.len() > MAX_MESSAGE_SIZE {
        return Err(WireError::Oversize(buf.len()));
    }
    let msg_type = MessageType::from_u8(buf[0]).ok_or(WireError::UnknownMessageType(buf[0]))?;
    let len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
    if buf.len() != FRAME_HEADER_LEN + len {
        return Err(WireError::InvalidFieldLength);
    }
    Ok((msg_type, &buf[FRAME_HEADER_LEN..]))
}

/// Encode a `RefreshNotify` body.
pub fn encode_record(record: &AddressRecord) -> Result<Vec<u8>, WireError> {
    let mut out = Vec::new();
    out.push(NODE_ID_LEN as u8);
    out.extend_from_slice(record.node_id.as_bytes());

    let realm = record.realm_id.as_bytes();
    if realm.len() > u16::MAX as usize {
        return Err(WireError::InvalidFieldLength);
    }
    out.extend_from_slice(&(realm.len() as u16).to_be_bytes());
    out.extend_from_slice(realm);

    out.extend_from_slice(&record.sequence.to_be_bytes());
    out.extend_from_slice(&record.timestamp_nanos.to_be_bytes());
    write_addrs(&mut out, &record.addresses)?;
    out.extend_from_slice(&record.signature);

    if FRAME_HEADER_LEN + out.len() > MAX_MESSAGE_SIZE {
        return Err(WireError::Oversize(FRAME_HEADER_LEN + out.len()));
    }
    Ok(out)
}

/// Decode a `RefreshNotify` body. The TTL is not on the wire; the decoded
/// record carries the default and the store applies its own expiry.
pub fn decode_record(body: &[u8]) -> Result<AddressRecord, WireError> {
    let mut reader = Reader::new(body);
    let node_id = read_node_id(&mut reader)?;

    let realm_len = reader.u16()? as usize;
    let realm_bytes = reader.take(realm_len)?;
    let realm_str = std::str::from_utf8(realm_bytes).map_err(|_| WireError::InvalidUtf8)?;

    let sequence = reader.u64()?;
    let timestamp_nanos = reader.u64()?;
    let addresses = read_addrs(&mut reader)?;
    let signature = reader.rest().to_vec();

    Ok(AddressRecord {
        node_id,
        realm_id: RealmId::new(realm_str),
        sequence,
        timestamp_nanos,
        addresses,
        ttl: crate::record::DEFAULT_RECORD_TTL,
        signature,
    })
}

/// Encode a `QueryRequest` body: `[id_len:1][node_id]`.
pub fn encode_query_request(target: &NodeId) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + NODE_ID_LEN);
    out.push(NODE_ID_LEN as u8);
    out.extend_from_slice(target.as_bytes());
    out
}

/// Decode a `QueryRequest` body.
pub fn decode_query_request(body: &[u8]) -> Result<NodeId, WireError> {
    let mut reader = Reader::new(body);
    let id = read_node_id(&mut reader)?;
    if reader.pos != body.len() {
        return Err(WireError::InvalidFieldLength);
    }
    Ok(id)
}

/// Encode a `QueryResponse` body. `None` is the empty body; a known record
/// carries id, sequence and addresses (no realm, timestamp or signature).
pub fn encode_query_response(record: Option<&AddressRecord>) -> Result<Vec<u8>, WireError> {
    let Some(record) = record else {
        return Ok(Vec::new());
    };
    let mut out = Vec::new();
    out.push(NODE_ID_LEN as u8);
    out.extend_from_slice(record.node_id.as_bytes());
    out.extend_from_slice(&record.sequence.to_be_bytes());
    write_addrs(&mut out, &record.addresses)?;
    Ok(out)
}

/// Decode a `QueryResponse` body. The timestamp is set to receive time so
/// the cache TTL counts from now.
pub fn decode_query_response(body: &[u8]) -> Result<Option<AddressRecord>, WireError> {
    if body.is_empty() {
        return Ok(None);
    }
    let mut reader = Reader::new(body);
    let node_id = read_node_id(&mut reader)?;
    let sequence = reader.u64()?;
    let addresses = read_addrs(&mut reader)?;
    if reader.pos != body.len() {
        return Err(WireError::InvalidFieldLength);
    }
    Ok(Some(AddressRecord {
        node_id,
        realm_id: RealmId::empty(),
        sequence,
        timestamp_nanos: crate::record::now_nanos(),
        addresses,
        ttl: crate::record::DEFAULT_RECORD_TTL,
        signature: Vec::new(),
    }))
}

/// Write one frame to a stream.
pub async fn write_frame<S>(
    stream: &mut S,
    msg_type: MessageType,
    body: &[u8],
) -> Result<(), WireError>
where
    S: AsyncWrite + Unpin,
{
    let frame = encode_frame(msg_type, body)?;
    stream
        .write_all(&frame)
        .await
        .map_err(|_| WireError::Truncated)?;
    stream.flush().await.map_err(|_| WireError::Truncated)?;
    Ok(())
}

/// Read one frame from a stream, enforcing the size bound before
/// allocating the body.
pub async fn read_frame<S>(stream: &mut S) -> Result<(MessageType, Vec<u8>), WireError>
where
    S: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_LEN];
    stream
        .read_exact(&mut header)
        .await
        .map_err(|_| WireError::Truncated)?;

    let msg_type =
        MessageType::from_u8(header[0]).ok_or(WireError::UnknownMessageType(header[0]))?;
    let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
    if FRAME_HEADER_LEN + len > MAX_MESSAGE_SIZE {
        return Err(WireError::Oversize(FRAME_HEADER_LEN + len));
    }

    let mut body = vec![0u8; len];
    stream
        .read_exact(&mut body)
        .await
        .map_err(|_| WireError::Truncated)?;
    Ok((msg_type, body))
}
