//! ICMP echo message encoding and decoding.

use crate::error::PacketError;

use super::IpFamily;

const ECHO_REQUEST_V4: u8 = 8;
const ECHO_REPLY_V4: u8 = 0;
const ECHO_REQUEST_V6: u8 = 128;
const ECHO_REPLY_V6: u8 = 129;

const HEADER_LEN: usize = 8;

/// Payload carried by every echo request
pub const ECHO_PAYLOAD: &[u8] = b"watchpost echo";

/// Sequence number of every echo request; only one is ever in flight
pub const ECHO_SEQUENCE: u16 = 1;

/// Echo identifier derived from the process id (low 16 bits)
pub fn process_identifier() -> u16 {
    (std::process::id() & 0xffff) as u16
}

/// Echo request or reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Echo {
    pub identifier: u16,
    pub sequence: u16,
    pub payload: Vec<u8>,
}

impl Echo {
    pub fn new(identifier: u16, sequence: u16, payload: &[u8]) -> Self {
        Self { identifier, sequence, payload: payload.to_vec() }
    }

    /// Encode as an echo request for `family`
    pub fn to_request(&self, family: IpFamily) -> Vec<u8> {
        let kind = match family {
            IpFamily::V4 => ECHO_REQUEST_V4,
            IpFamily::V6 => ECHO_REQUEST_V6,
        };
        self.encode(family, kind)
    }

    /// Encode as an echo reply for `family`
    pub fn to_reply(&self, family: IpFamily) -> Vec<u8> {
        let kind = match family {
            IpFamily::V4 => ECHO_REPLY_V4,
            IpFamily::V6 => ECHO_REPLY_V6,
        };
        self.encode(family, kind)
    }

    fn encode(&self, family: IpFamily, kind: u8) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&[kind, 0, 0, 0]);
        buf.extend_from_slice(&self.identifier.to_be_bytes());
        buf.extend_from_slice(&self.sequence.to_be_bytes());
        buf.extend_from_slice(&self.payload);

        // The kernel fills in the ICMPv6 checksum since it covers the pseudo header.
        if family == IpFamily::V4 {
            let sum = checksum(&buf);
            buf[2..4].copy_from_slice(&sum.to_be_bytes());
        }
        buf
    }
}

/// Decoded incoming ICMP message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    EchoReply(Echo),
    Other { kind: u8, code: u8 },
}

impl Message {
    pub fn is_echo_reply(&self) -> bool {
        matches!(self, Message::EchoReply(_))
    }
}

/// Decode a message read from an ICMP socket of `family`.
///
/// Raw IPv4 sockets deliver the IP header too; it is skipped when present.
pub fn parse(family: IpFamily, data: &[u8]) -> Result<Message, PacketError> {
    let body = match family {
        IpFamily::V4 => strip_ipv4_header(data)?,
        IpFamily::V6 => data,
    };

    if body.len() < HEADER_LEN {
        return Err(PacketError::Truncated(body.len()));
    }

    let kind = body[0];
    let code = body[1];
    let reply = match family {
        IpFamily::V4 => ECHO_REPLY_V4,
        IpFamily::V6 => ECHO_REPLY_V6,
    };

    if kind != reply {
        return Ok(Message::Other { kind, code });
    }

    Ok(Message::EchoReply(Echo {
        identifier: u16::from_be_bytes([body[4], body[5]]),
        sequence: u16::from_be_bytes([body[6], body[7]]),
        payload: body[HEADER_LEN..].to_vec(),
    }))
}

fn strip_ipv4_header(data: &[u8]) -> Result<&[u8], PacketError> {
    match data.first() {
        Some(first) if first >> 4 == 4 => {
            let header_len = usize::from(first & 0x0f) * 4;
            if header_len < 20 {
                return Err(PacketError::BadIpHeader);
            }
            data.get(header_len..).ok_or(PacketError::Truncated(data.len()))
        }
        _ => Ok(data),
    }
}

/// Internet checksum (RFC 1071)
fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = data
        .chunks(2)
        .map(|pair| match pair {
            [hi, lo] => u32::from(u16::from_be_bytes([*hi, *lo])),
            [hi] => u32::from(*hi) << 8,
            _ => 0,
        })
        .sum();

    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}
