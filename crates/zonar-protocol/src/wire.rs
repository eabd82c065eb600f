//! Wire format: space-separated tokens plus one length-prefixed payload.
//!
//! The payload segment is `<byte-length>:<bytes>`, which lets the payload
//! itself contain spaces and colons. The framing allows further segments to
//! follow the first; they are checked for well-formedness but only the first
//! one is ever exposed.

use std::net::IpAddr;

use zonar_types::{NodeId, Status};

use crate::error::ProtocolError;
use crate::message::{Announcement, Message};

/// Largest payload a UDP/IPv4 datagram can carry.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

/// Number of fixed tokens ahead of the payload segment.
const HEADER_TOKENS: usize = 7;

/// Encodes and decodes datagrams for one identifier/version pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Codec {
    identifier: String,
    version: String,
}

impl Codec {
    pub fn new(identifier: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            version: version.into(),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Encode an announcement with the given status.
    pub fn encode(&self, status: Status, announcement: &Announcement) -> Vec<u8> {
        format!(
            "{} {} {} {} {} {} {} {}:{}",
            self.identifier,
            self.version,
            announcement.net,
            announcement.id,
            announcement.name,
            announcement.reply_port,
            status,
            announcement.payload.len(),
            announcement.payload,
        )
        .into_bytes()
    }

    /// Decode a received datagram.
    ///
    /// `sender` is the datagram's source address and ends up in
    /// [`Message::address`].
    pub fn decode(&self, buf: &[u8], sender: IpAddr) -> Result<Message, ProtocolError> {
        let text = std::str::from_utf8(buf)
            .map_err(|_| ProtocolError::malformed("datagram is not UTF-8"))?;

        let mut tokens = text.splitn(HEADER_TOKENS + 1, ' ');
        let identifier = tokens.next().unwrap_or_default();
        let version = tokens.next().unwrap_or_default();
        if identifier != self.identifier || version != self.version {
            return Err(ProtocolError::ProtocolMismatch {
                identifier: identifier.to_string(),
                version: version.to_string(),
            });
        }

        let mut field = |what: &str| {
            tokens
                .next()
                .filter(|token| !token.is_empty())
                .ok_or_else(|| ProtocolError::malformed(format!("missing {what}")))
        };
        let net = field("net")?;
        let id = field("sender id")?;
        let name = field("name")?;
        let reply_port = field("reply port")?;
        let status = field("status")?;
        let segments = tokens
            .next()
            .ok_or_else(|| ProtocolError::malformed("missing payload segment"))?;

        let reply_port = reply_port
            .parse::<u16>()
            .map_err(|_| ProtocolError::malformed(format!("bad reply port {reply_port:?}")))?;
        let status = status
            .parse::<Status>()
            .map_err(|e| ProtocolError::malformed(e.to_string()))?;
        let payload = first_payload(segments)?;

        Ok(Message {
            identifier: identifier.to_string(),
            version: version.to_string(),
            net: net.to_string(),
            id: NodeId::from_string(id.to_string()),
            name: name.to_string(),
            reply_port,
            status,
            payload: payload.to_string(),
            address: sender,
        })
    }
}

/// Return the first payload segment, validating every segment's framing.
fn first_payload(segments: &str) -> Result<&str, ProtocolError> {
    let (first, mut rest) = read_segment(segments)?;
    while !rest.is_empty() {
        let (_, next) = read_segment(rest)?;
        rest = next;
    }
    Ok(first)
}

/// Split one `<len>:<bytes>` segment off the front of `input`.
fn read_segment(input: &str) -> Result<(&str, &str), ProtocolError> {
    let colon = input
        .find(':')
        .ok_or_else(|| ProtocolError::malformed("payload segment has no length prefix"))?;
    let digits = &input[..colon];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProtocolError::malformed(format!(
            "bad payload length {digits:?}"
        )));
    }
    let len: usize = digits
        .parse()
        .map_err(|_| ProtocolError::malformed(format!("payload length {digits} overflows")))?;

    let body = &input[colon + 1..];
    if len > body.len() {
        return Err(ProtocolError::malformed(format!(
            "payload declares {len} bytes, {} present",
            body.len()
        )));
    }
    if !body.is_char_boundary(len) {
        return Err(ProtocolError::malformed(
            "payload length splits a character",
        ));
    }
    Ok(body.split_at(len))
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use super::*;

    const SENDER: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20));

    fn codec() -> Codec {
        Codec::new("ZONAR", "0.2.0")
    }

    fn announcement(payload: &str) -> Announcement {
        Announcement {
            net: "zon".to_string(),
            id: NodeId::from_string("Xy3-_abcdEF".to_string()),
            name: "web-1".to_string(),
            reply_port: 40123,
            payload: payload.to_string(),
        }
    }

    #[test]
    fn encode_layout() {
        let bytes = codec().encode(Status::New, &announcement("hello"));
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            "ZONAR 0.2.0 zon Xy3-_abcdEF web-1 40123 NEW 5:hello"
        );
    }

    #[test]
    fn payload_with_spaces_and_colons_survives() {
        let payload = "  a: b::c  d ";
        let bytes = codec().encode(Status::Alive, &announcement(payload));
        let msg = codec().decode(&bytes, SENDER).unwrap();
        assert_eq!(msg.payload, payload);
        assert_eq!(msg.status, Status::Alive);
        assert_eq!(msg.name, "web-1");
        assert_eq!(msg.reply_port, 40123);
        assert_eq!(msg.address, SENDER);
    }

    #[test]
    fn multibyte_payload_uses_byte_length() {
        let bytes = codec().encode(Status::One, &announcement("héllo ✓"));
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.ends_with("10:héllo ✓"));
        assert_eq!(codec().decode(&bytes, SENDER).unwrap().payload, "héllo ✓");
    }

    #[test]
    fn empty_payload() {
        let bytes = codec().encode(Status::Quit, &announcement(""));
        assert!(bytes.ends_with(b"QUIT 0:"));
        assert_eq!(codec().decode(&bytes, SENDER).unwrap().payload, "");
    }

    #[test]
    fn rejects_foreign_identifier() {
        let bytes = Codec::new("OTHER", "0.2.0").encode(Status::New, &announcement("x"));
        assert!(matches!(
            codec().decode(&bytes, SENDER),
            Err(ProtocolError::ProtocolMismatch { .. })
        ));
    }

    #[test]
    fn rejects_foreign_version() {
        let bytes = Codec::new("ZONAR", "0.1.9").encode(Status::New, &announcement("x"));
        assert_eq!(
            codec().decode(&bytes, SENDER),
            Err(ProtocolError::ProtocolMismatch {
                identifier: "ZONAR".to_string(),
                version: "0.1.9".to_string(),
            })
        );
    }

    #[test]
    fn rejects_garbage_as_mismatch() {
        for input in [&b""[..], b"ZONAR", b"hello world", b"ZONAR0.2.0 zon"] {
            assert!(matches!(
                codec().decode(input, SENDER),
                Err(ProtocolError::ProtocolMismatch { .. })
            ));
        }
    }

    #[test]
    fn rejects_truncated_payload() {
        let input = b"ZONAR 0.2.0 zon id web-1 40123 ALIVE 10:short";
        assert!(matches!(
            codec().decode(input, SENDER),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_bad_length_prefix() {
        for tail in ["abc:hello", ":hello", "-1:x", "hello", "", "99999999999999999999999:x"] {
            let input = format!("ZONAR 0.2.0 zon id web-1 40123 ALIVE {tail}");
            assert!(
                matches!(
                    codec().decode(input.as_bytes(), SENDER),
                    Err(ProtocolError::Malformed(_))
                ),
                "tail {tail:?} should be rejected"
            );
        }
    }

    #[test]
    fn rejects_missing_fields() {
        let input = b"ZONAR 0.2.0 zon id web-1";
        assert_eq!(
            codec().decode(input, SENDER),
            Err(ProtocolError::malformed("missing reply port"))
        );
    }

    #[test]
    fn rejects_bad_port_and_status() {
        let port = b"ZONAR 0.2.0 zon id web-1 99999 ALIVE 0:";
        assert!(matches!(
            codec().decode(port, SENDER),
            Err(ProtocolError::Malformed(_))
        ));
        let status = b"ZONAR 0.2.0 zon id web-1 4000 HELLO 0:";
        assert!(matches!(
            codec().decode(status, SENDER),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn rejects_non_utf8() {
        let mut input = b"ZONAR 0.2.0 zon id web-1 4000 ALIVE 2:".to_vec();
        input.extend_from_slice(&[0xff, 0xfe]);
        assert!(matches!(
            codec().decode(&input, SENDER),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn length_splitting_a_character_is_rejected() {
        let input = "ZONAR 0.2.0 zon id web-1 4000 ALIVE 1:é";
        assert!(matches!(
            codec().decode(input.as_bytes(), SENDER),
            Err(ProtocolError::Malformed(_))
        ));
    }

    #[test]
    fn trailing_segments_are_checked_but_hidden() {
        let ok = b"ZONAR 0.2.0 zon id web-1 4000 ALIVE 3:abc4:defg";
        assert_eq!(codec().decode(ok, SENDER).unwrap().payload, "abc");

        let bad = b"ZONAR 0.2.0 zon id web-1 4000 ALIVE 3:abcjunk";
        assert!(matches!(
            codec().decode(bad, SENDER),
            Err(ProtocolError::Malformed(_))
        ));
    }
}
