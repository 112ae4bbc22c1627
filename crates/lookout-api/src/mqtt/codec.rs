// MQTT 3.1.1 packet codec, limited to what a publish-only client needs:
// CONNECT, PUBLISH (QoS 0), PINGREQ and DISCONNECT out; CONNACK and
// PINGRESP in. Anything else the broker sends is skipped by length.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::Error;

const CONNECT: u8 = 0x10;
const CONNACK: u8 = 0x20;
const PUBLISH_QOS0: u8 = 0x30;
const PINGRESP: u8 = 0xD0;

const FLAG_USERNAME: u8 = 0x80;
const FLAG_PASSWORD: u8 = 0x40;
const FLAG_CLEAN_SESSION: u8 = 0x02;

/// Largest value the four-byte remaining-length field can carry.
const MAX_REMAINING_LENGTH: usize = 268_435_455;

pub(crate) const PINGREQ: [u8; 2] = [0xC0, 0x00];
pub(crate) const DISCONNECT: [u8; 2] = [0xE0, 0x00];

/// Packets the client expects from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Incoming {
    ConnAck { session_present: bool, return_code: u8 },
    PingResp,
    /// Any other packet type (first-byte high nibble).
    Other(u8),
}

#[derive(Debug)]
pub(crate) struct Connect<'a> {
    pub client_id: &'a str,
    pub username: Option<&'a str>,
    pub password: Option<&'a [u8]>,
    pub keep_alive_secs: u16,
}

pub(crate) fn encode_connect(connect: &Connect<'_>) -> Result<Bytes, Error> {
    let mut body = BytesMut::new();
    put_str(&mut body, "MQTT")?;
    body.put_u8(4); // protocol level 3.1.1

    let mut flags = FLAG_CLEAN_SESSION;
    if connect.username.is_some() {
        flags |= FLAG_USERNAME;
    }
    if connect.password.is_some() {
        flags |= FLAG_PASSWORD;
    }
    body.put_u8(flags);
    body.put_u16(connect.keep_alive_secs);

    put_str(&mut body, connect.client_id)?;
    if let Some(username) = connect.username {
        put_str(&mut body, username)?;
    }
    if let Some(password) = connect.password {
        put_bytes(&mut body, password)?;
    }

    frame(CONNECT, &body)
}

pub(crate) fn encode_publish(topic: &str, payload: &[u8]) -> Result<Bytes, Error> {
    if topic.is_empty() || topic.contains(['+', '#']) {
        return Err(Error::MqttProtocol(format!("invalid publish topic '{topic}'")));
    }
    let mut body = BytesMut::with_capacity(topic.len() + payload.len() + 2);
    put_str(&mut body, topic)?;
    body.put_slice(payload);
    frame(PUBLISH_QOS0, &body)
}

/// Pull one complete packet off the front of `buf`.
///
/// Returns `Ok(None)` while the packet is still incomplete.
pub(crate) fn decode(buf: &mut BytesMut) -> Result<Option<Incoming>, Error> {
    let Some(&header) = buf.first() else {
        return Ok(None);
    };

    let mut remaining = 0usize;
    let mut multiplier = 1usize;
    let mut header_len = 1;
    loop {
        let Some(&byte) = buf.get(header_len) else {
            return Ok(None);
        };
        header_len += 1;
        remaining += usize::from(byte & 0x7F) * multiplier;
        if byte & 0x80 == 0 {
            break;
        }
        if header_len > 4 {
            return Err(Error::MqttProtocol("malformed remaining length".into()));
        }
        multiplier *= 128;
    }

    if buf.len() < header_len + remaining {
        return Ok(None);
    }
    buf.advance(header_len);
    let mut body = buf.split_to(remaining);

    let packet = match header & 0xF0 {
        CONNACK => {
            if body.len() != 2 {
                return Err(Error::MqttProtocol(format!(
                    "CONNACK with {} byte body",
                    body.len()
                )));
            }
            let ack_flags = body.get_u8();
            Incoming::ConnAck {
                session_present: ack_flags & 0x01 == 1,
                return_code: body.get_u8(),
            }
        }
        PINGRESP => Incoming::PingResp,
        other => Incoming::Other(other >> 4),
    };
    Ok(Some(packet))
}

// ── Helpers ──────────────────────────────────────────────────────────

fn frame(header: u8, body: &[u8]) -> Result<Bytes, Error> {
    let mut len = body.len();
    if len > MAX_REMAINING_LENGTH {
        return Err(Error::MqttProtocol(format!("packet body of {len} bytes too large")));
    }

    let mut out = BytesMut::with_capacity(body.len() + 5);
    out.put_u8(header);
    loop {
        // Truncation is the point: low seven bits per byte.
        #[allow(clippy::cast_possible_truncation)]
        let mut byte = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            byte |= 0x80;
        }
        out.put_u8(byte);
        if len == 0 {
            break;
        }
    }
    out.put_slice(body);
    Ok(out.freeze())
}

fn put_str(buf: &mut BytesMut, s: &str) -> Result<(), Error> {
    put_bytes(buf, s.as_bytes())
}

fn put_bytes(buf: &mut BytesMut, bytes: &[u8]) -> Result<(), Error> {
    let len = u16::try_from(bytes.len())
        .map_err(|_| Error::MqttProtocol(format!("field of {} bytes too long", bytes.len())))?;
    buf.put_u16(len);
    buf.put_slice(bytes);
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn connect_packet_layout() {
        let packet = encode_connect(&Connect {
            client_id: "c1",
            username: Some("u"),
            password: Some(b"pw"),
            keep_alive_secs: 60,
        })
        .unwrap();

        let expected: &[u8] = &[
            0x10, 21, // header + remaining length
            0, 4, b'M', b'Q', b'T', b'T', // protocol name
            4,    // level
            0xC2, // username | password | clean session
            0, 60, // keep alive
            0, 2, b'c', b'1', // client id
            0, 1, b'u', // username
            0, 2, b'p', b'w', // password
        ];
        assert_eq!(packet.as_ref(), expected);
    }

    #[test]
    fn publish_packet_layout() {
        let packet = encode_publish("d1/sensor/camera/take_photo", b"{}").unwrap();
        assert_eq!(packet[0], 0x30);
        assert_eq!(usize::from(packet[1]), 2 + 27 + 2);
        assert_eq!(&packet[2..4], &[0, 27]);
        assert!(packet.ends_with(b"{}"));
    }

    #[test]
    fn publish_rejects_wildcards() {
        assert!(encode_publish("d1/#", b"").is_err());
        assert!(encode_publish("", b"").is_err());
    }

    #[test]
    fn long_payload_uses_multibyte_length() {
        let payload = vec![b'x'; 200];
        let packet = encode_publish("t", &payload).unwrap();
        // 3 (topic) + 200 = 203 = 0xCB 0x01
        assert_eq!(&packet[1..3], &[0xCB, 0x01]);
        assert_eq!(packet.len(), 1 + 2 + 203);
    }

    #[test]
    fn decode_connack_and_pingresp_from_one_buffer() {
        let mut buf = BytesMut::from(&[0x20, 0x02, 0x00, 0x00, 0xD0, 0x00][..]);
        assert_eq!(
            decode(&mut buf).unwrap(),
            Some(Incoming::ConnAck {
                session_present: false,
                return_code: 0
            })
        );
        assert_eq!(decode(&mut buf).unwrap(), Some(Incoming::PingResp));
        assert_eq!(decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn decode_waits_for_partial_packet() {
        let mut buf = BytesMut::from(&[0x20, 0x02, 0x00][..]);
        assert_eq!(decode(&mut buf).unwrap(), None);
        buf.put_u8(0x05);
        assert_eq!(
            decode(&mut buf).unwrap(),
            Some(Incoming::ConnAck {
                session_present: false,
                return_code: 5
            })
        );
    }

    #[test]
    fn decode_skips_unknown_packets() {
        // SUBACK-shaped packet the client never asked for
        let mut buf = BytesMut::from(&[0x90, 0x03, 0x00, 0x01, 0x00][..]);
        assert_eq!(decode(&mut buf).unwrap(), Some(Incoming::Other(9)));
        assert!(buf.is_empty());
    }
}
