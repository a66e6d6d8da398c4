//! Protocol control messages
//!
//! Types 1-6 travel on chunk stream 2, message stream 0 and steer the chunk
//! layer itself. Their bodies are fixed-width big-endian integers:
//!
//! ```text
//! SetChunkSize (1)      size(4)          MSB ignored
//! Abort (2)             csid(4)
//! Acknowledgement (3)   sequence(4)
//! UserControl (4)       event(2) + data
//! WindowAckSize (5)     size(4)
//! SetPeerBandwidth (6)  size(4) + limit(1)
//! ```
//!
//! Reference: RTMP Specification Section 5.4

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ProtocolError, Result};
use crate::protocol::constants::*;

/// Peer bandwidth limit kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BandwidthLimit {
    Hard,
    Soft,
    Dynamic,
}

impl BandwidthLimit {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            BANDWIDTH_LIMIT_HARD => Some(BandwidthLimit::Hard),
            BANDWIDTH_LIMIT_SOFT => Some(BandwidthLimit::Soft),
            BANDWIDTH_LIMIT_DYNAMIC => Some(BandwidthLimit::Dynamic),
            _ => None,
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            BandwidthLimit::Hard => BANDWIDTH_LIMIT_HARD,
            BandwidthLimit::Soft => BANDWIDTH_LIMIT_SOFT,
            BandwidthLimit::Dynamic => BANDWIDTH_LIMIT_DYNAMIC,
        }
    }
}

/// Parsed protocol control message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    /// Set Chunk Size (type 1)
    SetChunkSize(u32),

    /// Abort Message (type 2)
    Abort { csid: u32 },

    /// Acknowledgement (type 3)
    Acknowledgement { sequence: u32 },

    /// User Control Message (type 4)
    UserControl(UserControlEvent),

    /// Window Acknowledgement Size (type 5)
    WindowAckSize(u32),

    /// Set Peer Bandwidth (type 6)
    SetPeerBandwidth { size: u32, limit: BandwidthLimit },
}

/// User Control Event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserControlEvent {
    StreamBegin(u32),
    StreamEof(u32),
    StreamDry(u32),
    SetBufferLength { stream_id: u32, buffer_ms: u32 },
    StreamIsRecorded(u32),
    PingRequest(u32),
    PingResponse(u32),
    Unknown { event_type: u16, data: Bytes },
}

/// Whether `message_type` is one of the protocol control types
pub fn is_control_type(message_type: u8) -> bool {
    (MSG_SET_CHUNK_SIZE..=MSG_SET_PEER_BANDWIDTH).contains(&message_type)
}

impl ControlMessage {
    /// Parse a control message body
    pub fn decode(message_type: u8, body: &[u8]) -> Result<Self> {
        let mut payload = body;
        let need = |n: usize| -> Result<()> {
            if body.len() < n {
                Err(ProtocolError::InvalidControlMessage(message_type).into())
            } else {
                Ok(())
            }
        };

        match message_type {
            MSG_SET_CHUNK_SIZE => {
                need(4)?;
                let size = payload.get_u32() & 0x7FFFFFFF; // Ignore MSB
                Ok(ControlMessage::SetChunkSize(size))
            }

            MSG_ABORT => {
                need(4)?;
                Ok(ControlMessage::Abort {
                    csid: payload.get_u32(),
                })
            }

            MSG_ACKNOWLEDGEMENT => {
                need(4)?;
                Ok(ControlMessage::Acknowledgement {
                    sequence: payload.get_u32(),
                })
            }

            MSG_USER_CONTROL => Self::decode_user_control(payload),

            MSG_WINDOW_ACK_SIZE => {
                need(4)?;
                Ok(ControlMessage::WindowAckSize(payload.get_u32()))
            }

            MSG_SET_PEER_BANDWIDTH => {
                need(5)?;
                let size = payload.get_u32();
                let limit = BandwidthLimit::from_u8(payload.get_u8())
                    .ok_or(ProtocolError::InvalidControlMessage(message_type))?;
                Ok(ControlMessage::SetPeerBandwidth { size, limit })
            }

            _ => Err(ProtocolError::InvalidControlMessage(message_type).into()),
        }
    }

    /// Parse User Control message
    fn decode_user_control(mut payload: &[u8]) -> Result<Self> {
        if payload.len() < 6 {
            return Err(ProtocolError::InvalidControlMessage(MSG_USER_CONTROL).into());
        }

        let event_type = payload.get_u16();
        let event = match event_type {
            UC_STREAM_BEGIN => UserControlEvent::StreamBegin(payload.get_u32()),
            UC_STREAM_EOF => UserControlEvent::StreamEof(payload.get_u32()),
            UC_STREAM_DRY => UserControlEvent::StreamDry(payload.get_u32()),
            UC_SET_BUFFER_LENGTH => {
                if payload.len() < 8 {
                    return Err(ProtocolError::InvalidControlMessage(MSG_USER_CONTROL).into());
                }
                let stream_id = payload.get_u32();
                let buffer_ms = payload.get_u32();
                UserControlEvent::SetBufferLength {
                    stream_id,
                    buffer_ms,
                }
            }
            UC_STREAM_IS_RECORDED => UserControlEvent::StreamIsRecorded(payload.get_u32()),
            UC_PING_REQUEST => UserControlEvent::PingRequest(payload.get_u32()),
            UC_PING_RESPONSE => UserControlEvent::PingResponse(payload.get_u32()),
            _ => UserControlEvent::Unknown {
                event_type,
                data: Bytes::copy_from_slice(payload),
            },
        };

        Ok(ControlMessage::UserControl(event))
    }

    /// Encode message to (type, body)
    pub fn encode(&self) -> (u8, Bytes) {
        let mut buf = BytesMut::with_capacity(10);
        let message_type = match self {
            ControlMessage::SetChunkSize(size) => {
                buf.put_u32(*size & 0x7FFFFFFF);
                MSG_SET_CHUNK_SIZE
            }
            ControlMessage::Abort { csid } => {
                buf.put_u32(*csid);
                MSG_ABORT
            }
            ControlMessage::Acknowledgement { sequence } => {
                buf.put_u32(*sequence);
                MSG_ACKNOWLEDGEMENT
            }
            ControlMessage::WindowAckSize(size) => {
                buf.put_u32(*size);
                MSG_WINDOW_ACK_SIZE
            }
            ControlMessage::SetPeerBandwidth { size, limit } => {
                buf.put_u32(*size);
                buf.put_u8(limit.as_u8());
                MSG_SET_PEER_BANDWIDTH
            }
            ControlMessage::UserControl(event) => {
                match event {
                    UserControlEvent::StreamBegin(id) => {
                        buf.put_u16(UC_STREAM_BEGIN);
                        buf.put_u32(*id);
                    }
                    UserControlEvent::StreamEof(id) => {
                        buf.put_u16(UC_STREAM_EOF);
                        buf.put_u32(*id);
                    }
                    UserControlEvent::StreamDry(id) => {
                        buf.put_u16(UC_STREAM_DRY);
                        buf.put_u32(*id);
                    }
                    UserControlEvent::SetBufferLength {
                        stream_id,
                        buffer_ms,
                    } => {
                        buf.put_u16(UC_SET_BUFFER_LENGTH);
                        buf.put_u32(*stream_id);
                        buf.put_u32(*buffer_ms);
                    }
                    UserControlEvent::StreamIsRecorded(id) => {
                        buf.put_u16(UC_STREAM_IS_RECORDED);
                        buf.put_u32(*id);
                    }
                    UserControlEvent::PingRequest(ts) => {
                        buf.put_u16(UC_PING_REQUEST);
                        buf.put_u32(*ts);
                    }
                    UserControlEvent::PingResponse(ts) => {
                        buf.put_u16(UC_PING_RESPONSE);
                        buf.put_u32(*ts);
                    }
                    UserControlEvent::Unknown { event_type, data } => {
                        buf.put_u16(*event_type);
                        buf.put_slice(data);
                    }
                }
                MSG_USER_CONTROL
            }
        };
        (message_type, buf.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_set_chunk_size_ignores_msb() {
        let msg = ControlMessage::decode(MSG_SET_CHUNK_SIZE, &[0x80, 0x00, 0x10, 0x00]).unwrap();
        assert_eq!(msg, ControlMessage::SetChunkSize(4096));
    }

    #[test]
    fn test_short_bodies_rejected() {
        for t in [
            MSG_SET_CHUNK_SIZE,
            MSG_ABORT,
            MSG_ACKNOWLEDGEMENT,
            MSG_WINDOW_ACK_SIZE,
        ] {
            assert!(matches!(
                ControlMessage::decode(t, &[0, 0, 1]),
                Err(Error::Protocol(ProtocolError::InvalidControlMessage(_)))
            ));
        }
        assert!(ControlMessage::decode(MSG_SET_PEER_BANDWIDTH, &[0, 0, 0, 1]).is_err());
        assert!(ControlMessage::decode(MSG_USER_CONTROL, &[0, 6, 0]).is_err());
    }

    #[test]
    fn test_peer_bandwidth_wire_form() {
        let msg = ControlMessage::SetPeerBandwidth {
            size: 2_500_000,
            limit: BandwidthLimit::Dynamic,
        };
        let (t, body) = msg.encode();
        assert_eq!(t, MSG_SET_PEER_BANDWIDTH);
        assert_eq!(&body[..], &[0x00, 0x26, 0x25, 0xA0, 0x02]);
        assert_eq!(ControlMessage::decode(t, &body).unwrap(), msg);

        assert!(ControlMessage::decode(MSG_SET_PEER_BANDWIDTH, &[0, 0, 0, 1, 9]).is_err());
    }

    #[test]
    fn test_user_control_events() {
        let ping = ControlMessage::UserControl(UserControlEvent::PingRequest(77));
        let (t, body) = ping.encode();
        assert_eq!(&body[..], &[0, 6, 0, 0, 0, 77]);
        assert_eq!(ControlMessage::decode(t, &body).unwrap(), ping);

        let buffer = ControlMessage::UserControl(UserControlEvent::SetBufferLength {
            stream_id: 1,
            buffer_ms: 3000,
        });
        let (t, body) = buffer.encode();
        assert_eq!(body.len(), 10);
        assert_eq!(ControlMessage::decode(t, &body).unwrap(), buffer);

        let unknown = ControlMessage::decode(MSG_USER_CONTROL, &[0, 31, 1, 2, 3, 4]).unwrap();
        assert!(matches!(
            unknown,
            ControlMessage::UserControl(UserControlEvent::Unknown { event_type: 31, .. })
        ));
    }

    #[test]
    fn test_is_control_type() {
        assert!(is_control_type(MSG_SET_CHUNK_SIZE));
        assert!(is_control_type(MSG_SET_PEER_BANDWIDTH));
        assert!(!is_control_type(MSG_AUDIO));
        assert!(!is_control_type(0));
    }
}
