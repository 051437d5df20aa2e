//! PFCP message codec.
//!
//! The transaction layer only needs three things from a message: its type
//! (request or response), its sequence number, and its serialised bytes.
//! This module provides exactly that for the PFCP header (3GPP TS 29.244
//! §7.2.2); information elements travel as an opaque body.
//!
//! No I/O happens here.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.
//!
//! ```text
//!  0               1               2               3
//!  0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7 0 1 2 3 4 5 6 7
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |Ver  |Spr|F|M|S| Message Type  |        Message Length         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |          Session Endpoint Identifier (only when S = 1)        |
//! +                                                               +
//! |                                                               |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                Sequence Number                |     Spare     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Information Elements ...                   |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! Message Length counts every octet after the first four.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

/// Protocol version carried in the top three bits of octet 1.
pub const VERSION: u8 = 1;

/// Header length without a SEID.
pub const HEADER_LEN: usize = 8;

/// Additional header length when the S flag is set.
pub const SEID_LEN: usize = 8;

/// Largest sequence number that fits the 24-bit field.
pub const MAX_SEQUENCE: u32 = 0x00ff_ffff;

/// Information element type of Recovery Time Stamp.
pub const IE_RECOVERY_TIME_STAMP: u16 = 96;

/// Seconds between the NTP epoch (1900) and the Unix epoch (1970).
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;

const FLAG_S: u8 = 0b0000_0001;

// Octets preceding the length field; excluded from Message Length.
const LEN_PREFIX: usize = 4;
const IE_HEADER_LEN: usize = 4;

const OFF_FLAGS: usize = 0;
const OFF_TYPE: usize = 1;
const OFF_LENGTH: usize = 2;
const OFF_SEID: usize = 4;

/// PFCP message types (TS 29.244 table 7.3-1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    HeartbeatRequest = 1,
    HeartbeatResponse = 2,
    PfdManagementRequest = 3,
    PfdManagementResponse = 4,
    AssociationSetupRequest = 5,
    AssociationSetupResponse = 6,
    AssociationUpdateRequest = 7,
    AssociationUpdateResponse = 8,
    AssociationReleaseRequest = 9,
    AssociationReleaseResponse = 10,
    VersionNotSupportedResponse = 11,
    NodeReportRequest = 12,
    NodeReportResponse = 13,
    SessionSetDeletionRequest = 14,
    SessionSetDeletionResponse = 15,
    SessionEstablishmentRequest = 50,
    SessionEstablishmentResponse = 51,
    SessionModificationRequest = 52,
    SessionModificationResponse = 53,
    SessionDeletionRequest = 54,
    SessionDeletionResponse = 55,
    SessionReportRequest = 56,
    SessionReportResponse = 57,
}

impl MessageType {
    pub fn from_u8(value: u8) -> Option<Self> {
        use MessageType::*;
        let t = match value {
            1 => HeartbeatRequest,
            2 => HeartbeatResponse,
            3 => PfdManagementRequest,
            4 => PfdManagementResponse,
            5 => AssociationSetupRequest,
            6 => AssociationSetupResponse,
            7 => AssociationUpdateRequest,
            8 => AssociationUpdateResponse,
            9 => AssociationReleaseRequest,
            10 => AssociationReleaseResponse,
            11 => VersionNotSupportedResponse,
            12 => NodeReportRequest,
            13 => NodeReportResponse,
            14 => SessionSetDeletionRequest,
            15 => SessionSetDeletionResponse,
            50 => SessionEstablishmentRequest,
            51 => SessionEstablishmentResponse,
            52 => SessionModificationRequest,
            53 => SessionModificationResponse,
            54 => SessionDeletionRequest,
            55 => SessionDeletionResponse,
            56 => SessionReportRequest,
            57 => SessionReportResponse,
            _ => return None,
        };
        Some(t)
    }

    /// `true` for messages that open a transaction on the receiving side.
    pub fn is_request(self) -> bool {
        use MessageType::*;
        matches!(
            self,
            HeartbeatRequest
                | PfdManagementRequest
                | AssociationSetupRequest
                | AssociationUpdateRequest
                | AssociationReleaseRequest
                | NodeReportRequest
                | SessionSetDeletionRequest
                | SessionEstablishmentRequest
                | SessionModificationRequest
                | SessionDeletionRequest
                | SessionReportRequest
        )
    }

    pub fn name(self) -> &'static str {
        use MessageType::*;
        match self {
            HeartbeatRequest => "Heartbeat Request",
            HeartbeatResponse => "Heartbeat Response",
            PfdManagementRequest => "PFD Management Request",
            PfdManagementResponse => "PFD Management Response",
            AssociationSetupRequest => "Association Setup Request",
            AssociationSetupResponse => "Association Setup Response",
            AssociationUpdateRequest => "Association Update Request",
            AssociationUpdateResponse => "Association Update Response",
            AssociationReleaseRequest => "Association Release Request",
            AssociationReleaseResponse => "Association Release Response",
            VersionNotSupportedResponse => "Version Not Supported Response",
            NodeReportRequest => "Node Report Request",
            NodeReportResponse => "Node Report Response",
            SessionSetDeletionRequest => "Session Set Deletion Request",
            SessionSetDeletionResponse => "Session Set Deletion Response",
            SessionEstablishmentRequest => "Session Establishment Request",
            SessionEstablishmentResponse => "Session Establishment Response",
            SessionModificationRequest => "Session Modification Request",
            SessionModificationResponse => "Session Modification Response",
            SessionDeletionRequest => "Session Deletion Request",
            SessionDeletionResponse => "Session Deletion Response",
            SessionReportRequest => "Session Report Request",
            SessionReportResponse => "Session Report Response",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Codec failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("buffer too short for a PFCP header")]
    BufferTooShort,
    #[error("unsupported PFCP version {0}")]
    UnsupportedVersion(u8),
    #[error("message length field does not match datagram length")]
    LengthMismatch,
    #[error("unknown message type {0}")]
    UnknownType(u8),
    #[error("sequence number {0:#x} does not fit in 24 bits")]
    SequenceOutOfRange(u32),
    #[error("encoded message of {0} octets overflows the length field")]
    TooLong(usize),
}

/// One PFCP message: header fields plus opaque information elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub msg_type: MessageType,
    /// Present only for session-related messages.
    pub seid: Option<u64>,
    pub sequence: u32,
    /// Encoded information elements.
    pub body: Vec<u8>,
}

impl Message {
    /// A node-related message (no SEID) with sequence number 0.
    ///
    /// The transaction layer stamps the real sequence number on send.
    pub fn new(msg_type: MessageType, body: Vec<u8>) -> Self {
        Self {
            msg_type,
            seid: None,
            sequence: 0,
            body,
        }
    }

    pub fn with_seid(msg_type: MessageType, seid: u64, body: Vec<u8>) -> Self {
        Self {
            seid: Some(seid),
            ..Self::new(msg_type, body)
        }
    }

    pub fn heartbeat_request(recovery: u32) -> Self {
        Self::new(MessageType::HeartbeatRequest, recovery_ie(recovery))
    }

    pub fn heartbeat_response(sequence: u32, recovery: u32) -> Self {
        Self {
            sequence,
            ..Self::new(MessageType::HeartbeatResponse, recovery_ie(recovery))
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.msg_type.name()
    }

    pub fn is_request(&self) -> bool {
        self.msg_type.is_request()
    }

    /// Total encoded size in octets.
    pub fn marshal_len(&self) -> usize {
        HEADER_LEN + self.seid.map_or(0, |_| SEID_LEN) + self.body.len()
    }

    /// Serialise into a newly allocated buffer.
    pub fn marshal(&self) -> Result<Vec<u8>, MessageError> {
        if self.sequence > MAX_SEQUENCE {
            return Err(MessageError::SequenceOutOfRange(self.sequence));
        }
        let total = self.marshal_len();
        let length = u16::try_from(total - LEN_PREFIX).map_err(|_| MessageError::TooLong(total))?;

        let mut buf = vec![0u8; total];
        buf[OFF_FLAGS] = (VERSION << 5) | if self.seid.is_some() { FLAG_S } else { 0 };
        buf[OFF_TYPE] = self.msg_type as u8;
        buf[OFF_LENGTH..OFF_LENGTH + 2].copy_from_slice(&length.to_be_bytes());

        let mut off = OFF_SEID;
        if let Some(seid) = self.seid {
            buf[off..off + SEID_LEN].copy_from_slice(&seid.to_be_bytes());
            off += SEID_LEN;
        }
        // 24-bit sequence number followed by one spare octet.
        buf[off..off + 3].copy_from_slice(&self.sequence.to_be_bytes()[1..]);
        off += 4;

        buf[off..].copy_from_slice(&self.body);
        Ok(buf)
    }

    /// Parse a message from one datagram.
    pub fn unmarshal(buf: &[u8]) -> Result<Self, MessageError> {
        if buf.len() < HEADER_LEN {
            return Err(MessageError::BufferTooShort);
        }

        let version = buf[OFF_FLAGS] >> 5;
        if version != VERSION {
            return Err(MessageError::UnsupportedVersion(version));
        }
        let has_seid = buf[OFF_FLAGS] & FLAG_S != 0;
        let length = u16::from_be_bytes([buf[OFF_LENGTH], buf[OFF_LENGTH + 1]]) as usize;
        if buf.len() != LEN_PREFIX + length {
            return Err(MessageError::LengthMismatch);
        }

        let header_len = HEADER_LEN + if has_seid { SEID_LEN } else { 0 };
        if buf.len() < header_len {
            return Err(MessageError::BufferTooShort);
        }
        let msg_type =
            MessageType::from_u8(buf[OFF_TYPE]).ok_or(MessageError::UnknownType(buf[OFF_TYPE]))?;

        let mut off = OFF_SEID;
        let seid = if has_seid {
            let mut raw = [0u8; SEID_LEN];
            raw.copy_from_slice(&buf[off..off + SEID_LEN]);
            off += SEID_LEN;
            Some(u64::from_be_bytes(raw))
        } else {
            None
        };
        let sequence = u32::from_be_bytes([0, buf[off], buf[off + 1], buf[off + 2]]);

        Ok(Self {
            msg_type,
            seid,
            sequence,
            body: buf[header_len..].to_vec(),
        })
    }

    /// Iterate `(type, value)` over the body's information elements.
    ///
    /// Stops at the first truncated element.
    pub fn ies(&self) -> impl Iterator<Item = (u16, &[u8])> + '_ {
        let mut rest = self.body.as_slice();
        std::iter::from_fn(move || {
            let cur: &[u8] = rest;
            if cur.len() < IE_HEADER_LEN {
                return None;
            }
            let ie_type = u16::from_be_bytes([cur[0], cur[1]]);
            let len = u16::from_be_bytes([cur[2], cur[3]]) as usize;
            let value = cur.get(IE_HEADER_LEN..IE_HEADER_LEN + len)?;
            rest = &cur[IE_HEADER_LEN + len..];
            Some((ie_type, value))
        })
    }

    pub fn recovery_time_stamp(&self) -> Option<u32> {
        self.ies()
            .find(|(t, _)| *t == IE_RECOVERY_TIME_STAMP)
            .and_then(|(_, v)| <[u8; 4]>::try_from(v).ok())
            .map(u32::from_be_bytes)
    }
}

fn recovery_ie(recovery: u32) -> Vec<u8> {
    let mut ie = Vec::with_capacity(IE_HEADER_LEN + 4);
    ie.extend_from_slice(&IE_RECOVERY_TIME_STAMP.to_be_bytes());
    ie.extend_from_slice(&4u16.to_be_bytes());
    ie.extend_from_slice(&recovery.to_be_bytes());
    ie
}

/// `time` as NTP seconds, the encoding of the Recovery Time Stamp IE.
pub fn ntp_seconds(time: SystemTime) -> u32 {
    let unix = time.duration_since(UNIX_EPOCH).map_or(0, |d| d.as_secs());
    // The 32-bit NTP seconds field wraps in 2036.
    (unix + NTP_UNIX_OFFSET) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_request_layout() {
        let mut msg = Message::heartbeat_request(0x0102_0304);
        msg.sequence = 0x00ab_cdef;
        let bytes = msg.marshal().unwrap();

        assert_eq!(bytes.len(), HEADER_LEN + 8);
        assert_eq!(bytes[OFF_FLAGS], 0x20, "version 1, no flags");
        assert_eq!(bytes[OFF_TYPE], 1);
        assert_eq!(&bytes[OFF_LENGTH..OFF_LENGTH + 2], &[0x00, 0x0c]);
        assert_eq!(&bytes[4..8], &[0xab, 0xcd, 0xef, 0x00]);
        assert_eq!(&bytes[8..], &[0x00, 0x60, 0x00, 0x04, 0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn session_message_carries_seid() {
        let mut msg =
            Message::with_seid(MessageType::SessionReportRequest, 0x1122_3344_5566_7788, vec![]);
        msg.sequence = 7;
        let bytes = msg.marshal().unwrap();

        assert_eq!(bytes[OFF_FLAGS] & FLAG_S, FLAG_S);
        assert_eq!(&bytes[4..12], &0x1122_3344_5566_7788u64.to_be_bytes());
        assert_eq!(Message::unmarshal(&bytes).unwrap(), msg);
    }

    #[test]
    fn decoded_heartbeat_exposes_recovery_time_stamp() {
        let msg = Message::heartbeat_response(0x20, 3_900_000_000);
        let decoded = Message::unmarshal(&msg.marshal().unwrap()).unwrap();
        assert_eq!(decoded.msg_type, MessageType::HeartbeatResponse);
        assert_eq!(decoded.sequence, 0x20);
        assert_eq!(decoded.recovery_time_stamp(), Some(3_900_000_000));
    }

    #[test]
    fn sequence_wider_than_24_bits_fails_to_encode() {
        let mut msg = Message::heartbeat_request(1);
        msg.sequence = MAX_SEQUENCE + 1;
        assert_eq!(
            msg.marshal(),
            Err(MessageError::SequenceOutOfRange(MAX_SEQUENCE + 1))
        );
    }

    #[test]
    fn oversized_body_fails_to_encode() {
        let msg = Message::new(MessageType::NodeReportRequest, vec![0u8; u16::MAX as usize]);
        assert!(matches!(msg.marshal(), Err(MessageError::TooLong(_))));
    }

    #[test]
    fn decode_short_buffer() {
        assert_eq!(Message::unmarshal(&[0x20, 1, 0]), Err(MessageError::BufferTooShort));
    }

    #[test]
    fn decode_rejects_other_versions() {
        let mut bytes = Message::heartbeat_request(1).marshal().unwrap();
        bytes[OFF_FLAGS] = 2 << 5;
        assert_eq!(Message::unmarshal(&bytes), Err(MessageError::UnsupportedVersion(2)));
    }

    #[test]
    fn decode_rejects_truncated_datagram() {
        let mut bytes = Message::heartbeat_request(1).marshal().unwrap();
        bytes.pop();
        assert_eq!(Message::unmarshal(&bytes), Err(MessageError::LengthMismatch));
    }

    #[test]
    fn decode_rejects_unknown_type() {
        let mut bytes = Message::heartbeat_request(1).marshal().unwrap();
        bytes[OFF_TYPE] = 200;
        assert_eq!(Message::unmarshal(&bytes), Err(MessageError::UnknownType(200)));
    }

    #[test]
    fn request_classification() {
        assert!(MessageType::HeartbeatRequest.is_request());
        assert!(MessageType::SessionReportRequest.is_request());
        assert!(MessageType::NodeReportRequest.is_request());
        assert!(!MessageType::HeartbeatResponse.is_request());
        assert!(!MessageType::VersionNotSupportedResponse.is_request());
        assert!(!MessageType::NodeReportResponse.is_request());
    }

    #[test]
    fn type_code_table_is_consistent() {
        for code in 0..=u8::MAX {
            if let Some(t) = MessageType::from_u8(code) {
                assert_eq!(t as u8, code);
            }
        }
    }

    #[test]
    fn truncated_ie_stops_iteration() {
        let msg = Message::new(MessageType::HeartbeatRequest, vec![0x00, 0x60, 0x00, 0x04, 0x01]);
        assert_eq!(msg.ies().count(), 0);
        assert_eq!(msg.recovery_time_stamp(), None);
    }

    #[test]
    fn ntp_seconds_offsets_unix_epoch() {
        assert_eq!(ntp_seconds(UNIX_EPOCH), 2_208_988_800);
    }
}
