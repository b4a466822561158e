//! Frame - the wire format wrapper for all pairsync messages.
//!
//! ```text
//! +---------+----------+------------------------+
//! | version | msg type | MessagePack body       |
//! | 1 byte  | 1 byte   | variable               |
//! +---------+----------+------------------------+
//! ```
//!
//! The version byte is checked before anything else is read, so a peer
//! speaking another protocol version is rejected rather than half-decoded.

use serde::{de::DeserializeOwned, Serialize};

use crate::messages::{
    Bye, Challenge, ChallengeResponse, ChunkAck, ChunkRetransmit, DataChunk, ErrorMessage,
    Message, SyncComplete, SyncRequest, SyncResponse,
};
use crate::ProtocolError;

/// Protocol version spoken by this build.
pub const PROTOCOL_VERSION: u8 = 1;

/// Size of the frame header in bytes.
pub const HEADER_LEN: usize = 2;

/// Message type discriminator carried in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Verification challenge
    Challenge = 1,
    /// Verification answer
    ChallengeResponse = 2,
    /// Start of a sync session
    SyncRequest = 3,
    /// Accept/decline a session
    SyncResponse = 4,
    /// Batch fragment
    DataChunk = 5,
    /// Fragment acknowledged
    ChunkAck = 6,
    /// Fragment re-requested
    ChunkRetransmit = 7,
    /// End of one side's data
    SyncComplete = 8,
    /// Abort with error
    ErrorMessage = 9,
    /// Graceful disconnect
    Bye = 10,
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageType::Challenge),
            2 => Ok(MessageType::ChallengeResponse),
            3 => Ok(MessageType::SyncRequest),
            4 => Ok(MessageType::SyncResponse),
            5 => Ok(MessageType::DataChunk),
            6 => Ok(MessageType::ChunkAck),
            7 => Ok(MessageType::ChunkRetransmit),
            8 => Ok(MessageType::SyncComplete),
            9 => Ok(MessageType::ErrorMessage),
            10 => Ok(MessageType::Bye),
            _ => Err(ProtocolError::InvalidMessageType(value)),
        }
    }
}

impl Message {
    /// Message type discriminator for this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Challenge(_) => MessageType::Challenge,
            Message::ChallengeResponse(_) => MessageType::ChallengeResponse,
            Message::SyncRequest(_) => MessageType::SyncRequest,
            Message::SyncResponse(_) => MessageType::SyncResponse,
            Message::DataChunk(_) => MessageType::DataChunk,
            Message::ChunkAck(_) => MessageType::ChunkAck,
            Message::ChunkRetransmit(_) => MessageType::ChunkRetransmit,
            Message::SyncComplete(_) => MessageType::SyncComplete,
            Message::ErrorMessage(_) => MessageType::ErrorMessage,
            Message::Bye(_) => MessageType::Bye,
        }
    }

    /// Encode into a version-prefixed frame.
    pub fn to_frame(&self) -> Result<Vec<u8>, ProtocolError> {
        let body = match self {
            Message::Challenge(m) => encode_body(m),
            Message::ChallengeResponse(m) => encode_body(m),
            Message::SyncRequest(m) => encode_body(m),
            Message::SyncResponse(m) => encode_body(m),
            Message::DataChunk(m) => encode_body(m),
            Message::ChunkAck(m) => encode_body(m),
            Message::ChunkRetransmit(m) => encode_body(m),
            Message::SyncComplete(m) => encode_body(m),
            Message::ErrorMessage(m) => encode_body(m),
            Message::Bye(m) => encode_body(m),
        }?;

        let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
        frame.push(PROTOCOL_VERSION);
        frame.push(self.message_type() as u8);
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    /// Decode a version-prefixed frame.
    pub fn from_frame(frame: &[u8]) -> Result<Self, ProtocolError> {
        if frame.len() < HEADER_LEN {
            return Err(ProtocolError::MalformedFrame(format!(
                "frame of {} bytes is shorter than the {}-byte header",
                frame.len(),
                HEADER_LEN
            )));
        }

        let version = frame[0];
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion {
                received: version,
                supported: PROTOCOL_VERSION,
            });
        }

        let body = &frame[HEADER_LEN..];
        let message = match MessageType::try_from(frame[1])? {
            MessageType::Challenge => Message::Challenge(decode_body::<Challenge>(body)?),
            MessageType::ChallengeResponse => {
                Message::ChallengeResponse(decode_body::<ChallengeResponse>(body)?)
            }
            MessageType::SyncRequest => Message::SyncRequest(decode_body::<SyncRequest>(body)?),
            MessageType::SyncResponse => {
                Message::SyncResponse(decode_body::<SyncResponse>(body)?)
            }
            MessageType::DataChunk => Message::DataChunk(decode_body::<DataChunk>(body)?),
            MessageType::ChunkAck => Message::ChunkAck(decode_body::<ChunkAck>(body)?),
            MessageType::ChunkRetransmit => {
                Message::ChunkRetransmit(decode_body::<ChunkRetransmit>(body)?)
            }
            MessageType::SyncComplete => {
                Message::SyncComplete(decode_body::<SyncComplete>(body)?)
            }
            MessageType::ErrorMessage => {
                Message::ErrorMessage(decode_body::<ErrorMessage>(body)?)
            }
            MessageType::Bye => Message::Bye(decode_body::<Bye>(body)?),
        };
        Ok(message)
    }
}

fn encode_body<T: Serialize>(body: &T) -> Result<Vec<u8>, ProtocolError> {
    rmp_serde::to_vec(body).map_err(ProtocolError::Serialization)
}

fn decode_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ProtocolError> {
    rmp_serde::from_slice(body).map_err(ProtocolError::Deserialization)
}
