//! Wire schemas shared by every encoding.
//!
//! The error envelope travels in HTTP bodies and in transport frames; the
//! [`Envelope`] frames the multiplexed streaming transport. Both are fixed
//! schemas: the correlation id plus a message-or-error payload is all the
//! transport ever needs, so nothing here is derived at runtime.

use serde::{Deserialize, Serialize};

use crate::codec::Message;

/// The serialized form of a [`crate::Status`].
///
/// The diagnostic cause of a status never appears here; only code, message
/// and the optional detail payload cross the wire.
#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct Error {
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: String,
    #[prost(message, optional, tag = "3")]
    pub details: Option<Details>,
}

/// A typed detail payload, self-describing through its message type name.
#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct Details {
    #[prost(string, tag = "1")]
    pub type_name: String,
    #[prost(bytes = "vec", tag = "2")]
    pub value: Vec<u8>,
}

/// One frame on the multiplexed streaming transport.
///
/// The correlation id namespaces the concurrently open calls sharing a
/// connection; id `0` is reserved and never valid on the wire. An absent
/// payload marks end-of-stream for the call, in either direction.
#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct Envelope {
    #[prost(uint32, tag = "1")]
    pub id: u32,
    #[prost(oneof = "Payload", tags = "2, 3")]
    pub payload: Option<Payload>,
}

/// The body of an [`Envelope`]: a serialized message or a terminal error.
#[derive(Clone, PartialEq, prost::Oneof, Serialize, Deserialize)]
pub enum Payload {
    #[prost(bytes = "vec", tag = "2")]
    Message(Vec<u8>),
    #[prost(message, tag = "3")]
    Error(Error),
}

/// The reserved, never-valid correlation id.
pub const RESERVED_ID: u32 = 0;

impl Message for Error {}
impl Message for Details {}
impl Message for Envelope {}
