//! The plain-text rendition.
//!
//! Text is the lowest-common-denominator encoding: it is what negotiation
//! failures are reported in, and the only form guaranteed readable without
//! tooling. Messages are rendered through the same self-describing data
//! model as JSON, in indented form; parsing accepts both the indented and
//! the compact shape.

use bytes::Bytes;

use super::Message;
use crate::status::Status;

pub(super) fn marshal<T: Message>(message: &T) -> Result<Bytes, Status> {
    serde_json::to_vec_pretty(message)
        .map(Bytes::from)
        .map_err(|err| Status::unknown(format!("failed to render message as text: {err}")))
}

pub(super) fn unmarshal<T: Message>(bytes: &[u8]) -> Result<T, Status> {
    serde_json::from_slice(bytes)
        .map_err(|err| Status::invalid_input(format!("malformed text message: {err}")))
}
