//! JSON encoding, via serde_json.

use bytes::Bytes;

use super::Message;
use crate::status::Status;

pub(super) fn marshal<T: Message>(message: &T) -> Result<Bytes, Status> {
    serde_json::to_vec(message)
        .map(Bytes::from)
        .map_err(|err| Status::unknown(format!("failed to encode message as JSON: {err}")))
}

pub(super) fn unmarshal<T: Message>(bytes: &[u8]) -> Result<T, Status> {
    serde_json::from_slice(bytes)
        .map_err(|err| Status::invalid_input(format!("malformed JSON message: {err}")))
}
