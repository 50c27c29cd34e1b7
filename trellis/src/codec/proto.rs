//! Binary protobuf encoding, via prost.

use bytes::Bytes;

use super::Message;
use crate::status::Status;

pub(super) fn marshal<T: Message>(message: &T) -> Result<Bytes, Status> {
    Ok(Bytes::from(message.encode_to_vec()))
}

pub(super) fn unmarshal<T: Message>(bytes: &[u8]) -> Result<T, Status> {
    T::decode(bytes).map_err(|err| {
        Status::invalid_input(format!("malformed protobuf message: {err}"))
    })
}
