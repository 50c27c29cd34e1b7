//! Message contracts and the wire encodings a call can speak.
//!
//! The schema compiler emits message types and marks them as [`Message`];
//! everything else here is the fixed set of encodings ([`MediaType`]) the
//! framework negotiates between, and the marshal/unmarshal entry points the
//! call runtime uses once a type has been picked.

mod json;
mod proto;
mod text;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::BoxError;
use crate::status::Status;

/// A schema message that can travel over any supported encoding.
///
/// Generated message types implement this; the supertraits supply the binary
/// and self-describing encodings. `validate` is the self-validation
/// capability: types that override it get their inputs checked before the
/// service implementation runs and their outputs checked before they are
/// sent (see [`crate::Validator`]). The default accepts everything.
pub trait Message:
    prost::Message + Serialize + DeserializeOwned + Default + Clone + 'static
{
    /// Checks this message against its own schema constraints.
    fn validate(&self) -> Result<(), BoxError> {
        Ok(())
    }
}

/// A wire encoding, identified by its media type name.
///
/// The list is fixed and ordered by server preference: binary protobuf
/// first (under either of its two accepted names), then JSON, then the
/// plain-text rendition. The same list serves both directions — any type
/// valid as a request `Content-Type` is valid in `Accept`, and vice versa.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MediaType {
    /// `application/protobuf`: binary protobuf.
    Protobuf,
    /// `application/x-protobuf`: the legacy alias for binary protobuf.
    XProtobuf,
    /// `application/json`.
    Json,
    /// `text/plain`: a human-readable rendition.
    Text,
}

impl MediaType {
    /// Every supported media type, in server preference order.
    pub const SUPPORTED: [MediaType; 4] = [
        MediaType::Protobuf,
        MediaType::XProtobuf,
        MediaType::Json,
        MediaType::Text,
    ];

    /// The full `type/subtype` name of this media type.
    pub const fn as_str(self) -> &'static str {
        match self {
            MediaType::Protobuf => "application/protobuf",
            MediaType::XProtobuf => "application/x-protobuf",
            MediaType::Json => "application/json",
            MediaType::Text => "text/plain",
        }
    }

    /// Resolves a `type/subtype` name (no parameters) to a supported media
    /// type. Matching is case-insensitive.
    pub fn from_name(name: &str) -> Option<MediaType> {
        MediaType::SUPPORTED
            .into_iter()
            .find(|media| media.as_str().eq_ignore_ascii_case(name))
    }

    /// The `type.subtype` token used in upgrade sub-protocol names, where a
    /// slash cannot appear.
    pub fn subprotocol(self) -> &'static str {
        match self {
            MediaType::Protobuf => "application.protobuf",
            MediaType::XProtobuf => "application.x-protobuf",
            MediaType::Json => "application.json",
            MediaType::Text => "text.plain",
        }
    }

    /// Resolves an upgrade sub-protocol token back to a media type.
    pub fn from_subprotocol(token: &str) -> Option<MediaType> {
        MediaType::SUPPORTED
            .into_iter()
            .find(|media| media.subprotocol().eq_ignore_ascii_case(token))
    }

    /// Serializes `message` in this encoding.
    pub fn marshal<T: Message>(self, message: &T) -> Result<Bytes, Status> {
        match self {
            MediaType::Protobuf | MediaType::XProtobuf => proto::marshal(message),
            MediaType::Json => json::marshal(message),
            MediaType::Text => text::marshal(message),
        }
    }

    /// Deserializes a message of type `T` from this encoding.
    pub fn unmarshal<T: Message>(self, bytes: &[u8]) -> Result<T, Status> {
        match self {
            MediaType::Protobuf | MediaType::XProtobuf => proto::unmarshal(bytes),
            MediaType::Json => json::unmarshal(bytes),
            MediaType::Text => text::unmarshal(bytes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::MediaType;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
    struct Note {
        #[prost(string, tag = "1")]
        body: String,
        #[prost(uint64, tag = "2")]
        revision: u64,
    }

    impl super::Message for Note {}

    #[test]
    fn binary_aliases_share_an_encoding() {
        let note = Note {
            body: "hello".into(),
            revision: 3,
        };
        let canonical = MediaType::Protobuf.marshal(&note).unwrap();
        let alias = MediaType::XProtobuf.marshal(&note).unwrap();
        assert_eq!(canonical, alias);

        let decoded: Note = MediaType::XProtobuf.unmarshal(&canonical).unwrap();
        assert_eq!(decoded, note);
    }

    #[test]
    fn every_media_type_round_trips() {
        let note = Note {
            body: "state of the migration".into(),
            revision: 12,
        };
        for media in MediaType::SUPPORTED {
            let bytes = media.marshal(&note).unwrap();
            let decoded: Note = media.unmarshal(&bytes).unwrap();
            assert_eq!(decoded, note, "{media:?}");
        }
    }

    #[test]
    fn name_lookup_is_case_insensitive() {
        assert_eq!(MediaType::from_name("Application/JSON"), Some(MediaType::Json));
        assert_eq!(MediaType::from_name("application/x-protobuf"), Some(MediaType::XProtobuf));
        assert_eq!(MediaType::from_name("application/xml"), None);
    }

    #[test]
    fn subprotocol_tokens_round_trip() {
        for media in MediaType::SUPPORTED {
            assert_eq!(MediaType::from_subprotocol(media.subprotocol()), Some(media));
        }
        assert_eq!(MediaType::from_subprotocol("application/json"), None);
    }

    #[test]
    fn malformed_input_is_invalid_input() {
        let err = MediaType::Json.unmarshal::<Note>(b"{not json").unwrap_err();
        assert_eq!(err.code(), crate::Code::INVALID_INPUT);
    }
}
