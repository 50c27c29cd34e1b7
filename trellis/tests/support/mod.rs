#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use trellis::BoxError;

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct EchoRequest {
    #[prost(string, tag = "1")]
    pub text: String,
}

#[derive(Clone, PartialEq, prost::Message, Serialize, Deserialize)]
pub struct EchoResponse {
    #[prost(string, tag = "1")]
    pub text: String,
}

impl trellis::Message for EchoRequest {
    fn validate(&self) -> Result<(), BoxError> {
        if self.text.is_empty() {
            return Err("text must not be empty".into());
        }
        Ok(())
    }
}

impl trellis::Message for EchoResponse {}

pub fn request_json(text: &str) -> bytes::Bytes {
    bytes::Bytes::from(
        serde_json::to_vec(&EchoRequest { text: text.into() }).expect("encode request"),
    )
}

pub fn response_from_json(bytes: &[u8]) -> EchoResponse {
    serde_json::from_slice(bytes).expect("decode response")
}
