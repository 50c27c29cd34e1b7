//! The multiplexed streaming transport.
//!
//! Streaming calls share one persistent byte-stream connection. Every frame
//! is an [`crate::wire::Envelope`] tagged with a correlation id chosen by
//! the initiator; a single reader demultiplexes inbound frames to per-call
//! state machines, and a single writer task serializes every outbound frame
//! regardless of how many calls are producing output concurrently.

mod codec;
mod conn;

use std::time::Duration;

pub use codec::EnvelopeCodec;
pub use conn::serve_connection;

use crate::call::CallOptions;
use crate::interceptor::{Chain, MethodInfo};
use crate::service::{CallParams, Method};

/// Connection-level tunables.
#[derive(Clone, Debug)]
pub struct MuxConfig {
    /// How long a call whose shape does not stream its input may stay open
    /// without delivering its mandatory input frame.
    pub protocol_timeout: Duration,
    /// Capacity of the per-call inbound frame buffer and of the shared
    /// writer queue.
    pub frame_buffer: usize,
    /// The largest frame accepted or produced, in bytes.
    pub max_frame_size: usize,
}

impl Default for MuxConfig {
    fn default() -> MuxConfig {
        MuxConfig {
            protocol_timeout: Duration::from_secs(10),
            frame_buffer: 16,
            max_frame_size: 4 * 1024 * 1024,
        }
    }
}

/// What a connection fatally failed on. Per-call violations (a stale or
/// reserved correlation id, a malformed message) are reported to the peer on
/// the offending id and do not produce one of these; only failures that
/// poison the whole connection do.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("frame of {length} bytes exceeds the {limit}-byte limit")]
    FrameTooLarge { length: usize, limit: usize },

    #[error("malformed envelope frame: {0}")]
    Decode(String),

    #[error("failed to encode envelope frame: {0}")]
    Encode(String),

    #[error("call {0} never delivered its input frame within the protocol timeout")]
    InputTimeout(u32),
}

/// The method a connection is bound to, along with everything needed to
/// mint calls for it.
#[derive(Clone, Debug)]
pub struct CallTarget {
    pub(crate) method: Method,
    pub(crate) info: MethodInfo,
    pub(crate) chain: Chain,
    pub(crate) options: CallOptions,
}

impl CallTarget {
    /// Binds `method` for serving over a connection.
    pub fn new(method: Method, info: MethodInfo, chain: Chain, options: CallOptions) -> CallTarget {
        CallTarget {
            method,
            info,
            chain,
            options,
        }
    }

    pub(crate) fn new_call(
        &self,
        ctx: crate::context::Context,
        media: crate::codec::MediaType,
    ) -> crate::call::Call {
        self.method.new_call(CallParams {
            ctx,
            info: self.info.clone(),
            input_media: media,
            output_media: media,
            chain: self.chain.clone(),
            options: self.options,
        })
    }
}
