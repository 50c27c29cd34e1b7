//! The bidirectional-streaming state machine.
//!
//! Input and output queues hold a single message each, so producer and
//! consumer effectively rendezvous on every handoff. The worker runs the
//! service for the full duration of the call with both the input stream and
//! the output sink live, and records the terminal result when it returns;
//! dropping the output sink is what signals end-of-output to `recv`.

use tokio::sync::mpsc;

use super::{
    Call, Completion, DuplexHandler, InputStream, OutputSink, StreamingSink, StreamingSource,
};
use crate::codec::{MediaType, Message};
use crate::context::Context;
use crate::status::Status;

pub(crate) fn new_call<In, Out>(
    ctx: Context,
    input_media: MediaType,
    output_media: MediaType,
    handler: DuplexHandler<In, Out>,
) -> Call
where
    In: Message,
    Out: Message,
{
    let (in_tx, in_rx) = mpsc::channel::<In>(1);
    let (out_tx, out_rx) = mpsc::channel::<Out>(1);
    let (completion, watch) = Completion::new();

    let worker_ctx = ctx.clone();
    tokio::spawn(async move {
        let inputs = InputStream::new(in_rx, worker_ctx.clone());
        let outputs = OutputSink::new(out_tx, worker_ctx.clone());
        let result = handler(worker_ctx, inputs, outputs)
            .await
            .map_err(Status::from_service_error);
        completion.complete(result);
    });

    Call {
        sink: Box::new(StreamingSink::new(ctx.clone(), input_media, in_tx)),
        source: Box::new(StreamingSource::new(ctx, output_media, out_rx, watch)),
    }
}
