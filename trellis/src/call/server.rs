//! The server-streaming state machine.
//!
//! The call accepts exactly one input: `send` decodes it, hands it over and
//! closes the input side in the same step, so a second `send` is rejected by
//! construction. The worker waits for that input (or cancellation), then
//! runs the service with a live output sink; closing the input without ever
//! sending is its own distinct failure.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use super::{
    Call, CallSink, Completion, OutputSink, ServerStreamingHandler, StreamingSource,
};
use crate::codec::{MediaType, Message};
use crate::context::Context;
use crate::status::Status;

pub(crate) fn new_call<In, Out>(
    ctx: Context,
    input_media: MediaType,
    output_media: MediaType,
    handler: ServerStreamingHandler<In, Out>,
) -> Call
where
    In: Message,
    Out: Message,
{
    let (in_tx, mut in_rx) = mpsc::channel::<In>(1);
    let (out_tx, out_rx) = mpsc::channel::<Out>(1);
    let (completion, watch) = Completion::new();

    let worker_ctx = ctx.clone();
    tokio::spawn(async move {
        let input = tokio::select! {
            biased;
            _ = worker_ctx.cancelled() => {
                completion.complete(Err(worker_ctx.error()));
                return;
            }
            input = in_rx.recv() => input,
        };
        let result = match input {
            Some(input) => {
                let sink = OutputSink::new(out_tx, worker_ctx.clone());
                handler(worker_ctx, input, sink)
                    .await
                    .map_err(Status::from_service_error)
            }
            // The input side closed without a message: `done` without `send`.
            None => Err(Status::invalid_input("no input message received")),
        };
        completion.complete(result);
    });

    Call {
        sink: Box::new(SingleShotSink {
            ctx: ctx.clone(),
            media: input_media,
            tx: Some(in_tx),
        }),
        source: Box::new(StreamingSource::new(ctx, output_media, out_rx, watch)),
    }
}

/// Accepts one input, closing the input side as it does.
struct SingleShotSink<In> {
    ctx: Context,
    media: MediaType,
    tx: Option<mpsc::Sender<In>>,
}

#[async_trait]
impl<In: Message> CallSink for SingleShotSink<In> {
    async fn send(&mut self, raw: Bytes) -> Result<(), Status> {
        let input: In = self.media.unmarshal(&raw)?;
        let Some(tx) = self.tx.take() else {
            return Err(Status::failed_precondition("input already sent"));
        };
        tokio::select! {
            biased;
            _ = self.ctx.cancelled() => Err(self.ctx.error()),
            sent = tx.send(input) => {
                sent.map_err(|_| Status::aborted("call worker is gone"))
            }
        }
    }

    fn done(&mut self) {
        self.tx = None;
    }
}
