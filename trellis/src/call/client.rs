//! The client-streaming state machine.
//!
//! The caller streams inputs into a bounded queue and closes it with
//! `done`; the worker drains the queue in FIFO order until it closes, then
//! invokes the service once with the entire input stream and records the
//! single result. `recv` hands that result over exactly once; the terminal
//! error is only available through `wait` after `recv` has observed
//! end-of-stream.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tracing::trace;

use super::{Call, CallOptions, CallSource, ClientStreamingHandler, StreamingSink};
use crate::codec::{MediaType, Message};
use crate::context::Context;
use crate::status::Status;

pub(crate) fn new_call<In, Out>(
    ctx: Context,
    input_media: MediaType,
    output_media: MediaType,
    options: CallOptions,
    handler: ClientStreamingHandler<In, Out>,
) -> Call
where
    In: Message,
    Out: Message,
{
    let (in_tx, mut in_rx) = mpsc::channel::<In>(options.input_capacity.max(1));
    let (out_tx, out_rx) = oneshot::channel::<Result<Out, Status>>();

    let worker_ctx = ctx.clone();
    tokio::spawn(async move {
        let mut inputs = Vec::new();
        loop {
            tokio::select! {
                biased;
                _ = worker_ctx.cancelled() => {
                    let _ = out_tx.send(Err(worker_ctx.error()));
                    return;
                }
                next = in_rx.recv() => match next {
                    Some(input) => inputs.push(input),
                    None => break,
                }
            }
        }
        trace!(inputs = inputs.len(), "input stream closed, invoking service");
        let result = handler(worker_ctx, inputs)
            .await
            .map_err(Status::from_service_error);
        let _ = out_tx.send(result);
    });

    Call {
        sink: Box::new(StreamingSink::new(ctx.clone(), input_media, in_tx)),
        source: Box::new(ClientStreamingSource {
            ctx,
            media: output_media,
            rx: Some(out_rx),
            saw_end: false,
            terminal: None,
        }),
    }
}

struct ClientStreamingSource<Out> {
    ctx: Context,
    media: MediaType,
    rx: Option<oneshot::Receiver<Result<Out, Status>>>,
    saw_end: bool,
    terminal: Option<Result<(), Status>>,
}

#[async_trait]
impl<Out: Message> CallSource for ClientStreamingSource<Out> {
    async fn recv(&mut self) -> Result<Option<Bytes>, Status> {
        let Some(mut rx) = self.rx.take() else {
            // The single result was already consumed (or never produced);
            // this is the end-of-stream observation `wait` insists on.
            self.saw_end = true;
            return Ok(None);
        };
        tokio::select! {
            biased;
            _ = self.ctx.cancelled() => {
                self.rx = Some(rx);
                Err(self.ctx.error())
            }
            outcome = &mut rx => match outcome {
                Ok(Ok(output)) => {
                    self.terminal = Some(Ok(()));
                    Ok(Some(self.media.marshal(&output)?))
                }
                Ok(Err(status)) => {
                    // Failures of this shape surface through `wait`, mirroring
                    // how the result channel simply closes without a value.
                    self.terminal = Some(Err(status));
                    self.saw_end = true;
                    Ok(None)
                }
                Err(_) => {
                    let status = Status::unknown("call worker dropped without a result");
                    self.terminal = Some(Err(status));
                    self.saw_end = true;
                    Ok(None)
                }
            }
        }
    }

    async fn wait(&mut self) -> Result<(), Status> {
        assert!(
            self.saw_end,
            "wait called before recv observed end of stream",
        );
        self.terminal.clone().unwrap_or(Ok(()))
    }
}
