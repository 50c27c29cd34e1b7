//! The unary state machine.
//!
//! There is no background worker: `send` decodes the input, runs the
//! interceptor chain around the service future to completion, and stores the
//! encoded outcome. `recv` only waits on the completion signal (or
//! cancellation), so the caller never blocks for an appreciable extra step
//! after `send` returns — `send` *is* the work.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::oneshot;

use super::{Call, CallSink, CallSource, UnaryHandler};
use crate::codec::{MediaType, Message};
use crate::context::Context;
use crate::error::BoxFuture;
use crate::interceptor::{BoxMessage, Chain, MethodInfo, Terminal};
use crate::status::Status;

pub(crate) fn new_call<In, Out>(
    ctx: Context,
    info: MethodInfo,
    input_media: MediaType,
    output_media: MediaType,
    chain: Chain,
    handler: UnaryHandler<In, Out>,
) -> Call
where
    In: Message,
    Out: Message,
{
    let (tx, rx) = oneshot::channel();
    Call {
        sink: Box::new(UnarySink {
            ctx: ctx.clone(),
            info,
            input_media,
            output_media,
            chain,
            handler: Some(handler),
            tx: Some(tx),
        }),
        source: Box::new(UnarySource {
            ctx,
            rx: Some(rx),
            terminal: None,
        }),
    }
}

struct UnarySink<In, Out> {
    ctx: Context,
    info: MethodInfo,
    input_media: MediaType,
    output_media: MediaType,
    chain: Chain,
    handler: Option<UnaryHandler<In, Out>>,
    tx: Option<oneshot::Sender<Result<Bytes, Status>>>,
}

impl<In, Out> UnarySink<In, Out>
where
    In: Message,
    Out: Message,
{
    async fn invoke(&self, handler: UnaryHandler<In, Out>, raw: Bytes) -> Result<Bytes, Status> {
        let input: In = self.input_media.unmarshal(&raw)?;

        let handler_ctx = self.ctx.clone();
        let terminal: Terminal = Box::new(move |message: BoxMessage| -> BoxFuture<'static, Result<BoxMessage, Status>> {
            Box::pin(async move {
                let input = message
                    .into_any()
                    .downcast::<In>()
                    .expect("unary input substituted with a foreign message type");
                match handler(handler_ctx, *input).await {
                    Ok(output) => Ok(Box::new(output) as BoxMessage),
                    Err(err) => Err(Status::from_service_error(err)),
                }
            })
        });

        let output = tokio::select! {
            biased;
            _ = self.ctx.cancelled() => return Err(self.ctx.error()),
            result = self.chain.invoke(&self.ctx, &self.info, Box::new(input), terminal) => result?,
        };
        let output = output
            .into_any()
            .downcast::<Out>()
            .expect("unary output substituted with a foreign message type");
        self.output_media.marshal(&*output)
    }
}

#[async_trait]
impl<In, Out> CallSink for UnarySink<In, Out>
where
    In: Message,
    Out: Message,
{
    async fn send(&mut self, raw: Bytes) -> Result<(), Status> {
        let handler = self.handler.take().expect("unary call driven twice");
        let tx = self.tx.take().expect("unary call driven twice");
        let outcome = self.invoke(handler, raw).await;
        let _ = tx.send(outcome);
        Ok(())
    }

    fn done(&mut self) {
        // The single input completes the stream by construction.
    }
}

struct UnarySource {
    ctx: Context,
    rx: Option<oneshot::Receiver<Result<Bytes, Status>>>,
    terminal: Option<Result<(), Status>>,
}

#[async_trait]
impl CallSource for UnarySource {
    async fn recv(&mut self) -> Result<Option<Bytes>, Status> {
        let Some(mut rx) = self.rx.take() else {
            return Ok(None);
        };
        tokio::select! {
            biased;
            _ = self.ctx.cancelled() => {
                self.rx = Some(rx);
                Err(self.ctx.error())
            }
            outcome = &mut rx => match outcome {
                Ok(Ok(bytes)) => {
                    self.terminal = Some(Ok(()));
                    Ok(Some(bytes))
                }
                Ok(Err(status)) => {
                    self.terminal = Some(Err(status.clone()));
                    Err(status)
                }
                Err(_) => {
                    let status = Status::unknown("call dropped before completing");
                    self.terminal = Some(Err(status.clone()));
                    Err(status)
                }
            }
        }
    }

    async fn wait(&mut self) -> Result<(), Status> {
        self.terminal
            .clone()
            .expect("wait called before recv observed the call result")
    }
}
