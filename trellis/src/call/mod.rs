//! The per-shape state machines that execute calls.
//!
//! A [`Call`] is one invocation in flight: the transport drives its producer
//! half ([`CallSink`]) with raw request payloads and its consumer half
//! ([`CallSource`]) for raw response payloads, while a background worker
//! (for the streaming shapes) runs the service implementation concurrently.
//! Unary calls have no worker; their work happens inside `send`.
//!
//! Every blocking step in here races context cancellation, so no operation
//! can wait forever on a queue whose peer has lost interest.

pub(crate) mod client;
pub(crate) mod duplex;
pub(crate) mod server;
pub(crate) mod unary;

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, watch};
use tokio_stream::Stream;

use crate::codec::MediaType;
use crate::context::Context;
use crate::error::{BoxError, BoxFuture};
use crate::status::Status;

/// One invocation in flight, split into its two driver halves.
///
/// The halves are independent: a transport typically drives the sink from
/// its read loop and the source from a response task. Each half is for a
/// single driver; neither is meant to be shared.
pub struct Call {
    /// The producer half: feed inputs, then signal end-of-input.
    pub sink: Box<dyn CallSink>,
    /// The consumer half: drain outputs, then collect the terminal result.
    pub source: Box<dyn CallSource>,
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call").finish_non_exhaustive()
    }
}

/// The producer half of a [`Call`].
#[async_trait]
pub trait CallSink: Send {
    /// Decodes one raw input message and hands it to the call.
    ///
    /// Blocks while the input queue is full, racing cancellation: a
    /// cancelled context unblocks the send with the context's error rather
    /// than leaving it parked on the queue.
    async fn send(&mut self, raw: Bytes) -> Result<(), Status>;

    /// Signals that no more inputs will arrive.
    fn done(&mut self);
}

/// The consumer half of a [`Call`].
#[async_trait]
pub trait CallSource: Send {
    /// Waits for the next encoded output message; `None` once the output
    /// side has closed.
    async fn recv(&mut self) -> Result<Option<Bytes>, Status>;

    /// Reports the call's terminal result. Idempotent: the terminal state is
    /// recorded once and every later `wait` observes the same outcome.
    async fn wait(&mut self) -> Result<(), Status>;
}

/// Tunables for a single call.
#[derive(Clone, Copy, Debug)]
pub struct CallOptions {
    /// Capacity of the input queue for calls with streamed input.
    pub input_capacity: usize,
}

impl Default for CallOptions {
    fn default() -> CallOptions {
        CallOptions { input_capacity: 8 }
    }
}

pub(crate) type UnaryHandler<In, Out> =
    Arc<dyn Fn(Context, In) -> BoxFuture<'static, Result<Out, BoxError>> + Send + Sync>;

pub(crate) type ClientStreamingHandler<In, Out> =
    Arc<dyn Fn(Context, Vec<In>) -> BoxFuture<'static, Result<Out, BoxError>> + Send + Sync>;

pub(crate) type ServerStreamingHandler<In, Out> =
    Arc<dyn Fn(Context, In, OutputSink<Out>) -> BoxFuture<'static, Result<(), BoxError>> + Send + Sync>;

pub(crate) type DuplexHandler<In, Out> = Arc<
    dyn Fn(Context, InputStream<In>, OutputSink<Out>) -> BoxFuture<'static, Result<(), BoxError>>
        + Send
        + Sync,
>;

/// The input messages of a call, as seen by a service implementation.
///
/// Messages arrive in the order they were sent. The stream ends when the
/// caller signals end-of-input or the call's context is cancelled.
#[derive(Debug)]
pub struct InputStream<T> {
    rx: mpsc::Receiver<T>,
    ctx: Context,
}

impl<T> InputStream<T> {
    pub(crate) fn new(rx: mpsc::Receiver<T>, ctx: Context) -> InputStream<T> {
        InputStream { rx, ctx }
    }

    /// Waits for the next input message.
    pub async fn next(&mut self) -> Option<T> {
        tokio::select! {
            biased;
            _ = self.ctx.cancelled() => None,
            item = self.rx.recv() => item,
        }
    }
}

impl<T> Stream for InputStream<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<T>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

/// The output side of a call, as seen by a service implementation.
///
/// Sends rendezvous with the consumer: `send` resolves once the message has
/// been handed over (or the context is cancelled, or the consumer is gone).
#[derive(Debug)]
pub struct OutputSink<T> {
    tx: mpsc::Sender<T>,
    ctx: Context,
}

impl<T: Send> OutputSink<T> {
    pub(crate) fn new(tx: mpsc::Sender<T>, ctx: Context) -> OutputSink<T> {
        OutputSink { tx, ctx }
    }

    /// Pushes one output message to the caller.
    pub async fn send(&self, message: T) -> Result<(), Status> {
        tokio::select! {
            biased;
            _ = self.ctx.cancelled() => Err(self.ctx.error()),
            sent = self.tx.send(message) => {
                sent.map_err(|_| Status::aborted("call output closed"))
            }
        }
    }
}

/// The write side of a call's terminal state. Completing twice is a no-op;
/// the first result sticks.
pub(crate) struct Completion {
    tx: watch::Sender<Option<Result<(), Status>>>,
}

impl Completion {
    pub(crate) fn new() -> (Completion, CompletionWatch) {
        let (tx, rx) = watch::channel(None);
        (Completion { tx }, CompletionWatch { rx })
    }

    pub(crate) fn complete(&self, result: Result<(), Status>) {
        self.tx.send_modify(|slot| {
            if slot.is_none() {
                *slot = Some(result);
            }
        });
    }
}

#[derive(Clone)]
pub(crate) struct CompletionWatch {
    rx: watch::Receiver<Option<Result<(), Status>>>,
}

impl CompletionWatch {
    pub(crate) async fn wait(&mut self, ctx: &Context) -> Result<(), Status> {
        loop {
            let current: Option<Result<(), Status>> = self.rx.borrow().clone();
            if let Some(result) = current {
                return result;
            }
            tokio::select! {
                biased;
                _ = ctx.cancelled() => return Err(ctx.error()),
                changed = self.rx.changed() => {
                    if changed.is_err() {
                        // The worker vanished without recording a result.
                        return Err(Status::unknown("call worker dropped without a result"));
                    }
                }
            }
        }
    }
}

/// Sink for shapes with streamed input (client-streaming and duplex): each
/// send enqueues one decoded message, `done` closes the queue.
pub(crate) struct StreamingSink<In> {
    ctx: Context,
    media: MediaType,
    tx: Option<mpsc::Sender<In>>,
}

impl<In> StreamingSink<In> {
    pub(crate) fn new(ctx: Context, media: MediaType, tx: mpsc::Sender<In>) -> StreamingSink<In> {
        StreamingSink {
            ctx,
            media,
            tx: Some(tx),
        }
    }
}

#[async_trait]
impl<In: crate::codec::Message> CallSink for StreamingSink<In> {
    async fn send(&mut self, raw: Bytes) -> Result<(), Status> {
        let Some(tx) = &self.tx else {
            return Err(Status::failed_precondition("input stream already closed"));
        };
        let input: In = self.media.unmarshal(&raw)?;
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

/// Source for shapes with streamed output (server-streaming and duplex):
/// `recv` drains the output queue, `wait` reports the worker's terminal
/// result once the queue has closed.
pub(crate) struct StreamingSource<Out> {
    ctx: Context,
    media: MediaType,
    rx: mpsc::Receiver<Out>,
    completion: CompletionWatch,
}

impl<Out> StreamingSource<Out> {
    pub(crate) fn new(
        ctx: Context,
        media: MediaType,
        rx: mpsc::Receiver<Out>,
        completion: CompletionWatch,
    ) -> StreamingSource<Out> {
        StreamingSource {
            ctx,
            media,
            rx,
            completion,
        }
    }
}

#[async_trait]
impl<Out: crate::codec::Message> CallSource for StreamingSource<Out> {
    async fn recv(&mut self) -> Result<Option<Bytes>, Status> {
        tokio::select! {
            biased;
            _ = self.ctx.cancelled() => Err(self.ctx.error()),
            next = self.rx.recv() => match next {
                Some(output) => Ok(Some(self.media.marshal(&output)?)),
                None => Ok(None),
            }
        }
    }

    async fn wait(&mut self) -> Result<(), Status> {
        self.completion.wait(&self.ctx).await
    }
}
