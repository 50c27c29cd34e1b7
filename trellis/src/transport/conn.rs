//! The connection driver: one reader, one writer, many calls.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use bytes::Bytes;
use futures_util::SinkExt;
use tokio::io::{AsyncRead, AsyncWrite, WriteHalf};
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, trace, warn};

use super::{CallTarget, EnvelopeCodec, MuxConfig, ProtocolError};
use crate::call::{CallSink, CallSource};
use crate::codec::MediaType;
use crate::context::Context;
use crate::status::Status;
use crate::wire::{Envelope, Payload, RESERVED_ID};

/// Serves streaming calls to one method over a persistent connection.
///
/// Frames are demultiplexed by correlation id. A fresh id opens a new call:
/// either directly with its first message, or with an empty-payload envelope
/// announcing the call before its input arrives. An empty payload on an
/// already-open call means end-of-input; an error payload aborts the call.
/// Frames for retired ids, the reserved id `0`, and error frames on unopened
/// ids are rejected on their own id without disturbing other calls.
///
/// The connection runs until the peer closes it, `ctx` is cancelled, or a
/// fatal protocol violation occurs — including a call with non-streamed
/// input that never delivers its mandatory input frame within the protocol
/// timeout.
pub async fn serve_connection<IO>(
    io: IO,
    target: CallTarget,
    media: MediaType,
    config: MuxConfig,
    ctx: Context,
) -> Result<(), ProtocolError>
where
    IO: AsyncRead + AsyncWrite + Send + 'static,
{
    // Scope every per-call context under our own child so teardown here
    // never cancels anything outside this connection.
    let ctx = ctx.child();

    let codec = EnvelopeCodec::new(media, config.max_frame_size);
    let (read, write) = tokio::io::split(io);
    let mut frames = FramedRead::new(read, codec);

    let (write_tx, write_rx) = mpsc::channel::<Envelope>(config.frame_buffer.max(1));
    let writer = tokio::spawn(write_frames(FramedWrite::new(write, codec), write_rx));

    let (retire_tx, mut retire_rx) = mpsc::channel::<u32>(config.frame_buffer.max(1));
    let (fatal_tx, mut fatal_rx) = mpsc::channel::<ProtocolError>(1);

    let mut demux = Demux {
        target,
        media,
        ctx: ctx.clone(),
        config,
        write_tx: write_tx.clone(),
        retire_tx,
        fatal_tx,
        active: HashMap::new(),
        retired: HashSet::new(),
    };

    let result = loop {
        tokio::select! {
            biased;
            _ = ctx.cancelled() => break Ok(()),
            fatal = fatal_rx.recv() => match fatal {
                Some(err) => break Err(err),
                None => break Ok(()),
            },
            retired = retire_rx.recv() => {
                if let Some(id) = retired {
                    demux.retire(id);
                }
            }
            frame = frames.next() => match frame {
                Some(Ok(envelope)) => demux.dispatch(envelope).await,
                Some(Err(err)) => break Err(err),
                None => break Ok(()),
            },
        }
    };

    // Unwind: cancel per-call work, release our writer handle, and let the
    // writer drain whatever the calls managed to queue.
    ctx.cancel();
    drop(demux);
    drop(write_tx);
    let _ = writer.await;
    result
}

/// The single serializing writer. Every frame the connection emits funnels
/// through here; nothing else touches the write half.
async fn write_frames<W>(
    mut sink: FramedWrite<WriteHalf<W>, EnvelopeCodec>,
    mut frames: mpsc::Receiver<Envelope>,
) where
    W: AsyncWrite,
{
    while let Some(envelope) = frames.recv().await {
        trace!(id = envelope.id, "writing frame");
        if let Err(err) = sink.send(envelope).await {
            debug!("connection write failed: {err}");
            return;
        }
    }
    let _ = sink.flush().await;
    debug!("writer stopped");
}

struct Demux {
    target: CallTarget,
    media: MediaType,
    ctx: Context,
    config: MuxConfig,
    write_tx: mpsc::Sender<Envelope>,
    retire_tx: mpsc::Sender<u32>,
    fatal_tx: mpsc::Sender<ProtocolError>,
    active: HashMap<u32, mpsc::Sender<Option<Payload>>>,
    retired: HashSet<u32>,
}

impl Demux {
    fn retire(&mut self, id: u32) {
        if self.active.remove(&id).is_some() {
            trace!(id, "call retired");
            self.retired.insert(id);
        }
    }

    async fn dispatch(&mut self, envelope: Envelope) {
        let id = envelope.id;
        if let Some(call_frames) = self.active.get(&id) {
            if call_frames.send(envelope.payload).await.is_err() {
                // The call stopped accepting input early; until its
                // responder retires the id this counts as a violation.
                self.reject(id, "call no longer accepts frames").await;
            }
            return;
        }
        if id == RESERVED_ID {
            self.reject(id, "correlation id 0 is reserved").await;
            return;
        }
        if self.retired.contains(&id) {
            self.reject(id, "stale correlation id").await;
            return;
        }
        match envelope.payload {
            Some(Payload::Error(_)) => {
                self.reject(id, "error frame on an unopened call").await;
            }
            payload => self.open(id, payload).await,
        }
    }

    /// Opens a new call for a fresh correlation id and wires its two pump
    /// tasks up. `first` is the opening payload: a message to deliver
    /// immediately, or `None` when the envelope merely announced the call.
    async fn open(&mut self, id: u32, first: Option<Payload>) {
        debug!(id, "opening call");
        let call_ctx = self.ctx.child();
        let call = self.target.new_call(call_ctx.clone(), self.media);
        let (frame_tx, frame_rx) = mpsc::channel(self.config.frame_buffer.max(1));

        if first.is_some() {
            // Capacity is at least one and the channel is fresh.
            let _ = frame_tx.send(first).await;
        }

        tokio::spawn(pump_inputs(
            id,
            call.sink,
            frame_rx,
            call_ctx.clone(),
            !self.target.method.is_client_streaming(),
            self.config.protocol_timeout,
            self.write_tx.clone(),
            self.fatal_tx.clone(),
        ));
        tokio::spawn(pump_outputs(
            id,
            call.source,
            call_ctx,
            self.write_tx.clone(),
            self.retire_tx.clone(),
        ));

        self.active.insert(id, frame_tx);
    }

    async fn reject(&self, id: u32, reason: &str) {
        warn!(id, reason, "protocol violation on inbound frame");
        let status = Status::failed_precondition(format!("protocol error: {reason}"));
        let _ = self
            .write_tx
            .send(Envelope {
                id,
                payload: Some(Payload::Error(status.to_wire())),
            })
            .await;
    }
}

/// Feeds inbound frames into one call's sink.
///
/// For shapes that do not stream their input, the mandatory input frame must
/// arrive within `timeout` of the call opening; missing it is fatal for the
/// whole connection, reported on the offending id first.
#[allow(clippy::too_many_arguments)]
async fn pump_inputs(
    id: u32,
    mut sink: Box<dyn CallSink>,
    mut frames: mpsc::Receiver<Option<Payload>>,
    ctx: Context,
    awaits_input: bool,
    timeout: Duration,
    write_tx: mpsc::Sender<Envelope>,
    fatal_tx: mpsc::Sender<ProtocolError>,
) {
    let mut awaiting_first = awaits_input;
    loop {
        let next = if awaiting_first {
            match tokio::time::timeout(timeout, frames.recv()).await {
                Ok(next) => next,
                Err(_) => {
                    let status = Status::failed_precondition(format!(
                        "protocol error: call {id} never delivered its input frame",
                    ));
                    let _ = write_tx
                        .send(Envelope {
                            id,
                            payload: Some(Payload::Error(status.to_wire())),
                        })
                        .await;
                    let _ = fatal_tx.send(ProtocolError::InputTimeout(id)).await;
                    return;
                }
            }
        } else {
            tokio::select! {
                biased;
                _ = ctx.cancelled() => return,
                next = frames.recv() => next,
            }
        };

        match next {
            // The connection dropped us; nothing more to feed.
            None => return,
            Some(Some(Payload::Message(bytes))) => {
                awaiting_first = false;
                if let Err(status) = sink.send(Bytes::from(bytes)).await {
                    debug!(id, %status, "input rejected, aborting call");
                    let _ = write_tx
                        .send(Envelope {
                            id,
                            payload: Some(Payload::Error(status.to_wire())),
                        })
                        .await;
                    ctx.cancel();
                    return;
                }
            }
            Some(None) => {
                awaiting_first = false;
                sink.done();
            }
            Some(Some(Payload::Error(error))) => {
                debug!(id, code = error.code, "peer aborted the call");
                ctx.cancel();
                return;
            }
        }
    }
}

/// Drains one call's output into the shared writer and reports its terminal
/// result: an empty-payload envelope on success, an error envelope on
/// failure. Retires the id afterwards.
async fn pump_outputs(
    id: u32,
    mut source: Box<dyn CallSource>,
    ctx: Context,
    write_tx: mpsc::Sender<Envelope>,
    retire_tx: mpsc::Sender<u32>,
) {
    loop {
        match source.recv().await {
            Ok(Some(bytes)) => {
                let envelope = Envelope {
                    id,
                    payload: Some(Payload::Message(bytes.to_vec())),
                };
                if write_tx.send(envelope).await.is_err() {
                    break;
                }
            }
            Ok(None) => {
                match source.wait().await {
                    Ok(()) => {
                        let _ = write_tx.send(Envelope { id, payload: None }).await;
                    }
                    Err(status) => {
                        // When the call was aborted locally the error frame
                        // was already written by whoever aborted it.
                        if !ctx.is_cancelled() {
                            let _ = write_tx
                                .send(Envelope {
                                    id,
                                    payload: Some(Payload::Error(status.to_wire())),
                                })
                                .await;
                        }
                    }
                }
                break;
            }
            Err(status) => {
                if !ctx.is_cancelled() {
                    let _ = write_tx
                        .send(Envelope {
                            id,
                            payload: Some(Payload::Error(status.to_wire())),
                        })
                        .await;
                }
                break;
            }
        }
    }
    let _ = retire_tx.send(id).await;
}
