//! Turns an append-only framed byte stream into ordered [`StreamSignal`]s.
//!
//! The decoder runs as its own task and feeds a bounded channel. Text deltas
//! are coalesced and flushed once per tick; every other signal flushes the
//! buffered text first so ordering across signal kinds never changes.

mod coalesce;
mod frame;

use std::fmt::Display;
use std::pin::Pin;
use std::task::Context;
use std::task::Poll;
use std::time::Duration;

use bytes::Bytes;
use eventsource_stream::Eventsource;
use futures::Stream;
use futures::StreamExt;
use livepatch_protocol::StreamSignal;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tokio::time::interval_at;
use tokio::time::timeout;
use tokio_stream::wrappers::IntervalStream;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;
use tracing::warn;

pub use coalesce::TextCoalescer;
pub use frame::FrameDecoder;
pub use frame::MalformedFrame;

use crate::config::PipelineConfig;
use crate::error::LivepatchErr;

/// Receiving half of a spawned decoder.
pub struct SignalStream {
    rx_signal: mpsc::Receiver<StreamSignal>,
}

impl SignalStream {
    pub fn new(rx_signal: mpsc::Receiver<StreamSignal>) -> Self {
        Self { rx_signal }
    }
}

impl Stream for SignalStream {
    type Item = StreamSignal;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx_signal.poll_recv(cx)
    }
}

/// Tick source for production use: one tick per `period`, the first one a
/// full period from now.
pub fn frame_ticks(period: Duration) -> impl Stream<Item = ()> + Unpin + Send + 'static {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    IntervalStream::new(interval).map(|_| ())
}

/// Spawn a decoder over `stream` and return the signals it produces.
pub fn spawn_decoder<S, E>(
    stream: S,
    config: &PipelineConfig,
    cancel: CancellationToken,
) -> SignalStream
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Unpin + Send + 'static,
    E: Display + Send + 'static,
{
    let (tx_signal, rx_signal) = mpsc::channel(config.signal_channel_capacity);
    tokio::spawn(process_stream(
        stream,
        frame_ticks(config.frame_interval),
        tx_signal,
        config.stream_idle_timeout,
        cancel,
    ));
    SignalStream::new(rx_signal)
}

/// Decode a recorded transcript (or any other byte source).
pub fn decode_reader<R>(reader: R, config: &PipelineConfig, cancel: CancellationToken) -> SignalStream
where
    R: AsyncRead + Unpin + Send + 'static,
{
    spawn_decoder(ReaderStream::new(reader), config, cancel)
}

/// Drive the decoder until the stream ends, fails, reports `done`, or
/// `cancel` fires. Cancellation discards unflushed text and never emits
/// [`StreamSignal::Done`].
pub async fn process_stream<S, E, T>(
    stream: S,
    mut ticks: T,
    tx_signal: mpsc::Sender<StreamSignal>,
    idle_timeout: Duration,
    cancel: CancellationToken,
) where
    S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
    E: Display,
    T: Stream<Item = ()> + Unpin,
{
    let mut events = stream.eventsource();
    let mut decoder = FrameDecoder::default();
    let mut coalescer = TextCoalescer::default();

    loop {
        let next_event = tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                let dropped = coalescer.discard();
                debug!(dropped, "stream cancelled");
                return;
            }
            Some(()) = ticks.next(), if coalescer.has_pending() => {
                if !flush(&mut coalescer, &tx_signal, &cancel).await {
                    return;
                }
                continue;
            }
            next = timeout(idle_timeout, events.next()) => next,
        };

        let frame = match next_event {
            Ok(Some(Ok(frame))) => frame,
            Ok(Some(Err(e))) => {
                debug!("stream error: {e}");
                fail(
                    &mut coalescer,
                    &tx_signal,
                    &cancel,
                    LivepatchErr::Transport(e.to_string()),
                )
                .await;
                return;
            }
            Ok(None) => {
                if flush(&mut coalescer, &tx_signal, &cancel).await {
                    send(&tx_signal, &cancel, StreamSignal::Done).await;
                }
                return;
            }
            Err(_) => {
                fail(&mut coalescer, &tx_signal, &cancel, LivepatchErr::IdleTimeout).await;
                return;
            }
        };

        trace!(event = %frame.event, data = %frame.data, "stream frame");

        let signals = match decoder.decode(&frame.event, &frame.data) {
            Ok(signals) => signals,
            Err(err) => {
                warn!("{err}");
                continue;
            }
        };
        for signal in signals {
            if !forward(signal, &mut coalescer, &tx_signal, &cancel).await {
                return;
            }
        }
        if decoder.is_finished() {
            return;
        }
    }
}

/// Buffer deltas; flush before anything else. False once the receiver is
/// gone or `cancel` fires.
async fn forward(
    signal: StreamSignal,
    coalescer: &mut TextCoalescer,
    tx_signal: &mpsc::Sender<StreamSignal>,
    cancel: &CancellationToken,
) -> bool {
    if let StreamSignal::TextDelta { chunk } = &signal {
        coalescer.push(chunk);
        return true;
    }
    flush(coalescer, tx_signal, cancel).await && send(tx_signal, cancel, signal).await
}

async fn flush(
    coalescer: &mut TextCoalescer,
    tx_signal: &mpsc::Sender<StreamSignal>,
    cancel: &CancellationToken,
) -> bool {
    match coalescer.take() {
        Some(chunk) => send(tx_signal, cancel, StreamSignal::TextDelta { chunk }).await,
        None => true,
    }
}

async fn fail(
    coalescer: &mut TextCoalescer,
    tx_signal: &mpsc::Sender<StreamSignal>,
    cancel: &CancellationToken,
    err: LivepatchErr,
) {
    if flush(coalescer, tx_signal, cancel).await {
        let message = err.to_string();
        send(tx_signal, cancel, StreamSignal::ErrorOccurred { message }).await;
    }
}

/// A send blocked on a full channel still observes cancellation.
async fn send(
    tx_signal: &mpsc::Sender<StreamSignal>,
    cancel: &CancellationToken,
    signal: StreamSignal,
) -> bool {
    tokio::select! {
        biased;

        _ = cancel.cancelled() => {
            debug!("stream cancelled while delivering a signal");
            false
        }
        sent = tx_signal.send(signal) => sent.is_ok(),
    }
}
