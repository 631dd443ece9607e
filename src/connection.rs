//! Transfer engines.
//!
//! [`SendConnection`] and [`RecvConnection`] own one [`Transport`] each and
//! drive a single file transfer from start to finish.  The window
//! bookkeeping lives in [`crate::sender`] and [`crate::receiver`]; this
//! module only adds the I/O around it.
//!
//! # Sender loop
//!
//! ```text
//!  fill window ──▶ timed recv (poll interval) ──▶ ACK? ──▶ slide + refill
//!       ▲                                                      │
//!       └──── idle check ◀──── retransmit expired slots ◀──────┘
//! ```
//!
//! The sender finishes once every segment up to and including the FIN is
//! acknowledged.  It gives up when a segment exhausts its retry budget or
//! when no forward progress happens for `max_idle_wait`; in both cases an
//! already-acknowledged FIN means the receiver has everything and the
//! transfer counts as a success.
//!
//! # Receiver loop
//!
//! ```text
//!  blocking recv ──▶ in window? ──▶ buffer ──▶ base arrived? ──▶ write run + ACK each
//!                       │
//!                       └── below window ──▶ re-ACK duplicate
//! ```
//!
//! After the FIN is delivered the receiver flushes the output and lingers in
//! `TIME_WAIT`, re-acknowledging duplicates so a lost final ACK can be
//! repaired.
//!
//! Both loops race every blocking receive against a [`Shutdown`] signal.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::time::Instant;

use crate::config::TransferConfig;
use crate::packet::{Segment, SegmentError, DATAGRAM_CAPACITY};
use crate::receiver::{Accepted, RecvWindow};
use crate::sender::{AckOutcome, Retransmit, SendWindow};
use crate::seq;
use crate::socket::{Recv, Transport, TransportError};
use crate::state::TransferState;
use crate::timer::{IdleTimer, RetransmitPolicy};
use crate::window::WindowError;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a sender gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// No forward progress for this long.
    IdleTimeout { idle: Duration },
    /// Segment `seq` was transmitted `attempts` times without acknowledgment.
    RetriesExhausted { seq: u32, attempts: u32 },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::IdleTimeout { idle } => {
                write!(f, "no acknowledgment progress for {idle:?}")
            }
            FailureReason::RetriesExhausted { seq, attempts } => {
                write!(f, "segment {seq} unacknowledged after {attempts} transmissions")
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Reading the input or writing the output failed.
    #[error("local stream error: {0}")]
    Io(#[from] io::Error),
    #[error("transfer failed: {0}")]
    TransferFailed(FailureReason),
    #[error("transfer cancelled")]
    Cancelled,
    #[error("could not encode segment: {0}")]
    Encode(#[from] SegmentError),
    #[error(transparent)]
    Window(#[from] WindowError),
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Receiving half of a cancellation signal.  Cheap to clone.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: Option<watch::Receiver<bool>>,
}

/// Sending half of a cancellation signal.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

/// Create a connected trigger/shutdown pair.
pub fn shutdown_channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx: Some(rx) })
}

impl Shutdown {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self { rx: None }
    }

    pub fn is_triggered(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once the trigger fires.  Pends forever if the trigger is
    /// dropped without firing.
    pub async fn cancelled(&mut self) {
        if let Some(rx) = self.rx.as_mut() {
            if rx.wait_for(|&fired| fired).await.is_ok() {
                return;
            }
        }
        std::future::pending::<()>().await
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::never()
    }
}

impl ShutdownTrigger {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Counters from a completed send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendReport {
    pub bytes_sent: u64,
    /// Distinct data segments, FIN included.
    pub segments: u64,
    /// Data datagrams put on the wire, retransmissions included.
    pub segments_sent: u64,
    pub retransmissions: u64,
    /// Acknowledgments that resolved an outstanding segment.
    pub acks_received: u64,
    /// Acknowledgments outside the window or already seen.
    pub stale_acks: u64,
    pub malformed: u64,
}

/// Counters from a completed receive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReceiveReport {
    pub bytes_written: u64,
    pub segments_delivered: u64,
    pub duplicates_acked: u64,
    pub dropped_out_of_window: u64,
    pub malformed: u64,
    /// Address the receiver locked onto.
    pub peer: Option<SocketAddr>,
}

async fn transmit<T: Transport>(
    transport: &T,
    segment: &Segment,
    dest: SocketAddr,
) -> Result<(), TransferError> {
    let bytes = segment.encode()?;
    transport.send_to(&bytes, dest).await?;
    Ok(())
}

/// Read until `chunk` is full or the reader hits end of input.
async fn read_chunk<R: AsyncRead + Unpin>(reader: &mut R, chunk: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < chunk.len() {
        let n = reader.read(&mut chunk[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

// ---------------------------------------------------------------------------
// SendConnection
// ---------------------------------------------------------------------------

/// Sends one byte stream to one receiver.
pub struct SendConnection<T: Transport> {
    transport: T,
    config: TransferConfig,
    shutdown: Shutdown,
    state: TransferState,
}

impl<T: Transport> SendConnection<T> {
    pub fn new(transport: T, config: TransferConfig) -> Self {
        Self {
            transport,
            config,
            shutdown: Shutdown::never(),
            state: TransferState::Closed,
        }
    }

    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    /// Transfer everything `reader` yields to `destination`.
    ///
    /// Returns once the receiver has acknowledged the whole stream.
    pub async fn send<R: AsyncRead + Unpin>(
        &mut self,
        reader: R,
        destination: SocketAddr,
    ) -> Result<SendReport, TransferError> {
        let result = self.run(reader, destination).await;
        self.state = match &result {
            Ok(_) => TransferState::Closed,
            Err(_) => TransferState::Failed,
        };
        log::debug!("[arq:send] state {}", self.state);
        result
    }

    async fn run<R: AsyncRead + Unpin>(
        &mut self,
        mut reader: R,
        destination: SocketAddr,
    ) -> Result<SendReport, TransferError> {
        let policy = RetransmitPolicy::from_config(&self.config);
        let mut window = SendWindow::new(self.config.mode(), self.config.window_capacity(), policy);
        let mut report = SendReport::default();
        let mut chunk = vec![0u8; self.config.payload_size()];
        let mut buf = [0u8; DATAGRAM_CAPACITY];

        log::info!(
            "[arq:send] {} → {destination} mode={} window={} timeout={:?}",
            self.transport.local_addr(),
            self.config.mode(),
            window.capacity(),
            policy.rto,
        );
        self.state = TransferState::Transferring;
        self.fill(&mut window, &mut reader, &mut chunk, destination, &mut report)
            .await?;
        // Time spent waiting on the reader is not the receiver's fault.
        let mut idle = IdleTimer::new(self.config.max_idle_wait(), Instant::now());

        while !window.is_complete() {
            // Wake for the earliest retransmission, at most one poll interval away.
            let wait = window
                .next_deadline()
                .map_or(policy.poll_interval, |deadline| {
                    deadline.saturating_duration_since(Instant::now())
                })
                .min(policy.poll_interval);
            let received = tokio::select! {
                r = self.transport.recv_from(&mut buf, Some(wait)) => r?,
                _ = self.shutdown.cancelled() => {
                    log::info!("[arq:send] cancelled");
                    return Err(TransferError::Cancelled);
                }
            };

            match received {
                Recv::Datagram { len, from } if from == destination => {
                    match Segment::decode(&buf[..len]) {
                        Ok(reply) => match window.on_ack(&reply) {
                            AckOutcome::Slid(n) => {
                                report.acks_received += 1;
                                log::debug!(
                                    "[arq:send] ← ACK seq={} (slid {n}, base={})",
                                    reply.seq,
                                    window.base()
                                );
                                self.fill(&mut window, &mut reader, &mut chunk, destination, &mut report)
                                    .await?;
                                idle.touch(Instant::now());
                            }
                            AckOutcome::Recorded => {
                                report.acks_received += 1;
                                log::debug!("[arq:send] ← ACK seq={} (out of order)", reply.seq);
                            }
                            AckOutcome::Duplicate | AckOutcome::Stale => {
                                report.stale_acks += 1;
                                log::debug!("[arq:send] ← stale ACK seq={}", reply.seq);
                            }
                        },
                        Err(e) => {
                            report.malformed += 1;
                            log::debug!("[arq:send] dropping malformed reply: {e}");
                        }
                    }
                }
                Recv::Datagram { from, .. } => {
                    log::debug!("[arq:send] ignoring datagram from {from}");
                }
                Recv::Timeout => {}
            }

            let now = Instant::now();
            for logical in window.expired(now) {
                match window.retransmit(logical, now) {
                    Retransmit::Send(segment) => {
                        transmit(&self.transport, &segment, destination).await?;
                        report.segments_sent += 1;
                        report.retransmissions += 1;
                        log::debug!("[arq:send] ↻ DATA seq={} (timeout)", segment.seq);
                    }
                    Retransmit::Exhausted { attempts } if window.fin_acked() => {
                        log::warn!(
                            "[arq:send] seq={} gave up after {attempts} tries; FIN already acknowledged",
                            seq::to_wire(logical)
                        );
                        return Ok(report);
                    }
                    Retransmit::Exhausted { attempts } => {
                        return Err(TransferError::TransferFailed(
                            FailureReason::RetriesExhausted {
                                seq: seq::to_wire(logical),
                                attempts,
                            },
                        ));
                    }
                    Retransmit::Missing => {}
                }
            }

            if idle.expired(now) {
                if window.fin_acked() {
                    log::warn!("[arq:send] idle with FIN acknowledged; finishing");
                    break;
                }
                return Err(TransferError::TransferFailed(FailureReason::IdleTimeout {
                    idle: idle.idle_for(now),
                }));
            }
        }

        log::info!(
            "[arq:send] done: {} bytes in {} segments ({} retransmissions)",
            report.bytes_sent,
            report.segments,
            report.retransmissions
        );
        Ok(report)
    }

    /// Read and send new segments while the window has room.
    async fn fill<R: AsyncRead + Unpin>(
        &mut self,
        window: &mut SendWindow,
        reader: &mut R,
        chunk: &mut [u8],
        destination: SocketAddr,
        report: &mut SendReport,
    ) -> Result<(), TransferError> {
        while window.can_send() {
            let n = read_chunk(reader, chunk).await?;
            // A short chunk, possibly empty, is the last one.
            let is_fin = n < chunk.len();
            let segment = window.build_segment(chunk[..n].to_vec(), is_fin);
            transmit(&self.transport, &segment, destination).await?;
            log::debug!(
                "[arq:send] → DATA seq={} len={n}{} in_flight={}",
                segment.seq,
                if is_fin { " FIN" } else { "" },
                window.in_flight() + 1
            );
            window.record_sent(segment, Instant::now())?;

            report.segments += 1;
            report.segments_sent += 1;
            report.bytes_sent += n as u64;
            if is_fin {
                self.state = TransferState::FinSent;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecvConnection
// ---------------------------------------------------------------------------

/// Receives one byte stream from the first sender that shows up.
pub struct RecvConnection<T: Transport> {
    transport: T,
    config: TransferConfig,
    shutdown: Shutdown,
    state: TransferState,
}

impl<T: Transport> RecvConnection<T> {
    pub fn new(transport: T, config: TransferConfig) -> Self {
        Self {
            transport,
            config,
            shutdown: Shutdown::never(),
            state: TransferState::Closed,
        }
    }

    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    /// Write the incoming stream to `writer`, in order, until the FIN has
    /// been delivered and the linger period is over.
    pub async fn receive<W: AsyncWrite + Unpin>(
        &mut self,
        writer: W,
    ) -> Result<ReceiveReport, TransferError> {
        let result = self.run(writer).await;
        self.state = match &result {
            Ok(_) => TransferState::Closed,
            Err(_) => TransferState::Failed,
        };
        log::debug!("[arq:recv] state {}", self.state);
        result
    }

    async fn run<W: AsyncWrite + Unpin>(
        &mut self,
        mut writer: W,
    ) -> Result<ReceiveReport, TransferError> {
        let mut window = RecvWindow::new(self.config.mode(), self.config.window_capacity());
        let mut report = ReceiveReport::default();
        let mut buf = [0u8; DATAGRAM_CAPACITY];

        log::info!(
            "[arq:recv] listening on {} mode={} window={}",
            self.transport.local_addr(),
            self.config.mode(),
            self.config.window_capacity()
        );

        while !window.is_finished() {
            let received = tokio::select! {
                r = self.transport.recv_from(&mut buf, None) => r?,
                _ = self.shutdown.cancelled() => {
                    log::info!("[arq:recv] cancelled");
                    return Err(TransferError::Cancelled);
                }
            };
            let Recv::Datagram { len, from } = received else {
                continue;
            };
            let Some(segment) = self.accept_from(&buf[..len], from, &mut report) else {
                continue;
            };
            self.handle(&mut window, segment, from, &mut writer, &mut report)
                .await?;
        }

        writer.flush().await?;
        writer.shutdown().await?;
        log::info!(
            "[arq:recv] FIN delivered: {} bytes in {} segments",
            report.bytes_written,
            report.segments_delivered
        );

        self.state = TransferState::TimeWait;
        self.linger(&mut window, &mut buf, &mut writer, &mut report)
            .await?;
        Ok(report)
    }

    /// Decode a datagram and apply the peer lock.
    fn accept_from(
        &mut self,
        bytes: &[u8],
        from: SocketAddr,
        report: &mut ReceiveReport,
    ) -> Option<Segment> {
        if report.peer.is_some_and(|peer| peer != from) {
            log::debug!("[arq:recv] ignoring datagram from {from}");
            return None;
        }
        let segment = match Segment::decode(bytes) {
            Ok(segment) => segment,
            Err(e) => {
                report.malformed += 1;
                log::debug!("[arq:recv] dropping malformed datagram from {from}: {e}");
                return None;
            }
        };
        if report.peer.is_none() && !segment.is_ack {
            log::info!("[arq:recv] sender is {from}");
            if segment.mode != self.config.mode() {
                log::debug!(
                    "[arq:recv] peer uses {}, receiving with {}",
                    segment.mode,
                    self.config.mode()
                );
            }
            report.peer = Some(from);
            self.state = TransferState::Transferring;
        }
        Some(segment)
    }

    async fn handle<W: AsyncWrite + Unpin>(
        &self,
        window: &mut RecvWindow,
        segment: Segment,
        from: SocketAddr,
        writer: &mut W,
        report: &mut ReceiveReport,
    ) -> Result<(), TransferError> {
        let seq = segment.seq;
        match window.on_segment(segment) {
            Accepted::Deliver(run) => {
                for delivered in run {
                    writer.write_all(&delivered.payload).await?;
                    report.bytes_written += delivered.payload.len() as u64;
                    report.segments_delivered += 1;
                    let ack = window.ack_for(&delivered);
                    transmit(&self.transport, &ack, from).await?;
                    log::debug!(
                        "[arq:recv] ← DATA seq={} len={}{}; → ACK",
                        delivered.seq,
                        delivered.payload.len(),
                        if delivered.is_fin { " FIN" } else { "" }
                    );
                }
            }
            Accepted::Duplicate(ack) => {
                transmit(&self.transport, &ack, from).await?;
                report.duplicates_acked += 1;
                log::debug!("[arq:recv] ← duplicate seq={seq}; → ACK");
            }
            Accepted::Buffered => {
                log::debug!("[arq:recv] ← DATA seq={seq} buffered (base={})", window.base());
            }
            Accepted::AlreadyBuffered => {}
            Accepted::OutOfWindow => {
                report.dropped_out_of_window += 1;
                log::debug!("[arq:recv] ← DATA seq={seq} outside window");
            }
            Accepted::NotData => {
                log::debug!("[arq:recv] ignoring stray ACK seq={seq}");
            }
        }
        Ok(())
    }

    /// Re-acknowledge duplicates until the linger period is over.
    ///
    /// Cancellation here ends the linger early; the stream is already
    /// complete, so the transfer still succeeds.
    async fn linger<W: AsyncWrite + Unpin>(
        &mut self,
        window: &mut RecvWindow,
        buf: &mut [u8],
        writer: &mut W,
        report: &mut ReceiveReport,
    ) -> Result<(), TransferError> {
        let deadline = Instant::now() + self.config.linger();
        loop {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let received = tokio::select! {
                r = self.transport.recv_from(buf, Some(deadline - now)) => r?,
                _ = self.shutdown.cancelled() => break,
            };
            let Recv::Datagram { len, from } = received else {
                continue;
            };
            if let Some(segment) = self.accept_from(&buf[..len], from, report) {
                self.handle(window, segment, from, writer, report).await?;
            }
        }
        log::debug!("[arq:recv] linger over");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_chunk_fills_across_short_reads() {
        let (mut tx, mut rx) = tokio::io::duplex(3);
        tokio::spawn(async move {
            tx.write_all(b"abcdefg").await.unwrap();
        });
        let mut chunk = [0u8; 5];
        assert_eq!(read_chunk(&mut rx, &mut chunk).await.unwrap(), 5);
        assert_eq!(&chunk, b"abcde");
        assert_eq!(read_chunk(&mut rx, &mut chunk).await.unwrap(), 2);
        assert_eq!(read_chunk(&mut rx, &mut chunk).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn shutdown_fires_after_trigger() {
        let (trigger, mut shutdown) = shutdown_channel();
        assert!(!shutdown.is_triggered());
        trigger.trigger();
        assert!(shutdown.is_triggered());
        tokio::time::timeout(Duration::from_secs(1), shutdown.cancelled())
            .await
            .expect("shutdown did not fire");
    }

    #[tokio::test]
    async fn never_shutdown_stays_pending() {
        let mut shutdown = Shutdown::never();
        let fired = tokio::time::timeout(Duration::from_millis(20), shutdown.cancelled()).await;
        assert!(fired.is_err());
    }

    #[tokio::test]
    async fn dropped_trigger_does_not_cancel() {
        let (trigger, mut shutdown) = shutdown_channel();
        drop(trigger);
        let fired = tokio::time::timeout(Duration::from_millis(20), shutdown.cancelled()).await;
        assert!(fired.is_err());
    }

    #[test]
    fn failure_reasons_render() {
        let e = TransferError::TransferFailed(FailureReason::RetriesExhausted {
            seq: 7,
            attempts: 21,
        });
        assert_eq!(
            e.to_string(),
            "transfer failed: segment 7 unacknowledged after 21 transmissions"
        );
    }
}
