//! In-memory network simulator.
//!
//! Real networks drop, reorder, and duplicate datagrams.  To exercise the
//! reliability mechanisms without depending on actual network conditions,
//! [`pair`] builds two connected [`SimTransport`] endpoints that implement
//! [`Transport`] over in-process channels and apply a configurable fault
//! model to every datagram, independently per direction:
//!
//! | Fault            | Description                                        |
//! |------------------|----------------------------------------------------|
//! | Packet loss      | Drop a datagram with probability `loss_rate`.      |
//! | Scheduled loss   | Drop the datagrams whose send index is listed.     |
//! | Reordering       | Delay a datagram by `reorder_delay`, letting later |
//! |                  | ones overtake it.                                  |
//! | Duplication      | Deliver a datagram twice.                          |
//!
//! Decisions come from a seeded RNG so a failing run can be replayed.
//! A vanished peer looks like silence, never like an error, as with UDP.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;

use crate::socket::{Recv, Transport, TransportError};

/// Fault model for one direction.  Probabilities are in `[0.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub loss_rate: f64,
    pub duplicate_rate: f64,
    pub reorder_rate: f64,
    pub reorder_delay: Duration,
    /// Zero-based indices of datagrams to drop unconditionally.
    pub drop_datagrams: Vec<usize>,
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults by default; the simulator is a transparent pass-through.
        Self {
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            reorder_rate: 0.0,
            reorder_delay: Duration::ZERO,
            drop_datagrams: Vec::new(),
            seed: 0,
        }
    }
}

impl SimulatorConfig {
    pub fn lossy(loss_rate: f64, seed: u64) -> Self {
        Self {
            loss_rate,
            seed,
            ..Self::default()
        }
    }

    /// Drop exactly the listed datagrams and nothing else.
    pub fn dropping(indices: impl IntoIterator<Item = usize>) -> Self {
        Self {
            drop_datagrams: indices.into_iter().collect(),
            ..Self::default()
        }
    }
}

/// Counters for one direction, shared with the test that built the pair.
#[derive(Debug, Default)]
pub struct SimStats {
    sent: AtomicUsize,
    dropped: AtomicUsize,
    duplicated: AtomicUsize,
    reordered: AtomicUsize,
}

impl SimStats {
    /// Datagrams handed to `send_to`, including dropped ones.
    pub fn sent(&self) -> usize {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn duplicated(&self) -> usize {
        self.duplicated.load(Ordering::Relaxed)
    }

    pub fn reordered(&self) -> usize {
        self.reordered.load(Ordering::Relaxed)
    }
}

type Datagram = (Vec<u8>, SocketAddr);

enum Fate {
    Drop,
    Deliver { copies: usize, delay: Option<Duration> },
}

struct Faults {
    config: SimulatorConfig,
    scheduled: HashSet<usize>,
    rng: StdRng,
    index: usize,
}

impl Faults {
    fn new(config: SimulatorConfig) -> Self {
        Self {
            scheduled: config.drop_datagrams.iter().copied().collect(),
            rng: StdRng::seed_from_u64(config.seed),
            index: 0,
            config,
        }
    }

    fn roll(&mut self, p: f64) -> bool {
        p > 0.0 && self.rng.gen_bool(p.min(1.0))
    }

    fn decide(&mut self) -> Fate {
        let index = self.index;
        self.index += 1;
        if self.scheduled.contains(&index) || self.roll(self.config.loss_rate) {
            return Fate::Drop;
        }
        let copies = if self.roll(self.config.duplicate_rate) { 2 } else { 1 };
        let delay = self
            .roll(self.config.reorder_rate)
            .then_some(self.config.reorder_delay);
        Fate::Deliver { copies, delay }
    }
}

/// One endpoint of a simulated link.
pub struct SimTransport {
    local: SocketAddr,
    peer: SocketAddr,
    tx: mpsc::UnboundedSender<Datagram>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Datagram>>,
    faults: Mutex<Faults>,
    stats: Arc<SimStats>,
}

/// Build two endpoints at `a` and `b`.  `a_to_b` applies to datagrams sent
/// by the first endpoint, `b_to_a` to those sent by the second.
pub fn pair(
    a: SocketAddr,
    b: SocketAddr,
    a_to_b: SimulatorConfig,
    b_to_a: SimulatorConfig,
) -> (SimTransport, SimTransport) {
    let (tx_ab, rx_ab) = mpsc::unbounded_channel();
    let (tx_ba, rx_ba) = mpsc::unbounded_channel();
    let left = SimTransport {
        local: a,
        peer: b,
        tx: tx_ab,
        rx: tokio::sync::Mutex::new(rx_ba),
        faults: Mutex::new(Faults::new(a_to_b)),
        stats: Arc::default(),
    };
    let right = SimTransport {
        local: b,
        peer: a,
        tx: tx_ba,
        rx: tokio::sync::Mutex::new(rx_ab),
        faults: Mutex::new(Faults::new(b_to_a)),
        stats: Arc::default(),
    };
    (left, right)
}

impl SimTransport {
    /// Counters for datagrams sent by this endpoint.
    pub fn stats(&self) -> Arc<SimStats> {
        Arc::clone(&self.stats)
    }

    fn fate(&self) -> Fate {
        match self.faults.lock() {
            Ok(mut faults) => faults.decide(),
            Err(poisoned) => poisoned.into_inner().decide(),
        }
    }
}

impl Transport for SimTransport {
    fn local_addr(&self) -> SocketAddr {
        self.local
    }

    async fn send_to(&self, bytes: &[u8], dest: SocketAddr) -> Result<(), TransportError> {
        self.stats.sent.fetch_add(1, Ordering::Relaxed);
        if dest != self.peer {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        let (copies, delay) = match self.fate() {
            Fate::Drop => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                return Ok(());
            }
            Fate::Deliver { copies, delay } => (copies, delay),
        };
        if copies > 1 {
            self.stats.duplicated.fetch_add(1, Ordering::Relaxed);
        }

        for _ in 0..copies {
            let datagram = (bytes.to_vec(), self.local);
            match delay {
                Some(delay) => {
                    self.stats.reordered.fetch_add(1, Ordering::Relaxed);
                    let tx = self.tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = tx.send(datagram);
                    });
                }
                // A closed peer swallows the datagram, like UDP.
                None => {
                    let _ = self.tx.send(datagram);
                }
            }
        }
        Ok(())
    }

    async fn recv_from(
        &self,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<Recv, TransportError> {
        let mut rx = self.rx.lock().await;
        let received = match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx.recv()).await {
                Ok(received) => received,
                Err(_elapsed) => return Ok(Recv::Timeout),
            },
            None => rx.recv().await,
        };
        let Some((bytes, from)) = received else {
            // Peer endpoint dropped: nothing will ever arrive.
            drop(rx);
            return match timeout {
                Some(limit) => {
                    tokio::time::sleep(limit).await;
                    Ok(Recv::Timeout)
                }
                None => std::future::pending().await,
            };
        };
        let len = bytes.len().min(buf.len());
        buf[..len].copy_from_slice(&bytes[..len]);
        Ok(Recv::Datagram { len, from })
    }
}
