//! Transfer lifecycle states.
//!
//! Both engines move through a small subset of these states.  Keeping them in
//! their own module lets the engines, their reports and their logs share one
//! vocabulary.
//!
//! ```text
//!  sender:    CLOSED ──first segment──▶ TRANSFERRING ──FIN sent──▶ FIN_SENT
//!                                              │                      │
//!                                              ▼                      ▼
//!                                            FAILED ◀──idle/retries── │ ──FIN acked──▶ CLOSED
//!
//!  receiver:  CLOSED ──first segment──▶ TRANSFERRING ──FIN delivered──▶ TIME_WAIT ──linger──▶ CLOSED
//! ```

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferState {
    /// No transfer in progress; initial and final state.
    #[default]
    Closed,
    /// Data segments are flowing.
    Transferring,
    /// Sender only: the FIN segment is in flight, no more data will be read.
    FinSent,
    /// Receiver only: the FIN was delivered; duplicates are still re-acknowledged.
    TimeWait,
    /// The transfer gave up or was cancelled.
    Failed,
}

impl std::fmt::Display for TransferState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransferState::Closed => "CLOSED",
            TransferState::Transferring => "TRANSFERRING",
            TransferState::FinSent => "FIN_SENT",
            TransferState::TimeWait => "TIME_WAIT",
            TransferState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}
