//! Acknowledgment-gated unit transfer.
//!
//! A transfer is a queue of units (placement bytes, headers, packets). The
//! host writes one unit, then must see an `0xAA` before the next one leaves:
//!
//! ```text
//!  Ready ──Send(unit)──► AwaitingAck ──acknowledge()──► Ready ── … ──► Done
//! ```
//!
//! An empty unit is a pure gate: the device acknowledges without the host
//! sending anything first. The machine never holds more than one
//! unacknowledged unit, and callers may stop between any two steps.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::error::TileError;

/// What the driver must do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStep {
    /// Write this unit to the device.
    Send(Bytes),
    /// Block until the device acknowledges.
    AwaitAck,
    /// Every unit has been acknowledged.
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Ready,
    AwaitingAck,
}

#[derive(Debug)]
pub struct AckedTransfer {
    pending: VecDeque<Bytes>,
    phase: Phase,
    total: usize,
    acknowledged: usize,
}

impl AckedTransfer {
    pub fn new(units: impl IntoIterator<Item = Bytes>) -> Self {
        let pending: VecDeque<Bytes> = units.into_iter().collect();
        Self {
            total: pending.len(),
            pending,
            phase: Phase::Ready,
            acknowledged: 0,
        }
    }

    /// Advance the machine.
    pub fn next_step(&mut self) -> TransferStep {
        match self.phase {
            Phase::AwaitingAck => TransferStep::AwaitAck,
            Phase::Ready => match self.pending.pop_front() {
                None => TransferStep::Done,
                Some(unit) => {
                    self.phase = Phase::AwaitingAck;
                    if unit.is_empty() {
                        TransferStep::AwaitAck
                    } else {
                        TransferStep::Send(unit)
                    }
                }
            },
        }
    }

    /// Record the device's acknowledgment of the unit in flight.
    pub fn acknowledge(&mut self) -> Result<(), TileError> {
        if self.phase != Phase::AwaitingAck {
            return Err(TileError::Protocol(
                "acknowledgment received with no unit in flight".into(),
            ));
        }
        self.phase = Phase::Ready;
        self.acknowledged += 1;
        Ok(())
    }

    /// Units written but not yet acknowledged (0 or 1).
    pub fn in_flight(&self) -> usize {
        usize::from(self.phase == Phase::AwaitingAck)
    }

    pub fn acknowledged(&self) -> usize {
        self.acknowledged
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Ready && self.pending.is_empty()
    }
}
