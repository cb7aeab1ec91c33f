//! Batch aggregator - accumulates readings into bounded batches.
//!
//! Dual flush trigger: a batch closes when it reaches `max_batch_size`
//! readings or when the open batch is `max_batch_age` old, whichever fires
//! first. Closing hands the batch out by value and immediately opens a new
//! empty one with the next sequence number, so no reading is lost at the
//! boundary. The aggregator is owned by the single controller loop; `offer`
//! and `try_flush` therefore never interleave.

use std::time::{Duration, Instant};
use tracing::debug;

use crate::types::{Batch, SensorReading};

pub struct BatchAggregator {
    buffer: Vec<SensorReading>,
    /// When the current batch received its first reading. Reset on every
    /// close so an idle aggregator never accumulates stale age.
    opened_at: Instant,
    /// Sequence number the *current open* batch will carry when it closes
    next_sequence_no: u64,
    max_batch_size: usize,
    max_batch_age: Duration,
    readings_accepted: u64,
    batches_closed: u64,
}

impl BatchAggregator {
    pub fn new(max_batch_size: usize, max_batch_age: Duration) -> Self {
        Self {
            buffer: Vec::with_capacity(max_batch_size),
            opened_at: Instant::now(),
            next_sequence_no: 1,
            max_batch_size,
            max_batch_age,
            readings_accepted: 0,
            batches_closed: 0,
        }
    }

    /// Append a reading to the current open batch.
    pub fn offer(&mut self, reading: SensorReading) {
        if self.buffer.is_empty() {
            // Age is measured from the first reading, not from the previous
            // flush - an idle gap must not trigger an instant age flush.
            self.opened_at = Instant::now();
        }
        self.buffer.push(reading);
        self.readings_accepted += 1;
    }

    /// Close and return the current batch if a flush trigger has fired.
    ///
    /// Flushing an empty batch is a no-op: returns `None` and does not
    /// advance the sequence number.
    pub fn try_flush(&mut self, now: Instant) -> Option<Batch> {
        if self.buffer.is_empty() {
            return None;
        }

        let size_trigger = self.buffer.len() >= self.max_batch_size;
        let age_trigger = now.saturating_duration_since(self.opened_at) >= self.max_batch_age;

        if size_trigger || age_trigger {
            let batch = self.close(if size_trigger { "size" } else { "age" });
            Some(batch)
        } else {
            None
        }
    }

    /// Force-close the in-progress batch regardless of trigger state.
    ///
    /// Used on shutdown (drain semantics). Empty batches are still a no-op.
    pub fn force_flush(&mut self) -> Option<Batch> {
        if self.buffer.is_empty() {
            return None;
        }
        Some(self.close("drain"))
    }

    fn close(&mut self, trigger: &str) -> Batch {
        let sequence_no = self.next_sequence_no;
        self.next_sequence_no += 1;
        self.batches_closed += 1;

        let readings = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.max_batch_size));
        let opened_at = self.opened_at;
        self.opened_at = Instant::now();

        debug!(
            sequence_no,
            readings = readings.len(),
            trigger,
            "Batch closed"
        );

        Batch {
            readings,
            opened_at,
            sequence_no,
        }
    }

    /// Readings currently buffered in the open batch.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Total readings ever accepted (invariant: equals readings in closed
    /// batches plus `pending()`).
    pub fn readings_accepted(&self) -> u64 {
        self.readings_accepted
    }

    pub fn batches_closed(&self) -> u64 {
        self.batches_closed
    }
}
