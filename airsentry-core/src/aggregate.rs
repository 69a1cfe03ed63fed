//! Per-cycle result aggregate
//!
//! One write-once slot per modality. Each slot has exactly one writer, a
//! [`SlotWriter`] that is consumed by its single write, and is only readable
//! through a [`ReleasedReadings`] view built from the signal set the barrier
//! observed at release. A slot whose signal was not observed cannot be read.

use std::sync::{Arc, OnceLock};

use log::{debug, error};

use crate::barrier::{CompletionBarrier, SignalSet};
use crate::errors::AcquisitionError;
use crate::reading::{Modality, Reading};

/// What a worker leaves in its slot
pub type SlotResult = Result<Reading, AcquisitionError>;

/// One write-once slot per modality
#[derive(Debug, Default)]
pub struct ResultAggregate {
    slots: [OnceLock<SlotResult>; 5],
}

impl ResultAggregate {
    /// Aggregate with every slot empty
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the slot of `modality` has been written
    pub fn is_filled(&self, modality: Modality) -> bool {
        self.slots[modality.index()].get().is_some()
    }

    /// Build the read view for the signals the barrier released on
    ///
    /// Slots whose signal is absent from `released` stay hidden even if a
    /// worker has written them since.
    pub fn released(&self, released: SignalSet<Modality>) -> ReleasedReadings {
        let mut slots: [Option<SlotResult>; 5] = Default::default();
        for modality in released.iter() {
            slots[modality.index()] = self.slots[modality.index()].get().cloned();
        }
        ReleasedReadings { slots }
    }

    /// One writer per modality, each bound to `barrier`
    pub fn writers(
        aggregate: &Arc<Self>,
        barrier: &Arc<CompletionBarrier<Modality>>,
    ) -> [SlotWriter; 5] {
        Modality::ALL.map(|modality| SlotWriter {
            modality,
            aggregate: Arc::clone(aggregate),
            barrier: Arc::clone(barrier),
        })
    }

    fn fill(&self, modality: Modality, outcome: SlotResult) -> bool {
        self.slots[modality.index()].set(outcome).is_ok()
    }
}

/// Exclusive write handle for one slot
///
/// Writing consumes the handle, then raises the modality's signal. The slot
/// write happens before the raise, so a waiter that observes the signal also
/// observes the slot.
#[derive(Debug)]
pub struct SlotWriter {
    modality: Modality,
    aggregate: Arc<ResultAggregate>,
    barrier: Arc<CompletionBarrier<Modality>>,
}

impl SlotWriter {
    /// Modality this writer owns
    pub fn modality(&self) -> Modality {
        self.modality
    }

    /// Store the worker's outcome and raise its completion signal
    pub fn complete(self, outcome: SlotResult) {
        if let Ok(reading) = &outcome {
            debug_assert_eq!(reading.modality(), self.modality, "reading stored in foreign slot");
        }

        if self.aggregate.fill(self.modality, outcome) {
            debug!("{} slot filled", self.modality);
        } else {
            error!("{} slot already filled, keeping first value", self.modality);
        }
        self.barrier.raise(self.modality);
    }
}

/// Read-only view of the slots released by the barrier
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReleasedReadings {
    slots: [Option<SlotResult>; 5],
}

impl ReleasedReadings {
    /// Build a view directly from readings
    pub fn from_readings<I: IntoIterator<Item = Reading>>(readings: I) -> Self {
        let mut view = Self::default();
        for reading in readings {
            view.slots[reading.modality().index()] = Some(Ok(reading));
        }
        view
    }

    /// Outcome stored for `modality`, if released
    pub fn get(&self, modality: Modality) -> Option<&SlotResult> {
        self.slots[modality.index()].as_ref()
    }

    /// Successful reading for `modality`, if released
    pub fn reading(&self, modality: Modality) -> Option<Reading> {
        match self.get(modality) {
            Some(Ok(reading)) => Some(*reading),
            _ => None,
        }
    }

    /// Modalities released with a failure or not released at all
    pub fn unavailable(&self) -> impl Iterator<Item = Modality> + '_ {
        Modality::ALL
            .into_iter()
            .filter(|m| self.reading(*m).is_none())
    }

    /// True when every modality has a reading
    pub fn is_complete(&self) -> bool {
        self.unavailable().next().is_none()
    }
}
