//! Multi-Signal Completion Barrier
//!
//! ## Overview
//!
//! Sensor workers finish in any order. The publisher must not read the
//! result aggregate until every worker it depends on is done, and it must
//! not poll or lock individual slots to find out. The barrier collects one
//! "done" bit per signal and releases a waiter once the required subset is
//! observed set at the same instant.
//!
//! ```text
//! humidity ──raise──┐
//! gas ──────raise──┤
//! light ────raise──┼──→ AtomicU32 bits ──→ wait(ALL, consume) ──→ publisher
//! power ────raise──┤          │
//! co2 ──────raise──┘       Notify
//! ```
//!
//! ## Algorithm
//!
//! ### Raise
//! 1. `fetch_or` the signal bit with AcqRel ordering
//! 2. Wake every registered waiter
//!
//! ### Wait
//! 1. Register interest with the `Notify` *before* looking at the bits
//! 2. Load bits with Acquire ordering and test the required subset
//! 3. If satisfied and consuming, clear exactly the required bits with a
//!    compare-exchange loop so a concurrent raise is never lost
//! 4. Otherwise sleep until the next raise and start over
//!
//! Registering before checking closes the window where a raise lands between
//! the check and the sleep. A signal raised before `wait` is called is simply
//! found in step 2.
//!
//! ## Memory Ordering
//!
//! - **Release** (in `fetch_or`): everything the worker wrote before raising
//!   is visible to whoever observes the bit
//! - **Acquire** (in the load): the waiter sees those writes after release
//!
//! This is the happens-before edge the result aggregate relies on.
//!
//! ## Independent Instances
//!
//! The barrier is generic over its signal type. Worker completion and
//! pipeline completion use separate instances with separate enums, so a
//! signal id of one can never satisfy a waiter of the other.

use core::convert::Infallible;
use core::fmt;
use core::marker::PhantomData;
use core::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::sync::Notify;

use crate::reading::Modality;

/// A named completion event that maps onto one barrier bit
pub trait Signal: Copy + fmt::Debug + Send + Sync + 'static {
    /// Every signal of this type
    const ALL: &'static [Self];

    /// Bit position, unique within the type and below 32
    fn bit(self) -> u8;
}

impl Signal for Modality {
    const ALL: &'static [Self] = &Modality::ALL;

    fn bit(self) -> u8 {
        self.index() as u8
    }
}

/// Completion of the connect-and-publish pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleSignal {
    /// Publisher finished, whatever the outcome
    PublishDone,
}

impl Signal for CycleSignal {
    const ALL: &'static [Self] = &[CycleSignal::PublishDone];

    fn bit(self) -> u8 {
        0
    }
}

/// A set of signals of one type
pub struct SignalSet<S> {
    bits: u32,
    _signal: PhantomData<fn() -> S>,
}

impl<S> Clone for SignalSet<S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S> Copy for SignalSet<S> {}

impl<S> PartialEq for SignalSet<S> {
    fn eq(&self, other: &Self) -> bool {
        self.bits == other.bits
    }
}

impl<S> Eq for SignalSet<S> {}

impl<S: Signal> fmt::Debug for SignalSet<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<S: Signal> SignalSet<S> {
    /// Set with no signals
    pub const fn empty() -> Self {
        Self::from_bits(0)
    }

    const fn from_bits(bits: u32) -> Self {
        Self {
            bits,
            _signal: PhantomData,
        }
    }

    /// Set holding every signal of the type
    pub fn all() -> Self {
        S::ALL.iter().copied().collect()
    }

    /// Set holding a single signal
    pub fn of(signal: S) -> Self {
        Self::from_bits(1 << signal.bit())
    }

    /// Add a signal
    pub fn with(self, signal: S) -> Self {
        Self::from_bits(self.bits | 1 << signal.bit())
    }

    /// Raw bit pattern
    pub const fn bits(&self) -> u32 {
        self.bits
    }

    /// True when no signal is present
    pub const fn is_empty(&self) -> bool {
        self.bits == 0
    }

    /// True when `signal` is present
    pub fn contains(&self, signal: S) -> bool {
        self.bits & (1 << signal.bit()) != 0
    }

    /// True when every signal of `other` is present
    pub const fn contains_all(&self, other: Self) -> bool {
        self.bits & other.bits == other.bits
    }

    /// True when at least one signal of `other` is present
    pub const fn intersects(&self, other: Self) -> bool {
        self.bits & other.bits != 0
    }

    /// Signals of `self` missing from `other`
    pub const fn difference(&self, other: Self) -> Self {
        Self::from_bits(self.bits & !other.bits)
    }

    /// Signals present, in declaration order
    pub fn iter(&self) -> impl Iterator<Item = S> + '_ {
        S::ALL.iter().copied().filter(|s| self.contains(*s))
    }
}

impl<S: Signal> FromIterator<S> for SignalSet<S> {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), Self::with)
    }
}

/// How the required set is matched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    /// Release when every required signal is set
    All,
    /// Release when any required signal is set
    Any,
}

impl WaitMode {
    fn satisfied<S: Signal>(self, observed: SignalSet<S>, required: SignalSet<S>) -> bool {
        if required.is_empty() {
            return true;
        }
        match self {
            WaitMode::All => observed.contains_all(required),
            WaitMode::Any => observed.intersects(required),
        }
    }
}

/// Concurrency-safe aggregator of completion signals
///
/// Share it behind an `Arc`; raising and waiting only need `&self`.
///
/// ```rust
/// # tokio_test_block_on(async {
/// use std::sync::Arc;
/// use airsentry_core::barrier::{CompletionBarrier, SignalSet, WaitMode};
/// use airsentry_core::Modality;
///
/// let barrier = Arc::new(CompletionBarrier::<Modality>::new());
/// barrier.raise(Modality::Gas);
/// barrier.raise(Modality::Light);
///
/// let required = SignalSet::of(Modality::Gas).with(Modality::Light);
/// let seen = barrier.wait(required, WaitMode::All, true).await;
/// assert!(seen.contains_all(required));
/// assert!(barrier.raised().is_empty());
/// # });
/// # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
pub struct CompletionBarrier<S> {
    bits: AtomicU32,
    notify: Notify,
    _signal: PhantomData<fn() -> S>,
}

impl<S: Signal> Default for CompletionBarrier<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Signal> fmt::Debug for CompletionBarrier<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionBarrier")
            .field("raised", &self.raised())
            .finish()
    }
}

impl<S: Signal> CompletionBarrier<S> {
    /// Barrier with no signal raised
    pub fn new() -> Self {
        Self {
            bits: AtomicU32::new(0),
            notify: Notify::new(),
            _signal: PhantomData,
        }
    }

    /// Raise `signal` and wake waiters
    ///
    /// Returns `false` when the signal was already raised; the call is then
    /// a no-op apart from the wake-up.
    pub fn raise(&self, signal: S) -> bool {
        let bit = 1 << signal.bit();
        let previous = self.bits.fetch_or(bit, Ordering::AcqRel);
        self.notify.notify_waiters();
        previous & bit == 0
    }

    /// Signals currently raised
    pub fn raised(&self) -> SignalSet<S> {
        SignalSet::from_bits(self.bits.load(Ordering::Acquire))
    }

    /// Lower `signals` without waiting
    pub fn clear(&self, signals: SignalSet<S>) {
        self.bits.fetch_and(!signals.bits(), Ordering::AcqRel);
    }

    /// Non-blocking wait for polling callers
    ///
    /// Returns the raised set observed at release, or `WouldBlock`.
    pub fn try_wait(
        &self,
        required: SignalSet<S>,
        mode: WaitMode,
        consume: bool,
    ) -> nb::Result<SignalSet<S>, Infallible> {
        self.try_acquire(required, mode, consume)
            .ok_or(nb::Error::WouldBlock)
    }

    /// Wait until `required` is satisfied under `mode`
    ///
    /// With `consume`, exactly the required bits are cleared as part of the
    /// release. Returns the raised set observed at release.
    pub async fn wait(&self, required: SignalSet<S>, mode: WaitMode, consume: bool) -> SignalSet<S> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(observed) = self.try_acquire(required, mode, consume) {
                return observed;
            }

            notified.await;
        }
    }

    /// `wait` bounded by `timeout`; `None` when it elapsed first
    pub async fn wait_timeout(
        &self,
        required: SignalSet<S>,
        mode: WaitMode,
        consume: bool,
        timeout: Duration,
    ) -> Option<SignalSet<S>> {
        tokio::time::timeout(timeout, self.wait(required, mode, consume))
            .await
            .ok()
    }

    fn try_acquire(&self, required: SignalSet<S>, mode: WaitMode, consume: bool) -> Option<SignalSet<S>> {
        let mut current = self.bits.load(Ordering::Acquire);
        loop {
            let observed = SignalSet::from_bits(current);
            if !mode.satisfied(observed, required) {
                return None;
            }
            if !consume {
                return Some(observed);
            }

            let next = current & !required.bits();
            match self
                .bits
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return Some(observed),
                Err(actual) => current = actual,
            }
        }
    }
}
