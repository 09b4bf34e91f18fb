//! 7-bit request id counter for Property Exchange.
//!
//! Every outbound Property Exchange request carries a request id so the
//! reply can be matched to it.  The id is a single SysEx data byte, so the
//! counter cycles through `0..=127`.

use std::sync::atomic::{AtomicU8, Ordering};

/// Largest request id.
pub const MAX_REQUEST_ID: u8 = 0x7F;

/// A monotonically increasing 7-bit counter that wraps from 127 to 0.
///
/// # Examples
///
/// ```rust
/// use midi_ci_core::protocol::RequestIdCounter;
///
/// let counter = RequestIdCounter::new();
/// assert_eq!(counter.next(), 0);
/// assert_eq!(counter.next(), 1);
/// ```
#[derive(Debug, Default)]
pub struct RequestIdCounter {
    // Free-running; the low 7 bits are the id.  256 is a multiple of 128,
    // so the u8 wrap keeps the 7-bit sequence continuous.
    inner: AtomicU8,
}

impl RequestIdCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the counter at `first` (masked to 7 bits).
    pub fn starting_at(first: u8) -> Self {
        Self {
            inner: AtomicU8::new(first & MAX_REQUEST_ID),
        }
    }

    /// Returns the next request id.
    pub fn next(&self) -> u8 {
        self.inner.fetch_add(1, Ordering::Relaxed) & MAX_REQUEST_ID
    }

    /// Returns the id the next call to [`next`](Self::next) will produce.
    pub fn peek(&self) -> u8 {
        self.inner.load(Ordering::Relaxed) & MAX_REQUEST_ID
    }
}
