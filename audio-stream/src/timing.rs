use crate::loom::sync::atomic::{AtomicU64, Ordering};
use crate::{Direction, Error, Result};
use std::time::Duration;

/// Sentinel for a timestamp which has not been recorded yet.
const UNSET: u64 = u64::MAX;

/// A monotonic device clock reading in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Construct a timestamp from nanoseconds.
    ///
    /// The largest representable reading is reserved, so the value is
    /// saturated one below it.
    pub const fn from_nanos(nanos: u64) -> Self {
        if nanos >= UNSET {
            Self(UNSET - 1)
        } else {
            Self(nanos)
        }
    }

    /// Construct a timestamp from a duration since an arbitrary epoch.
    pub fn from_duration(duration: Duration) -> Self {
        Self::from_nanos(u64::try_from(duration.as_nanos()).unwrap_or(UNSET))
    }

    /// The timestamp in nanoseconds.
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    /// Shift the timestamp by a signed number of frames at the given rate,
    /// saturating at the ends of the clock.
    ///
    /// Backends use this to move a clock reading taken at a transfer onto the
    /// first frame of the transfer.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use audio_stream::Timestamp;
    ///
    /// let now = Timestamp::from_nanos(1_000_000_000);
    /// assert_eq!(now.add_frames(480, 48000).as_nanos(), 1_010_000_000);
    /// assert_eq!(now.add_frames(-480, 48000).as_nanos(), 990_000_000);
    /// ```
    pub fn add_frames(self, frames: i64, rate: u32) -> Self {
        if rate == 0 {
            return self;
        }

        let nanos = i128::from(frames) * 1_000_000_000 / i128::from(rate);
        let nanos = (i128::from(self.0) + nanos).clamp(0, i128::from(UNSET));
        Self::from_nanos(nanos as u64)
    }
}

/// The signed time between the first input and the first output sample of a
/// full-duplex session.
///
/// A positive offset means that output started after input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOffset {
    nanos: i64,
}

impl TimeOffset {
    fn between(input: u64, output: u64) -> Self {
        let nanos = i128::from(output) - i128::from(input);
        let nanos = nanos.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64;
        Self { nanos }
    }

    /// The offset in nanoseconds.
    pub const fn as_nanos(self) -> i64 {
        self.nanos
    }

    /// Test if output started before input.
    pub const fn is_negative(self) -> bool {
        self.nanos < 0
    }

    /// The absolute size of the offset.
    pub fn magnitude(self) -> Duration {
        Duration::from_nanos(self.nanos.unsigned_abs())
    }

    /// Convert the offset into a number of frames at the given rate, rounding
    /// towards zero.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use audio_stream::{Timing, Timestamp};
    ///
    /// # fn main() -> anyhow::Result<()> {
    /// let timing = Timing::new();
    /// timing.record_first_input(Timestamp::from_nanos(1_000_000));
    /// timing.record_first_output(Timestamp::from_nanos(11_000_000));
    ///
    /// assert_eq!(timing.offset()?.as_frames(48000), 480);
    /// # Ok(()) }
    /// ```
    pub fn as_frames(self, rate: u32) -> i64 {
        let frames = i128::from(self.nanos) * i128::from(rate) / 1_000_000_000;
        frames as i64
    }
}

/// Write-once first sample timestamps of the two directions of a full-duplex
/// session.
///
/// Recording is lock-free, and may race between the input and output callback
/// threads. Only the first recording of each direction sticks.
#[derive(Debug)]
pub struct Timing {
    first_input: AtomicU64,
    first_output: AtomicU64,
}

impl Timing {
    /// Construct a new timing record where nothing has been recorded.
    #[cfg(not(loom))]
    pub const fn new() -> Self {
        Self {
            first_input: AtomicU64::new(UNSET),
            first_output: AtomicU64::new(UNSET),
        }
    }

    /// Construct a new timing record where nothing has been recorded.
    #[cfg(loom)]
    pub fn new() -> Self {
        Self {
            first_input: AtomicU64::new(UNSET),
            first_output: AtomicU64::new(UNSET),
        }
    }

    /// Record the first timestamp of the given direction. Returns `true` if
    /// this call was the one that recorded it.
    pub fn record_first(&self, direction: Direction, timestamp: Timestamp) -> bool {
        let slot = match direction {
            Direction::Input => &self.first_input,
            Direction::Output => &self.first_output,
        };

        slot.compare_exchange(
            UNSET,
            timestamp.as_nanos(),
            Ordering::AcqRel,
            Ordering::Acquire,
        )
        .is_ok()
    }

    /// Record the first input timestamp.
    pub fn record_first_input(&self, timestamp: Timestamp) -> bool {
        self.record_first(Direction::Input, timestamp)
    }

    /// Record the first output timestamp.
    pub fn record_first_output(&self, timestamp: Timestamp) -> bool {
        self.record_first(Direction::Output, timestamp)
    }

    /// The first input timestamp, if recorded.
    pub fn first_input(&self) -> Option<Timestamp> {
        load(&self.first_input)
    }

    /// The first output timestamp, if recorded.
    pub fn first_output(&self) -> Option<Timestamp> {
        load(&self.first_output)
    }

    /// The offset `first_output - first_input`.
    ///
    /// Fails with [Error::NotAvailable] until both directions have recorded
    /// their first timestamp, after which the value never changes.
    pub fn offset(&self) -> Result<TimeOffset> {
        match (self.first_input(), self.first_output()) {
            (Some(input), Some(output)) => {
                Ok(TimeOffset::between(input.as_nanos(), output.as_nanos()))
            }
            _ => Err(Error::NotAvailable),
        }
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self::new()
    }
}

fn load(slot: &AtomicU64) -> Option<Timestamp> {
    match slot.load(Ordering::Acquire) {
        UNSET => None,
        nanos => Some(Timestamp(nanos)),
    }
}


#[cfg(all(test, loom))]
mod loom_tests {
    use super::*;
    use crate::loom::sync::Arc;
    use crate::loom::thread;

    #[test]
    fn test_concurrent_first_records() {
        loom::model(|| {
            let timing = Arc::new(Timing::new());

            let a = {
                let timing = timing.clone();
                thread::spawn(move || timing.record_first_input(Timestamp::from_nanos(1)))
            };

            let b = {
                let timing = timing.clone();
                thread::spawn(move || timing.record_first_input(Timestamp::from_nanos(2)))
            };

            timing.record_first_output(Timestamp::from_nanos(5));

            let a = a.join().unwrap();
            let b = b.join().unwrap();

            // Exactly one of the racing writers wins and its value sticks.
            assert!(a ^ b);

            let expected = if a { 1 } else { 2 };
            assert_eq!(timing.first_input(), Some(Timestamp::from_nanos(expected)));
            assert_eq!(timing.offset().unwrap().as_nanos(), 5 - expected);
        });
    }
}
