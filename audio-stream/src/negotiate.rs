//! Hardware parameter negotiation.
//!
//! Negotiation applies a fixed sequence of [Step]s against the
//! [HardwareParameters] of a device. The first step which is rejected latches:
//! every later step is skipped and the rejection is what gets reported.

use crate::device::{Access, HardwareParameters};
use crate::{Status, StreamConfig};
use std::fmt;
use thiserror::Error;

/// A single step of the negotiation pipeline, in the order they are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Step {
    /// Select interleaved access.
    Access,
    /// Set the sample format.
    Format,
    /// Set the channel count.
    Channels,
    /// Enable rate resampling.
    RateResample,
    /// Request the nearest supported sample rate.
    Rate,
    /// Request the nearest supported buffer size.
    BufferSize,
    /// Request the nearest supported period size.
    PeriodSize,
    /// Commit the configuration.
    Commit,
}

impl Step {
    /// Every step in the order it is applied.
    pub const ALL: [Step; 8] = [
        Step::Access,
        Step::Format,
        Step::Channels,
        Step::RateResample,
        Step::Rate,
        Step::BufferSize,
        Step::PeriodSize,
        Step::Commit,
    ];

    /// The name of the step.
    pub fn name(self) -> &'static str {
        match self {
            Step::Access => "set_access",
            Step::Format => "set_format",
            Step::Channels => "set_channels",
            Step::RateResample => "set_rate_resample",
            Step::Rate => "set_rate_near",
            Step::BufferSize => "set_buffer_size_near",
            Step::PeriodSize => "set_period_size_near",
            Step::Commit => "install",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// The first negotiation step which the device rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[error("step `{step}` was rejected with status {status}")]
pub struct NegotiationError {
    /// The step which failed.
    pub step: Step,
    /// The status the platform reported.
    pub status: Status,
}

/// Accumulates the first error of a sequence of steps.
///
/// Once a step has failed, the closures of later steps are never invoked.
#[derive(Debug, Default)]
pub(crate) struct FirstError {
    error: Option<NegotiationError>,
}

impl FirstError {
    /// Run `f` for the given step unless an earlier step failed.
    pub(crate) fn check<F>(&mut self, step: Step, f: F)
    where
        F: FnOnce() -> Result<(), Status>,
    {
        if self.error.is_some() {
            return;
        }

        if let Err(status) = f() {
            self.error = Some(NegotiationError { step, status });
        }
    }

    /// Finish the sequence, returning the first error if any.
    pub(crate) fn finish(self) -> Result<(), NegotiationError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Negotiate a configuration as close as possible to `requested`.
///
/// The returned configuration contains the values the device actually
/// accepted, which may differ from the request. No fallback is attempted if a
/// step fails; retrying with a different request is up to the caller.
///
/// # Examples
///
/// ```rust
/// use audio_stream::fake::{Capabilities, FakeDevice, Values};
/// use audio_stream::{negotiate, Device, Direction, Options, StreamConfig};
///
/// # fn main() -> anyhow::Result<()> {
/// let mut device = FakeDevice::new(Capabilities {
///     rates: Values::only([48000]),
///     ..Capabilities::default()
/// });
///
/// device.acquire(Direction::Output, &Options::default())?;
///
/// let requested = StreamConfig::default().with_rate(44100);
/// let actual = negotiate(&mut device.parameters()?, &requested)?;
/// assert_eq!(actual.rate, 48000);
/// # Ok(()) }
/// ```
pub fn negotiate<P>(hw: &mut P, requested: &StreamConfig) -> Result<StreamConfig, NegotiationError>
where
    P: ?Sized + HardwareParameters,
{
    let mut rate = requested.rate;
    let mut buffer_size = requested.buffer_size;
    let mut period_size = requested.period_size;

    let mut err = FirstError::default();

    err.check(Step::Access, || hw.set_access(Access::Interleaved));
    err.check(Step::Format, || hw.set_format(requested.format));
    err.check(Step::Channels, || hw.set_channels(requested.channels));
    err.check(Step::RateResample, || hw.set_rate_resample(true));
    err.check(Step::Rate, || {
        rate = hw.set_rate_near(rate)?;
        Ok(())
    });
    err.check(Step::BufferSize, || {
        buffer_size = hw.set_buffer_size_near(buffer_size)?;
        Ok(())
    });
    err.check(Step::PeriodSize, || {
        period_size = hw.set_period_size_near(period_size)?;
        Ok(())
    });
    err.check(Step::Commit, || hw.install());
    err.finish()?;

    Ok(StreamConfig {
        rate,
        channels: requested.channels,
        format: requested.format,
        buffer_size,
        period_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SampleFormat;

    /// Parameters which log every call and reject one step.
    struct Scripted {
        reject: Option<Step>,
        calls: Vec<Step>,
    }

    impl Scripted {
        fn new(reject: Option<Step>) -> Self {
            Self {
                reject,
                calls: Vec::new(),
            }
        }

        fn call(&mut self, step: Step) -> Result<(), Status> {
            self.calls.push(step);

            if self.reject == Some(step) {
                return Err(Status::new(-22));
            }

            Ok(())
        }
    }

    impl HardwareParameters for Scripted {
        fn set_access(&mut self, _: Access) -> Result<(), Status> {
            self.call(Step::Access)
        }

        fn set_format(&mut self, _: SampleFormat) -> Result<(), Status> {
            self.call(Step::Format)
        }

        fn set_channels(&mut self, _: u32) -> Result<(), Status> {
            self.call(Step::Channels)
        }

        fn set_rate_resample(&mut self, _: bool) -> Result<(), Status> {
            self.call(Step::RateResample)
        }

        fn set_rate_near(&mut self, rate: u32) -> Result<u32, Status> {
            self.call(Step::Rate)?;
            Ok(rate + 1)
        }

        fn set_buffer_size_near(&mut self, frames: u64) -> Result<u64, Status> {
            self.call(Step::BufferSize)?;
            Ok(frames * 2)
        }

        fn set_period_size_near(&mut self, frames: u64) -> Result<u64, Status> {
            self.call(Step::PeriodSize)?;
            Ok(frames / 2)
        }

        fn install(&mut self) -> Result<(), Status> {
            self.call(Step::Commit)
        }
    }

    #[test]
    fn test_all_steps_in_order() {
        let mut hw = Scripted::new(None);
        let config = negotiate(&mut hw, &StreamConfig::default()).unwrap();

        assert_eq!(hw.calls, Step::ALL);
        assert_eq!(config.rate, 44101);
        assert_eq!(config.buffer_size, 2048);
        assert_eq!(config.period_size, 128);
    }

    #[test]
    fn test_first_error_latches() {
        for (n, &step) in Step::ALL.iter().enumerate() {
            let mut hw = Scripted::new(Some(step));
            let error = negotiate(&mut hw, &StreamConfig::default()).unwrap_err();

            assert_eq!(error.step, step);
            assert_eq!(error.status, Status::new(-22));
            assert_eq!(hw.calls, &Step::ALL[..=n]);
        }
    }

    #[test]
    fn test_first_error_keeps_only_the_first() {
        let mut err = FirstError::default();
        let mut ran = Vec::new();

        err.check(Step::Access, || Ok(()));
        err.check(Step::Format, || Err(Status::new(-1)));
        err.check(Step::Channels, || {
            ran.push(Step::Channels);
            Err(Status::new(-2))
        });

        assert!(ran.is_empty());
        assert_eq!(
            err.finish(),
            Err(NegotiationError {
                step: Step::Format,
                status: Status::new(-1),
            })
        );
    }
}
