use crate::{
    Device, Direction, Error, Handler, Options, Result, StreamConfig, StreamHandle, TimeOffset,
    Timing,
};
use std::sync::Arc;

/// A full-duplex session: an input and an output stream sharing one [Timing]
/// record.
///
/// # Examples
///
/// ```rust
/// use audio_stream::fake::{Capabilities, FakeDevice};
/// use audio_stream::{BufferView, Duplex, Error, Handler, Options, StreamConfig, Timestamp};
///
/// # fn main() -> anyhow::Result<()> {
/// let input = FakeDevice::new(Capabilities::default());
/// let output = FakeDevice::new(Capabilities::default());
/// let (i, o) = (input.controller(), output.controller());
///
/// let config = StreamConfig::default();
///
/// let mut duplex = Duplex::open(
///     input,
///     output,
///     &config,
///     &config,
///     Handler::capture_fn(|_: &BufferView<'_>| Ok(())),
///     Handler::None,
///     &Options::default(),
/// )?;
///
/// duplex.start()?;
/// assert!(matches!(duplex.offset(), Err(Error::NotAvailable)));
///
/// i.tick(256, Timestamp::from_nanos(1_000));
/// o.tick(256, Timestamp::from_nanos(3_500));
/// assert_eq!(duplex.offset()?.as_nanos(), 2_500);
///
/// duplex.close()?;
/// # Ok(()) }
/// ```
#[derive(Debug)]
pub struct Duplex<I, O>
where
    I: Device,
    O: Device,
{
    input: StreamHandle<I>,
    output: StreamHandle<O>,
    timing: Arc<Timing>,
}

impl<I, O> Duplex<I, O>
where
    I: Device,
    O: Device,
{
    /// Open both directions of a session.
    ///
    /// If the output fails to open, the already opened input is closed before
    /// returning.
    pub fn open(
        input_device: I,
        output_device: O,
        input_config: &StreamConfig,
        output_config: &StreamConfig,
        capture: Handler,
        render: Handler,
        options: &Options,
    ) -> Result<Self> {
        let timing = Arc::new(Timing::new());

        let mut input = StreamHandle::new(input_device, Direction::Input);
        input.configure_with_timing(input_config, capture, options, Some(timing.clone()))?;

        let mut output = StreamHandle::new(output_device, Direction::Output);

        // Dropping the input handle on error closes it.
        output.configure_with_timing(output_config, render, options, Some(timing.clone()))?;

        Ok(Self {
            input,
            output,
            timing,
        })
    }

    /// Start input, then output.
    ///
    /// If the output fails to start, the input is stopped again.
    pub fn start(&mut self) -> Result<()> {
        self.input.start()?;

        if let Err(e) = self.output.start() {
            if let Err(error) = self.input.stop() {
                tracing::warn!(%error, "failed to stop input after output failed to start");
            }

            return Err(e);
        }

        Ok(())
    }

    /// Stop both directions, returning the first error.
    pub fn stop(&mut self) -> Result<()> {
        let output = self.output.stop();
        let input = self.input.stop();
        first(output, input)
    }

    /// Close both directions, returning the first error. Both are closed
    /// regardless of errors.
    pub fn close(&mut self) -> Result<()> {
        let output = self.output.close();
        let input = self.input.close();
        first(output, input)
    }

    /// The time between the first input and the first output callback.
    ///
    /// Fails with [Error::NotAvailable] until both have happened.
    pub fn offset(&self) -> Result<TimeOffset> {
        self.timing.offset()
    }

    /// The shared timing record.
    pub fn timing(&self) -> &Arc<Timing> {
        &self.timing
    }

    /// The input stream.
    pub fn input(&self) -> &StreamHandle<I> {
        &self.input
    }

    /// The output stream.
    pub fn output(&self) -> &StreamHandle<O> {
        &self.output
    }
}

fn first(a: Result<()>, b: Result<()>) -> Result<()> {
    match (a, b) {
        (Err(e), other) => {
            if let Err(error) = other {
                tracing::warn!(%error, "additional error in duplex session");
            }

            Err(e)
        }
        (Ok(()), other) => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{Capabilities, FakeDevice, Faults};
    use crate::{BufferView, State, Status, Timestamp};

    fn open(input: FakeDevice, output: FakeDevice) -> Result<Duplex<FakeDevice, FakeDevice>> {
        Duplex::open(
            input,
            output,
            &StreamConfig::default(),
            &StreamConfig::default(),
            Handler::None,
            Handler::render_fn(|buf: &mut BufferView<'_>| Ok(buf.frames())),
            &Options::default(),
        )
    }

    #[test]
    fn test_output_failure_closes_input() {
        let input = FakeDevice::new(Capabilities::default());
        let output = FakeDevice::new(Capabilities::default());
        let i = input.controller();

        output.controller().set_faults(Faults {
            busy: true,
            ..Faults::default()
        });

        assert!(open(input, output).is_err());
        assert!(!i.is_acquired());
    }

    #[test]
    fn test_start_failure_stops_input() {
        let input = FakeDevice::new(Capabilities::default());
        let output = FakeDevice::new(Capabilities::default());
        let (i, o) = (input.controller(), output.controller());

        let mut duplex = open(input, output).unwrap();

        o.set_faults(Faults {
            start: Some(Status::new(-5)),
            ..Faults::default()
        });

        assert!(duplex.start().is_err());
        assert!(!i.is_running());
        assert_eq!(duplex.input().state(), State::Stopped);
    }

    #[test]
    fn test_offset_stable() {
        let input = FakeDevice::new(Capabilities::default());
        let output = FakeDevice::new(Capabilities::default());
        let (i, o) = (input.controller(), output.controller());

        let mut duplex = open(input, output).unwrap();
        duplex.start().unwrap();

        o.tick(16, Timestamp::from_nanos(500));
        assert!(matches!(duplex.offset(), Err(Error::NotAvailable)));
        i.tick(16, Timestamp::from_nanos(2_000));

        let offset = duplex.offset().unwrap();
        assert_eq!(offset.as_nanos(), -1_500);

        for n in 1..10 {
            i.tick(16, Timestamp::from_nanos(2_000 + n * 100));
            o.tick(16, Timestamp::from_nanos(500 + n * 100));
            assert_eq!(duplex.offset().unwrap(), offset);
        }

        duplex.close().unwrap();
        assert!(!i.is_acquired());
        assert!(!o.is_acquired());
    }
}
