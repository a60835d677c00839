use crate::negotiate::negotiate;
use crate::{
    Bridge, Device, Direction, Error, Handler, Operation, Options, Result, StreamConfig,
    StreamStats, Timing,
};
use std::fmt;
use std::sync::Arc;

/// The lifecycle state of a [StreamHandle].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// The handle owns a device which has not been configured.
    Created,
    /// The device is configured and its callback registered, but no data
    /// flows.
    Configured,
    /// Callbacks are being issued.
    Started,
    /// Callbacks have been halted.
    Stopped,
    /// The device has been released. This state is terminal.
    Closed,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            State::Created => write!(f, "created"),
            State::Configured => write!(f, "configured"),
            State::Started => write!(f, "started"),
            State::Stopped => write!(f, "stopped"),
            State::Closed => write!(f, "closed"),
        }
    }
}

/// A single direction of audio I/O on an exclusively owned device.
///
/// Lifecycle methods take `&mut self`, which serializes them on the thread
/// controlling the stream. Dropping a handle which hasn't been closed closes
/// it.
///
/// # Examples
///
/// ```rust
/// use audio_stream::fake::{Capabilities, FakeDevice};
/// use audio_stream::{Direction, Error, Handler, Options, State, StreamConfig, StreamHandle};
///
/// # fn main() -> anyhow::Result<()> {
/// let device = FakeDevice::new(Capabilities::default());
///
/// let mut stream = StreamHandle::open(
///     device,
///     Direction::Output,
///     &StreamConfig::default(),
///     Handler::None,
///     &Options::default(),
/// )?;
///
/// stream.start()?;
/// stream.stop()?;
/// stream.stop()?;
/// assert_eq!(stream.state(), State::Stopped);
///
/// stream.close()?;
/// assert!(matches!(stream.start(), Err(Error::State { .. })));
/// # Ok(()) }
/// ```
pub struct StreamHandle<D>
where
    D: Device,
{
    device: D,
    direction: Direction,
    config: StreamConfig,
    state: State,
    stats: Arc<StreamStats>,
}

impl<D> StreamHandle<D>
where
    D: Device,
{
    /// Take ownership of a device which will be used in the given direction.
    pub fn new(device: D, direction: Direction) -> Self {
        Self {
            device,
            direction,
            config: StreamConfig::default(),
            state: State::Created,
            stats: Arc::new(StreamStats::default()),
        }
    }

    /// Acquire the device, negotiate a configuration as close as possible to
    /// `requested`, and register `handler` as its callback.
    ///
    /// Data doesn't flow until the stream is [started][StreamHandle::start].
    pub fn open(
        device: D,
        direction: Direction,
        requested: &StreamConfig,
        handler: Handler,
        options: &Options,
    ) -> Result<Self> {
        let mut this = Self::new(device, direction);
        this.configure(requested, handler, options)?;
        Ok(this)
    }

    /// Configure a [Created][State::Created] stream.
    ///
    /// If negotiation fails the device is released again and the stream stays
    /// in the created state, so configuring can be retried with a different
    /// request.
    pub fn configure(
        &mut self,
        requested: &StreamConfig,
        handler: Handler,
        options: &Options,
    ) -> Result<()> {
        self.configure_with_timing(requested, handler, options, None)
    }

    pub(crate) fn configure_with_timing(
        &mut self,
        requested: &StreamConfig,
        handler: Handler,
        options: &Options,
        timing: Option<Arc<Timing>>,
    ) -> Result<()> {
        self.expect_state(Operation::Open, &[State::Created])?;

        if !handler.accepts(self.direction) {
            return Err(Error::HandlerMismatch {
                direction: self.direction,
            });
        }

        self.device
            .acquire(self.direction, options)
            .map_err(|status| Error::Device {
                operation: Operation::Open,
                status,
            })?;

        let negotiated = match self.negotiate(requested) {
            Ok(config) => config,
            Err(e) => {
                if let Err(status) = self.device.dispose() {
                    tracing::warn!(%status, "failed to release device after negotiation failure");
                }

                return Err(e);
            }
        };

        tracing::debug!(
            direction = %self.direction,
            rate = negotiated.rate,
            channels = negotiated.channels,
            format = %negotiated.format,
            buffer_size = negotiated.buffer_size,
            period_size = negotiated.period_size,
            "negotiated stream configuration"
        );

        let bridge = Bridge::new(
            self.direction,
            negotiated,
            handler,
            timing,
            self.stats.clone(),
            options.preclear_capture,
        );

        // From here on the device is acquired and configured, so failures are
        // cleaned up through close.
        self.config = negotiated;
        self.state = State::Configured;

        self.device
            .register(bridge)
            .map_err(|status| Error::Device {
                operation: Operation::Open,
                status,
            })?;

        Ok(())
    }

    fn negotiate(&mut self, requested: &StreamConfig) -> Result<StreamConfig> {
        let mut hw = self.device.parameters().map_err(|status| Error::Device {
            operation: Operation::Open,
            status,
        })?;

        Ok(negotiate(&mut hw, requested)?)
    }

    /// Begin issuing callbacks.
    ///
    /// This doesn't wait for the first callback. Starting a started stream
    /// does nothing.
    pub fn start(&mut self) -> Result<()> {
        if self.state == State::Started {
            return Ok(());
        }

        self.expect_state(Operation::Start, &[State::Configured, State::Stopped])?;

        self.device.start().map_err(|status| Error::Device {
            operation: Operation::Start,
            status,
        })?;

        tracing::debug!(direction = %self.direction, "stream started");
        self.state = State::Started;
        Ok(())
    }

    /// Stop issuing callbacks. Once this returns no further callbacks are
    /// issued, but one which is in flight is not interrupted.
    ///
    /// Stopping a stream which isn't started does nothing.
    pub fn stop(&mut self) -> Result<()> {
        match self.state {
            State::Configured | State::Stopped => return Ok(()),
            State::Started => (),
            state => {
                return Err(Error::State {
                    operation: Operation::Stop,
                    state,
                })
            }
        }

        self.device.stop().map_err(|status| Error::Device {
            operation: Operation::Stop,
            status,
        })?;

        tracing::debug!(direction = %self.direction, "stream stopped");
        self.state = State::Stopped;
        Ok(())
    }

    /// Release the device.
    ///
    /// Disposal is attempted even if stopping or uninitializing fails, and the
    /// stream is closed once this returns regardless of the outcome. The first
    /// error encountered is returned.
    pub fn close(&mut self) -> Result<()> {
        let state = self.state;

        if state == State::Closed {
            return Err(Error::State {
                operation: Operation::Close,
                state,
            });
        }

        self.state = State::Closed;

        if state == State::Created {
            return Ok(());
        }

        let mut first = None;

        if state == State::Started {
            if let Err(status) = self.device.stop() {
                record(&mut first, Operation::Stop, status);
            }
        }

        if let Err(status) = self.device.uninitialize() {
            record(&mut first, Operation::Close, status);
        }

        if let Err(status) = self.device.dispose() {
            record(&mut first, Operation::Close, status);
        }

        tracing::debug!(direction = %self.direction, "stream closed");

        match first {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// The lifecycle state of the stream.
    pub fn state(&self) -> State {
        self.state
    }

    /// The negotiated configuration. Only meaningful once the stream has been
    /// configured.
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// The direction of the stream.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Counters updated by the callback.
    pub fn stats(&self) -> &Arc<StreamStats> {
        &self.stats
    }

    /// Access the underlying device.
    pub fn device(&self) -> &D {
        &self.device
    }

    fn expect_state(&self, operation: Operation, valid: &[State]) -> Result<()> {
        if valid.contains(&self.state) {
            return Ok(());
        }

        Err(Error::State {
            operation,
            state: self.state,
        })
    }
}

/// Keep the first error, logging the ones after it.
fn record(first: &mut Option<Error>, operation: Operation, status: crate::Status) {
    let error = Error::Device { operation, status };

    if first.is_some() {
        tracing::warn!(%error, "additional error while closing stream");
    } else {
        *first = Some(error);
    }
}

impl<D> Drop for StreamHandle<D>
where
    D: Device,
{
    fn drop(&mut self) {
        if self.state == State::Closed {
            return;
        }

        if let Err(error) = self.close() {
            tracing::warn!(%error, "error closing dropped stream");
        }
    }
}

impl<D> fmt::Debug for StreamHandle<D>
where
    D: Device,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("direction", &self.direction)
            .field("config", &self.config)
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{Capabilities, FakeDevice, Faults, Values};
    use crate::{Status, Step};

    fn open(device: FakeDevice) -> Result<StreamHandle<FakeDevice>> {
        StreamHandle::open(
            device,
            Direction::Output,
            &StreamConfig::default(),
            Handler::None,
            &Options::default(),
        )
    }

    #[test]
    fn test_lifecycle() {
        let device = FakeDevice::new(Capabilities::default());
        let controller = device.controller();

        let mut stream = open(device).unwrap();
        assert_eq!(stream.state(), State::Configured);
        assert!(!controller.is_running());

        stream.start().unwrap();
        stream.start().unwrap();
        assert!(controller.is_running());

        stream.stop().unwrap();
        assert!(!controller.is_running());

        stream.start().unwrap();
        stream.close().unwrap();
        assert_eq!(stream.state(), State::Closed);
        assert!(controller.disposed());
    }

    #[test]
    fn test_stop_on_configured_is_noop() {
        let mut stream = open(FakeDevice::new(Capabilities::default())).unwrap();
        stream.stop().unwrap();
        assert_eq!(stream.state(), State::Configured);
    }

    #[test]
    fn test_negotiation_failure_releases_device() {
        let device = FakeDevice::new(Capabilities {
            channels: Values::only([1]),
            ..Capabilities::default()
        });

        let controller = device.controller();
        let mut stream = StreamHandle::new(device, Direction::Output);

        let error = stream
            .configure(&StreamConfig::default(), Handler::None, &Options::default())
            .unwrap_err();

        assert!(matches!(
            error,
            Error::Negotiation(e) if e.step == Step::Channels
        ));

        assert_eq!(stream.state(), State::Created);
        assert!(!controller.is_acquired());

        // Retry with a fallback the device supports.
        stream
            .configure(
                &StreamConfig::default().with_channels(1),
                Handler::None,
                &Options::default(),
            )
            .unwrap();

        assert_eq!(stream.config().channels, 1);
    }

    #[test]
    fn test_busy_device() {
        let device = FakeDevice::new(Capabilities::default());

        device.controller().set_faults(Faults {
            busy: true,
            ..Faults::default()
        });

        let error = open(device).unwrap_err();

        assert!(matches!(
            error,
            Error::Device {
                operation: Operation::Open,
                status,
            } if status == Status::new(-16)
        ));
    }

    #[test]
    fn test_handler_mismatch() {
        let error = StreamHandle::open(
            FakeDevice::new(Capabilities::default()),
            Direction::Input,
            &StreamConfig::default(),
            Handler::render_fn(|_: &mut crate::BufferView<'_>| Ok(0)),
            &Options::default(),
        )
        .unwrap_err();

        assert!(matches!(
            error,
            Error::HandlerMismatch {
                direction: Direction::Input
            }
        ));
    }

    #[test]
    fn test_close_created() {
        let device = FakeDevice::new(Capabilities::default());
        let controller = device.controller();

        let mut stream = StreamHandle::new(device, Direction::Output);
        stream.close().unwrap();

        assert_eq!(stream.state(), State::Closed);
        assert!(!controller.disposed());
        assert!(matches!(
            stream.configure(&StreamConfig::default(), Handler::None, &Options::default()),
            Err(Error::State {
                operation: Operation::Open,
                state: State::Closed
            })
        ));
    }

    #[test]
    fn test_close_reports_first_error() {
        let device = FakeDevice::new(Capabilities::default());
        let controller = device.controller();
        let mut stream = open(device).unwrap();
        stream.start().unwrap();

        controller.set_faults(Faults {
            stop: Some(Status::new(-5)),
            dispose: Some(Status::new(-6)),
            ..Faults::default()
        });

        let error = stream.close().unwrap_err();

        assert!(matches!(
            error,
            Error::Device {
                operation: Operation::Stop,
                status,
            } if status == Status::new(-5)
        ));

        assert_eq!(stream.state(), State::Closed);
        assert!(!controller.is_acquired());
    }
}
