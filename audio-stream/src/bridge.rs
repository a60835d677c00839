use crate::{BufferError, BufferView, Direction, StreamConfig, Timestamp, Timing};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Error raised by application logic running inside of a callback.
///
/// These never reach the thread controlling the stream. A failing render sink
/// is treated as having produced nothing, and its buffer is silenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CallbackError {
    /// No data was ready to be produced or consumed.
    #[error("no data ready")]
    NotReady,
    /// Application logic failed.
    #[error("callback failed: {0}")]
    Failed(&'static str),
    /// A buffer access failed.
    #[error("buffer error: {0}")]
    Buffer(
        #[from]
        #[source]
        BufferError,
    ),
}

/// Application logic which fills an output buffer.
///
/// Called on the real-time thread of the platform. Implementations must not
/// block, allocate or take locks.
pub trait RenderSink: Send {
    /// Fill the buffer, returning the number of leading frames which were
    /// written. Anything after that is silenced.
    fn render(&mut self, buf: &mut BufferView<'_>) -> Result<usize, CallbackError>;
}

impl<F> RenderSink for F
where
    F: Send + FnMut(&mut BufferView<'_>) -> Result<usize, CallbackError>,
{
    fn render(&mut self, buf: &mut BufferView<'_>) -> Result<usize, CallbackError> {
        self(buf)
    }
}

/// Application logic which drains an input buffer.
///
/// The same real-time restrictions as for [RenderSink] apply.
pub trait CaptureSource: Send {
    /// Consume the captured buffer.
    fn capture(&mut self, buf: &BufferView<'_>) -> Result<(), CallbackError>;
}

impl<F> CaptureSource for F
where
    F: Send + FnMut(&BufferView<'_>) -> Result<(), CallbackError>,
{
    fn capture(&mut self, buf: &BufferView<'_>) -> Result<(), CallbackError> {
        self(buf)
    }
}

/// The application logic installed on a stream.
pub enum Handler {
    /// Fill output buffers.
    Render(Box<dyn RenderSink>),
    /// Drain input buffers.
    Capture(Box<dyn CaptureSource>),
    /// No logic is installed. Output streams emit silence.
    None,
}

impl Handler {
    /// Construct a handler out of a render sink.
    pub fn render<S>(sink: S) -> Self
    where
        S: 'static + RenderSink,
    {
        Self::Render(Box::new(sink))
    }

    /// Construct a render handler out of a closure.
    ///
    /// This helps type inference pick up the higher-ranked signature of the
    /// closure.
    pub fn render_fn<F>(f: F) -> Self
    where
        F: 'static + Send + FnMut(&mut BufferView<'_>) -> Result<usize, CallbackError>,
    {
        Self::Render(Box::new(f))
    }

    /// Construct a handler out of a capture source.
    pub fn capture<S>(source: S) -> Self
    where
        S: 'static + CaptureSource,
    {
        Self::Capture(Box::new(source))
    }

    /// Construct a capture handler out of a closure.
    pub fn capture_fn<F>(f: F) -> Self
    where
        F: 'static + Send + FnMut(&BufferView<'_>) -> Result<(), CallbackError>,
    {
        Self::Capture(Box::new(f))
    }

    /// Test if the handler can serve a stream of the given direction.
    pub fn accepts(&self, direction: Direction) -> bool {
        matches!(
            (self, direction),
            (Handler::None, _)
                | (Handler::Render(..), Direction::Output)
                | (Handler::Capture(..), Direction::Input)
        )
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Render(..) => write!(f, "Render"),
            Handler::Capture(..) => write!(f, "Capture"),
            Handler::None => write!(f, "None"),
        }
    }
}

/// Counters kept by the callback of a stream.
#[derive(Debug, Default)]
pub struct StreamStats {
    frames: AtomicU64,
    callbacks: AtomicU64,
    underruns: AtomicU64,
}

impl StreamStats {
    /// Total frames processed since the stream was first started.
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    /// The number of callbacks issued.
    pub fn callbacks(&self) -> u64 {
        self.callbacks.load(Ordering::Relaxed)
    }

    /// The number of output callbacks where application logic produced fewer
    /// frames than requested.
    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }
}

/// The callback state of a stream, owned by its device once registered.
///
/// A backend calls [Bridge::process] once per buffer period from the thread
/// servicing the device.
pub struct Bridge {
    direction: Direction,
    config: StreamConfig,
    handler: Handler,
    timing: Option<Arc<Timing>>,
    stats: Arc<StreamStats>,
    preclear_capture: bool,
}

impl Bridge {
    pub(crate) fn new(
        direction: Direction,
        config: StreamConfig,
        handler: Handler,
        timing: Option<Arc<Timing>>,
        stats: Arc<StreamStats>,
        preclear_capture: bool,
    ) -> Self {
        Self {
            direction,
            config,
            handler,
            timing,
            stats,
            preclear_capture,
        }
    }

    /// The negotiated configuration of the stream.
    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// The direction of the stream.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Test if capture buffers should be cleared before the platform fills
    /// them.
    pub fn preclear_capture(&self) -> bool {
        self.preclear_capture
    }

    /// Process one period worth of frames.
    ///
    /// For output streams, every frame the application doesn't produce is
    /// silenced before this returns.
    pub fn process(&mut self, buf: &mut BufferView<'_>, timestamp: Timestamp) {
        if let Some(timing) = &self.timing {
            timing.record_first(self.direction, timestamp);
        }

        let frames = buf.frames();

        match self.direction {
            Direction::Output => {
                let produced = match &mut self.handler {
                    Handler::Render(sink) => {
                        match panic::catch_unwind(AssertUnwindSafe(|| sink.render(buf))) {
                            Ok(Ok(n)) => n.min(frames),
                            _ => 0,
                        }
                    }
                    _ => 0,
                };

                if produced < frames {
                    buf.silence_from(produced);
                    self.stats.underruns.fetch_add(1, Ordering::Relaxed);
                }
            }
            Direction::Input => {
                if let Handler::Capture(source) = &mut self.handler {
                    let view = &*buf;
                    // Errors only mean the captured data was dropped.
                    let _ = panic::catch_unwind(AssertUnwindSafe(|| source.capture(view)));
                }
            }
        }

        self.stats
            .frames
            .fetch_add(frames as u64, Ordering::Relaxed);
        self.stats.callbacks.fetch_add(1, Ordering::Relaxed);
    }
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("direction", &self.direction)
            .field("config", &self.config)
            .field("handler", &self.handler)
            .field("preclear_capture", &self.preclear_capture)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bridge(direction: Direction, handler: Handler, timing: Option<Arc<Timing>>) -> Bridge {
        Bridge::new(
            direction,
            StreamConfig::default(),
            handler,
            timing,
            Arc::new(StreamStats::default()),
            false,
        )
    }

    #[test]
    fn test_partial_render_is_silenced() {
        let mut bridge = bridge(
            Direction::Output,
            Handler::render_fn(|buf: &mut BufferView<'_>| {
                buf.write(0, 0, 5i16)?;
                buf.write(1, 0, 6i16)?;
                Ok(1)
            }),
            None,
        );

        let mut data = [9i16; 6];
        bridge.process(
            &mut BufferView::from_slice(&mut data[..], 2),
            Timestamp::from_nanos(0),
        );

        assert_eq!(data, [5, 6, 0, 0, 0, 0]);
        assert_eq!(bridge.stats.underruns(), 1);
        assert_eq!(bridge.stats.frames(), 3);
    }

    #[test]
    fn test_failure_silences_everything() {
        let mut bridge = bridge(
            Direction::Output,
            Handler::render_fn(|buf: &mut BufferView<'_>| {
                buf.write(0, 0, 5i16)?;
                Err(CallbackError::Failed("oops"))
            }),
            None,
        );

        let mut data = [9i16; 4];
        bridge.process(
            &mut BufferView::from_slice(&mut data[..], 2),
            Timestamp::from_nanos(0),
        );

        assert_eq!(data, [0; 4]);
    }

    #[test]
    fn test_panic_is_contained() {
        let mut bridge = bridge(
            Direction::Output,
            Handler::render_fn(|_: &mut BufferView<'_>| panic!("render panicked")),
            None,
        );

        let mut data = [9i16; 4];
        bridge.process(
            &mut BufferView::from_slice(&mut data[..], 2),
            Timestamp::from_nanos(0),
        );

        assert_eq!(data, [0; 4]);
        assert_eq!(bridge.stats.callbacks(), 1);
    }

    #[test]
    fn test_full_render_is_not_an_underrun() {
        let mut bridge = bridge(
            Direction::Output,
            Handler::render_fn(|buf: &mut BufferView<'_>| Ok(buf.frames() + 10)),
            None,
        );

        let mut data = [9i16; 4];
        bridge.process(
            &mut BufferView::from_slice(&mut data[..], 2),
            Timestamp::from_nanos(0),
        );

        assert_eq!(data, [9; 4]);
        assert_eq!(bridge.stats.underruns(), 0);
    }

    #[test]
    fn test_timing_recorded_once() {
        let timing = Arc::new(Timing::new());
        let mut bridge = bridge(Direction::Input, Handler::None, Some(timing.clone()));

        let mut data = [0i16; 4];

        for n in [100, 200] {
            bridge.process(
                &mut BufferView::from_slice(&mut data[..], 2),
                Timestamp::from_nanos(n),
            );
        }

        assert_eq!(timing.first_input(), Some(Timestamp::from_nanos(100)));
        assert_eq!(timing.first_output(), None);
    }

    #[test]
    fn test_handler_accepts() {
        assert!(Handler::None.accepts(Direction::Input));
        assert!(Handler::render_fn(|_: &mut BufferView<'_>| Ok(0)).accepts(Direction::Output));
        assert!(!Handler::render_fn(|_: &mut BufferView<'_>| Ok(0)).accepts(Direction::Input));
        assert!(!Handler::capture_fn(|_: &BufferView<'_>| Ok(())).accepts(Direction::Output));
    }
}
