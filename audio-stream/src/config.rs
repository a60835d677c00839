use crate::SampleFormat;
use std::fmt;
use std::time::Duration;

/// Default sample rate to request.
const DEFAULT_RATE: u32 = 44100;
/// Default number of channels to request.
const DEFAULT_CHANNELS: u32 = 2;
/// Default buffer size in frames.
const DEFAULT_BUFFER_SIZE: u64 = 1024;
/// Default period size in frames.
const DEFAULT_PERIOD_SIZE: u64 = 256;

/// The direction of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Playback: the application renders frames for the device.
    Output,
    /// Capture: the application drains frames produced by the device.
    Input,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Output => write!(f, "output"),
            Direction::Input => write!(f, "input"),
        }
    }
}

/// A requested or negotiated stream configuration.
///
/// The negotiated configuration of a stream may differ from the one which was
/// requested, so always read it back through
/// [StreamHandle::config][crate::StreamHandle::config] before doing any timing
/// calculations.
///
/// # Examples
///
/// ```rust
/// use audio_stream::{SampleFormat, StreamConfig};
/// use std::time::Duration;
///
/// let config = StreamConfig::default()
///     .with_rate(48000)
///     .with_format(SampleFormat::F32)
///     .with_latency(Duration::from_millis(20));
///
/// assert_eq!(config.buffer_size, 960);
/// assert_eq!(config.period_size, 240);
/// assert_eq!(config.period_duration(), Duration::from_millis(5));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamConfig {
    /// Sample rate in Hz.
    pub rate: u32,
    /// The number of channels.
    pub channels: u32,
    /// The sample format.
    pub format: SampleFormat,
    /// The size of the device buffer in frames.
    pub buffer_size: u64,
    /// The number of frames between successive callbacks.
    pub period_size: u64,
}

impl StreamConfig {
    /// Set the sample rate.
    pub fn with_rate(self, rate: u32) -> Self {
        Self { rate, ..self }
    }

    /// Set the number of channels.
    pub fn with_channels(self, channels: u32) -> Self {
        Self { channels, ..self }
    }

    /// Set the sample format.
    pub fn with_format(self, format: SampleFormat) -> Self {
        Self { format, ..self }
    }

    /// Set the buffer size in frames.
    pub fn with_buffer_size(self, buffer_size: u64) -> Self {
        Self {
            buffer_size,
            ..self
        }
    }

    /// Set the period size in frames.
    pub fn with_period_size(self, period_size: u64) -> Self {
        Self {
            period_size,
            ..self
        }
    }

    /// Derive the buffer size from a target latency at the current rate. The
    /// period is set to a quarter of the buffer.
    pub fn with_latency(self, latency: Duration) -> Self {
        let frames = latency.as_micros() * u128::from(self.rate) / 1_000_000;
        let buffer_size = u64::try_from(frames).unwrap_or(u64::MAX).max(1);

        Self {
            buffer_size,
            period_size: (buffer_size / 4).max(1),
            ..self
        }
    }

    /// The number of bytes in one frame.
    pub fn frame_bytes(&self) -> usize {
        self.channels as usize * self.format.bytes()
    }

    /// The wall-clock duration of the given number of frames.
    pub fn frames_to_duration(&self, frames: u64) -> Duration {
        if self.rate == 0 {
            return Duration::ZERO;
        }

        let nanos = u128::from(frames) * 1_000_000_000 / u128::from(self.rate);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// The duration of one buffer period.
    pub fn period_duration(&self) -> Duration {
        self.frames_to_duration(self.period_size)
    }

    /// The duration of the whole device buffer.
    pub fn buffer_duration(&self) -> Duration {
        self.frames_to_duration(self.buffer_size)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            rate: DEFAULT_RATE,
            channels: DEFAULT_CHANNELS,
            format: SampleFormat::I16,
            buffer_size: DEFAULT_BUFFER_SIZE,
            period_size: DEFAULT_PERIOD_SIZE,
        }
    }
}

/// Options which are not part of the hardware configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    /// The name of the device to open. Backends pick their default device if
    /// this is not set.
    pub name: Option<String>,
    /// Zero capture buffers before the platform fills them, so that
    /// uninitialized memory is never exposed to a capture source.
    pub preclear_capture: bool,
}

impl Options {
    /// Set the device name.
    pub fn with_name(self, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..self
        }
    }

    /// Enable or disable clearing capture buffers before they are filled.
    pub fn with_preclear_capture(self, preclear_capture: bool) -> Self {
        Self {
            preclear_capture,
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_sets_buffer_and_period() {
        let config = StreamConfig::default()
            .with_rate(44100)
            .with_latency(Duration::from_millis(100));

        assert_eq!(config.buffer_size, 4410);
        assert_eq!(config.period_size, 1102);
    }

    #[test]
    fn test_tiny_latency_never_yields_zero_frames() {
        let config = StreamConfig::default().with_latency(Duration::from_nanos(1));
        assert_eq!(config.buffer_size, 1);
        assert_eq!(config.period_size, 1);
    }

    #[test]
    fn test_frame_bytes() {
        let config = StreamConfig::default()
            .with_channels(6)
            .with_format(SampleFormat::I32);

        assert_eq!(config.frame_bytes(), 24);
    }

    #[test]
    fn test_zero_rate_has_no_duration() {
        let config = StreamConfig::default().with_rate(0);
        assert_eq!(config.period_duration(), Duration::ZERO);
    }
}
