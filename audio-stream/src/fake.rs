//! An in-process device which is driven by hand.
//!
//! [FakeDevice] implements [Device] entirely in software. Its supported
//! configuration space is described by [Capabilities], failures can be injected
//! through [Faults], and its "hardware clock" only advances when
//! [FakeController::tick] is called. This makes it possible to test every
//! part of a stream deterministically, and to run streams offline.
//!
//! ```rust
//! use audio_stream::fake::{Capabilities, FakeDevice, Values};
//! use audio_stream::{Direction, Handler, Options, Step, StreamConfig, StreamHandle};
//!
//! # fn main() -> anyhow::Result<()> {
//! let device = FakeDevice::new(Capabilities {
//!     rates: Values::only([48000]),
//!     buffer_sizes: Values::only([960]),
//!     ..Capabilities::default()
//! });
//!
//! let controller = device.controller();
//!
//! let stream = StreamHandle::open(
//!     device,
//!     Direction::Output,
//!     &StreamConfig::default(),
//!     Handler::None,
//!     &Options::default(),
//! )?;
//!
//! assert_eq!(stream.config().rate, 48000);
//! assert_eq!(stream.config().buffer_size, 960);
//! assert_eq!(controller.calls(), Step::ALL);
//! # Ok(()) }
//! ```

use crate::device::{Access, Device, HardwareParameters};
use crate::{
    Bridge, BufferView, ChannelArea, Direction, Options, Sample, SampleFormat, Status, Step,
    StreamConfig, Timestamp,
};
use std::fmt;
use std::mem;
use std::slice;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Device or resource busy.
const EBUSY: i32 = -16;
/// Invalid argument.
const EINVAL: i32 = -22;
/// File descriptor in bad state.
const EBADFD: i32 = -77;

/// The byte output buffers are filled with before being handed to the
/// callback, so that frames which were never written stand out.
pub const GARBAGE: u8 = 0xaa;

/// A set of supported values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Values {
    /// Every value is supported.
    Any,
    /// Only the listed values are supported.
    Only(Vec<u64>),
}

impl Values {
    /// Support only the given values.
    pub fn only<I>(values: I) -> Self
    where
        I: IntoIterator<Item = u64>,
    {
        Self::Only(values.into_iter().collect())
    }

    /// Test if the value is supported.
    pub fn contains(&self, value: u64) -> bool {
        match self {
            Values::Any => true,
            Values::Only(values) => values.contains(&value),
        }
    }

    /// The supported value nearest to `value`, preferring the smaller one on a
    /// tie.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use audio_stream::fake::Values;
    ///
    /// let values = Values::only([44100, 48000, 96000]);
    /// assert_eq!(values.nearest(50000), Some(48000));
    /// assert_eq!(Values::only([]).nearest(50000), None);
    /// ```
    pub fn nearest(&self, value: u64) -> Option<u64> {
        match self {
            Values::Any => Some(value),
            Values::Only(values) => values
                .iter()
                .copied()
                .min_by_key(|&candidate| (candidate.abs_diff(value), candidate)),
        }
    }

    /// Like [nearest][Values::nearest], but only considers values which are
    /// at most `max`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use audio_stream::fake::Values;
    ///
    /// assert_eq!(Values::Any.nearest_at_most(256, 128), Some(128));
    /// assert_eq!(Values::only([64, 512]).nearest_at_most(256, 128), Some(64));
    /// assert_eq!(Values::only([512]).nearest_at_most(256, 128), None);
    /// ```
    pub fn nearest_at_most(&self, value: u64, max: u64) -> Option<u64> {
        match self {
            Values::Any => Some(value.min(max)),
            Values::Only(values) => values
                .iter()
                .copied()
                .filter(|&candidate| candidate <= max)
                .min_by_key(|&candidate| (candidate.abs_diff(value), candidate)),
        }
    }
}

/// The configuration space of a [FakeDevice].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    /// Supported sample formats.
    pub formats: Vec<SampleFormat>,
    /// Supported channel counts.
    pub channels: Values,
    /// Supported sample rates.
    pub rates: Values,
    /// Supported buffer sizes in frames.
    pub buffer_sizes: Values,
    /// Supported period sizes in frames. The selected period is never larger
    /// than the selected buffer.
    pub period_sizes: Values,
    /// If interleaved access is supported.
    pub interleaved: bool,
    /// Hand callbacks one buffer per channel instead of a single interleaved
    /// buffer.
    pub planar: bool,
    /// If the device can pause.
    pub can_pause: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            formats: vec![
                SampleFormat::I8,
                SampleFormat::I16,
                SampleFormat::I32,
                SampleFormat::F32,
            ],
            channels: Values::Any,
            rates: Values::Any,
            buffer_sizes: Values::Any,
            period_sizes: Values::Any,
            interleaved: true,
            planar: false,
            can_pause: true,
        }
    }
}

/// Failures to inject into a [FakeDevice].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Faults {
    /// Acquiring the device fails as if it was busy.
    pub busy: bool,
    /// The given negotiation step fails with the given status.
    pub step: Option<(Step, Status)>,
    /// Registering the callback fails.
    pub register: Option<Status>,
    /// Starting fails.
    pub start: Option<Status>,
    /// Stopping fails.
    pub stop: Option<Status>,
    /// Uninitializing fails.
    pub uninitialize: Option<Status>,
    /// Disposing fails. The device is released anyway.
    pub dispose: Option<Status>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Pending {
    access: Option<Access>,
    format: Option<SampleFormat>,
    channels: Option<u32>,
    rate: Option<u32>,
    buffer_size: Option<u64>,
    period_size: Option<u64>,
}

struct Shared {
    capabilities: Capabilities,
    faults: Faults,
    acquired: bool,
    pending: Pending,
    installed: Option<StreamConfig>,
    calls: Vec<Step>,
    bridge: Option<Bridge>,
    running: bool,
    disposed: bool,
    input: Vec<u8>,
}

impl Shared {
    fn fault(&self, step: Step) -> Result<(), Status> {
        match self.faults.step {
            Some((s, status)) if s == step => Err(status),
            _ => Ok(()),
        }
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

fn check(fault: Option<Status>) -> Result<(), Status> {
    match fault {
        Some(status) => Err(status),
        None => Ok(()),
    }
}

/// A software device.
///
/// See the [module level documentation][self].
pub struct FakeDevice {
    shared: Arc<Mutex<Shared>>,
}

impl FakeDevice {
    /// Construct a device with the given capabilities.
    pub fn new(capabilities: Capabilities) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                capabilities,
                faults: Faults::default(),
                acquired: false,
                pending: Pending::default(),
                installed: None,
                calls: Vec::new(),
                bridge: None,
                running: false,
                disposed: false,
                input: Vec::new(),
            })),
        }
    }

    /// Construct a controller which can be used to drive and inspect the
    /// device after it has been moved into a stream.
    pub fn controller(&self) -> FakeController {
        FakeController {
            shared: self.shared.clone(),
        }
    }
}

impl fmt::Debug for FakeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeDevice").finish_non_exhaustive()
    }
}

impl Device for FakeDevice {
    type Parameters<'a> = FakeParameters<'a>;

    fn acquire(&mut self, _: Direction, _: &Options) -> Result<(), Status> {
        let mut shared = lock(&self.shared);

        if shared.faults.busy || shared.acquired {
            return Err(Status::new(EBUSY));
        }

        shared.acquired = true;
        shared.disposed = false;
        shared.pending = Pending::default();
        shared.installed = None;
        shared.calls.clear();
        Ok(())
    }

    fn parameters(&mut self) -> Result<Self::Parameters<'_>, Status> {
        let shared = lock(&self.shared);

        if !shared.acquired {
            return Err(Status::new(EBADFD));
        }

        Ok(FakeParameters { shared })
    }

    fn register(&mut self, bridge: Bridge) -> Result<(), Status> {
        let mut shared = lock(&self.shared);
        check(shared.faults.register)?;

        if shared.installed.is_none() {
            return Err(Status::new(EBADFD));
        }

        shared.bridge = Some(bridge);
        Ok(())
    }

    fn start(&mut self) -> Result<(), Status> {
        let mut shared = lock(&self.shared);
        check(shared.faults.start)?;

        if shared.bridge.is_none() {
            return Err(Status::new(EBADFD));
        }

        shared.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), Status> {
        let mut shared = lock(&self.shared);
        check(shared.faults.stop)?;
        shared.running = false;
        Ok(())
    }

    fn uninitialize(&mut self) -> Result<(), Status> {
        let mut shared = lock(&self.shared);
        check(shared.faults.uninitialize)?;
        shared.running = false;
        shared.bridge = None;
        shared.installed = None;
        Ok(())
    }

    fn dispose(&mut self) -> Result<(), Status> {
        let mut shared = lock(&self.shared);
        shared.running = false;
        shared.bridge = None;
        shared.installed = None;
        shared.acquired = false;
        shared.disposed = true;
        check(shared.faults.dispose)
    }
}

/// The parameters of a [FakeDevice] being negotiated.
///
/// Holds the device lock, so the [FakeController] of the device can't be used
/// while this is alive.
pub struct FakeParameters<'a> {
    shared: MutexGuard<'a, Shared>,
}

impl FakeParameters<'_> {
    fn call(&mut self, step: Step) -> Result<(), Status> {
        self.shared.calls.push(step);
        self.shared.fault(step)
    }
}

fn near(values: &Values, value: u64) -> Result<u64, Status> {
    values.nearest(value).ok_or(Status::new(EINVAL))
}

impl HardwareParameters for FakeParameters<'_> {
    fn set_access(&mut self, access: Access) -> Result<(), Status> {
        self.call(Step::Access)?;

        if access == Access::Interleaved && !self.shared.capabilities.interleaved {
            return Err(Status::new(EINVAL));
        }

        self.shared.pending.access = Some(access);
        Ok(())
    }

    fn set_format(&mut self, format: SampleFormat) -> Result<(), Status> {
        self.call(Step::Format)?;

        if !self.shared.capabilities.formats.contains(&format) {
            return Err(Status::new(EINVAL));
        }

        self.shared.pending.format = Some(format);
        Ok(())
    }

    fn set_channels(&mut self, channels: u32) -> Result<(), Status> {
        self.call(Step::Channels)?;

        if channels == 0 || !self.shared.capabilities.channels.contains(u64::from(channels)) {
            return Err(Status::new(EINVAL));
        }

        self.shared.pending.channels = Some(channels);
        Ok(())
    }

    fn set_rate_resample(&mut self, _: bool) -> Result<(), Status> {
        self.call(Step::RateResample)
    }

    fn set_rate_near(&mut self, rate: u32) -> Result<u32, Status> {
        self.call(Step::Rate)?;
        let rate = near(&self.shared.capabilities.rates, u64::from(rate))?;
        let rate = u32::try_from(rate).map_err(|_| Status::new(EINVAL))?;
        self.shared.pending.rate = Some(rate);
        Ok(rate)
    }

    fn set_buffer_size_near(&mut self, frames: u64) -> Result<u64, Status> {
        self.call(Step::BufferSize)?;
        let frames = near(&self.shared.capabilities.buffer_sizes, frames)?;
        self.shared.pending.buffer_size = Some(frames);
        Ok(frames)
    }

    fn set_period_size_near(&mut self, frames: u64) -> Result<u64, Status> {
        self.call(Step::PeriodSize)?;
        let periods = &self.shared.capabilities.period_sizes;

        // A period never exceeds the buffer it is part of.
        let frames = match self.shared.pending.buffer_size {
            Some(buffer_size) => periods
                .nearest_at_most(frames, buffer_size)
                .ok_or(Status::new(EINVAL))?,
            None => near(periods, frames)?,
        };

        self.shared.pending.period_size = Some(frames);
        Ok(frames)
    }

    fn install(&mut self) -> Result<(), Status> {
        self.call(Step::Commit)?;

        let p = self.shared.pending;

        let config = match (p.format, p.channels, p.rate, p.buffer_size, p.period_size) {
            (Some(format), Some(channels), Some(rate), Some(buffer_size), Some(period_size))
                if rate > 0 && buffer_size > 0 && period_size > 0 =>
            {
                StreamConfig {
                    rate,
                    channels,
                    format,
                    buffer_size,
                    period_size,
                }
            }
            _ => return Err(Status::new(EINVAL)),
        };

        self.shared.installed = Some(config);
        Ok(())
    }

    fn can_pause(&self) -> bool {
        self.shared.capabilities.can_pause
    }
}

/// Drives and inspects a [FakeDevice].
///
/// Callbacks are issued on the thread calling [tick][FakeController::tick]
/// while the device lock is held, so application logic must not call back
/// into the controller.
#[derive(Clone)]
pub struct FakeController {
    shared: Arc<Mutex<Shared>>,
}

impl FakeController {
    /// Issue one callback of the given number of frames if the device is
    /// running, returning the buffer as it was left by the callback.
    ///
    /// Output buffers are filled with [GARBAGE] before the callback. Input
    /// buffers are filled with queued [input][FakeController::push_input],
    /// and whatever isn't covered is garbage unless capture pre-clearing is
    /// enabled.
    pub fn tick(&self, frames: usize, timestamp: Timestamp) -> Option<Period> {
        let mut guard = lock(&self.shared);
        let shared = &mut *guard;

        if !shared.running {
            return None;
        }

        let bridge = shared.bridge.as_mut()?;
        let config = *bridge.config();
        let direction = bridge.direction();
        let channels = config.channels as usize;
        let bytes = config.format.bytes();
        let planar = shared.capabilities.planar;

        let fill = match direction {
            Direction::Input if bridge.preclear_capture() => 0,
            _ => GARBAGE,
        };

        let mut period = Period {
            data: vec![fill; frames * channels * bytes],
            frames,
            channels,
            format: config.format,
            planar,
        };

        if direction == Direction::Input && channels > 0 {
            let available = usize::min(frames, shared.input.len() / (channels * bytes));

            for frame in 0..available {
                for channel in 0..channels {
                    let src = (frame * channels + channel) * bytes;
                    let dst = period.offset(channel, frame);
                    period.data[dst..dst + bytes].copy_from_slice(&shared.input[src..src + bytes]);
                }
            }

            shared.input.drain(..available * channels * bytes);
        }

        let base = period.data.as_mut_ptr();

        if planar {
            let areas = (0..channels)
                .map(|channel| {
                    ChannelArea::new(
                        base.wrapping_add(channel * frames * bytes),
                        bytes,
                        frames * bytes,
                    )
                })
                .collect::<Vec<_>>();

            // Safety: every area covers its own part of the period buffer.
            let mut view = unsafe { BufferView::from_areas(&areas, frames, config.format) };
            bridge.process(&mut view, timestamp);
        } else {
            // Safety: the period buffer is exactly large enough.
            let mut view = unsafe { BufferView::interleaved(base, frames, channels, config.format) };
            bridge.process(&mut view, timestamp);
        }

        Some(period)
    }

    /// Queue interleaved samples to be captured by input callbacks. The type
    /// should match the negotiated format.
    pub fn push_input<T>(&self, samples: &[T])
    where
        T: Sample,
    {
        // Safety: every sample type is plain old data without padding.
        let bytes = unsafe {
            slice::from_raw_parts(samples.as_ptr().cast::<u8>(), mem::size_of_val(samples))
        };

        lock(&self.shared).input.extend_from_slice(bytes);
    }

    /// Every negotiation step which has been run against the device since it
    /// was last acquired, in order.
    pub fn calls(&self) -> Vec<Step> {
        lock(&self.shared).calls.clone()
    }

    /// The installed configuration.
    pub fn installed(&self) -> Option<StreamConfig> {
        lock(&self.shared).installed
    }

    /// Test if the device is currently acquired.
    pub fn is_acquired(&self) -> bool {
        lock(&self.shared).acquired
    }

    /// Test if the device is issuing callbacks.
    pub fn is_running(&self) -> bool {
        lock(&self.shared).running
    }

    /// Test if the device was disposed since it was last acquired.
    pub fn disposed(&self) -> bool {
        lock(&self.shared).disposed
    }

    /// Replace the faults to inject.
    pub fn set_faults(&self, faults: Faults) {
        lock(&self.shared).faults = faults;
    }
}

impl fmt::Debug for FakeController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FakeController").finish_non_exhaustive()
    }
}

/// The buffer of a single callback issued by [FakeController::tick].
#[derive(Debug, Clone)]
pub struct Period {
    data: Vec<u8>,
    frames: usize,
    channels: usize,
    format: SampleFormat,
    planar: bool,
}

impl Period {
    /// The number of frames in the period.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// The number of channels in the period.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// The raw bytes of the period.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Read a single sample. Returns `None` if the sample is out of bounds or
    /// the type doesn't match the format.
    pub fn sample<T>(&self, channel: usize, frame: usize) -> Option<T>
    where
        T: Sample,
    {
        if T::FORMAT != self.format || channel >= self.channels || frame >= self.frames {
            return None;
        }

        let offset = self.offset(channel, frame);
        let bytes = self.data.get(offset..offset + self.format.bytes())?;
        // Safety: the slice holds exactly one sample of the matching format.
        Some(unsafe { bytes.as_ptr().cast::<T>().read_unaligned() })
    }

    /// Collect every sample of one channel. Empty if the channel is out of
    /// bounds or the type doesn't match the format.
    pub fn channel<T>(&self, channel: usize) -> Vec<T>
    where
        T: Sample,
    {
        (0..self.frames)
            .map_while(|frame| self.sample(channel, frame))
            .collect()
    }

    fn offset(&self, channel: usize, frame: usize) -> usize {
        let bytes = self.format.bytes();

        if self.planar {
            (channel * self.frames + frame) * bytes
        } else {
            (frame * self.channels + channel) * bytes
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nearest_prefers_smaller_on_tie() {
        assert_eq!(Values::only([100, 200]).nearest(150), Some(100));
        assert_eq!(Values::Any.nearest(150), Some(150));
    }

    #[test]
    fn test_parameters_require_acquire() {
        let mut device = FakeDevice::new(Capabilities::default());
        assert_eq!(device.parameters().err(), Some(Status::new(EBADFD)));
    }

    #[test]
    fn test_period_clamped_to_buffer() {
        let mut device = FakeDevice::new(Capabilities::default());
        device.acquire(Direction::Output, &Options::default()).unwrap();

        let mut hw = device.parameters().unwrap();
        assert_eq!(hw.set_buffer_size_near(128).unwrap(), 128);
        assert_eq!(hw.set_period_size_near(256).unwrap(), 128);
    }

    #[test]
    fn test_period_only_picks_supported_sizes_within_buffer() {
        let mut device = FakeDevice::new(Capabilities {
            period_sizes: Values::only([32, 512]),
            ..Capabilities::default()
        });

        device.acquire(Direction::Output, &Options::default()).unwrap();

        let mut hw = device.parameters().unwrap();
        assert_eq!(hw.set_buffer_size_near(128).unwrap(), 128);
        assert_eq!(hw.set_period_size_near(256).unwrap(), 32);
        assert_eq!(hw.set_buffer_size_near(16).unwrap(), 16);
        assert_eq!(hw.set_period_size_near(256), Err(Status::new(EINVAL)));
    }

    #[test]
    fn test_injected_step_fault() {
        let device = FakeDevice::new(Capabilities::default());
        let controller = device.controller();

        controller.set_faults(Faults {
            step: Some((Step::Commit, Status::new(-5))),
            ..Faults::default()
        });

        let mut device = device;
        device.acquire(Direction::Output, &Options::default()).unwrap();
        let mut hw = device.parameters().unwrap();
        assert_eq!(hw.install(), Err(Status::new(-5)));
        drop(hw);

        assert_eq!(controller.calls(), vec![Step::Commit]);
        assert_eq!(controller.installed(), None);
    }

    #[test]
    fn test_period_sample_layout() {
        let period = Period {
            data: vec![1, 2, 3, 4],
            frames: 2,
            channels: 2,
            format: SampleFormat::I8,
            planar: true,
        };

        assert_eq!(period.channel::<i8>(0), vec![1, 2]);
        assert_eq!(period.channel::<i8>(1), vec![3, 4]);
        assert!(period.channel::<i16>(0).is_empty());
    }
}
