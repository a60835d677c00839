//! The platform surface a stream depends on.
//!
//! Every backend implements [Device] for its device or unit handle, and hands
//! out a [HardwareParameters] capability object which the
//! [negotiate][crate::negotiate()] pipeline is run against.

use crate::{Bridge, Direction, Options, SampleFormat, Status};

/// How samples of different channels are laid out in device memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    /// All channels of a frame are stored next to each other.
    Interleaved,
    /// Each channel is stored in a buffer of its own.
    NonInterleaved,
}

/// The capability object of a device which is being configured.
///
/// The `_near` methods restrict the configuration to the supported value
/// closest to the argument and return the value which was picked. Nothing
/// takes effect until [install][HardwareParameters::install] succeeds.
pub trait HardwareParameters {
    /// Restrict the configuration to the given access mode.
    fn set_access(&mut self, access: Access) -> Result<(), Status>;

    /// Restrict the configuration to the given sample format.
    fn set_format(&mut self, format: SampleFormat) -> Result<(), Status>;

    /// Restrict the configuration to the given number of channels.
    fn set_channels(&mut self, channels: u32) -> Result<(), Status>;

    /// Enable or disable software resampling by the driver.
    fn set_rate_resample(&mut self, resample: bool) -> Result<(), Status>;

    /// Restrict the configuration to the supported rate nearest to `rate`.
    fn set_rate_near(&mut self, rate: u32) -> Result<u32, Status>;

    /// Restrict the configuration to the supported buffer size nearest to
    /// `frames`.
    fn set_buffer_size_near(&mut self, frames: u64) -> Result<u64, Status>;

    /// Restrict the configuration to the supported period size nearest to
    /// `frames`.
    fn set_period_size_near(&mut self, frames: u64) -> Result<u64, Status>;

    /// Commit the configuration to the device.
    fn install(&mut self) -> Result<(), Status>;

    /// Test if the committed configuration supports pausing without dropping
    /// buffered frames.
    fn can_pause(&self) -> bool {
        false
    }
}

/// An audio device or unit driven by a [StreamHandle][crate::StreamHandle].
///
/// Lifecycle methods are only ever called from the thread controlling the
/// stream, one at a time, in the order `acquire`, `parameters`, `register`,
/// then any sequence of `start` and `stop`, and finally `uninitialize`
/// followed by `dispose`.
pub trait Device {
    /// The capability object used while negotiating.
    type Parameters<'a>: HardwareParameters
    where
        Self: 'a;

    /// Acquire the underlying device for the given direction.
    fn acquire(&mut self, direction: Direction, options: &Options) -> Result<(), Status>;

    /// Access the full configuration space of the acquired device.
    fn parameters(&mut self) -> Result<Self::Parameters<'_>, Status>;

    /// Register the bridge as the callback of the device. The device takes
    /// ownership of the bridge and must call
    /// [Bridge::process][crate::Bridge::process] once per period while
    /// started.
    fn register(&mut self, bridge: Bridge) -> Result<(), Status>;

    /// Begin invoking the callback. Must not block waiting for it.
    fn start(&mut self) -> Result<(), Status>;

    /// Stop invoking the callback. Once this returns no further callbacks may
    /// be issued.
    fn stop(&mut self) -> Result<(), Status>;

    /// Tear down the configuration of the device.
    fn uninitialize(&mut self) -> Result<(), Status>;

    /// Release the device. Ownership of the platform resource is relinquished
    /// even if this fails.
    fn dispose(&mut self) -> Result<(), Status>;
}
