//! Callback-driven real-time audio streams.
//!
//! This crate opens a playback or capture stream on an audio device,
//! negotiates a workable hardware configuration and then repeatedly hands
//! fixed-size blocks of frames to application code on the real-time thread of
//! the audio subsystem.
//!
//! The moving parts are:
//!
//! * [negotiate] which asks a device for the closest configuration it
//!   supports, in a fixed order of steps, reporting the first step which was
//!   rejected.
//! * [StreamHandle] which owns an opened device and drives its lifecycle
//!   (`open`, `start`, `stop`, `close`).
//! * [Bridge] which is invoked once per buffer period, wraps the platform
//!   buffers in a [BufferView] and forwards them to a [RenderSink] or a
//!   [CaptureSource]. Anything a render sink fails to produce is silenced.
//! * [Timing] which correlates the first sample times of the two directions
//!   of a full-[Duplex] session.
//!
//! <br>
//!
//! ## Examples
//!
//! Rendering silence-guarded audio to the in-process [fake] device:
//!
//! ```rust
//! use audio_stream::fake::{Capabilities, FakeDevice};
//! use audio_stream::{BufferView, Direction, Handler, Options, StreamConfig, StreamHandle, Timestamp};
//!
//! # fn main() -> anyhow::Result<()> {
//! let device = FakeDevice::new(Capabilities::default());
//! let controller = device.controller();
//!
//! let handler = Handler::render_fn(|buf: &mut BufferView<'_>| {
//!     for frame in 0..buf.frames() / 2 {
//!         for channel in 0..buf.channels() {
//!             buf.write(channel, frame, 1000i16)?;
//!         }
//!     }
//!
//!     Ok(buf.frames() / 2)
//! });
//!
//! let config = StreamConfig::default();
//! let mut stream = StreamHandle::open(device, Direction::Output, &config, handler, &Options::default())?;
//! stream.start()?;
//!
//! let period = controller.tick(4, Timestamp::from_nanos(0)).expect("stream is running");
//! assert_eq!(period.channel::<i16>(0), vec![1000, 1000, 0, 0]);
//!
//! stream.close()?;
//! # Ok(()) }
//! ```
//!
//! <br>
//!
//! ## Backends
//!
//! | Platform | System    | Feature     |
//! |----------|-----------|-------------|
//! | Linux    | ALSA      | `alsa`      |
//! | macOS    | CoreAudio | `coreaudio` |
//! | Any      | In-process| always      |

#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub(crate) mod loom;

#[macro_use]
#[doc(hidden)]
mod macros;

mod error;
pub use self::error::{Error, Operation, Result, Status};

mod sample;
pub use self::sample::{Sample, SampleFormat};

mod config;
pub use self::config::{Direction, Options, StreamConfig};

pub mod negotiate;
#[doc(inline)]
pub use self::negotiate::{negotiate, NegotiationError, Step};

pub mod device;
#[doc(inline)]
pub use self::device::{Access, Device, HardwareParameters};

mod buffer;
pub use self::buffer::{BufferError, BufferView, ChannelArea, PlatformBuffer};

mod timing;
pub use self::timing::{TimeOffset, Timestamp, Timing};

mod bridge;
pub use self::bridge::{Bridge, CallbackError, CaptureSource, Handler, RenderSink, StreamStats};

mod stream;
pub use self::stream::{State, StreamHandle};

mod duplex;
pub use self::duplex::Duplex;

pub mod handoff;

pub mod fake;

#[cfg(all(test, not(loom)))]
mod tests;

cfg_alsa! {
    pub mod alsa;
}

cfg_coreaudio! {
    pub mod coreaudio;
}
