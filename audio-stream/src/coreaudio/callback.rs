//! Render and input procedures handed to an audio unit.
//!
//! The unit calls these on its own real-time thread with the [Context]
//! registered as `inRefCon`. Nothing in here allocates or locks.

use crate::{Bridge, BufferView, ChannelArea, Direction, PlatformBuffer, SampleFormat, Timestamp};
use coreaudio_sys as ca;
use std::os::raw::c_void;
use std::slice;

/// Converts host time ticks into nanoseconds.
#[derive(Debug, Clone, Copy)]
pub(super) struct Timebase {
    numer: u64,
    denom: u64,
}

impl Timebase {
    pub(super) fn new() -> Self {
        let mut info = libc::mach_timebase_info { numer: 0, denom: 0 };

        // Safety: the pointer is valid for the duration of the call.
        let ok = unsafe { libc::mach_timebase_info(&mut info) } == 0;

        if !ok || info.denom == 0 {
            return Self { numer: 1, denom: 1 };
        }

        Self {
            numer: u64::from(info.numer),
            denom: u64::from(info.denom),
        }
    }

    fn to_timestamp(self, host_time: u64) -> Timestamp {
        let nanos = u128::from(host_time) * u128::from(self.numer) / u128::from(self.denom);
        Timestamp::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    fn timestamp(self, ts: *const ca::AudioTimeStamp) -> Timestamp {
        // Safety: the unit passes a timestamp valid for the callback, or null.
        unsafe {
            if let Some(ts) = ts.as_ref() {
                if ts.mFlags & ca::kAudioTimeStampHostTimeValid != 0 {
                    return self.to_timestamp(ts.mHostTime);
                }
            }

            self.to_timestamp(libc::mach_absolute_time())
        }
    }
}

/// State reachable from the callback of one unit.
pub(super) struct Context {
    pub(super) bridge: Bridge,
    pub(super) unit: ca::AudioUnit,
    pub(super) timebase: Timebase,
    /// The configured number of channels.
    channels: usize,
    /// Channel areas rebuilt on every render without reallocating.
    areas: Vec<ChannelArea>,
    /// Input is rendered into this buffer.
    scratch: Vec<u8>,
}

impl Context {
    pub(super) fn new(bridge: Bridge, unit: ca::AudioUnit, max_frames: usize) -> Self {
        let config = *bridge.config();
        let channels = config.channels as usize;

        let scratch = match bridge.direction() {
            Direction::Input => vec![0; max_frames * config.frame_bytes()],
            Direction::Output => Vec::new(),
        };

        Self {
            bridge,
            unit,
            timebase: Timebase::new(),
            channels,
            areas: Vec::with_capacity(channels),
            scratch,
        }
    }
}

/// The render procedure of an output unit.
pub(super) unsafe extern "C" fn render(
    ref_con: *mut c_void,
    _: *mut ca::AudioUnitRenderActionFlags,
    ts: *const ca::AudioTimeStamp,
    _: u32,
    frames: u32,
    data: *mut ca::AudioBufferList,
) -> ca::OSStatus {
    let (context, list) = match (ref_con.cast::<Context>().as_mut(), data.as_mut()) {
        (Some(context), Some(list)) => (context, list),
        _ => return ca::kAudio_ParamError as ca::OSStatus,
    };

    let format = context.bridge.config().format;
    let timestamp = context.timebase.timestamp(ts);

    let buffers = slice::from_raw_parts_mut(
        list.mBuffers.as_mut_ptr(),
        list.mNumberBuffers as usize,
    );

    let view = BufferView::from_buffers(
        buffers,
        &mut context.areas,
        frames as usize,
        context.channels,
        format,
    );

    if let Some(mut view) = view {
        context.bridge.process(&mut view, timestamp);
    }

    0
}

/// The input procedure of an input unit. Pulls captured frames from the unit
/// into the scratch buffer of the context.
pub(super) unsafe extern "C" fn input(
    ref_con: *mut c_void,
    flags: *mut ca::AudioUnitRenderActionFlags,
    ts: *const ca::AudioTimeStamp,
    bus: u32,
    frames: u32,
    _: *mut ca::AudioBufferList,
) -> ca::OSStatus {
    let context = match ref_con.cast::<Context>().as_mut() {
        Some(context) => context,
        None => return ca::kAudio_ParamError as ca::OSStatus,
    };

    let config = *context.bridge.config();
    let frame_bytes = config.frame_bytes();

    if frame_bytes == 0 {
        return 0;
    }

    let frames = (frames as usize).min(context.scratch.len() / frame_bytes);
    let len = frames * frame_bytes;

    if context.bridge.preclear_capture() {
        context.scratch[..len].fill(0);
    }

    let mut list = ca::AudioBufferList {
        mNumberBuffers: 1,
        mBuffers: [ca::AudioBuffer {
            mNumberChannels: config.channels,
            mDataByteSize: len as u32,
            mData: context.scratch.as_mut_ptr().cast(),
        }],
    };

    let status = ca::AudioUnitRender(context.unit, flags, ts, bus, frames as u32, &mut list);

    if status != 0 {
        return status;
    }

    let timestamp = context.timebase.timestamp(ts);

    let view = BufferView::from_buffers(
        &mut list.mBuffers[..],
        &mut context.areas,
        frames,
        context.channels,
        config.format,
    );

    if let Some(mut view) = view {
        context.bridge.process(&mut view, timestamp);
    }

    0
}

impl PlatformBuffer for ca::AudioBuffer {
    fn data(&self) -> *mut u8 {
        self.mData.cast()
    }

    fn byte_size(&self) -> usize {
        self.mDataByteSize as usize
    }

    fn channels(&self) -> u32 {
        self.mNumberChannels
    }

    fn set_channels(&mut self, channels: u32) {
        self.mNumberChannels = channels;
    }
}

/// The stream format flags for a sample format.
pub(super) fn format_flags(format: SampleFormat) -> ca::AudioFormatFlags {
    let kind = if format.is_float() {
        ca::kAudioFormatFlagIsFloat
    } else {
        ca::kAudioFormatFlagIsSignedInteger
    };

    (kind | ca::kAudioFormatFlagIsPacked) as ca::AudioFormatFlags
}
