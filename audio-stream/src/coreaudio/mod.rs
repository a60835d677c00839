//! The CoreAudio backend.
//!
//! Output streams use the `DefaultOutput` audio unit. Input streams use a
//! `HALOutput` unit with input enabled, bound to the default input device.
//! The unit resamples internally, so any requested rate is accepted as is.
//! Callbacks are issued once per device I/O buffer, which makes the period the
//! same size as the buffer.

use crate::device::{Access, Device, HardwareParameters};
use crate::{Bridge, Direction, Options, SampleFormat, Status};
use coreaudio_sys as ca;
use std::mem;
use std::os::raw::c_void;
use std::ptr;

mod callback;
use self::callback::Context;

/// An audio unit.
pub struct CoreAudioDevice {
    unit: Option<ca::AudioUnit>,
    direction: Direction,
    format: ca::AudioStreamBasicDescription,
    context: Option<Box<Context>>,
    initialized: bool,
}

impl CoreAudioDevice {
    /// Construct a device which acquires the default unit of the stream
    /// direction.
    pub fn new() -> Self {
        Self {
            unit: None,
            direction: Direction::Output,
            // Safety: the description is plain old data.
            format: unsafe { mem::zeroed() },
            context: None,
            initialized: false,
        }
    }

    fn unit(&self) -> Result<ca::AudioUnit, Status> {
        self.unit
            .ok_or(Status::new(ca::kAudioUnitErr_Uninitialized as i32))
    }

    /// The scope and element the client side stream format lives on.
    fn format_scope(&self) -> (ca::AudioUnitScope, ca::AudioUnitElement) {
        match self.direction {
            Direction::Output => (ca::kAudioUnitScope_Input as _, 0),
            Direction::Input => (ca::kAudioUnitScope_Output as _, 1),
        }
    }
}

impl Default for CoreAudioDevice {
    fn default() -> Self {
        Self::new()
    }
}

unsafe fn set_property<T>(
    unit: ca::AudioUnit,
    property: u32,
    scope: ca::AudioUnitScope,
    element: ca::AudioUnitElement,
    value: &T,
) -> Result<(), Status> {
    os_status!(ca::AudioUnitSetProperty(
        unit,
        property,
        scope,
        element,
        (value as *const T).cast(),
        mem::size_of::<T>() as u32,
    ))
}

unsafe fn get_property<T>(
    unit: ca::AudioUnit,
    property: u32,
    scope: ca::AudioUnitScope,
    element: ca::AudioUnitElement,
) -> Result<T, Status> {
    let mut value = mem::MaybeUninit::<T>::uninit();
    let mut size = mem::size_of::<T>() as u32;

    os_status!(ca::AudioUnitGetProperty(
        unit,
        property,
        scope,
        element,
        value.as_mut_ptr().cast(),
        &mut size,
    ))?;

    Ok(value.assume_init())
}

/// Look up the default input device.
unsafe fn default_input_device() -> Result<ca::AudioDeviceID, Status> {
    let address = ca::AudioObjectPropertyAddress {
        mSelector: ca::kAudioHardwarePropertyDefaultInputDevice,
        mScope: ca::kAudioObjectPropertyScopeGlobal,
        mElement: 0,
    };

    let mut device: ca::AudioDeviceID = 0;
    let mut size = mem::size_of::<ca::AudioDeviceID>() as u32;

    os_status!(ca::AudioObjectGetPropertyData(
        ca::kAudioObjectSystemObject as _,
        &address,
        0,
        ptr::null(),
        &mut size,
        (&mut device as *mut ca::AudioDeviceID).cast(),
    ))?;

    Ok(device)
}

unsafe fn open_unit(direction: Direction) -> Result<ca::AudioUnit, Status> {
    let sub_type = match direction {
        Direction::Output => ca::kAudioUnitSubType_DefaultOutput,
        Direction::Input => ca::kAudioUnitSubType_HALOutput,
    };

    let description = ca::AudioComponentDescription {
        componentType: ca::kAudioUnitType_Output as _,
        componentSubType: sub_type as _,
        componentManufacturer: ca::kAudioUnitManufacturer_Apple as _,
        componentFlags: 0,
        componentFlagsMask: 0,
    };

    let component = ca::AudioComponentFindNext(ptr::null_mut(), &description);

    if component.is_null() {
        return Err(Status::new(ca::kAudioUnitErr_InvalidElement as i32));
    }

    let mut unit = mem::MaybeUninit::uninit();
    os_status!(ca::AudioComponentInstanceNew(component, unit.as_mut_ptr()))?;
    let unit = unit.assume_init();

    if direction == Direction::Input {
        let result = (|| {
            let scope: ca::AudioUnitScope = ca::kAudioUnitScope_Input as _;
            set_property(unit, ca::kAudioOutputUnitProperty_EnableIO, scope, 1, &1u32)?;
            let scope: ca::AudioUnitScope = ca::kAudioUnitScope_Output as _;
            set_property(unit, ca::kAudioOutputUnitProperty_EnableIO, scope, 0, &0u32)?;

            let device = default_input_device()?;
            let scope: ca::AudioUnitScope = ca::kAudioUnitScope_Global as _;
            set_property(unit, ca::kAudioOutputUnitProperty_CurrentDevice, scope, 0, &device)
        })();

        if let Err(status) = result {
            ca::AudioComponentInstanceDispose(unit);
            return Err(status);
        }
    }

    Ok(unit)
}

impl Device for CoreAudioDevice {
    type Parameters<'a> = CoreAudioParameters<'a>;

    fn acquire(&mut self, direction: Direction, options: &Options) -> Result<(), Status> {
        if self.unit.is_some() {
            return Err(Status::new(ca::kAudioUnitErr_Initialized as i32));
        }

        if let Some(name) = &options.name {
            tracing::debug!(name = %name, "named devices are not supported, using the default device");
        }

        let unit = unsafe { open_unit(direction)? };

        self.unit = Some(unit);
        self.direction = direction;
        // Safety: the description is plain old data.
        self.format = unsafe { mem::zeroed() };
        self.format.mFormatID = ca::kAudioFormatLinearPCM as _;
        self.format.mFramesPerPacket = 1;

        tracing::debug!(%direction, "opened audio unit");
        Ok(())
    }

    fn parameters(&mut self) -> Result<Self::Parameters<'_>, Status> {
        let unit = self.unit()?;
        let (scope, element) = self.format_scope();

        Ok(CoreAudioParameters {
            unit,
            scope,
            element,
            buffer_size: 0,
            format: None,
            interleaved: true,
            description: &mut self.format,
        })
    }

    fn register(&mut self, bridge: Bridge) -> Result<(), Status> {
        let unit = self.unit()?;

        let max_frames = unsafe {
            get_property::<u32>(
                unit,
                ca::kAudioUnitProperty_MaximumFramesPerSlice,
                ca::kAudioUnitScope_Global as _,
                0,
            )?
        };

        let direction = bridge.direction();
        let mut context = Box::new(Context::new(bridge, unit, max_frames as usize));

        let (property, procedure): (u32, ca::AURenderCallback) = match direction {
            Direction::Output => (ca::kAudioUnitProperty_SetRenderCallback, Some(callback::render)),
            Direction::Input => (
                ca::kAudioOutputUnitProperty_SetInputCallback,
                Some(callback::input),
            ),
        };

        let callback = ca::AURenderCallbackStruct {
            inputProc: procedure,
            inputProcRefCon: (&mut *context as *mut Context).cast::<c_void>(),
        };

        unsafe {
            let scope: ca::AudioUnitScope = match direction {
                Direction::Output => ca::kAudioUnitScope_Input as _,
                Direction::Input => ca::kAudioUnitScope_Global as _,
            };

            set_property(unit, property, scope, 0, &callback)?;
            // The box is kept alive until the unit is disposed.
            self.context = Some(context);

            os_status!(ca::AudioUnitInitialize(unit))?;
        }

        self.initialized = true;
        Ok(())
    }

    fn start(&mut self) -> Result<(), Status> {
        let unit = self.unit()?;
        unsafe { os_status!(ca::AudioOutputUnitStart(unit)) }
    }

    fn stop(&mut self) -> Result<(), Status> {
        let unit = self.unit()?;
        unsafe { os_status!(ca::AudioOutputUnitStop(unit)) }
    }

    fn uninitialize(&mut self) -> Result<(), Status> {
        let unit = self.unit()?;

        if !mem::take(&mut self.initialized) {
            return Ok(());
        }

        unsafe { os_status!(ca::AudioUnitUninitialize(unit)) }
    }

    fn dispose(&mut self) -> Result<(), Status> {
        let unit = match self.unit.take() {
            Some(unit) => unit,
            None => return Ok(()),
        };

        self.initialized = false;
        let result = unsafe { os_status!(ca::AudioComponentInstanceDispose(unit)) };
        // No callbacks can be issued past this point.
        self.context = None;
        result
    }
}

impl Drop for CoreAudioDevice {
    fn drop(&mut self) {
        if let Err(status) = self.dispose() {
            tracing::warn!(%status, "failed to dispose audio unit");
        }
    }
}

/// The stream format of a [CoreAudioDevice] being negotiated.
pub struct CoreAudioParameters<'a> {
    unit: ca::AudioUnit,
    scope: ca::AudioUnitScope,
    element: ca::AudioUnitElement,
    buffer_size: u64,
    format: Option<SampleFormat>,
    interleaved: bool,
    description: &'a mut ca::AudioStreamBasicDescription,
}

impl HardwareParameters for CoreAudioParameters<'_> {
    fn set_access(&mut self, access: Access) -> Result<(), Status> {
        self.interleaved = access == Access::Interleaved;
        Ok(())
    }

    fn set_format(&mut self, format: SampleFormat) -> Result<(), Status> {
        self.description.mBitsPerChannel = (format.bytes() * 8) as u32;
        self.format = Some(format);
        Ok(())
    }

    fn set_channels(&mut self, channels: u32) -> Result<(), Status> {
        if channels == 0 {
            return Err(Status::new(ca::kAudio_ParamError as i32));
        }

        self.description.mChannelsPerFrame = channels;
        Ok(())
    }

    fn set_rate_resample(&mut self, _: bool) -> Result<(), Status> {
        Ok(())
    }

    fn set_rate_near(&mut self, rate: u32) -> Result<u32, Status> {
        if rate == 0 {
            return Err(Status::new(ca::kAudio_ParamError as i32));
        }

        self.description.mSampleRate = f64::from(rate);
        Ok(rate)
    }

    fn set_buffer_size_near(&mut self, frames: u64) -> Result<u64, Status> {
        let frames = u32::try_from(frames).unwrap_or(u32::MAX);
        let global: ca::AudioUnitScope = ca::kAudioUnitScope_Global as _;

        let actual = unsafe {
            set_property(self.unit, ca::kAudioDevicePropertyBufferFrameSize, global, 0, &frames)?;
            get_property::<u32>(self.unit, ca::kAudioDevicePropertyBufferFrameSize, global, 0)?
        };

        self.buffer_size = u64::from(actual);
        Ok(self.buffer_size)
    }

    fn set_period_size_near(&mut self, _: u64) -> Result<u64, Status> {
        Ok(self.buffer_size)
    }

    fn install(&mut self) -> Result<(), Status> {
        let format = match self.format {
            Some(format) => format,
            None => return Err(Status::new(ca::kAudio_ParamError as i32)),
        };

        let d = &mut *self.description;
        d.mFormatFlags = callback::format_flags(format);

        if self.interleaved {
            d.mBytesPerFrame = d.mChannelsPerFrame * format.bytes() as u32;
        } else {
            d.mFormatFlags |= ca::kAudioFormatFlagIsNonInterleaved as ca::AudioFormatFlags;
            d.mBytesPerFrame = format.bytes() as u32;
        }

        d.mBytesPerPacket = d.mBytesPerFrame;
        d.mFramesPerPacket = 1;

        unsafe {
            set_property(
                self.unit,
                ca::kAudioUnitProperty_StreamFormat,
                self.scope,
                self.element,
                &*self.description,
            )
        }
    }
}
