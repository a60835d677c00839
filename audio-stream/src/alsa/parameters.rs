use crate::alsa::Pcm;
use crate::device::{Access, HardwareParameters};
use crate::{SampleFormat, Status};
use alsa_sys as alsa;
use std::marker;
use std::mem;
use std::ptr;

/// Hardware parameters of an [AlsaDevice][super::AlsaDevice] being
/// negotiated.
///
/// Installing them also installs software parameters which start the stream
/// once the buffer is filled with whole periods, and wake the I/O thread once
/// per period.
pub struct AlsaParameters<'a> {
    pcm: Pcm,
    handle: ptr::NonNull<alsa::snd_pcm_hw_params_t>,
    buffer_size: alsa::snd_pcm_uframes_t,
    period_size: alsa::snd_pcm_uframes_t,
    can_pause: &'a mut bool,
    _marker: marker::PhantomData<&'a mut Pcm>,
}

impl<'a> AlsaParameters<'a> {
    /// Open the full configuration space of the given pcm.
    pub(super) unsafe fn any(pcm: Pcm, can_pause: &'a mut bool) -> Result<Self, Status> {
        let mut handle = mem::MaybeUninit::uninit();

        status!(alsa::snd_pcm_hw_params_malloc(handle.as_mut_ptr()))?;

        let handle = match ptr::NonNull::new(handle.assume_init()) {
            Some(handle) => handle,
            None => return Err(Status::new(-libc::ENOMEM)),
        };

        if let Err(e) = status!(alsa::snd_pcm_hw_params_any(pcm.as_ptr(), handle.as_ptr())) {
            alsa::snd_pcm_hw_params_free(handle.as_ptr());
            return Err(e);
        }

        Ok(Self {
            pcm,
            handle,
            buffer_size: 0,
            period_size: 0,
            can_pause,
            _marker: marker::PhantomData,
        })
    }

    fn install_software_parameters(&mut self) -> Result<(), Status> {
        unsafe {
            let mut sw = mem::MaybeUninit::uninit();
            status!(alsa::snd_pcm_sw_params_malloc(sw.as_mut_ptr()))?;
            let sw = sw.assume_init();

            let result = (|| {
                let pcm = self.pcm.as_ptr();
                status!(alsa::snd_pcm_sw_params_current(pcm, sw))?;

                let threshold = match self.period_size {
                    0 => self.buffer_size,
                    period => (self.buffer_size / period) * period,
                };

                status!(alsa::snd_pcm_sw_params_set_start_threshold(pcm, sw, threshold))?;
                status!(alsa::snd_pcm_sw_params_set_avail_min(pcm, sw, self.period_size))?;
                status!(alsa::snd_pcm_sw_params(pcm, sw))?;
                Ok(())
            })();

            alsa::snd_pcm_sw_params_free(sw);
            result
        }
    }
}

/// The native-endian ALSA format for a sample format.
pub(super) fn format(format: SampleFormat) -> alsa::snd_pcm_format_t {
    match format {
        SampleFormat::I8 => alsa::SND_PCM_FORMAT_S8,
        #[cfg(target_endian = "little")]
        SampleFormat::I16 => alsa::SND_PCM_FORMAT_S16_LE,
        #[cfg(target_endian = "big")]
        SampleFormat::I16 => alsa::SND_PCM_FORMAT_S16_BE,
        #[cfg(target_endian = "little")]
        SampleFormat::I32 => alsa::SND_PCM_FORMAT_S32_LE,
        #[cfg(target_endian = "big")]
        SampleFormat::I32 => alsa::SND_PCM_FORMAT_S32_BE,
        #[cfg(target_endian = "little")]
        SampleFormat::F32 => alsa::SND_PCM_FORMAT_FLOAT_LE,
        #[cfg(target_endian = "big")]
        SampleFormat::F32 => alsa::SND_PCM_FORMAT_FLOAT_BE,
    }
}

impl HardwareParameters for AlsaParameters<'_> {
    fn set_access(&mut self, access: Access) -> Result<(), Status> {
        let access = match access {
            Access::Interleaved => alsa::SND_PCM_ACCESS_RW_INTERLEAVED,
            Access::NonInterleaved => alsa::SND_PCM_ACCESS_RW_NONINTERLEAVED,
        };

        unsafe {
            status!(alsa::snd_pcm_hw_params_set_access(
                self.pcm.as_ptr(),
                self.handle.as_ptr(),
                access
            ))?;
        }

        Ok(())
    }

    fn set_format(&mut self, sample_format: SampleFormat) -> Result<(), Status> {
        unsafe {
            status!(alsa::snd_pcm_hw_params_set_format(
                self.pcm.as_ptr(),
                self.handle.as_ptr(),
                format(sample_format)
            ))?;
        }

        Ok(())
    }

    fn set_channels(&mut self, channels: u32) -> Result<(), Status> {
        unsafe {
            status!(alsa::snd_pcm_hw_params_set_channels(
                self.pcm.as_ptr(),
                self.handle.as_ptr(),
                channels as _
            ))?;
        }

        Ok(())
    }

    fn set_rate_resample(&mut self, resample: bool) -> Result<(), Status> {
        unsafe {
            status!(alsa::snd_pcm_hw_params_set_rate_resample(
                self.pcm.as_ptr(),
                self.handle.as_ptr(),
                if resample { 1 } else { 0 }
            ))?;
        }

        Ok(())
    }

    fn set_rate_near(&mut self, rate: u32) -> Result<u32, Status> {
        let mut rate = rate as libc::c_uint;
        let mut dir = 0;

        unsafe {
            status!(alsa::snd_pcm_hw_params_set_rate_near(
                self.pcm.as_ptr(),
                self.handle.as_ptr(),
                &mut rate,
                &mut dir
            ))?;
        }

        Ok(rate as u32)
    }

    fn set_buffer_size_near(&mut self, frames: u64) -> Result<u64, Status> {
        let mut frames = frames as alsa::snd_pcm_uframes_t;

        unsafe {
            status!(alsa::snd_pcm_hw_params_set_buffer_size_near(
                self.pcm.as_ptr(),
                self.handle.as_ptr(),
                &mut frames
            ))?;
        }

        self.buffer_size = frames;
        Ok(frames as u64)
    }

    fn set_period_size_near(&mut self, frames: u64) -> Result<u64, Status> {
        let mut frames = frames as alsa::snd_pcm_uframes_t;
        let mut dir = 0;

        unsafe {
            status!(alsa::snd_pcm_hw_params_set_period_size_near(
                self.pcm.as_ptr(),
                self.handle.as_ptr(),
                &mut frames,
                &mut dir
            ))?;
        }

        self.period_size = frames;
        Ok(frames as u64)
    }

    fn install(&mut self) -> Result<(), Status> {
        unsafe {
            status!(alsa::snd_pcm_hw_params(
                self.pcm.as_ptr(),
                self.handle.as_ptr()
            ))?;

            *self.can_pause = alsa::snd_pcm_hw_params_can_pause(self.handle.as_ptr()) == 1;
        }

        self.install_software_parameters()
    }

    fn can_pause(&self) -> bool {
        *self.can_pause
    }
}

impl Drop for AlsaParameters<'_> {
    fn drop(&mut self) {
        unsafe {
            alsa::snd_pcm_hw_params_free(self.handle.as_ptr());
        }
    }
}
