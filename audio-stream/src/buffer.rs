use crate::{Sample, SampleFormat};
use std::marker;
use std::ptr;
use thiserror::Error;

/// Errors raised when accessing a [BufferView].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BufferError {
    /// The sample type doesn't match the format of the buffer.
    #[error("type `{ty}` is not appropriate to use with format `{format}`")]
    FormatMismatch {
        /// A description of the type used.
        ty: &'static str,
        /// The format of the buffer.
        format: SampleFormat,
    },
    /// The channel is out of bounds.
    #[error("channel {channel} out of bounds; channels = {channels}")]
    ChannelOutOfBounds {
        /// The channel accessed.
        channel: usize,
        /// The number of channels in the buffer.
        channels: usize,
    },
    /// The frame is out of bounds.
    #[error("frame {frame} out of bounds; frames = {frames}")]
    FrameOutOfBounds {
        /// The frame accessed.
        frame: usize,
        /// The number of frames in the buffer.
        frames: usize,
    },
}

/// The memory of a single channel in a platform buffer.
///
/// Sample `n` of the channel lives at `base + n * step`, and `len` bytes
/// starting at `base` belong to the buffer.
#[derive(Debug, Clone, Copy)]
pub struct ChannelArea {
    base: *mut u8,
    step: usize,
    len: usize,
}

impl ChannelArea {
    /// Describe a channel area.
    pub const fn new(base: *mut u8, step: usize, len: usize) -> Self {
        Self { base, step, len }
    }

    /// The first byte of the channel.
    pub fn base(&self) -> *mut u8 {
        self.base
    }

    /// The number of bytes between two consecutive samples.
    pub fn step(&self) -> usize {
        self.step
    }

    /// The declared length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Test if the area is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for ChannelArea {
    fn default() -> Self {
        Self::new(ptr::null_mut(), 0, 0)
    }
}

// Safety: an area is only a description, it's only dereferenced through a
// `BufferView` whose lifetime is bound to the callback.
unsafe impl Send for ChannelArea {}

/// A buffer descriptor as handed out by a platform, such as an `AudioBuffer`
/// in an `AudioBufferList`.
///
/// See [BufferView::from_buffers].
pub trait PlatformBuffer {
    /// The first byte of the buffer.
    fn data(&self) -> *mut u8;

    /// The size of the buffer in bytes.
    fn byte_size(&self) -> usize;

    /// The number of interleaved channels in the buffer. Platforms may leave
    /// this as zero.
    fn channels(&self) -> u32;

    /// Fill in the number of interleaved channels.
    fn set_channels(&mut self, channels: u32);
}

enum Layout<'a> {
    Interleaved { base: *mut u8, len: usize },
    Areas(&'a [ChannelArea]),
}

/// A non-owning view of one callback's worth of samples.
///
/// The view is only valid for the duration of the callback it was handed to,
/// which its lifetime enforces. Samples are accessed by `(channel, frame)`
/// regardless of how the platform lays them out.
///
/// # Examples
///
/// ```rust
/// use audio_stream::BufferView;
///
/// # fn main() -> anyhow::Result<()> {
/// let mut data = [1.0f32; 8];
/// let mut buf = BufferView::from_slice(&mut data[..], 2);
///
/// assert_eq!(buf.frames(), 4);
/// buf.write(1, 0, 0.5f32)?;
/// buf.silence_from(2);
///
/// assert_eq!(data, [1.0, 0.5, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0]);
/// # Ok(()) }
/// ```
pub struct BufferView<'a> {
    layout: Layout<'a>,
    frames: usize,
    channels: usize,
    format: SampleFormat,
    _marker: marker::PhantomData<&'a mut [u8]>,
}

impl<'a> BufferView<'a> {
    /// Construct a view over interleaved samples.
    ///
    /// # Safety
    ///
    /// `base` must point to `frames * channels * format.bytes()` bytes which are
    /// valid for reads and writes for the lifetime `'a`, and which are not
    /// accessed through any other path while the view exists.
    pub unsafe fn interleaved(
        base: *mut u8,
        frames: usize,
        channels: usize,
        format: SampleFormat,
    ) -> Self {
        Self {
            layout: Layout::Interleaved {
                base,
                len: frames * channels * format.bytes(),
            },
            frames,
            channels,
            format,
            _marker: marker::PhantomData,
        }
    }

    /// Construct a view over a collection of channel areas, one per channel.
    ///
    /// # Safety
    ///
    /// Every area must describe `len` bytes which are valid for reads and
    /// writes for the lifetime `'a`, and `len` must cover `frames` samples at
    /// the given step.
    pub unsafe fn from_areas(areas: &'a [ChannelArea], frames: usize, format: SampleFormat) -> Self {
        Self {
            layout: Layout::Areas(areas),
            frames,
            channels: areas.len(),
            format,
            _marker: marker::PhantomData,
        }
    }

    /// Construct a view over an interleaved slice of samples.
    pub fn from_slice<T>(buf: &'a mut [T], channels: usize) -> Self
    where
        T: Sample,
    {
        let frames = match channels {
            0 => 0,
            n => buf.len() / n,
        };

        // Safety: the slice is exclusively borrowed for 'a, and we never
        // address more than `frames * channels` samples of it.
        unsafe { Self::interleaved(buf.as_mut_ptr().cast(), frames, channels, T::FORMAT) }
    }

    /// Construct a view over a list of platform buffers holding at most
    /// `frames` frames of `channels` channels.
    ///
    /// A single buffer is interleaved, and if its channel count is zero it is
    /// set to `channels` first. Multiple buffers are planar with one channel
    /// each, and only the first `channels` of them are used. The planar areas
    /// are stored in `areas`, which doesn't reallocate as long as it has
    /// capacity for `channels` areas.
    ///
    /// The number of frames is clamped to what fits in the buffers. Returns
    /// `None` if the list is empty.
    ///
    /// # Safety
    ///
    /// The data of every buffer must be valid for reads and writes of its
    /// byte size for the lifetime `'a`, and not be accessed through any other
    /// path while the view exists.
    pub unsafe fn from_buffers<B>(
        buffers: &mut [B],
        areas: &'a mut Vec<ChannelArea>,
        frames: usize,
        channels: usize,
        format: SampleFormat,
    ) -> Option<Self>
    where
        B: PlatformBuffer,
    {
        let bytes = format.bytes();

        match buffers {
            [] => None,
            [buffer] => {
                if buffer.channels() == 0 {
                    buffer.set_channels(u32::try_from(channels).unwrap_or(u32::MAX));
                }

                let channels = buffer.channels() as usize;

                let frames = match channels * bytes {
                    0 => 0,
                    n => frames.min(buffer.byte_size() / n),
                };

                Some(Self::interleaved(buffer.data(), frames, channels, format))
            }
            buffers => {
                areas.clear();
                let mut frames = frames;

                for buffer in buffers.iter_mut().take(channels) {
                    if buffer.channels() == 0 {
                        buffer.set_channels(1);
                    }

                    frames = frames.min(buffer.byte_size() / bytes);
                    areas.push(ChannelArea::new(buffer.data(), bytes, buffer.byte_size()));
                }

                Some(Self::from_areas(areas, frames, format))
            }
        }
    }

    /// The number of frames in the buffer.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// The number of channels in the buffer.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// The sample format of the buffer.
    pub fn format(&self) -> SampleFormat {
        self.format
    }

    /// Test if samples are interleaved in a single buffer.
    pub fn is_interleaved(&self) -> bool {
        matches!(self.layout, Layout::Interleaved { .. })
    }

    /// Write a single sample.
    pub fn write<T>(&mut self, channel: usize, frame: usize, value: T) -> Result<(), BufferError>
    where
        T: Sample,
    {
        let ptr = self.sample_ptr::<T>(channel, frame)?;
        // Safety: bounds were checked by `sample_ptr`.
        unsafe { ptr.cast::<T>().write_unaligned(value) };
        Ok(())
    }

    /// Read a single sample.
    pub fn read<T>(&self, channel: usize, frame: usize) -> Result<T, BufferError>
    where
        T: Sample,
    {
        let ptr = self.sample_ptr::<T>(channel, frame)?;
        // Safety: bounds were checked by `sample_ptr`.
        Ok(unsafe { ptr.cast::<T>().read_unaligned() })
    }

    /// Copy interleaved samples into the buffer, returning the number of
    /// frames copied.
    pub fn copy_from_interleaved<T>(&mut self, src: &[T]) -> Result<usize, BufferError>
    where
        T: Sample,
    {
        self.check_format::<T>()?;

        if self.channels == 0 {
            return Ok(0);
        }

        let frames = usize::min(self.frames, src.len() / self.channels);

        for (frame, samples) in src.chunks_exact(self.channels).take(frames).enumerate() {
            for (channel, &sample) in samples.iter().enumerate() {
                let (base, step) = self.area(channel);
                // Safety: frame and channel are within bounds.
                unsafe { base.add(frame * step).cast::<T>().write_unaligned(sample) };
            }
        }

        Ok(frames)
    }

    /// Copy the buffer out into interleaved samples, returning the number of
    /// frames copied.
    pub fn copy_to_interleaved<T>(&self, dst: &mut [T]) -> Result<usize, BufferError>
    where
        T: Sample,
    {
        self.check_format::<T>()?;

        if self.channels == 0 {
            return Ok(0);
        }

        let frames = usize::min(self.frames, dst.len() / self.channels);

        for (frame, samples) in dst.chunks_exact_mut(self.channels).take(frames).enumerate() {
            for (channel, sample) in samples.iter_mut().enumerate() {
                let (base, step) = self.area(channel);
                // Safety: frame and channel are within bounds.
                *sample = unsafe { base.add(frame * step).cast::<T>().read_unaligned() };
            }
        }

        Ok(frames)
    }

    /// Zero every channel of the buffer for its full declared length.
    pub fn silence(&mut self) {
        match self.layout {
            Layout::Interleaved { base, len } => unsafe {
                ptr::write_bytes(base, 0, len);
            },
            Layout::Areas(areas) => {
                for area in areas {
                    // Safety: the area was declared valid for `len` bytes.
                    unsafe { ptr::write_bytes(area.base, 0, area.len) };
                }
            }
        }
    }

    /// Zero every channel from the given frame until the end of the buffer.
    pub fn silence_from(&mut self, frame: usize) {
        if frame >= self.frames {
            return;
        }

        if frame == 0 {
            self.silence();
            return;
        }

        let bytes = self.format.bytes();

        match self.layout {
            Layout::Interleaved { base, len } => {
                let offset = frame * self.channels * bytes;
                // Safety: offset is inside of the declared length.
                unsafe { ptr::write_bytes(base.add(offset), 0, len - offset) };
            }
            Layout::Areas(areas) => {
                for area in areas {
                    if area.step == bytes {
                        let offset = frame * bytes;
                        let len = area.len.saturating_sub(offset);
                        // Safety: only addresses bytes inside of the area.
                        unsafe { ptr::write_bytes(area.base.add(offset), 0, len) };
                    } else {
                        for n in frame..self.frames {
                            // Safety: `n` is within the frames covered by the area.
                            unsafe { ptr::write_bytes(area.base.add(n * area.step), 0, bytes) };
                        }
                    }
                }
            }
        }
    }

    fn check_format<T>(&self) -> Result<(), BufferError>
    where
        T: Sample,
    {
        if T::FORMAT != self.format {
            return Err(BufferError::FormatMismatch {
                ty: T::describe(),
                format: self.format,
            });
        }

        Ok(())
    }

    fn sample_ptr<T>(&self, channel: usize, frame: usize) -> Result<*mut u8, BufferError>
    where
        T: Sample,
    {
        self.check_format::<T>()?;

        if channel >= self.channels {
            return Err(BufferError::ChannelOutOfBounds {
                channel,
                channels: self.channels,
            });
        }

        if frame >= self.frames {
            return Err(BufferError::FrameOutOfBounds {
                frame,
                frames: self.frames,
            });
        }

        let (base, step) = self.area(channel);
        // Safety: the offset is inside of the buffer since both channel and
        // frame are in bounds.
        Ok(unsafe { base.add(frame * step) })
    }

    /// The base pointer and step of the given channel, which must be in
    /// bounds.
    fn area(&self, channel: usize) -> (*mut u8, usize) {
        match self.layout {
            Layout::Interleaved { base, .. } => {
                let bytes = self.format.bytes();
                (base.wrapping_add(channel * bytes), self.channels * bytes)
            }
            Layout::Areas(areas) => (areas[channel].base, areas[channel].step),
        }
    }
}
