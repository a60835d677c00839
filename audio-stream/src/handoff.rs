//! Hand-off queues between a non real-time thread and a stream callback.
//!
//! [render_queue] connects a producer thread, which might block or allocate,
//! to the callback of an output stream through a lock-free ring buffer.
//! [capture_queue] is the mirror image for input streams.
//!
//! Note that this path gives no hard real-time guarantee: if the producer
//! falls behind, the callback underruns and the missing frames are silenced.
//! Size the queue for the worst scheduling latency of the producer.
//!
//! # Examples
//!
//! ```rust
//! use audio_stream::fake::{Capabilities, FakeDevice};
//! use audio_stream::{handoff, Direction, Handler, Options, StreamConfig, StreamHandle, Timestamp};
//!
//! # fn main() -> anyhow::Result<()> {
//! let device = FakeDevice::new(Capabilities::default());
//! let controller = device.controller();
//!
//! let config = StreamConfig::default().with_channels(1);
//! let (mut writer, queue) = handoff::render_queue::<i16>(1, 1024);
//!
//! let mut stream = StreamHandle::open(
//!     device,
//!     Direction::Output,
//!     &config,
//!     Handler::render(queue),
//!     &Options::default(),
//! )?;
//!
//! stream.start()?;
//! assert_eq!(writer.write(&[1, 2, 3]), 3);
//!
//! let period = controller.tick(4, Timestamp::from_nanos(0)).expect("running");
//! assert_eq!(period.channel::<i16>(0), vec![1, 2, 3, 0]);
//! # Ok(()) }
//! ```

use crate::{BufferError, BufferView, CallbackError, CaptureSource, RenderSink, Sample};
use rtrb::{Consumer, Producer, RingBuffer};
use std::thread;
use std::time::Duration;
use thiserror::Error;

/// The other end of a hand-off queue has been dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("the other end of the queue was dropped")]
pub struct Disconnected;

/// Construct a render hand-off queue of interleaved samples which can hold
/// `frames` frames of `channels` channels.
pub fn render_queue<T>(channels: usize, frames: usize) -> (Writer<T>, RenderQueue<T>)
where
    T: Sample,
{
    let channels = channels.max(1);
    let (producer, consumer) = RingBuffer::new(channels * frames.max(1));
    (
        Writer { producer, channels },
        RenderQueue {
            consumer,
            channels,
        },
    )
}

/// Construct a capture hand-off queue of interleaved samples which can hold
/// `frames` frames of `channels` channels.
pub fn capture_queue<T>(channels: usize, frames: usize) -> (CaptureQueue<T>, Reader<T>)
where
    T: Sample,
{
    let channels = channels.max(1);
    let (producer, consumer) = RingBuffer::new(channels * frames.max(1));
    (
        CaptureQueue { producer, channels },
        Reader { consumer, channels },
    )
}

/// The producing end of a [render_queue].
pub struct Writer<T> {
    producer: Producer<T>,
    channels: usize,
}

impl<T> Writer<T>
where
    T: Sample,
{
    /// Queue as many whole frames of interleaved samples as there's room for,
    /// without blocking. Returns the number of samples queued.
    pub fn write(&mut self, samples: &[T]) -> usize {
        let room = self.producer.slots() / self.channels * self.channels;
        let len = usize::min(samples.len() / self.channels * self.channels, room);

        for &sample in &samples[..len] {
            if self.producer.push(sample).is_err() {
                break;
            }
        }

        len
    }

    /// Queue every whole frame of interleaved samples, sleeping for `poll`
    /// whenever the queue is full.
    ///
    /// Fails if the consumer has been dropped.
    pub fn write_all(&mut self, mut samples: &[T], poll: Duration) -> Result<(), Disconnected> {
        while samples.len() >= self.channels {
            if self.producer.is_abandoned() {
                return Err(Disconnected);
            }

            let n = self.write(samples);
            samples = &samples[n..];

            if n == 0 {
                thread::sleep(poll);
            }
        }

        Ok(())
    }

    /// The number of frames which can be queued right now.
    pub fn available_frames(&self) -> usize {
        self.producer.slots() / self.channels
    }

    /// Test if the consuming end has been dropped.
    pub fn is_disconnected(&self) -> bool {
        self.producer.is_abandoned()
    }
}

/// The consuming end of a [render_queue], used as the [RenderSink] of an
/// output stream.
pub struct RenderQueue<T> {
    consumer: Consumer<T>,
    channels: usize,
}

impl<T> RenderSink for RenderQueue<T>
where
    T: Sample,
{
    fn render(&mut self, buf: &mut BufferView<'_>) -> Result<usize, CallbackError> {
        check::<T>(buf, self.channels)?;

        let frames = usize::min(buf.frames(), self.consumer.slots() / self.channels);

        for frame in 0..frames {
            for channel in 0..self.channels {
                let sample = self.consumer.pop().map_err(|_| CallbackError::NotReady)?;
                buf.write(channel, frame, sample)?;
            }
        }

        Ok(frames)
    }
}

/// The producing end of a [capture_queue], used as the [CaptureSource] of an
/// input stream.
pub struct CaptureQueue<T> {
    producer: Producer<T>,
    channels: usize,
}

impl<T> CaptureSource for CaptureQueue<T>
where
    T: Sample,
{
    fn capture(&mut self, buf: &BufferView<'_>) -> Result<(), CallbackError> {
        check::<T>(buf, self.channels)?;

        let frames = usize::min(buf.frames(), self.producer.slots() / self.channels);

        for frame in 0..frames {
            for channel in 0..self.channels {
                let sample = buf.read(channel, frame)?;

                if self.producer.push(sample).is_err() {
                    return Err(CallbackError::NotReady);
                }
            }
        }

        // Frames which didn't fit are dropped.
        if frames < buf.frames() {
            return Err(CallbackError::NotReady);
        }

        Ok(())
    }
}

/// The consuming end of a [capture_queue].
pub struct Reader<T> {
    consumer: Consumer<T>,
    channels: usize,
}

impl<T> Reader<T>
where
    T: Sample,
{
    /// Read as many whole frames of interleaved samples as are available and
    /// fit in `out`. Returns the number of samples read.
    pub fn read(&mut self, out: &mut [T]) -> usize {
        let available = self.consumer.slots() / self.channels * self.channels;
        let len = usize::min(out.len() / self.channels * self.channels, available);

        for (n, slot) in out[..len].iter_mut().enumerate() {
            match self.consumer.pop() {
                Ok(sample) => *slot = sample,
                Err(..) => return n,
            }
        }

        len
    }

    /// The number of frames which can be read right now.
    pub fn available_frames(&self) -> usize {
        self.consumer.slots() / self.channels
    }

    /// Test if the producing end has been dropped.
    pub fn is_disconnected(&self) -> bool {
        self.consumer.is_abandoned()
    }
}

fn check<T>(buf: &BufferView<'_>, channels: usize) -> Result<(), BufferError>
where
    T: Sample,
{
    if T::FORMAT != buf.format() {
        return Err(BufferError::FormatMismatch {
            ty: T::describe(),
            format: buf.format(),
        });
    }

    if channels != buf.channels() {
        return Err(BufferError::ChannelOutOfBounds {
            channel: channels.max(buf.channels()) - 1,
            channels: buf.channels(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_accepts_whole_frames_only() {
        let (mut writer, _queue) = render_queue::<i16>(2, 2);
        assert_eq!(writer.write(&[1, 2, 3]), 2);
        assert_eq!(writer.write(&[4, 5, 6, 7]), 2);
        assert_eq!(writer.write(&[8, 9]), 0);
        assert_eq!(writer.available_frames(), 0);
    }

    #[test]
    fn test_render_short_queue() {
        let (mut writer, mut queue) = render_queue::<f32>(2, 8);
        writer.write(&[0.5, -0.5]);

        let mut data = [1.0f32; 6];
        let mut buf = BufferView::from_slice(&mut data[..], 2);
        assert_eq!(queue.render(&mut buf).unwrap(), 1);
        assert_eq!(data[..2], [0.5, -0.5]);
    }

    #[test]
    fn test_render_rejects_mismatched_channels() {
        let (_, mut queue) = render_queue::<f32>(1, 8);
        let mut data = [1.0f32; 4];
        let mut buf = BufferView::from_slice(&mut data[..], 2);
        assert!(queue.render(&mut buf).is_err());
    }

    #[test]
    fn test_capture_and_read() {
        let (mut queue, mut reader) = capture_queue::<i32>(2, 2);

        let mut data = [1, 2, 3, 4, 5, 6];
        let buf = BufferView::from_slice(&mut data[..], 2);
        assert_eq!(queue.capture(&buf), Err(CallbackError::NotReady));

        let mut out = [0; 8];
        assert_eq!(reader.read(&mut out), 4);
        assert_eq!(out[..4], [1, 2, 3, 4]);
    }

    #[test]
    fn test_write_all_disconnected() {
        let (mut writer, queue) = render_queue::<i8>(1, 1);
        drop(queue);
        assert_eq!(
            writer.write_all(&[1, 2, 3], Duration::from_millis(1)),
            Err(Disconnected)
        );
    }

    #[test]
    fn test_write_all_blocks_until_drained() {
        let (mut writer, mut queue) = render_queue::<i16>(1, 2);

        let consumer = thread::spawn(move || {
            let mut collected = Vec::new();

            while collected.len() < 6 {
                let mut data = [0i16; 2];
                let mut buf = BufferView::from_slice(&mut data[..], 1);
                let n = queue.render(&mut buf).unwrap();
                collected.extend_from_slice(&data[..n]);
                thread::sleep(Duration::from_millis(1));
            }

            collected
        });

        writer
            .write_all(&[1, 2, 3, 4, 5, 6], Duration::from_millis(1))
            .unwrap();

        assert_eq!(consumer.join().unwrap(), vec![1, 2, 3, 4, 5, 6]);
    }
}
