//! The ALSA backend.
//!
//! [AlsaDevice] opens a named pcm, negotiates its hardware parameters with the
//! `snd_pcm_hw_params_*_near` family of functions, and services it from a
//! dedicated I/O thread once registered.
//!
//! # Examples
//!
//! ```rust,no_run
//! use audio_stream::alsa::AlsaDevice;
//! use audio_stream::{BufferView, Direction, Handler, Options, StreamConfig, StreamHandle};
//!
//! # fn main() -> anyhow::Result<()> {
//! let handler = Handler::render_fn(|buf: &mut BufferView<'_>| {
//!     buf.silence();
//!     Ok(buf.frames())
//! });
//!
//! let mut stream = StreamHandle::open(
//!     AlsaDevice::new(),
//!     Direction::Output,
//!     &StreamConfig::default(),
//!     handler,
//!     &Options::default().with_name("default"),
//! )?;
//!
//! stream.start()?;
//! std::thread::sleep(std::time::Duration::from_secs(1));
//! stream.close()?;
//! # Ok(()) }
//! ```

use crate::device::Device;
use crate::{Bridge, Direction, Options, Status};
use alsa_sys as alsa;
use std::borrow::Cow;
use std::ffi::{CStr, CString};
use std::mem;
use std::ptr;
use std::sync::Arc;
use std::thread;

mod parameters;
pub use self::parameters::AlsaParameters;

mod io;
use self::io::{Control, IoThread};

/// The device opened if no name is specified.
const DEFAULT_NAME: &str = "default";

/// A raw pcm handle. Ownership is tracked by [AlsaDevice].
#[derive(Debug, Clone, Copy)]
pub(crate) struct Pcm {
    handle: ptr::NonNull<alsa::snd_pcm_t>,
}

impl Pcm {
    fn as_ptr(self) -> *mut alsa::snd_pcm_t {
        self.handle.as_ptr()
    }
}

// Safety: the handle is only ever used by one thread at a time. The I/O thread
// has exclusive use of it while it's alive.
unsafe impl Send for Pcm {}

/// Describe an ALSA status code.
pub(crate) fn describe(status: Status) -> Cow<'static, str> {
    unsafe {
        let ptr = alsa::snd_strerror(status.code());

        if ptr.is_null() {
            return Cow::Borrowed("unknown error");
        }

        CStr::from_ptr(ptr).to_string_lossy()
    }
}

struct Worker {
    control: Arc<Control>,
    thread: thread::JoinHandle<()>,
}

/// An ALSA pcm device.
#[derive(Default)]
pub struct AlsaDevice {
    pcm: Option<Pcm>,
    direction: Option<Direction>,
    can_pause: bool,
    worker: Option<Worker>,
}

impl AlsaDevice {
    /// Construct a device which will open the pcm named by the stream
    /// [Options], or `default`.
    pub fn new() -> Self {
        Self::default()
    }

    fn pcm(&self) -> Result<Pcm, Status> {
        self.pcm.ok_or(Status::new(-libc::EBADFD))
    }

    fn join(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.control.exit();

            if worker.thread.join().is_err() {
                tracing::error!("alsa i/o thread panicked");
            }
        }
    }
}

impl Device for AlsaDevice {
    type Parameters<'a> = AlsaParameters<'a>;

    fn acquire(&mut self, direction: Direction, options: &Options) -> Result<(), Status> {
        if self.pcm.is_some() {
            return Err(Status::new(-libc::EBUSY));
        }

        let name = options.name.as_deref().unwrap_or(DEFAULT_NAME);
        let name = CString::new(name).map_err(|_| Status::new(-libc::EINVAL))?;

        let stream = match direction {
            Direction::Output => alsa::SND_PCM_STREAM_PLAYBACK,
            Direction::Input => alsa::SND_PCM_STREAM_CAPTURE,
        };

        unsafe {
            let mut handle = mem::MaybeUninit::uninit();
            status!(alsa::snd_pcm_open(
                handle.as_mut_ptr(),
                name.as_ptr(),
                stream,
                0
            ))?;

            let handle =
                ptr::NonNull::new(handle.assume_init()).ok_or(Status::new(-libc::ENODEV))?;
            self.pcm = Some(Pcm { handle });
        }

        tracing::debug!(name = ?name, %direction, "opened pcm");
        self.direction = Some(direction);
        Ok(())
    }

    fn parameters(&mut self) -> Result<Self::Parameters<'_>, Status> {
        let pcm = self.pcm()?;
        unsafe { AlsaParameters::any(pcm, &mut self.can_pause) }
    }

    fn register(&mut self, bridge: Bridge) -> Result<(), Status> {
        let pcm = self.pcm()?;

        if self.worker.is_some() {
            return Err(Status::new(-libc::EBUSY));
        }

        let control = Arc::new(Control::new());
        let io = IoThread::new(pcm, bridge, control.clone(), self.can_pause);

        let direction = self.direction.unwrap_or(Direction::Output);

        let thread = thread::Builder::new()
            .name(format!("audio-stream-alsa-{}", direction))
            .spawn(move || io.run())
            .map_err(|e| Status::new(-e.raw_os_error().unwrap_or(libc::EAGAIN)))?;

        self.worker = Some(Worker { control, thread });
        Ok(())
    }

    fn start(&mut self) -> Result<(), Status> {
        match &self.worker {
            Some(worker) => {
                worker.control.run();
                Ok(())
            }
            None => Err(Status::new(-libc::EBADFD)),
        }
    }

    fn stop(&mut self) -> Result<(), Status> {
        match &self.worker {
            Some(worker) => worker.control.pause(),
            None => Ok(()),
        }
    }

    fn uninitialize(&mut self) -> Result<(), Status> {
        self.join();

        if let Some(pcm) = self.pcm {
            unsafe {
                status!(alsa::snd_pcm_hw_free(pcm.as_ptr()))?;
            }
        }

        Ok(())
    }

    fn dispose(&mut self) -> Result<(), Status> {
        self.join();
        self.direction = None;

        if let Some(pcm) = self.pcm.take() {
            unsafe {
                status!(alsa::snd_pcm_close(pcm.as_ptr()))?;
            }
        }

        Ok(())
    }
}

impl Drop for AlsaDevice {
    fn drop(&mut self) {
        if let Err(status) = self.dispose() {
            tracing::warn!(%status, error = %describe(status), "failed to close pcm");
        }
    }
}
