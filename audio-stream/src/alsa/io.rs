//! The thread servicing an ALSA pcm.
//!
//! ALSA exposes a blocking read/write interface, so each stream owns a thread
//! which plays the part of the platform callback: once per period it fills or
//! drains an interleaved buffer through the [Bridge] and hands it to the pcm.

use crate::alsa::{describe, Pcm};
use crate::{Bridge, BufferView, Direction, Status, Timestamp};
use alsa_sys as alsa;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Run,
    Pause,
    Exit,
}

struct State {
    command: Command,
    /// Set by the I/O thread once it has halted the pcm and is waiting.
    parked: bool,
    error: Option<Status>,
}

/// Commands sent from the controlling thread to the I/O thread.
pub(super) struct Control {
    state: Mutex<State>,
    condvar: Condvar,
}

impl Control {
    pub(super) fn new() -> Self {
        Self {
            state: Mutex::new(State {
                command: Command::Pause,
                parked: true,
                error: None,
            }),
            condvar: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, State>) -> MutexGuard<'a, State> {
        self.condvar
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Let the I/O thread run.
    pub(super) fn run(&self) {
        let mut state = self.lock();
        state.error = None;
        state.command = Command::Run;
        self.condvar.notify_all();
    }

    /// Halt the I/O thread and wait until it has parked, returning the error
    /// which caused it to fail if any.
    pub(super) fn pause(&self) -> Result<(), Status> {
        let mut state = self.lock();
        state.command = Command::Pause;
        self.condvar.notify_all();

        while !state.parked {
            state = self.wait(state);
        }

        match state.error.take() {
            Some(status) => Err(status),
            None => Ok(()),
        }
    }

    /// Ask the I/O thread to exit.
    pub(super) fn exit(&self) {
        let mut state = self.lock();
        state.command = Command::Exit;
        self.condvar.notify_all();
    }

    fn fail(&self, status: Status) {
        let mut state = self.lock();
        state.error.get_or_insert(status);
    }
}

/// How the pcm was last halted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Halted {
    /// Prepared but never started.
    Prepared,
    /// Paused in place.
    Paused,
    /// Dropped, needs to be prepared.
    Dropped,
    /// Not halted.
    Running,
}

pub(super) struct IoThread {
    pcm: Pcm,
    bridge: Bridge,
    control: std::sync::Arc<Control>,
    can_pause: bool,
    halted: Halted,
    frames: usize,
    frame_bytes: usize,
    buf: Vec<u8>,
}

impl IoThread {
    pub(super) fn new(
        pcm: Pcm,
        bridge: Bridge,
        control: std::sync::Arc<Control>,
        can_pause: bool,
    ) -> Self {
        let config = *bridge.config();
        let frames = (config.period_size as usize).max(1);
        let frame_bytes = config.frame_bytes();

        Self {
            pcm,
            bridge,
            control,
            can_pause,
            halted: Halted::Prepared,
            frames,
            frame_bytes,
            buf: vec![0; frames * frame_bytes],
        }
    }

    pub(super) fn run(mut self) {
        tracing::trace!(direction = %self.bridge.direction(), "i/o thread started");

        while self.wait() {
            let result = match self.halted {
                Halted::Running => self.period(),
                _ => self.resume(),
            };

            if let Err(status) = result {
                tracing::error!(
                    direction = %self.bridge.direction(),
                    %status,
                    error = %describe(status),
                    "pcm i/o failed"
                );

                self.control.fail(status);
            }
        }

        tracing::trace!(direction = %self.bridge.direction(), "i/o thread exited");
    }

    /// Park until the thread should run. Returns `false` if it should exit.
    fn wait(&mut self) -> bool {
        let control = self.control.clone();
        let mut state = control.lock();

        loop {
            let command = match state.command {
                Command::Run if state.error.is_none() => break,
                command => command,
            };

            if !state.parked {
                if let Err(status) = self.halt() {
                    state.error.get_or_insert(status);
                }

                state.parked = true;
                control.condvar.notify_all();
            }

            if command == Command::Exit {
                return false;
            }

            state = control.wait(state);
        }

        state.parked = false;
        true
    }

    fn halt(&mut self) -> Result<(), Status> {
        if self.halted != Halted::Running {
            return Ok(());
        }

        unsafe {
            if self.can_pause && status!(alsa::snd_pcm_pause(self.pcm.as_ptr(), 1)).is_ok() {
                self.halted = Halted::Paused;
                return Ok(());
            }

            self.halted = Halted::Dropped;
            status!(alsa::snd_pcm_drop(self.pcm.as_ptr()))?;
        }

        Ok(())
    }

    fn resume(&mut self) -> Result<(), Status> {
        unsafe {
            match self.halted {
                Halted::Paused => {
                    if status!(alsa::snd_pcm_pause(self.pcm.as_ptr(), 0)).is_err() {
                        status!(alsa::snd_pcm_drop(self.pcm.as_ptr()))?;
                        status!(alsa::snd_pcm_prepare(self.pcm.as_ptr()))?;
                    }
                }
                Halted::Dropped => {
                    status!(alsa::snd_pcm_prepare(self.pcm.as_ptr()))?;
                }
                Halted::Prepared | Halted::Running => (),
            }
        }

        self.halted = Halted::Running;
        Ok(())
    }

    fn period(&mut self) -> Result<(), Status> {
        let config = *self.bridge.config();
        let channels = config.channels as usize;

        match self.bridge.direction() {
            Direction::Output => {
                let timestamp = self.first_frame_time(config.rate);
                // Safety: the buffer holds exactly `frames` interleaved frames.
                let mut view = unsafe {
                    BufferView::interleaved(self.buf.as_mut_ptr(), self.frames, channels, config.format)
                };
                self.bridge.process(&mut view, timestamp);
                self.write()
            }
            Direction::Input => {
                if self.bridge.preclear_capture() {
                    self.buf.fill(0);
                }

                let timestamp = self.first_frame_time(config.rate);
                self.read()?;
                // Safety: the buffer holds exactly `frames` interleaved frames.
                let mut view = unsafe {
                    BufferView::interleaved(self.buf.as_mut_ptr(), self.frames, channels, config.format)
                };
                self.bridge.process(&mut view, timestamp);
                Ok(())
            }
        }
    }

    /// When the first frame of the next transfer reaches the speaker, or
    /// when the first frame of the next read was captured.
    ///
    /// Taken before the transfer in both directions. Falls back to the
    /// current time if the pcm can't report its delay.
    fn first_frame_time(&self, rate: u32) -> Timestamp {
        let now = now();
        let mut delay: alsa::snd_pcm_sframes_t = 0;

        // Safety: the pcm is open for as long as the thread runs.
        if unsafe { alsa::snd_pcm_delay(self.pcm.as_ptr(), &mut delay) } < 0 {
            return now;
        }

        let delay = i64::from(delay).max(0);

        match self.bridge.direction() {
            Direction::Output => now.add_frames(delay, rate),
            Direction::Input => now.add_frames(-delay, rate),
        }
    }

    fn write(&mut self) -> Result<(), Status> {
        let mut offset = 0;

        while offset < self.frames {
            let written = unsafe {
                let ptr = self.buf.as_ptr().add(offset * self.frame_bytes);
                alsa::snd_pcm_writei(
                    self.pcm.as_ptr(),
                    ptr.cast(),
                    (self.frames - offset) as alsa::snd_pcm_uframes_t,
                )
            };

            if written < 0 {
                self.recover(written as i32)?;
                continue;
            }

            offset += written as usize;
        }

        Ok(())
    }

    fn read(&mut self) -> Result<(), Status> {
        let mut offset = 0;

        while offset < self.frames {
            let read = unsafe {
                let ptr = self.buf.as_mut_ptr().add(offset * self.frame_bytes);
                alsa::snd_pcm_readi(
                    self.pcm.as_ptr(),
                    ptr.cast(),
                    (self.frames - offset) as alsa::snd_pcm_uframes_t,
                )
            };

            if read < 0 {
                self.recover(read as i32)?;
                continue;
            }

            offset += read as usize;
        }

        Ok(())
    }

    /// Recover from an xrun or a suspend.
    fn recover(&mut self, code: i32) -> Result<(), Status> {
        unsafe {
            status!(alsa::snd_pcm_recover(self.pcm.as_ptr(), code, 1))?;
        }

        Ok(())
    }
}

/// Read the monotonic clock.
fn now() -> Timestamp {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };

    // CLOCK_MONOTONIC can't fail with a valid pointer.
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }

    let nanos = (ts.tv_sec as u64)
        .saturating_mul(1_000_000_000)
        .saturating_add(ts.tv_nsec as u64);

    Timestamp::from_nanos(nanos)
}
