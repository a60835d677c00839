use crate::fake::{Capabilities, FakeDevice, Values, GARBAGE};
use crate::{
    handoff, BufferView, CallbackError, Direction, Handler, Options, SampleFormat, StreamConfig,
    StreamHandle, Timestamp,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A render handler which writes a marker into the first `written` frames.
fn partial(written: usize) -> Handler {
    Handler::render_fn(move |buf: &mut BufferView<'_>| {
        let n = written.min(buf.frames());

        for frame in 0..n {
            for channel in 0..buf.channels() {
                buf.write(channel, frame, 1234i16)?;
            }
        }

        Ok(n)
    })
}

#[test]
fn test_partial_fill_of_negotiated_period() -> anyhow::Result<()> {
    let capabilities = Capabilities {
        rates: Values::only([48000]),
        buffer_sizes: Values::only([960]),
        ..Capabilities::default()
    };

    let (mut stream, controller) =
        super::open_output(capabilities, &StreamConfig::default(), partial(500))?;

    assert_eq!(stream.config().buffer_size, 960);
    stream.start()?;

    let period = controller
        .tick(960, Timestamp::from_nanos(0))
        .expect("stream should be running");

    for channel in 0..2 {
        let samples = period.channel::<i16>(channel);
        assert_eq!(samples.len(), 960);
        assert!(samples[..500].iter().all(|&s| s == 1234));
        assert!(samples[500..].iter().all(|&s| s == 0));
    }

    assert_eq!(stream.stats().underruns(), 1);
    assert_eq!(stream.stats().frames(), 960);
    stream.close()?;
    Ok(())
}

#[test]
fn test_tail_is_silent_every_period() -> anyhow::Result<()> {
    for planar in [false, true] {
        let capabilities = Capabilities {
            planar,
            ..Capabilities::default()
        };

        let config = StreamConfig::default().with_channels(3);
        let (mut stream, controller) = super::open_output(capabilities, &config, partial(7))?;
        stream.start()?;

        for n in 0..32u64 {
            let frames = 4 + (n as usize * 5) % 29;
            let period = controller
                .tick(frames, Timestamp::from_nanos(n * 1_000))
                .expect("stream should be running");

            for channel in 0..3 {
                let samples = period.channel::<i16>(channel);
                let filled = frames.min(7);
                assert!(samples[..filled].iter().all(|&s| s == 1234));
                assert!(samples[filled..].iter().all(|&s| s == 0), "planar = {}", planar);
            }
        }

        assert_eq!(stream.stats().callbacks(), 32);
    }

    Ok(())
}

#[test]
fn test_failing_and_missing_handlers_emit_silence() -> anyhow::Result<()> {
    let handlers = [
        Handler::None,
        Handler::render_fn(|_: &mut BufferView<'_>| Err(CallbackError::NotReady)),
        Handler::render_fn(|buf: &mut BufferView<'_>| {
            // Write with the wrong sample type.
            buf.write(0, 0, 1.0f32)?;
            Ok(buf.frames())
        }),
        Handler::render_fn(|buf: &mut BufferView<'_>| {
            buf.write(0, 0, 1i16)?;
            panic!("render failed");
        }),
    ];

    for handler in handlers {
        let (mut stream, controller) =
            super::open_output(Capabilities::default(), &StreamConfig::default(), handler)?;
        stream.start()?;

        let period = controller
            .tick(64, Timestamp::from_nanos(0))
            .expect("stream should be running");

        assert!(period.as_bytes().iter().all(|&b| b == 0));

        // The stream keeps going.
        assert!(controller.tick(64, Timestamp::from_nanos(1)).is_some());
        assert_eq!(stream.stats().underruns(), 2);
    }

    Ok(())
}

#[test]
fn test_handoff_underrun() -> anyhow::Result<()> {
    let config = StreamConfig::default()
        .with_channels(2)
        .with_format(SampleFormat::F32);

    let (mut writer, queue) = handoff::render_queue::<f32>(2, 64);
    let (mut stream, controller) =
        super::open_output(Capabilities::default(), &config, Handler::render(queue))?;
    stream.start()?;

    assert_eq!(writer.write(&[0.5, -0.5, 0.25, -0.25, 1.0]), 4);

    let period = controller
        .tick(4, Timestamp::from_nanos(0))
        .expect("stream should be running");

    assert_eq!(period.channel::<f32>(0), vec![0.5, 0.25, 0.0, 0.0]);
    assert_eq!(period.channel::<f32>(1), vec![-0.5, -0.25, 0.0, 0.0]);
    assert_eq!(stream.stats().underruns(), 1);
    Ok(())
}

#[test]
fn test_capture_preclear() -> anyhow::Result<()> {
    for preclear in [false, true] {
        let device = FakeDevice::new(Capabilities::default());
        let controller = device.controller();

        let captured = Arc::new(Mutex::new(Vec::new()));
        let calls = Arc::new(AtomicUsize::new(0));

        let handler = {
            let captured = captured.clone();
            let calls = calls.clone();

            Handler::capture_fn(move |buf: &BufferView<'_>| {
                calls.fetch_add(1, Ordering::SeqCst);
                let mut out = vec![0i16; buf.frames() * buf.channels()];
                buf.copy_to_interleaved(&mut out)?;
                captured
                    .lock()
                    .map_err(|_| CallbackError::Failed("poisoned"))?
                    .extend(out);
                Ok(())
            })
        };

        let mut stream = StreamHandle::open(
            device,
            Direction::Input,
            &StreamConfig::default().with_channels(1),
            handler,
            &Options::default().with_preclear_capture(preclear),
        )?;

        stream.start()?;
        controller.push_input(&[1i16, 2]);
        controller.tick(4, Timestamp::from_nanos(0));

        let captured = captured.lock().unwrap_or_else(|e| e.into_inner()).clone();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(captured[..2], [1, 2]);

        if preclear {
            assert_eq!(captured[2..], [0, 0]);
        } else {
            let garbage = i16::from_ne_bytes([GARBAGE, GARBAGE]);
            assert_eq!(captured[2..], [garbage, garbage]);
        }
    }

    Ok(())
}
