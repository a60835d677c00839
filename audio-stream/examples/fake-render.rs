use anyhow::Result;
use audio_stream::fake::{Capabilities, FakeDevice, Values};
use audio_stream::{
    BufferView, Direction, Handler, Options, SampleFormat, StreamConfig, StreamHandle, Timestamp,
};

pub fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let device = FakeDevice::new(Capabilities {
        rates: Values::only([48000]),
        buffer_sizes: Values::only([960]),
        ..Capabilities::default()
    });

    let controller = device.controller();

    let requested = StreamConfig::default()
        .with_rate(44100)
        .with_format(SampleFormat::F32)
        .with_buffer_size(1024)
        .with_period_size(256);

    let mut phase = 0.0f32;

    // Only fill half of every period, the rest is silenced by the stream.
    let handler = Handler::render_fn(move |buf: &mut BufferView<'_>| {
        let frames = buf.frames() / 2;

        for frame in 0..frames {
            let sample = (phase * std::f32::consts::TAU).sin() * 0.1;
            phase = (phase + 440.0 / 48000.0).fract();

            for channel in 0..buf.channels() {
                buf.write(channel, frame, sample)?;
            }
        }

        Ok(frames)
    });

    let mut stream = StreamHandle::open(
        device,
        Direction::Output,
        &requested,
        handler,
        &Options::default(),
    )?;

    println!("requested: {:?}", requested);
    println!("negotiated: {:?}", stream.config());

    stream.start()?;

    let period = stream.config().period_duration();
    let mut now = Timestamp::from_nanos(0);

    for _ in 0..8 {
        if let Some(data) = controller.tick(stream.config().period_size as usize, now) {
            let left = data.channel::<f32>(0);
            let silent = left.iter().rev().take_while(|s| **s == 0.0).count();
            println!("{} frames, {} silent", data.frames(), silent);
        }

        now = Timestamp::from_nanos(now.as_nanos() + period.as_nanos() as u64);
    }

    let stats = stream.stats();
    println!(
        "callbacks: {}, frames: {}, underruns: {}",
        stats.callbacks(),
        stats.frames(),
        stats.underruns()
    );

    stream.close()?;
    Ok(())
}
