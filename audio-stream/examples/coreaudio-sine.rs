use anyhow::Result;
use audio_stream::coreaudio::CoreAudioDevice;
use audio_stream::{
    BufferView, Direction, Handler, Options, SampleFormat, StreamConfig, StreamHandle,
};
use std::time::Duration;

pub fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    println!("WARNING: This program will generate audio and we do our best to avoid them being too loud.");
    println!("Please make sure your volume is turned down!");
    println!();
    println!("Press [enter] to continue...");

    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;

    let requested = StreamConfig::default()
        .with_format(SampleFormat::F32)
        .with_buffer_size(512);

    let step = 261.63 / requested.rate as f32;
    let mut phase = 0.0f32;

    let handler = Handler::render_fn(move |buf: &mut BufferView<'_>| {
        for frame in 0..buf.frames() {
            let sample = (phase * std::f32::consts::TAU).sin() * 0.05;
            phase = (phase + step).fract();

            for channel in 0..buf.channels() {
                buf.write(channel, frame, sample)?;
            }
        }

        Ok(buf.frames())
    });

    let mut stream = StreamHandle::open(
        CoreAudioDevice::new(),
        Direction::Output,
        &requested,
        handler,
        &Options::default(),
    )?;

    println!("negotiated: {:?}", stream.config());

    stream.start()?;
    std::thread::sleep(Duration::from_secs(2));
    stream.close()?;
    Ok(())
}
