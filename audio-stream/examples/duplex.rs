use anyhow::Result;
use audio_stream::fake::{Capabilities, FakeDevice};
use audio_stream::{handoff, Duplex, Handler, Options, StreamConfig, Timestamp};

pub fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let input = FakeDevice::new(Capabilities::default());
    let output = FakeDevice::new(Capabilities::default());
    let (i, o) = (input.controller(), output.controller());

    let config = StreamConfig::default().with_rate(48000).with_channels(1);

    let (capture, mut reader) = handoff::capture_queue::<i16>(1, 1024);
    let (mut writer, render) = handoff::render_queue::<i16>(1, 1024);

    let mut duplex = Duplex::open(
        input,
        output,
        &config,
        &config,
        Handler::capture(capture),
        Handler::render(render),
        &Options::default(),
    )?;

    duplex.start()?;

    let frames = 64;
    let mut samples = vec![0i16; frames];

    for n in 0..16u64 {
        let block: Vec<i16> = (0..frames as i16).map(|s| s * 100).collect();
        i.push_input(&block);
        i.tick(frames, Timestamp::from_nanos(1_000_000 + n * 1_333_333));

        let read = reader.read(&mut samples);
        writer.write(&samples[..read]);

        // The output device starts half a millisecond after the input.
        o.tick(frames, Timestamp::from_nanos(1_500_000 + n * 1_333_333));
    }

    let offset = duplex.offset()?;

    println!(
        "offset: {:?} ({} frames at {} Hz)",
        offset,
        offset.as_frames(config.rate),
        config.rate
    );

    println!("output underruns: {}", duplex.output().stats().underruns());
    duplex.close()?;
    Ok(())
}
