use crate::fake::{Capabilities, FakeDevice};
use crate::{handoff, Duplex, Error, Handler, Options, State, StreamConfig, Timestamp};

#[test]
fn test_pass_through() -> anyhow::Result<()> {
    let input = FakeDevice::new(Capabilities::default());
    let output = FakeDevice::new(Capabilities::default());
    let (i, o) = (input.controller(), output.controller());

    let config = StreamConfig::default().with_channels(1);

    let (capture, mut reader) = handoff::capture_queue::<i16>(1, 64);
    let (mut writer, render) = handoff::render_queue::<i16>(1, 64);

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
    assert!(matches!(duplex.offset(), Err(Error::NotAvailable)));

    i.push_input(&[1i16, 2, 3, 4]);
    i.tick(4, Timestamp::from_nanos(10_000));
    assert!(matches!(duplex.offset(), Err(Error::NotAvailable)));

    let mut samples = [0i16; 4];
    assert_eq!(reader.read(&mut samples), 4);
    assert_eq!(writer.write(&samples), 4);

    let period = o
        .tick(4, Timestamp::from_nanos(35_000))
        .expect("output should be running");

    assert_eq!(period.channel::<i16>(0), vec![1, 2, 3, 4]);

    let offset = duplex.offset()?;
    assert_eq!(offset.as_nanos(), 25_000);
    assert!(!offset.is_negative());

    for n in 1..8 {
        i.tick(4, Timestamp::from_nanos(10_000 + n * 1_000));
        o.tick(4, Timestamp::from_nanos(35_000 + n * 1_000));
    }

    assert_eq!(duplex.offset()?, offset);
    assert_eq!(duplex.input().stats().callbacks(), 8);
    assert_eq!(duplex.output().stats().callbacks(), 8);
    // Nothing was written past the first output period.
    assert_eq!(duplex.output().stats().underruns(), 7);

    duplex.stop()?;
    assert_eq!(duplex.input().state(), State::Stopped);
    assert_eq!(duplex.output().state(), State::Stopped);

    duplex.close()?;
    assert!(!i.is_acquired());
    assert!(!o.is_acquired());
    Ok(())
}

#[test]
fn test_offset_unavailable_with_one_direction() -> anyhow::Result<()> {
    let input = FakeDevice::new(Capabilities::default());
    let output = FakeDevice::new(Capabilities::default());
    let i = input.controller();

    let mut duplex = Duplex::open(
        input,
        output,
        &StreamConfig::default(),
        &StreamConfig::default(),
        Handler::None,
        Handler::None,
        &Options::default(),
    )?;

    duplex.start()?;

    for n in 0..4 {
        i.tick(32, Timestamp::from_nanos(n * 100));
    }

    assert!(matches!(duplex.offset(), Err(Error::NotAvailable)));
    assert_eq!(
        duplex.timing().first_input(),
        Some(Timestamp::from_nanos(0))
    );
    assert_eq!(duplex.timing().first_output(), None);
    Ok(())
}
