use crate::fake::{Capabilities, FakeDevice, Faults};
use crate::{
    Direction, Error, Handler, Operation, Options, State, Status, StreamConfig, StreamHandle,
    Timestamp,
};

#[test]
fn test_stop_twice() -> anyhow::Result<()> {
    let (mut stream, controller) =
        super::open_output(Capabilities::default(), &StreamConfig::default(), Handler::None)?;

    stream.start()?;
    stream.stop()?;
    assert_eq!(stream.state(), State::Stopped);
    stream.stop()?;
    assert_eq!(stream.state(), State::Stopped);
    assert!(controller.tick(16, Timestamp::from_nanos(0)).is_none());
    Ok(())
}

#[test]
fn test_everything_fails_after_close() -> anyhow::Result<()> {
    let (mut stream, _) =
        super::open_output(Capabilities::default(), &StreamConfig::default(), Handler::None)?;

    stream.close()?;

    let results = [
        (Operation::Start, stream.start()),
        (Operation::Stop, stream.stop()),
        (Operation::Close, stream.close()),
        (
            Operation::Open,
            stream.configure(&StreamConfig::default(), Handler::None, &Options::default()),
        ),
    ];

    for (expected, result) in results {
        match result {
            Err(Error::State { operation, state }) => {
                assert_eq!(operation, expected);
                assert_eq!(state, State::Closed);
            }
            other => panic!("expected state error for {}, got {:?}", expected, other),
        }
    }

    Ok(())
}

#[test]
fn test_close_disposes_when_uninitialize_fails() -> anyhow::Result<()> {
    let (mut stream, controller) =
        super::open_output(Capabilities::default(), &StreamConfig::default(), Handler::None)?;

    stream.start()?;

    controller.set_faults(Faults {
        uninitialize: Some(Status::new(-5)),
        ..Faults::default()
    });

    let error = stream.close().unwrap_err();

    assert!(matches!(
        error,
        Error::Device {
            operation: Operation::Close,
            status,
        } if status == Status::new(-5)
    ));

    assert_eq!(stream.state(), State::Closed);
    assert!(controller.disposed());
    assert!(!controller.is_acquired());
    Ok(())
}

#[test]
fn test_drop_releases_device() -> anyhow::Result<()> {
    let device = FakeDevice::new(Capabilities::default());
    let controller = device.controller();

    {
        let mut stream = StreamHandle::open(
            device,
            Direction::Output,
            &StreamConfig::default(),
            Handler::None,
            &Options::default(),
        )?;

        stream.start()?;
        assert!(controller.is_acquired());
    }

    assert!(!controller.is_running());
    assert!(!controller.is_acquired());
    assert!(controller.disposed());
    Ok(())
}

#[test]
fn test_start_failure_keeps_state() -> anyhow::Result<()> {
    let (mut stream, controller) =
        super::open_output(Capabilities::default(), &StreamConfig::default(), Handler::None)?;

    controller.set_faults(Faults {
        start: Some(Status::new(-19)),
        ..Faults::default()
    });

    assert!(matches!(
        stream.start(),
        Err(Error::Device {
            operation: Operation::Start,
            ..
        })
    ));

    assert_eq!(stream.state(), State::Configured);

    controller.set_faults(Faults::default());
    stream.start()?;
    assert_eq!(stream.state(), State::Started);
    Ok(())
}

#[test]
fn test_register_failure_is_cleaned_up_on_close() {
    let device = FakeDevice::new(Capabilities::default());
    let controller = device.controller();

    controller.set_faults(Faults {
        register: Some(Status::new(-12)),
        ..Faults::default()
    });

    let result = StreamHandle::open(
        device,
        Direction::Output,
        &StreamConfig::default(),
        Handler::None,
        &Options::default(),
    );

    assert!(matches!(
        result,
        Err(Error::Device {
            operation: Operation::Open,
            ..
        })
    ));

    assert!(!controller.is_acquired());
    assert!(controller.disposed());
}
