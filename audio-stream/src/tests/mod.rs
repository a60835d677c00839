mod duplex;
mod lifecycle;
mod underrun;

use crate::fake::{Capabilities, FakeController, FakeDevice};
use crate::{Direction, Handler, Options, StreamConfig, StreamHandle};

/// Open an output stream on a fake device with the given capabilities.
fn open_output(
    capabilities: Capabilities,
    config: &StreamConfig,
    handler: Handler,
) -> anyhow::Result<(StreamHandle<FakeDevice>, FakeController)> {
    let device = FakeDevice::new(capabilities);
    let controller = device.controller();
    let stream = StreamHandle::open(
        device,
        Direction::Output,
        config,
        handler,
        &Options::default(),
    )?;
    Ok((stream, controller))
}
