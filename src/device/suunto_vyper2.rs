//! Suunto Vyper2/Vytec DS downloader, a thin layout over the shared
//! second-generation protocol.

use crate::common::Family;
use crate::context::{Context, DevInfo};
use crate::device::suunto_common2::{Common2Device, Common2Layout, FP_SIZE};
use crate::device::{Canceller, Device, DeviceBase, DiveCallback};
use crate::error::Result;
use crate::iostream::IoStream;
use crate::ringbuffer::Ring;

static LAYOUT: Common2Layout = Common2Layout {
    memsize: 0x8000,
    rb_profile: Ring::new(0x019A, 0x8000),
};

pub struct Vyper2Device {
    inner: Common2Device,
}

impl Vyper2Device {
    pub fn open(context: &Context, stream: Box<dyn IoStream>) -> Result<Self> {
        let base = DeviceBase::new(context, Family::SuuntoVyper2);
        Ok(Self {
            inner: Common2Device::open(base, stream, &LAYOUT)?,
        })
    }
}

impl Device for Vyper2Device {
    fn family(&self) -> Family {
        self.inner.family()
    }

    fn devinfo(&self) -> Option<DevInfo> {
        self.inner.base.devinfo()
    }

    fn canceller(&self) -> Canceller {
        self.inner.base.canceller()
    }

    fn set_fingerprint(&mut self, fingerprint: &[u8]) -> Result<()> {
        self.inner.base.set_fingerprint(fingerprint, FP_SIZE)
    }

    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<()> {
        self.inner.read_memory(address, buf)
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<()> {
        self.inner.write_memory(address, data)
    }

    fn dump(&mut self, buffer: &mut Vec<u8>) -> Result<()> {
        self.inner.dump_memory(buffer)
    }

    fn foreach(&mut self, callback: DiveCallback<'_>) -> Result<()> {
        self.inner.foreach_dive(callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::suunto_common2::tests::{frame, script_identify};
    use crate::testing::FakePort;

    #[test]
    fn test_write_read_round_trip() {
        let mut port = FakePort::new();
        script_identify(&mut port, 0x10);

        let data = [0xDE, 0xAD, 0xBE, 0xEF];
        let mut write_params = vec![0x01, 0x80, 0x04];
        write_params.extend_from_slice(&data);
        port.expect(&frame(0x06, &write_params), &frame(0x06, &write_params));

        let read_params = [0x01, 0x80, 0x04];
        let mut answer = read_params.to_vec();
        answer.extend_from_slice(&data);
        port.expect(&frame(0x05, &read_params), &frame(0x05, &answer));

        let context = Context::new();
        let mut device = Vyper2Device::open(&context, Box::new(port)).unwrap();
        device.write(0x0180, &data).unwrap();

        let mut readback = [0u8; 4];
        device.read(0x0180, &mut readback).unwrap();
        assert_eq!(readback, data);
    }
}
