//! Suunto D9/D6/D4 downloader. Same wire protocol as the Vyper2, smaller
//! profile ring.

use crate::common::Family;
use crate::context::{Context, DevInfo};
use crate::device::suunto_common2::{Common2Device, Common2Layout, FP_SIZE};
use crate::device::{Canceller, Device, DeviceBase, DiveCallback};
use crate::error::Result;
use crate::iostream::IoStream;
use crate::ringbuffer::Ring;

static LAYOUT: Common2Layout = Common2Layout {
    memsize: 0x8000,
    rb_profile: Ring::new(0x019A, 0x7FE0),
};

pub struct D9Device {
    inner: Common2Device,
}

impl D9Device {
    pub fn open(context: &Context, stream: Box<dyn IoStream>) -> Result<Self> {
        let base = DeviceBase::new(context, Family::SuuntoD9);
        Ok(Self {
            inner: Common2Device::open(base, stream, &LAYOUT)?,
        })
    }
}

impl Device for D9Device {
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
    use crate::context::Context;
    use crate::device::suunto_common2::tests::{frame, script_identify};
    use crate::error::Error;
    use crate::testing::FakePort;

    const RB: Ring = Ring::new(0x019A, 0x7FE0);

    fn read_params(address: u32, len: u8) -> [u8; 3] {
        [(address >> 8) as u8, address as u8, len]
    }

    fn expect_read(port: &mut FakePort, address: u32, data: &[u8]) {
        let params = read_params(address, data.len() as u8);
        let mut answer = params.to_vec();
        answer.extend_from_slice(data);
        port.expect(&frame(0x05, &params), &frame(0x05, &answer));
    }

    /// Two dives in the ring, newest last, each followed by its 16-bit
    /// length trailer.
    fn script_two_dives(port: &mut FakePort, dive_new: &[u8], dive_old: &[u8]) -> u32 {
        let old_start = RB.begin;
        let new_start = old_start + dive_old.len() as u32 + 2;
        let write_ptr = new_start + dive_new.len() as u32 + 2;

        let pointers = [
            (write_ptr >> 8) as u8,
            write_ptr as u8,
            0x00,
            0x02, // two dives
        ];
        expect_read(port, 0x0190, &pointers);

        // Trailer pass, newest first.
        expect_read(
            port,
            write_ptr - 2,
            &(dive_new.len() as u16).to_be_bytes(),
        );
        expect_read(
            port,
            new_start - 2,
            &(dive_old.len() as u16).to_be_bytes(),
        );

        // Data pass.
        expect_read(port, new_start, dive_new);
        expect_read(port, old_start, dive_old);
        write_ptr
    }

    fn dive_blob(seed: u8) -> Vec<u8> {
        let mut dive = vec![0u8; 0x30];
        for (i, byte) in dive.iter_mut().enumerate() {
            *byte = seed.wrapping_add(i as u8);
        }
        dive
    }

    #[test]
    fn test_foreach_newest_first_with_fingerprints() {
        let mut port = FakePort::new();
        script_identify(&mut port, 0x0E);
        let dive_new = dive_blob(0x40);
        let dive_old = dive_blob(0x80);
        script_two_dives(&mut port, &dive_new, &dive_old);

        let context = Context::new();
        let mut device = D9Device::open(&context, Box::new(port)).unwrap();

        let mut dives = Vec::new();
        device
            .foreach(&mut |dive| {
                dives.push((dive.data.to_vec(), dive.fingerprint.to_vec()));
                true
            })
            .unwrap();

        assert_eq!(dives.len(), 2);
        assert_eq!(dives[0].0, dive_new);
        assert_eq!(dives[1].0, dive_old);
        assert_eq!(dives[0].1, &dive_new[0x04..0x09]);
    }

    #[test]
    fn test_fingerprint_of_latest_dive_skips_everything() {
        let mut port = FakePort::new();
        script_identify(&mut port, 0x0E);
        let dive_new = dive_blob(0x40);
        let dive_old = dive_blob(0x80);
        script_two_dives(&mut port, &dive_new, &dive_old);

        let context = Context::new();
        let mut device = D9Device::open(&context, Box::new(port)).unwrap();
        device.set_fingerprint(&dive_new[0x04..0x09]).unwrap();

        let mut calls = 0;
        device
            .foreach(&mut |_| {
                calls += 1;
                true
            })
            .unwrap();
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_cancel_mid_download_delivers_nothing_more() {
        let mut port = FakePort::new();
        script_identify(&mut port, 0x0E);
        let dive_new = dive_blob(0x40);
        let dive_old = dive_blob(0x80);
        script_two_dives(&mut port, &dive_new, &dive_old);

        let context = Context::new();
        let mut device = D9Device::open(&context, Box::new(port)).unwrap();
        let canceller = device.canceller();

        let mut delivered = 0;
        let result = device.foreach(&mut |_| {
            delivered += 1;
            canceller.cancel();
            true
        });
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(delivered, 1);
    }

    #[test]
    fn test_bogus_write_pointer_is_data_format() {
        let mut port = FakePort::new();
        script_identify(&mut port, 0x0E);
        expect_read(&mut port, 0x0190, &[0x00, 0x10, 0x00, 0x01]);

        let context = Context::new();
        let mut device = D9Device::open(&context, Box::new(port)).unwrap();
        let result = device.foreach(&mut |_| true);
        assert!(matches!(result, Err(Error::DataFormat(_))));
    }
}
