//! Mares Nemo downloader (Nemo, Nemo Wide, Nemo Air).

use crate::common::Family;
use crate::context::{Context, DevInfo};
use crate::device::mares_common::{FP_SIZE, MaresCommonDevice, MaresLayout};
use crate::device::{Canceller, Device, DiveCallback};
use crate::error::Result;
use crate::iostream::IoStream;
use crate::ringbuffer::Ring;

static LAYOUT: MaresLayout = MaresLayout {
    memsize: 0x4000,
    rb_profile: Ring::new(0x0100, 0x4000),
};

pub struct NemoDevice {
    inner: MaresCommonDevice,
}

impl NemoDevice {
    pub fn open(context: &Context, stream: Box<dyn IoStream>) -> Result<Self> {
        Ok(Self {
            inner: MaresCommonDevice::open(context, stream, Family::MaresNemo, &LAYOUT)?,
        })
    }
}

impl Device for NemoDevice {
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

    fn dump(&mut self, buffer: &mut Vec<u8>) -> Result<()> {
        self.inner.dump_memory(buffer)
    }

    fn foreach(&mut self, callback: DiveCallback<'_>) -> Result<()> {
        let mut image = Vec::new();
        self.inner.dump_memory(&mut image)?;
        self.inner.extract_dives(&image, callback)
    }
}
