//! Oceanic VT Pro/Versa Pro downloader. Oldest of the Oceanic page
//! protocols; commands are two-byte sequences and pages are not
//! checksummed.

use crate::bytes;
use crate::common::Family;
use crate::context::{Context, DevInfo};
use crate::device::oceanic_common::{self, OceanicLayout, OceanicProtocol};
use crate::device::{Canceller, Device, DeviceBase, DiveCallback};
use crate::error::{Error, Result};
use crate::iostream::{Direction, FlowControl, IoStream, LineParams, Parity, StopBits, Timeout};
use crate::ringbuffer::Ring;

const CMD_INIT: [u8; 2] = [0xAA, 0x00];
const CMD_READ: u8 = 0x34;
const CMD_QUIT: [u8; 2] = [0x96, 0x00];

const ACK: u8 = 0x5A;

const PAGE: u32 = 0x10;

static LAYOUT: OceanicLayout = OceanicLayout {
    memsize: 0x8000,
    cf_pointers: 0x0040,
    rb_logbook: Ring::new(0x0240, 0x0440),
    rb_profile: Ring::new(0x0440, 0x8000),
    entry_size: 0x10,
};

const ADDR_DEVINFO: u32 = 0x0000;

pub struct VtProDevice {
    base: DeviceBase,
    stream: Box<dyn IoStream>,
}

impl VtProDevice {
    pub fn open(context: &Context, mut stream: Box<dyn IoStream>) -> Result<Self> {
        stream.configure(&LineParams::new(
            9600,
            8,
            Parity::None,
            StopBits::One,
            FlowControl::None,
        ))?;
        stream.set_timeout(Timeout::Ms(3000))?;
        stream.purge(Direction::All)?;

        let mut device = Self {
            base: DeviceBase::new(context, Family::OceanicVtPro),
            stream,
        };
        device.command(&CMD_INIT, &mut [])?;

        let mut devinfo = [0u8; 16];
        device.read_bytes(ADDR_DEVINFO, &mut devinfo)?;
        device.base.set_devinfo(DevInfo {
            model: bytes::u16_be(&devinfo[0..2]) as u32,
            firmware: devinfo[2] as u32,
            serial: bytes::u32_be(&devinfo[3..7]),
        });
        Ok(device)
    }

    fn command(&mut self, cmd: &[u8], answer: &mut [u8]) -> Result<()> {
        self.base.check_cancelled()?;
        self.stream.write_all(cmd)?;

        let mut ack = [0u8; 1];
        self.stream.read_exact(&mut ack)?;
        if ack[0] != ACK {
            return Err(Error::Protocol("command not acknowledged"));
        }
        if !answer.is_empty() {
            self.stream.read_exact(answer)?;
        }
        Ok(())
    }
}

impl OceanicProtocol for VtProDevice {
    fn base(&mut self) -> &mut DeviceBase {
        &mut self.base
    }

    fn read_bytes(&mut self, address: u32, buf: &mut [u8]) -> Result<()> {
        let mut offset = 0u32;
        while (offset as usize) < buf.len() {
            let page = (address + offset) / PAGE;
            let mut answer = [0u8; PAGE as usize];
            self.command(
                &[CMD_READ, (page >> 8) as u8, page as u8, 0x00],
                &mut answer,
            )?;
            let chunk = (buf.len() - offset as usize).min(PAGE as usize);
            buf[offset as usize..offset as usize + chunk].copy_from_slice(&answer[..chunk]);
            offset += chunk as u32;
        }
        Ok(())
    }
}

impl Device for VtProDevice {
    fn family(&self) -> Family {
        self.base.family()
    }

    fn devinfo(&self) -> Option<DevInfo> {
        self.base.devinfo()
    }

    fn canceller(&self) -> Canceller {
        self.base.canceller()
    }

    fn set_fingerprint(&mut self, fingerprint: &[u8]) -> Result<()> {
        self.base
            .set_fingerprint(fingerprint, LAYOUT.entry_size as usize)
    }

    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<()> {
        self.read_bytes(address, buf)
    }

    fn dump(&mut self, buffer: &mut Vec<u8>) -> Result<()> {
        oceanic_common::dump(self, &LAYOUT, buffer)
    }

    fn foreach(&mut self, callback: DiveCallback<'_>) -> Result<()> {
        oceanic_common::foreach(self, &LAYOUT, callback)
    }

    fn close(&mut self) -> Result<()> {
        self.stream.write_all(&CMD_QUIT)?;
        Ok(())
    }
}
