//! Oceanic Atom 2 downloader (and the large crowd of OEM variants that
//! share its page protocol): `0xB1` page reads acknowledged with `0x5A`
//! and protected by an additive checksum.

use crate::bytes;
use crate::checksum;
use crate::common::Family;
use crate::context::{Context, DevInfo};
use crate::device::oceanic_common::{self, OceanicLayout, OceanicProtocol};
use crate::device::{Canceller, Device, DeviceBase, DiveCallback};
use crate::error::{Error, Result};
use crate::iostream::{Direction, FlowControl, IoStream, LineParams, Parity, StopBits, Timeout};
use crate::ringbuffer::Ring;

const CMD_INIT: u8 = 0xA8;
const CMD_VERSION: u8 = 0x84;
const CMD_READ: u8 = 0xB1;
const CMD_QUIT: u8 = 0x6A;

const ACK: u8 = 0x5A;

const PAGE: u32 = 0x10;

static LAYOUT: OceanicLayout = OceanicLayout {
    memsize: 0xFFF0,
    cf_pointers: 0x0040,
    rb_logbook: Ring::new(0x0240, 0x0A40),
    rb_profile: Ring::new(0x0A40, 0xFFF0),
    entry_size: 0x10,
};

const ADDR_DEVINFO: u32 = 0x0000;

pub struct Atom2Device {
    base: DeviceBase,
    stream: Box<dyn IoStream>,
}

impl Atom2Device {
    pub fn open(context: &Context, mut stream: Box<dyn IoStream>) -> Result<Self> {
        stream.configure(&LineParams::new(
            38400,
            8,
            Parity::None,
            StopBits::One,
            FlowControl::None,
        ))?;
        stream.set_timeout(Timeout::Ms(3000))?;
        stream.purge(Direction::All)?;

        let mut device = Self {
            base: DeviceBase::new(context, Family::OceanicAtom2),
            stream,
        };
        device.command(&[CMD_INIT], &mut [])?;

        let mut version = [0u8; 16];
        device.command(&[CMD_VERSION], &mut version)?;
        log::debug!("atom2 version: {}", String::from_utf8_lossy(&version));
        device.base.emit_vendor(&version);

        let mut devinfo = [0u8; 16];
        device.read_bytes(ADDR_DEVINFO, &mut devinfo)?;
        device.base.set_devinfo(DevInfo {
            model: bytes::u16_be(&devinfo[0..2]) as u32,
            firmware: devinfo[2] as u32,
            serial: bytes::u32_be(&devinfo[3..7]),
        });
        Ok(device)
    }

    /// Write a command, require the ACK, then read `answer` plus an
    /// additive checksum byte.
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
            let mut crc = [0u8; 1];
            self.stream.read_exact(&mut crc)?;
            if checksum::add8(answer, 0x00) != crc[0] {
                return Err(Error::Protocol("page checksum mismatch"));
            }
        }
        Ok(())
    }
}

impl OceanicProtocol for Atom2Device {
    fn base(&mut self) -> &mut DeviceBase {
        &mut self.base
    }

    fn read_bytes(&mut self, address: u32, buf: &mut [u8]) -> Result<()> {
        // The ring layouts keep every window page-aligned.
        let mut offset = 0u32;
        while (offset as usize) < buf.len() {
            let page = (address + offset) / PAGE;
            let mut answer = [0u8; PAGE as usize];
            self.command(&[CMD_READ, (page >> 8) as u8, page as u8], &mut answer)?;
            let chunk = (buf.len() - offset as usize).min(PAGE as usize);
            buf[offset as usize..offset as usize + chunk].copy_from_slice(&answer[..chunk]);
            offset += chunk as u32;
        }
        Ok(())
    }
}

impl Device for Atom2Device {
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
        self.stream.write_all(&[CMD_QUIT])?;
        Ok(())
    }
}
