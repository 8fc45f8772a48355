//! Shared protocol and extraction for the Mares serial computers (Nemo,
//! Puck, Darwin). XOR-framed read commands pull the whole memory; dives
//! sit in a profile ring, newest last, each closed by a length trailer.
//! Byte 1 of page 0 names the exact sub-model and selects the layout.

use crate::bytes;
use crate::checksum;
use crate::common::Family;
use crate::context::{Context, DevInfo};
use crate::device::{DeviceBase, DiveCallback, Progress, RawDive};
use crate::error::{Error, Result};
use crate::iostream::{Direction, FlowControl, IoStream, LineParams, Parity, StopBits, Timeout};
use crate::ringbuffer::Ring;

const STX: u8 = 0xE7;
const CMD_READ: u8 = 0x52;

const SZ_PACKET: usize = 0x20;

pub(crate) const FP_SIZE: usize = 5;

/// Offset of the end-of-profile pointer inside the configuration page.
const CFG_END_POINTER: usize = 0x08;
/// Offset of the model byte inside the configuration page.
const CFG_MODEL: usize = 0x01;

#[derive(Debug, Clone, Copy)]
pub(crate) struct MaresLayout {
    pub memsize: u32,
    pub rb_profile: Ring,
}

pub(crate) struct MaresCommonDevice {
    pub(crate) base: DeviceBase,
    stream: Box<dyn IoStream>,
    layout: &'static MaresLayout,
}

impl MaresCommonDevice {
    pub(crate) fn open(
        context: &Context,
        mut stream: Box<dyn IoStream>,
        family: Family,
        layout: &'static MaresLayout,
    ) -> Result<Self> {
        stream.configure(&LineParams::new(
            9600,
            8,
            Parity::None,
            StopBits::One,
            FlowControl::None,
        ))?;
        stream.set_timeout(Timeout::Ms(1000))?;
        stream.set_dtr(true)?;
        stream.set_rts(true)?;
        stream.purge(Direction::All)?;

        Ok(Self {
            base: DeviceBase::new(context, family),
            stream,
            layout,
        })
    }

    pub(crate) fn read_memory(&mut self, address: u32, buf: &mut [u8]) -> Result<()> {
        if address + buf.len() as u32 > self.layout.memsize {
            return Err(Error::InvalidArgs("address window outside memory"));
        }
        let mut offset = 0;
        while offset < buf.len() {
            self.base.check_cancelled()?;
            let chunk = (buf.len() - offset).min(SZ_PACKET);
            let addr = address + offset as u32;
            let mut command = vec![STX, CMD_READ, addr as u8, (addr >> 8) as u8, chunk as u8];
            command.push(checksum::xor8(&command, 0x00));
            self.stream.write_all(&command)?;

            let mut reply = vec![0u8; chunk + 2];
            self.stream.read_exact(&mut reply)?;
            if reply[0] != STX {
                return Err(Error::Protocol("reply framing mismatch"));
            }
            if checksum::xor8(&reply[..chunk + 1], 0x00) != reply[chunk + 1] {
                return Err(Error::Protocol("reply checksum mismatch"));
            }
            buf[offset..offset + chunk].copy_from_slice(&reply[1..chunk + 1]);
            offset += chunk;
        }
        Ok(())
    }

    pub(crate) fn dump_memory(&mut self, buffer: &mut Vec<u8>) -> Result<()> {
        let mut progress = Progress::new(self.layout.memsize);
        let start = buffer.len();
        buffer.resize(start + self.layout.memsize as usize, 0);
        let mut offset = 0usize;
        while offset < self.layout.memsize as usize {
            let chunk = (self.layout.memsize as usize - offset).min(SZ_PACKET);
            self.read_memory(
                offset as u32,
                &mut buffer[start + offset..start + offset + chunk],
            )?;
            offset += chunk;
            progress.set(&self.base, offset as u32);
        }

        let image = &buffer[start..];
        self.base.set_devinfo(DevInfo {
            model: image[CFG_MODEL] as u32,
            firmware: image[0] as u32,
            serial: bytes::u32_le(&image[0x10..0x14]),
        });
        Ok(())
    }

    pub(crate) fn extract_dives(&self, image: &[u8], callback: DiveCallback<'_>) -> Result<()> {
        let ring = self.layout.rb_profile;
        if image.len() < self.layout.memsize as usize {
            return Err(Error::DataFormat("memory image truncated"));
        }
        let end_raw = bytes::u16_le(&image[CFG_END_POINTER..]) as u32;
        if bytes::is_all(&image[CFG_END_POINTER..CFG_END_POINTER + 2], 0xFF) {
            // Freshly erased memory, nothing recorded yet.
            return Ok(());
        }
        let mut end = ring.check(end_raw)?;

        let mut remaining = ring.size();
        loop {
            let trailer = ring.read_backward(image, end, 2)?;
            if bytes::is_all(&trailer, 0xFF) || bytes::is_all(&trailer, 0x00) {
                break;
            }
            let len = bytes::u16_le(&trailer) as u32;
            if len < FP_SIZE as u32 || len + 2 > remaining {
                break;
            }
            let data_end = ring.decrement(end, 2);
            let dive = ring.read_backward(image, data_end, len)?;
            let fingerprint = dive[..FP_SIZE].to_vec();
            if self.base.fingerprint_reached(&fingerprint) {
                return Ok(());
            }
            if !callback(RawDive {
                data: &dive,
                fingerprint: &fingerprint,
            }) {
                return Ok(());
            }
            remaining -= len + 2;
            end = ring.decrement(end, len + 2);
        }
        Ok(())
    }

    pub(crate) fn family(&self) -> Family {
        self.base.family()
    }
}
