//! Dive Rite NiTek Q downloader. A one-letter handshake, 128-byte page
//! reads, and the usual trailer-walked profile ring.

use crate::bytes;
use crate::common::Family;
use crate::context::{Context, DevInfo};
use crate::device::{Canceller, Device, DeviceBase, DiveCallback, Progress, RawDive};
use crate::error::{Error, Result};
use crate::iostream::{Direction, FlowControl, IoStream, LineParams, Parity, StopBits, Timeout};
use crate::ringbuffer::Ring;

const CMD_HANDSHAKE: u8 = 0x42; // 'B'
const ACK: u8 = 0x41; // 'A'
const CMD_READ: u8 = 0x72; // 'r'

const SZ_PAGE: usize = 0x80;
const SZ_MEMORY: u32 = 0x8000;

const RB_PROFILE: Ring = Ring::new(0x0100, 0x8000);
const CFG_END_POINTER: usize = 0x00;
const CFG_SERIAL: usize = 0x04;

pub(crate) const FP_SIZE: usize = 6;

pub struct NitekQDevice {
    base: DeviceBase,
    stream: Box<dyn IoStream>,
}

impl NitekQDevice {
    pub fn open(context: &Context, mut stream: Box<dyn IoStream>) -> Result<Self> {
        stream.configure(&LineParams::new(
            9600,
            8,
            Parity::None,
            StopBits::One,
            FlowControl::None,
        ))?;
        stream.set_timeout(Timeout::Ms(1000))?;
        stream.purge(Direction::All)?;

        let mut device = Self {
            base: DeviceBase::new(context, Family::DiveRiteNitekQ),
            stream,
        };
        device.base.check_cancelled()?;
        device.stream.write_all(&[CMD_HANDSHAKE])?;
        let mut ack = [0u8; 1];
        device.stream.read_exact(&mut ack)?;
        if ack[0] != ACK {
            return Err(Error::Protocol("handshake not acknowledged"));
        }
        Ok(device)
    }

    fn read_page(&mut self, page: u8, buf: &mut [u8]) -> Result<()> {
        self.base.check_cancelled()?;
        self.stream.write_all(&[CMD_READ, page])?;
        self.stream.read_exact(buf)?;
        Ok(())
    }

    fn dump_memory(&mut self, buffer: &mut Vec<u8>) -> Result<()> {
        let mut progress = Progress::new(SZ_MEMORY);
        let start = buffer.len();
        buffer.resize(start + SZ_MEMORY as usize, 0);
        for page in 0..(SZ_MEMORY as usize / SZ_PAGE) {
            let window = &mut buffer[start + page * SZ_PAGE..start + (page + 1) * SZ_PAGE];
            self.read_page(page as u8, window)?;
            progress.set(&self.base, ((page + 1) * SZ_PAGE) as u32);
        }

        let image = &buffer[start..];
        self.base.set_devinfo(DevInfo {
            model: 0x01,
            firmware: 0,
            serial: bytes::u32_le(&image[CFG_SERIAL..CFG_SERIAL + 4]),
        });
        Ok(())
    }

    fn extract_dives(&self, image: &[u8], callback: DiveCallback<'_>) -> Result<()> {
        if image.len() < SZ_MEMORY as usize {
            return Err(Error::DataFormat("memory image truncated"));
        }
        if bytes::is_all(&image[CFG_END_POINTER..CFG_END_POINTER + 2], 0xFF) {
            return Ok(());
        }
        let mut end = RB_PROFILE.check(bytes::u16_le(&image[CFG_END_POINTER..]) as u32)?;

        let mut remaining = RB_PROFILE.size();
        loop {
            let trailer = RB_PROFILE.read_backward(image, end, 2)?;
            if bytes::is_all(&trailer, 0xFF) || bytes::is_all(&trailer, 0x00) {
                break;
            }
            let len = bytes::u16_le(&trailer) as u32;
            if len < FP_SIZE as u32 || len + 2 > remaining {
                break;
            }
            let data_end = RB_PROFILE.decrement(end, 2);
            let dive = RB_PROFILE.read_backward(image, data_end, len)?;
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
            end = RB_PROFILE.decrement(end, len + 2);
        }
        Ok(())
    }
}

impl Device for NitekQDevice {
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
        self.base.set_fingerprint(fingerprint, FP_SIZE)
    }

    fn dump(&mut self, buffer: &mut Vec<u8>) -> Result<()> {
        self.dump_memory(buffer)
    }

    fn foreach(&mut self, callback: DiveCallback<'_>) -> Result<()> {
        let mut image = Vec::new();
        self.dump_memory(&mut image)?;
        self.extract_dives(&image, callback)
    }
}
