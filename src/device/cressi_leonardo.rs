//! Cressi Leonardo downloader. One magic command streams the whole
//! memory, CRC-16 at the tail; dives are trailer-walked from the ring.

use crate::bytes;
use crate::checksum;
use crate::common::Family;
use crate::context::{Context, DevInfo};
use crate::device::{Canceller, Device, DeviceBase, DiveCallback, Progress, RawDive};
use crate::error::{Error, Result};
use crate::iostream::{Direction, FlowControl, IoStream, LineParams, Parity, StopBits, Timeout};
use crate::ringbuffer::Ring;

const CMD_DOWNLOAD: [u8; 5] = [0x7B, 0x31, 0x32, 0x33, 0x34];

const SZ_MEMORY: usize = 0x8000;

const RB_PROFILE: Ring = Ring::new(0x0100, 0x8000);
const CFG_END_POINTER: usize = 0x02;
const CFG_SERIAL: usize = 0x08;

pub(crate) const FP_SIZE: usize = 5;

pub struct LeonardoDevice {
    base: DeviceBase,
    stream: Box<dyn IoStream>,
}

impl LeonardoDevice {
    pub fn open(context: &Context, mut stream: Box<dyn IoStream>) -> Result<Self> {
        stream.configure(&LineParams::new(
            115200,
            8,
            Parity::None,
            StopBits::One,
            FlowControl::None,
        ))?;
        stream.set_timeout(Timeout::Ms(3000))?;
        stream.set_dtr(true)?;
        stream.set_rts(false)?;
        stream.purge(Direction::All)?;

        Ok(Self {
            base: DeviceBase::new(context, Family::CressiLeonardo),
            stream,
        })
    }

    fn dump_memory(&mut self, buffer: &mut Vec<u8>) -> Result<()> {
        self.base.check_cancelled()?;
        let mut progress = Progress::new(SZ_MEMORY as u32);

        self.stream.purge(Direction::Input)?;
        self.stream.write_all(&CMD_DOWNLOAD)?;

        let mut image = vec![0u8; SZ_MEMORY + 2];
        let mut offset = 0;
        while offset < image.len() {
            self.base.check_cancelled()?;
            let chunk = (image.len() - offset).min(0x400);
            self.stream.read_exact(&mut image[offset..offset + chunk])?;
            offset += chunk;
            progress.set(&self.base, offset.min(SZ_MEMORY) as u32);
        }
        if checksum::crc16_ccitt(&image[..SZ_MEMORY], 0xFFFF) != bytes::u16_le(&image[SZ_MEMORY..])
        {
            return Err(Error::Protocol("memory dump checksum mismatch"));
        }
        image.truncate(SZ_MEMORY);

        self.base.set_devinfo(DevInfo {
            model: image[0] as u32,
            firmware: image[1] as u32,
            serial: bytes::u32_le(&image[CFG_SERIAL..CFG_SERIAL + 4]),
        });

        buffer.extend_from_slice(&image);
        Ok(())
    }

    fn extract_dives(&self, image: &[u8], callback: DiveCallback<'_>) -> Result<()> {
        if image.len() < SZ_MEMORY {
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

impl Device for LeonardoDevice {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dump_then_trailer_walk() {
        let mut image = vec![0u8; SZ_MEMORY];
        let dive = [20u8, 3, 14, 10, 0, 32, 0, 0, 50, 0, 120, 0];
        let begin = RB_PROFILE.begin as usize;
        image[begin..begin + dive.len()].copy_from_slice(&dive);
        image[begin + dive.len()..begin + dive.len() + 2]
            .copy_from_slice(&(dive.len() as u16).to_le_bytes());
        let end = (begin + dive.len() + 2) as u16;
        image[CFG_END_POINTER..CFG_END_POINTER + 2].copy_from_slice(&end.to_le_bytes());

        let mut response = image.clone();
        response.extend_from_slice(&checksum::crc16_ccitt(&image, 0xFFFF).to_le_bytes());

        let mut port = crate::testing::FakePort::new();
        port.expect(&CMD_DOWNLOAD, &response);

        let context = Context::new();
        let mut device = LeonardoDevice::open(&context, Box::new(port)).unwrap();
        let mut dives = Vec::new();
        device
            .foreach(&mut |raw| {
                dives.push(raw.data.to_vec());
                true
            })
            .unwrap();
        assert_eq!(dives, vec![dive.to_vec()]);
    }
}
