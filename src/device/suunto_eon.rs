//! Suunto EON/Solution Alpha downloader: a 0x900-byte memory dump over a
//! 1200 baud line, dives delimited by marker bytes in the profile ring.

use crate::bytes;
use crate::checksum;
use crate::common::Family;
use crate::context::{Context, DevInfo};
use crate::device::{Canceller, Device, DeviceBase, DiveCallback, Progress, RawDive};
use crate::error::{Error, Result};
use crate::iostream::{Direction, FlowControl, IoStream, LineParams, Parity, StopBits, Timeout};
use crate::ringbuffer::{Overlap, Ring};

const CMD_DUMP: u8 = 0x50; // 'P'

const SZ_MEMORY: usize = 0x900;

const MARKER: u8 = 0x82;

const RB_PROFILE: Ring = Ring::new(0x100, 0x900);
const ADDR_BEGIN: usize = 0x02;
const ADDR_END: usize = 0x04;
const ADDR_SERIAL: usize = 0x06;

/// The BCD timestamp opening each dive.
pub(crate) const FP_SIZE: usize = 6;

pub struct EonDevice {
    base: DeviceBase,
    stream: Box<dyn IoStream>,
}

impl EonDevice {
    pub fn open(context: &Context, mut stream: Box<dyn IoStream>) -> Result<Self> {
        stream.configure(&LineParams::new(
            1200,
            8,
            Parity::None,
            StopBits::Two,
            FlowControl::None,
        ))?;
        stream.set_timeout(Timeout::Ms(3000))?;
        stream.set_rts(true)?;
        stream.sleep(100);
        stream.purge(Direction::All)?;

        Ok(Self {
            base: DeviceBase::new(context, Family::SuuntoEon),
            stream,
        })
    }

    fn dump_memory(&mut self, buffer: &mut Vec<u8>) -> Result<()> {
        self.base.check_cancelled()?;
        let mut progress = Progress::new(SZ_MEMORY as u32);

        self.stream.purge(Direction::Input)?;
        self.stream.write_all(&[CMD_DUMP])?;

        let mut image = vec![0u8; SZ_MEMORY + 1];
        // Read in line-sized slices so a stalled device times out per
        // chunk and progress keeps moving on a healthy one.
        let mut offset = 0;
        while offset < image.len() {
            let chunk = (image.len() - offset).min(0x80);
            self.stream.read_exact(&mut image[offset..offset + chunk])?;
            offset += chunk;
            progress.set(&self.base, offset.min(SZ_MEMORY) as u32);
        }
        if checksum::add8(&image[..SZ_MEMORY], 0x00) != image[SZ_MEMORY] {
            return Err(Error::Protocol("memory dump checksum mismatch"));
        }
        image.truncate(SZ_MEMORY);

        self.base.set_devinfo(DevInfo {
            model: 0x02,
            firmware: image[0] as u32,
            serial: bytes::u32_be(&image[ADDR_SERIAL..ADDR_SERIAL + 4]),
        });

        buffer.extend_from_slice(&image);
        Ok(())
    }
}

pub(crate) fn extract_dives(
    base: &DeviceBase,
    image: &[u8],
    callback: DiveCallback<'_>,
) -> Result<()> {
    if image.len() < SZ_MEMORY {
        return Err(Error::DataFormat("memory image truncated"));
    }
    let begin = RB_PROFILE.check(bytes::u16_be(&image[ADDR_BEGIN..]) as u32)?;
    let end = RB_PROFILE.check(bytes::u16_be(&image[ADDR_END..]) as u32)?;

    let mut remaining = RB_PROFILE.distance(begin, end, Overlap::Empty);
    let mut current = end;
    while remaining > 0 {
        let mut len = 0;
        while len < remaining {
            let pos = RB_PROFILE.decrement(current, len + 1);
            if image[pos as usize] == MARKER {
                break;
            }
            len += 1;
        }

        let dive = RB_PROFILE.read_backward(image, current, len)?;
        if dive.len() < FP_SIZE {
            return Err(Error::DataFormat("dive shorter than its fingerprint"));
        }
        let fingerprint = dive[..FP_SIZE].to_vec();
        if base.fingerprint_reached(&fingerprint) {
            return Ok(());
        }
        if !callback(RawDive {
            data: &dive,
            fingerprint: &fingerprint,
        }) {
            return Ok(());
        }

        let consumed = if len < remaining { len + 1 } else { len };
        remaining -= consumed;
        current = RB_PROFILE.decrement(current, consumed);
    }
    Ok(())
}

impl Device for EonDevice {
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
        extract_dives(&self.base, &image, callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dump_and_extract() {
        let mut image = vec![0u8; SZ_MEMORY];
        let dive = [0x95, 0x07, 0x23, 0x11, 0x30, 0x00, 0x14, 0x20, 10, 20, 30];
        let begin = RB_PROFILE.begin as usize;
        image[begin] = MARKER;
        image[begin + 1..begin + 1 + dive.len()].copy_from_slice(&dive);
        image[ADDR_BEGIN..ADDR_BEGIN + 2].copy_from_slice(&(begin as u16).to_be_bytes());
        let end = (begin + 1 + dive.len()) as u16;
        image[ADDR_END..ADDR_END + 2].copy_from_slice(&end.to_be_bytes());

        let mut response = image.clone();
        response.push(checksum::add8(&image, 0x00));

        let mut port = crate::testing::FakePort::new();
        port.expect(&[CMD_DUMP], &response);

        let context = Context::new();
        let mut device = EonDevice::open(&context, Box::new(port)).unwrap();
        let mut dives = Vec::new();
        device
            .foreach(&mut |raw| {
                dives.push((raw.data.to_vec(), raw.fingerprint.to_vec()));
                true
            })
            .unwrap();

        assert_eq!(dives.len(), 1);
        assert_eq!(dives[0].0, dive);
        assert_eq!(dives[0].1, dive[..FP_SIZE]);
    }
}
