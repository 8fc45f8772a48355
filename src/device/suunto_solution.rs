//! Suunto Solution downloader. The oldest supported Suunto: 256 bytes of
//! memory behind a dump-only interface, dives separated by marker bytes in
//! a small ring.

use crate::bytes;
use crate::common::Family;
use crate::context::{Context, DevInfo};
use crate::device::{Canceller, Device, DeviceBase, DiveCallback, Progress, RawDive};
use crate::error::{Error, Result};
use crate::iostream::{Direction, FlowControl, IoStream, LineParams, Parity, StopBits, Timeout};
use crate::ringbuffer::{Overlap, Ring};
use crate::checksum;

const CMD_DUMP: u8 = 0x50; // 'P'

const SZ_MEMORY: usize = 0x100;

/// Dive delimiter inside the profile ring.
const MARKER: u8 = 0x80;

const RB_PROFILE: Ring = Ring::new(0x20, 0x100);
const ADDR_END: usize = 0x18;
const ADDR_BEGIN: usize = 0x19;
const ADDR_SERIAL: usize = 0x1A;

pub(crate) const FP_SIZE: usize = 4;

pub struct SolutionDevice {
    base: DeviceBase,
    stream: Box<dyn IoStream>,
}

impl SolutionDevice {
    pub fn open(context: &Context, mut stream: Box<dyn IoStream>) -> Result<Self> {
        stream.configure(&LineParams::new(
            1200,
            8,
            Parity::None,
            StopBits::Two,
            FlowControl::None,
        ))?;
        stream.set_timeout(Timeout::Ms(1000))?;
        stream.set_rts(true)?;
        stream.sleep(100);
        stream.purge(Direction::All)?;

        Ok(Self {
            base: DeviceBase::new(context, Family::SuuntoSolution),
            stream,
        })
    }

    fn dump_memory(&mut self, buffer: &mut Vec<u8>) -> Result<()> {
        self.base.check_cancelled()?;
        let mut progress = Progress::new(SZ_MEMORY as u32);

        self.stream.purge(Direction::Input)?;
        self.stream.write_all(&[CMD_DUMP])?;

        let mut image = vec![0u8; SZ_MEMORY + 1];
        self.stream.read_exact(&mut image)?;
        if checksum::xor8(&image[..SZ_MEMORY], 0x00) != image[SZ_MEMORY] {
            return Err(Error::Protocol("memory dump checksum mismatch"));
        }
        image.truncate(SZ_MEMORY);

        self.base.set_devinfo(DevInfo {
            model: 0x01,
            firmware: 0,
            serial: bytes::u32_be(&image[ADDR_SERIAL..ADDR_SERIAL + 4]),
        });

        progress.finish(&self.base);
        buffer.extend_from_slice(&image);
        Ok(())
    }
}

/// Walk the profile ring backward from the end pointer, slicing one dive
/// per marker byte, newest first.
pub(crate) fn extract_dives(
    base: &DeviceBase,
    image: &[u8],
    callback: DiveCallback<'_>,
) -> Result<()> {
    if image.len() < SZ_MEMORY {
        return Err(Error::DataFormat("memory image truncated"));
    }
    let end = RB_PROFILE.check(image[ADDR_END] as u32)?;
    let begin = RB_PROFILE.check(image[ADDR_BEGIN] as u32)?;

    let mut remaining = RB_PROFILE.distance(begin, end, Overlap::Empty);
    let mut current = end;
    while remaining > 0 {
        // Scan backward for the marker that opens this dive.
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

        // Skip the marker itself.
        let consumed = if len < remaining { len + 1 } else { len };
        remaining -= consumed;
        current = RB_PROFILE.decrement(current, consumed);
    }
    Ok(())
}

impl Device for SolutionDevice {
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

    fn build_image(dives: &[&[u8]]) -> Vec<u8> {
        let mut image = vec![0u8; SZ_MEMORY];
        let mut pos = RB_PROFILE.begin as usize;
        let begin = pos;
        for dive in dives {
            image[pos] = MARKER;
            pos += 1;
            image[pos..pos + dive.len()].copy_from_slice(dive);
            pos += dive.len();
        }
        image[ADDR_BEGIN] = begin as u8;
        image[ADDR_END] = pos as u8;
        image[ADDR_SERIAL..ADDR_SERIAL + 4].copy_from_slice(&[0x00, 0x01, 0x23, 0x45]);
        image
    }

    #[test]
    fn test_extract_dives_newest_first() {
        let old = [0x01, 0x02, 0x03, 0x04, 0x05];
        let new = [0x11, 0x12, 0x13, 0x14];
        let image = build_image(&[&old, &new]);

        let context = Context::new();
        let base = DeviceBase::new(&context, Family::SuuntoSolution);
        let mut dives = Vec::new();
        extract_dives(&base, &image, &mut |raw| {
            dives.push(raw.data.to_vec());
            true
        })
        .unwrap();

        assert_eq!(dives.len(), 2);
        assert_eq!(dives[0], new);
        assert_eq!(dives[1], old);
    }

    #[test]
    fn test_dump_verifies_checksum() {
        let image = build_image(&[]);
        let mut response = image.clone();
        response.push(checksum::xor8(&image, 0x00) ^ 0x01); // corrupt

        let mut port = crate::testing::FakePort::new();
        port.expect(&[CMD_DUMP], &response);

        let context = Context::new();
        let mut device = SolutionDevice::open(&context, Box::new(port)).unwrap();
        let mut out = Vec::new();
        assert!(matches!(device.dump(&mut out), Err(Error::Protocol(_))));
    }
}
