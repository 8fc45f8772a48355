//! Reefnet Sensus downloader. One handshake byte buys the device header
//! (with the device clock, needed to date the tick-stamped dives) and a
//! full EEPROM dump.

use crate::bytes;
use crate::checksum;
use crate::common::Family;
use crate::context::{ClockSync, Context, DevInfo};
use crate::device::{Canceller, Device, DeviceBase, DiveCallback, Progress, RawDive};
use crate::error::{Error, Result};
use crate::iostream::{Direction, FlowControl, IoStream, LineParams, Parity, StopBits, Timeout};

const CMD_HANDSHAKE: u8 = 0x42; // 'B'
const ACK: u8 = 0x41; // 'A'

const SZ_MEMORY: usize = 0x8000;

pub(crate) const FP_SIZE: usize = 4;

pub struct SensusDevice {
    base: DeviceBase,
    stream: Box<dyn IoStream>,
}

impl SensusDevice {
    pub fn open(context: &Context, mut stream: Box<dyn IoStream>) -> Result<Self> {
        stream.configure(&LineParams::new(
            19200,
            8,
            Parity::None,
            StopBits::One,
            FlowControl::None,
        ))?;
        stream.set_timeout(Timeout::Ms(3000))?;
        stream.purge(Direction::All)?;

        let mut device = Self {
            base: DeviceBase::new(context, Family::ReefnetSensus),
            stream,
        };
        device.handshake()?;
        Ok(device)
    }

    fn handshake(&mut self) -> Result<()> {
        self.base.check_cancelled()?;
        self.stream.write_all(&[CMD_HANDSHAKE])?;

        let mut header = [0u8; 9];
        self.stream.read_exact(&mut header)?;
        if header[0] != ACK {
            return Err(Error::Protocol("handshake not acknowledged"));
        }
        self.base.set_devinfo(DevInfo {
            model: header[1] as u32,
            firmware: header[2] as u32,
            serial: bytes::u16_le(&header[3..5]) as u32,
        });
        self.base.set_clock(bytes::u32_le(&header[5..9]));
        Ok(())
    }

    fn dump_memory(&mut self, buffer: &mut Vec<u8>) -> Result<()> {
        let mut progress = Progress::new(SZ_MEMORY as u32);
        let mut image = vec![0u8; SZ_MEMORY + 2];
        let mut offset = 0;
        while offset < image.len() {
            self.base.check_cancelled()?;
            let chunk = (image.len() - offset).min(0x400);
            self.stream.read_exact(&mut image[offset..offset + chunk])?;
            offset += chunk;
            progress.set(&self.base, offset.min(SZ_MEMORY) as u32);
        }
        if checksum::add16(&image[..SZ_MEMORY], 0) != bytes::u16_le(&image[SZ_MEMORY..]) {
            return Err(Error::Protocol("memory dump checksum mismatch"));
        }
        image.truncate(SZ_MEMORY);
        buffer.extend_from_slice(&image);
        Ok(())
    }
}

/// Dives are `[timestamp u32_le][u16 samples…][0xFFFF]`, oldest first,
/// with unused memory erased to 0xFF.
pub(crate) fn extract_dives(
    base: &DeviceBase,
    image: &[u8],
    callback: DiveCallback<'_>,
) -> Result<()> {
    let mut dives = Vec::new();
    let mut offset = 0;
    while offset + FP_SIZE <= image.len() {
        if bytes::is_all(&image[offset..offset + FP_SIZE], 0xFF) {
            break;
        }
        let start = offset;
        offset += FP_SIZE;
        loop {
            if offset + 2 > image.len() {
                return Err(Error::DataFormat("dive missing its terminator"));
            }
            if bytes::u16_le(&image[offset..]) == 0xFFFF {
                offset += 2;
                break;
            }
            offset += 2;
        }
        dives.push(&image[start..offset - 2]);
    }

    for &dive in dives.iter().rev() {
        let fingerprint = &dive[..FP_SIZE];
        if base.fingerprint_reached(fingerprint) {
            return Ok(());
        }
        if !callback(RawDive {
            data: dive,
            fingerprint,
        }) {
            return Ok(());
        }
    }
    Ok(())
}

impl Device for SensusDevice {
    fn family(&self) -> Family {
        self.base.family()
    }

    fn devinfo(&self) -> Option<DevInfo> {
        self.base.devinfo()
    }

    fn clock(&self) -> Option<ClockSync> {
        self.base.clock()
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
    fn test_extract_terminated_dives() {
        let mut image = vec![0xFFu8; SZ_MEMORY];
        let mut offset = 0;
        for ts in [100u32, 200u32] {
            image[offset..offset + 4].copy_from_slice(&ts.to_le_bytes());
            offset += 4;
            for depth in [1100u16, 1200u16] {
                image[offset..offset + 2].copy_from_slice(&depth.to_le_bytes());
                offset += 2;
            }
            image[offset..offset + 2].copy_from_slice(&0xFFFFu16.to_le_bytes());
            offset += 2;
        }

        let context = Context::new();
        let base = DeviceBase::new(&context, Family::ReefnetSensus);
        let mut stamps = Vec::new();
        extract_dives(&base, &image, &mut |raw| {
            stamps.push(bytes::u32_le(raw.fingerprint));
            true
        })
        .unwrap();
        assert_eq!(stamps, vec![200, 100]);
    }
}
