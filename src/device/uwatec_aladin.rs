//! Uwatec Aladin downloader. The device transmits its whole 2 KB memory
//! when the user triggers the interface, LSB first on the wire: every
//! byte must be bit-reversed before anything else looks at it.

use crate::bytes;
use crate::checksum;
use crate::common::Family;
use crate::context::{Context, DevInfo};
use crate::device::{Canceller, Device, DeviceBase, DiveCallback, Progress, RawDive};
use crate::error::{Error, Result};
use crate::iostream::{Direction, FlowControl, IoStream, LineParams, Parity, StopBits, Timeout};
use crate::ringbuffer::{Overlap, Ring};

const SZ_MEMORY: usize = 0x800;

const RB_PROFILE: Ring = Ring::new(0x000, 0x600);

/// `[count][begin u16_le, end u16_le]…`, newest first.
const ADDR_LOGBOOK: usize = 0x600;
const ADDR_SERIAL: usize = 0x7EC;
const ADDR_MODEL: usize = 0x7F0;

pub(crate) const FP_SIZE: usize = 4;

pub struct AladinDevice {
    base: DeviceBase,
    stream: Box<dyn IoStream>,
}

impl AladinDevice {
    pub fn open(context: &Context, mut stream: Box<dyn IoStream>) -> Result<Self> {
        stream.configure(&LineParams::new(
            19200,
            8,
            Parity::None,
            StopBits::One,
            FlowControl::None,
        ))?;
        stream.set_timeout(Timeout::Ms(1000))?;
        stream.set_rts(false)?;
        stream.purge(Direction::All)?;

        Ok(Self {
            base: DeviceBase::new(context, Family::UwatecAladin),
            stream,
        })
    }

    fn dump_memory(&mut self, buffer: &mut Vec<u8>) -> Result<()> {
        let mut progress = Progress::new((SZ_MEMORY + 2) as u32);

        // Nothing happens until the user starts the transfer on the
        // device; poll for the first byte.
        let mut retries = 0;
        while self.stream.get_received()? == 0 {
            self.base.check_cancelled()?;
            self.base.emit_waiting();
            if retries >= 30 {
                return Err(Error::Timeout);
            }
            retries += 1;
            self.stream.sleep(300);
        }

        let mut image = vec![0u8; SZ_MEMORY + 2];
        let mut offset = 0;
        while offset < image.len() {
            self.base.check_cancelled()?;
            let chunk = (image.len() - offset).min(0x100);
            self.stream.read_exact(&mut image[offset..offset + chunk])?;
            offset += chunk;
            progress.set(&self.base, offset as u32);
        }

        // The Aladin shifts bits out backwards.
        for byte in image.iter_mut() {
            *byte = bytes::bit_reverse(*byte);
        }

        let crc = bytes::u16_le(&image[SZ_MEMORY..]);
        if checksum::add16(&image[..SZ_MEMORY], 0x1FE) != crc {
            return Err(Error::Protocol("memory dump checksum mismatch"));
        }
        image.truncate(SZ_MEMORY);

        self.base.set_devinfo(DevInfo {
            model: image[ADDR_MODEL] as u32,
            firmware: 0,
            serial: bytes::u24_le(&image[ADDR_SERIAL..]),
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
    let count = image[ADDR_LOGBOOK] as usize;
    for i in 0..count {
        let entry = ADDR_LOGBOOK + 1 + i * 4;
        if entry + 4 > ADDR_SERIAL {
            return Err(Error::DataFormat("logbook table overflows"));
        }
        let begin = RB_PROFILE.check(bytes::u16_le(&image[entry..]) as u32)?;
        let end = RB_PROFILE.check(bytes::u16_le(&image[entry + 2..]) as u32)?;
        let len = RB_PROFILE.distance(begin, end, Overlap::Empty);
        let dive = RB_PROFILE.read_backward(image, end, len)?;
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
    }
    Ok(())
}

impl Device for AladinDevice {
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
    fn test_bit_reversed_dump() {
        let mut image = vec![0u8; SZ_MEMORY];
        // One dive of 8 bytes at the start of the profile ring.
        let dive = [0x11, 0x22, 0x33, 0x44, 0x05, 0x06, 0x07, 0x08];
        image[..8].copy_from_slice(&dive);
        image[ADDR_LOGBOOK] = 1;
        image[ADDR_LOGBOOK + 1..ADDR_LOGBOOK + 3].copy_from_slice(&0u16.to_le_bytes());
        image[ADDR_LOGBOOK + 3..ADDR_LOGBOOK + 5].copy_from_slice(&8u16.to_le_bytes());
        image[ADDR_MODEL] = 0x1C;

        let mut wire = image.clone();
        let crc = checksum::add16(&image, 0x1FE);
        wire.extend_from_slice(&crc.to_le_bytes());
        for byte in wire.iter_mut() {
            *byte = bytes::bit_reverse(*byte);
        }

        let mut port = crate::testing::FakePort::new();
        port.push_rx(&wire);

        let context = Context::new();
        let mut device = AladinDevice::open(&context, Box::new(port)).unwrap();

        let mut dives = Vec::new();
        device
            .foreach(&mut |raw| {
                dives.push(raw.data.to_vec());
                true
            })
            .unwrap();
        assert_eq!(dives, vec![dive.to_vec()]);
        assert_eq!(device.devinfo().unwrap().model, 0x1C);
    }
}
