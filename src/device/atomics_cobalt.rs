//! Atomic Aquatics Cobalt downloader. The device hands over whole dives
//! on request, newest first: one command for the latest, another to step
//! to the next older one.

use crate::bytes;
use crate::checksum;
use crate::common::Family;
use crate::context::{Context, DevInfo};
use crate::device::{Canceller, Device, DeviceBase, DiveCallback, Progress, RawDive};
use crate::error::{Error, Result};
use crate::iostream::{Direction, FlowControl, IoStream, LineParams, Parity, StopBits, Timeout};

const CMD_VERSION: u8 = 0x01;
const CMD_DIVE_LATEST: u8 = 0x05;
const CMD_DIVE_NEXT: u8 = 0x06;

/// The profile memory behind the per-dive interface, used as the
/// provisional progress ceiling.
const SZ_MEMORY: u32 = 0x80000;

pub(crate) const FP_SIZE: usize = 6;

pub struct CobaltDevice {
    base: DeviceBase,
    stream: Box<dyn IoStream>,
}

impl CobaltDevice {
    pub fn open(context: &Context, mut stream: Box<dyn IoStream>) -> Result<Self> {
        stream.configure(&LineParams::new(
            115200,
            8,
            Parity::None,
            StopBits::One,
            FlowControl::None,
        ))?;
        stream.set_timeout(Timeout::Ms(2000))?;
        stream.purge(Direction::All)?;

        let mut device = Self {
            base: DeviceBase::new(context, Family::AtomicsCobalt),
            stream,
        };
        device.identify()?;
        Ok(device)
    }

    fn identify(&mut self) -> Result<()> {
        self.base.check_cancelled()?;
        self.stream.write_all(&[CMD_VERSION])?;
        let mut version = [0u8; 16];
        self.stream.read_exact(&mut version)?;
        self.base.set_devinfo(DevInfo {
            model: version[0] as u32,
            firmware: bytes::u16_le(&version[2..4]) as u32,
            serial: bytes::u32_le(&version[4..8]),
        });
        Ok(())
    }

    /// `[len u32_le][dive][sum16 u16_le]`; a zero length means no more
    /// dives.
    fn read_dive(&mut self, first: bool) -> Result<Vec<u8>> {
        self.base.check_cancelled()?;
        let cmd = if first { CMD_DIVE_LATEST } else { CMD_DIVE_NEXT };
        self.stream.write_all(&[cmd])?;

        let mut length = [0u8; 4];
        self.stream.read_exact(&mut length)?;
        let len = bytes::u32_le(&length) as usize;
        if len == 0 {
            return Ok(Vec::new());
        }
        let mut payload = vec![0u8; len + 2];
        self.stream.read_exact(&mut payload)?;
        if checksum::add16(&payload[..len], 0) != bytes::u16_le(&payload[len..]) {
            return Err(Error::Protocol("dive checksum mismatch"));
        }
        payload.truncate(len);
        Ok(payload)
    }
}

impl Device for CobaltDevice {
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

    fn foreach(&mut self, callback: DiveCallback<'_>) -> Result<()> {
        let mut progress = Progress::new(SZ_MEMORY);
        let mut first = true;
        loop {
            let dive = self.read_dive(first)?;
            first = false;
            if dive.is_empty() {
                break;
            }
            if dive.len() < FP_SIZE {
                return Err(Error::DataFormat("dive shorter than its fingerprint"));
            }
            progress.advance(&self.base, dive.len() as u32);

            let fingerprint = &dive[..FP_SIZE];
            if self.base.fingerprint_reached(fingerprint) {
                break;
            }
            if !callback(RawDive {
                data: &dive,
                fingerprint,
            }) {
                return Ok(());
            }
        }
        progress.finish(&self.base);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePort;

    fn dive_response(payload: &[u8]) -> Vec<u8> {
        let mut out = (payload.len() as u32).to_le_bytes().to_vec();
        out.extend_from_slice(payload);
        out.extend_from_slice(&checksum::add16(payload, 0).to_le_bytes());
        out
    }

    #[test]
    fn test_latest_then_next_until_empty() {
        let mut port = FakePort::new();
        let mut version = vec![0u8; 16];
        version[0] = 0x01;
        port.expect(&[CMD_VERSION], &version);

        let newest = [1u8, 2, 3, 4, 5, 6, 0xAA];
        let older = [9u8, 8, 7, 6, 5, 4, 0xBB];
        port.expect(&[CMD_DIVE_LATEST], &dive_response(&newest));
        port.expect(&[CMD_DIVE_NEXT], &dive_response(&older));
        port.expect(&[CMD_DIVE_NEXT], &0u32.to_le_bytes());

        let context = Context::new();
        let mut device = CobaltDevice::open(&context, Box::new(port)).unwrap();

        let mut dives = Vec::new();
        device
            .foreach(&mut |raw| {
                dives.push(raw.data.to_vec());
                true
            })
            .unwrap();
        assert_eq!(dives, vec![newest.to_vec(), older.to_vec()]);
    }
}
