//! Reefnet Sensus Ultra downloader. Unlike its stream-everything
//! ancestors the Ultra answers indexed dive requests, newest first, each
//! protected by a CRC.

use crate::bytes;
use crate::checksum;
use crate::common::Family;
use crate::context::{ClockSync, Context, DevInfo};
use crate::device::{Canceller, Device, DeviceBase, DiveCallback, Progress, RawDive};
use crate::error::{Error, Result};
use crate::iostream::{Direction, FlowControl, IoStream, LineParams, Parity, StopBits, Timeout};

const CMD_HANDSHAKE: [u8; 2] = [0xB4, 0x00];
const CMD_DIVE: u8 = 0xB0;

pub(crate) const FP_SIZE: usize = 4;

pub struct SensusUltraDevice {
    base: DeviceBase,
    stream: Box<dyn IoStream>,
    ndives: u16,
}

impl SensusUltraDevice {
    pub fn open(context: &Context, mut stream: Box<dyn IoStream>) -> Result<Self> {
        stream.configure(&LineParams::new(
            115200,
            8,
            Parity::None,
            StopBits::One,
            FlowControl::None,
        ))?;
        stream.set_timeout(Timeout::Ms(3000))?;
        stream.purge(Direction::All)?;

        let mut device = Self {
            base: DeviceBase::new(context, Family::ReefnetSensusUltra),
            stream,
            ndives: 0,
        };
        device.handshake()?;
        Ok(device)
    }

    fn handshake(&mut self) -> Result<()> {
        self.base.check_cancelled()?;
        self.stream.write_all(&CMD_HANDSHAKE)?;

        let mut header = [0u8; 12];
        self.stream.read_exact(&mut header)?;
        self.base.set_devinfo(DevInfo {
            model: header[0] as u32,
            firmware: header[1] as u32,
            serial: bytes::u16_le(&header[2..4]) as u32,
        });
        self.base.set_clock(bytes::u32_le(&header[4..8]));
        self.ndives = bytes::u16_le(&header[8..10]);
        Ok(())
    }

    fn read_dive(&mut self, index: u16) -> Result<Vec<u8>> {
        self.base.check_cancelled()?;
        let request = [CMD_DIVE, index as u8, (index >> 8) as u8];
        self.stream.write_all(&request)?;

        let mut length = [0u8; 2];
        self.stream.read_exact(&mut length)?;
        let len = bytes::u16_le(&length) as usize;
        if len < FP_SIZE {
            return Err(Error::DataFormat("dive record undersized"));
        }
        let mut payload = vec![0u8; len + 2];
        self.stream.read_exact(&mut payload)?;
        let crc = bytes::u16_le(&payload[len..]);
        if checksum::crc16_ccitt(&payload[..len], 0xFFFF) != crc {
            return Err(Error::Protocol("dive checksum mismatch"));
        }
        payload.truncate(len);
        Ok(payload)
    }
}

impl Device for SensusUltraDevice {
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

    fn foreach(&mut self, callback: DiveCallback<'_>) -> Result<()> {
        let mut progress = Progress::new(self.ndives as u32);
        for index in 0..self.ndives {
            let dive = self.read_dive(index)?;
            progress.advance(&self.base, 1);

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
        let mut out = (payload.len() as u16).to_le_bytes().to_vec();
        out.extend_from_slice(payload);
        out.extend_from_slice(&checksum::crc16_ccitt(payload, 0xFFFF).to_le_bytes());
        out
    }

    #[test]
    fn test_indexed_download_stops_at_fingerprint() {
        let mut port = FakePort::new();
        let mut header = vec![0u8; 12];
        header[4..8].copy_from_slice(&900u32.to_le_bytes());
        header[8..10].copy_from_slice(&3u16.to_le_bytes());
        port.expect(&CMD_HANDSHAKE, &header);

        let newest = 300u32.to_le_bytes();
        let middle = 200u32.to_le_bytes();
        port.expect(&[CMD_DIVE, 0, 0], &dive_response(&newest));
        port.expect(&[CMD_DIVE, 1, 0], &dive_response(&middle));

        let context = Context::new();
        let mut device = SensusUltraDevice::open(&context, Box::new(port)).unwrap();
        device.set_fingerprint(&middle).unwrap();

        let mut seen = Vec::new();
        device
            .foreach(&mut |raw| {
                seen.push(bytes::u32_le(raw.fingerprint));
                true
            })
            .unwrap();
        // The fingerprinted dive and everything older is skipped.
        assert_eq!(seen, vec![300]);
    }
}
