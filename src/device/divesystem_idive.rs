//! DiveSystem iDive downloader. CRC-16 framed commands; headers and
//! sample blocks are requested per dive number, newest last on the
//! device, so the walk runs from the highest number down.

use crate::bytes;
use crate::checksum;
use crate::common::Family;
use crate::context::{Context, DevInfo};
use crate::device::{Canceller, Device, DeviceBase, DiveCallback, Progress, RawDive};
use crate::error::{Error, Result};
use crate::iostream::{Direction, FlowControl, IoStream, LineParams, Parity, StopBits, Timeout};

const SOF: u8 = 0xAA;

const CMD_VERSION: u8 = 0x10;
const CMD_HEADER: u8 = 0x40;
const CMD_SAMPLES: u8 = 0x41;

const SZ_HEADER: usize = 32;

pub(crate) const FP_SIZE: usize = 4;

pub struct IDiveDevice {
    base: DeviceBase,
    stream: Box<dyn IoStream>,
    ndives: u16,
}

impl IDiveDevice {
    pub fn open(context: &Context, mut stream: Box<dyn IoStream>) -> Result<Self> {
        stream.configure(&LineParams::new(
            115200,
            8,
            Parity::None,
            StopBits::One,
            FlowControl::None,
        ))?;
        stream.set_timeout(Timeout::Ms(1000))?;
        stream.purge(Direction::All)?;

        let mut device = Self {
            base: DeviceBase::new(context, Family::DiveSystemIDive),
            stream,
            ndives: 0,
        };
        device.identify()?;
        Ok(device)
    }

    /// `[0xAA][cmd][len][payload][crc16_be over cmd..payload]`.
    fn transfer(&mut self, cmd: u8, params: &[u8], expected: usize) -> Result<Vec<u8>> {
        self.base.check_cancelled()?;

        let mut request = vec![SOF, cmd, params.len() as u8];
        request.extend_from_slice(params);
        let crc = checksum::crc16_ccitt(&request[1..], 0xFFFF);
        request.extend_from_slice(&crc.to_be_bytes());
        self.stream.write_all(&request)?;

        let mut header = [0u8; 3];
        self.stream.read_exact(&mut header)?;
        if header[0] != SOF || header[1] != cmd {
            return Err(Error::Protocol("reply framing mismatch"));
        }
        let len = header[2] as usize;
        if len != expected {
            return Err(Error::Protocol("reply length mismatch"));
        }
        let mut rest = vec![0u8; len + 2];
        self.stream.read_exact(&mut rest)?;
        let mut check = vec![cmd, len as u8];
        check.extend_from_slice(&rest[..len]);
        if checksum::crc16_ccitt(&check, 0xFFFF) != bytes::u16_be(&rest[len..]) {
            return Err(Error::Protocol("reply checksum mismatch"));
        }
        rest.truncate(len);
        Ok(rest)
    }

    fn identify(&mut self) -> Result<()> {
        let version = self.transfer(CMD_VERSION, &[], 9)?;
        self.base.set_devinfo(DevInfo {
            model: version[0] as u32,
            firmware: bytes::u16_le(&version[1..3]) as u32,
            serial: bytes::u32_le(&version[3..7]),
        });
        self.ndives = bytes::u16_le(&version[7..9]);
        Ok(())
    }
}

impl Device for IDiveDevice {
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
        let mut progress = Progress::new(self.ndives as u32);

        // Dive numbers count up from one; walk newest first.
        for number in (1..=self.ndives).rev() {
            let params = number.to_le_bytes();
            let header = self.transfer(CMD_HEADER, &params, SZ_HEADER)?;

            let fingerprint = header[..FP_SIZE].to_vec();
            if self.base.fingerprint_reached(&fingerprint) {
                break;
            }

            let nsamples = bytes::u16_le(&header[6..8]) as usize;
            let mut dive = header;
            if nsamples > 0 {
                let samples = self.transfer(CMD_SAMPLES, &params, nsamples * 4)?;
                dive.extend_from_slice(&samples);
            }
            progress.advance(&self.base, 1);

            if !callback(RawDive {
                data: &dive,
                fingerprint: &fingerprint,
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

    fn frame(cmd: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![SOF, cmd, payload.len() as u8];
        out.extend_from_slice(payload);
        let crc = checksum::crc16_ccitt(&out[1..], 0xFFFF);
        out.extend_from_slice(&crc.to_be_bytes());
        out
    }

    #[test]
    fn test_numbered_walk() {
        let mut port = FakePort::new();
        let mut version = vec![0x05];
        version.extend_from_slice(&0x0102u16.to_le_bytes());
        version.extend_from_slice(&900100u32.to_le_bytes());
        version.extend_from_slice(&2u16.to_le_bytes());
        port.expect(&frame(CMD_VERSION, &[]), &frame(CMD_VERSION, &version));

        let mut header2 = vec![0u8; SZ_HEADER];
        header2[0..4].copy_from_slice(&2000u32.to_le_bytes());
        header2[6..8].copy_from_slice(&1u16.to_le_bytes());
        let mut header1 = vec![0u8; SZ_HEADER];
        header1[0..4].copy_from_slice(&1000u32.to_le_bytes());
        header1[6..8].copy_from_slice(&0u16.to_le_bytes());

        port.expect(
            &frame(CMD_HEADER, &2u16.to_le_bytes()),
            &frame(CMD_HEADER, &header2),
        );
        port.expect(
            &frame(CMD_SAMPLES, &2u16.to_le_bytes()),
            &frame(CMD_SAMPLES, &[0x10, 0x00, 0xE6, 0x00]),
        );
        port.expect(
            &frame(CMD_HEADER, &1u16.to_le_bytes()),
            &frame(CMD_HEADER, &header1),
        );

        let context = Context::new();
        let mut device = IDiveDevice::open(&context, Box::new(port)).unwrap();

        let mut stamps = Vec::new();
        device
            .foreach(&mut |raw| {
                stamps.push(bytes::u32_le(raw.fingerprint));
                true
            })
            .unwrap();
        assert_eq!(stamps, vec![2000, 1000]);
    }
}
