//! Suunto EON Steel downloader. Unlike the serial ring-buffer Suuntos the
//! EON Steel keeps one file per dive behind a little-endian packet
//! protocol; the host asks for a count and then pulls files newest first.

use crate::bytes;
use crate::common::Family;
use crate::context::{Context, DevInfo};
use crate::device::{Canceller, Device, DeviceBase, DiveCallback, Progress, RawDive};
use crate::error::{Error, Result};
use crate::iostream::{Direction, FlowControl, IoStream, LineParams, Parity, StopBits, Timeout};

const CMD_INIT: u16 = 0x0000;
const CMD_COUNT: u16 = 0x0010;
const CMD_DIVE: u16 = 0x0020;

const MODEL_EONSTEEL: u32 = 0x30;

/// The little-endian timestamp opening each dive file.
pub(crate) const FP_SIZE: usize = 4;

pub struct EonSteelDevice {
    base: DeviceBase,
    stream: Box<dyn IoStream>,
}

impl EonSteelDevice {
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
            base: DeviceBase::new(context, Family::SuuntoEonSteel),
            stream,
        };
        let init = device.transfer(CMD_INIT, &[])?;
        if init.len() < 8 {
            return Err(Error::Protocol("short init reply"));
        }
        device.base.set_devinfo(DevInfo {
            model: MODEL_EONSTEEL,
            firmware: bytes::u32_le(&init[4..8]),
            serial: bytes::u32_le(&init[0..4]),
        });
        Ok(device)
    }

    /// One `[cmd u16_le][len u32_le][payload]` exchange.
    fn transfer(&mut self, cmd: u16, payload: &[u8]) -> Result<Vec<u8>> {
        self.base.check_cancelled()?;

        let mut request = Vec::with_capacity(6 + payload.len());
        request.extend_from_slice(&cmd.to_le_bytes());
        request.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        request.extend_from_slice(payload);
        self.stream.write_all(&request)?;

        let mut header = [0u8; 6];
        self.stream.read_exact(&mut header)?;
        if bytes::u16_le(&header[0..2]) != cmd {
            return Err(Error::Protocol("reply command mismatch"));
        }
        let len = bytes::u32_le(&header[2..6]) as usize;
        let mut reply = vec![0u8; len];
        self.stream.read_exact(&mut reply)?;
        Ok(reply)
    }
}

impl Device for EonSteelDevice {
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
        let reply = self.transfer(CMD_COUNT, &[])?;
        if reply.len() < 4 {
            return Err(Error::Protocol("short count reply"));
        }
        let count = bytes::u32_le(&reply);
        let mut progress = Progress::new(count);

        for index in 0..count {
            let dive = self.transfer(CMD_DIVE, &index.to_le_bytes())?;
            if dive.len() < FP_SIZE {
                return Err(Error::DataFormat("dive file shorter than its fingerprint"));
            }
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

    fn reply(cmd: u16, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&cmd.to_le_bytes());
        out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_download_by_file_index() {
        let mut port = FakePort::new();
        let mut serial_fw = Vec::new();
        serial_fw.extend_from_slice(&0x0042_4242u32.to_le_bytes());
        serial_fw.extend_from_slice(&0x0102_0304u32.to_le_bytes());
        port.expect(&reply(CMD_INIT, &[]), &reply(CMD_INIT, &serial_fw));
        port.expect(&reply(CMD_COUNT, &[]), &reply(CMD_COUNT, &2u32.to_le_bytes()));

        let dive0 = [0x10, 0x00, 0x00, 0x00, 0xAA, 0xBB];
        let dive1 = [0x0F, 0x00, 0x00, 0x00, 0xCC];
        port.expect(&reply(CMD_DIVE, &0u32.to_le_bytes()), &reply(CMD_DIVE, &dive0));
        port.expect(&reply(CMD_DIVE, &1u32.to_le_bytes()), &reply(CMD_DIVE, &dive1));

        let context = Context::new();
        let mut device = EonSteelDevice::open(&context, Box::new(port)).unwrap();
        assert_eq!(device.devinfo().unwrap().serial, 0x00424242);

        let mut fingerprints = Vec::new();
        device
            .foreach(&mut |raw| {
                fingerprints.push(raw.fingerprint.to_vec());
                true
            })
            .unwrap();
        assert_eq!(fingerprints.len(), 2);
        assert_eq!(fingerprints[0], dive0[..4]);
    }
}
