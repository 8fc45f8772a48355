//! Citizen Aqualand downloader. The watch pushes one dive when the user
//! holds the transfer button; the host waits, reads, verifies, done.

use crate::bytes;
use crate::checksum;
use crate::common::Family;
use crate::context::{Context, DevInfo};
use crate::device::{Canceller, Device, DeviceBase, DiveCallback, Progress, RawDive};
use crate::error::{Error, Result};
use crate::iostream::{Direction, FlowControl, IoStream, LineParams, Parity, StopBits, Timeout};

pub(crate) const FP_SIZE: usize = 6;

pub struct AqualandDevice {
    base: DeviceBase,
    stream: Box<dyn IoStream>,
}

impl AqualandDevice {
    pub fn open(context: &Context, mut stream: Box<dyn IoStream>) -> Result<Self> {
        stream.configure(&LineParams::new(
            4800,
            8,
            Parity::None,
            StopBits::One,
            FlowControl::None,
        ))?;
        stream.set_timeout(Timeout::Ms(1000))?;
        stream.set_rts(true)?;
        stream.purge(Direction::All)?;

        Ok(Self {
            base: DeviceBase::new(context, Family::CitizenAqualand),
            stream,
        })
    }

    /// `[len u16_le][dive][xor]`, transmitted on the user's button press.
    fn read_transfer(&mut self) -> Result<Vec<u8>> {
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

        let mut length = [0u8; 2];
        self.stream.read_exact(&mut length)?;
        let len = bytes::u16_le(&length) as usize;
        if len < FP_SIZE {
            return Err(Error::Protocol("undersized transfer"));
        }
        let mut progress = Progress::new(len as u32);

        let mut dive = vec![0u8; len + 1];
        let mut offset = 0;
        while offset < dive.len() {
            self.base.check_cancelled()?;
            let chunk = (dive.len() - offset).min(0x80);
            self.stream.read_exact(&mut dive[offset..offset + chunk])?;
            offset += chunk;
            progress.set(&self.base, offset.min(len) as u32);
        }
        if checksum::xor8(&dive[..len], 0x00) != dive[len] {
            return Err(Error::Protocol("transfer checksum mismatch"));
        }
        dive.truncate(len);

        self.base.set_devinfo(DevInfo {
            model: 0x01,
            firmware: 0,
            serial: 0,
        });
        Ok(dive)
    }
}

impl Device for AqualandDevice {
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
        let dive = self.read_transfer()?;
        buffer.extend_from_slice(&dive);
        Ok(())
    }

    fn foreach(&mut self, callback: DiveCallback<'_>) -> Result<()> {
        // One dive per transfer on this hardware.
        let dive = self.read_transfer()?;
        let fingerprint = &dive[..FP_SIZE];
        if self.base.fingerprint_reached(fingerprint) {
            return Ok(());
        }
        callback(RawDive {
            data: &dive,
            fingerprint,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_dive_transfer() {
        let dive = [0x24u8, 0x01, 0x15, 0x13, 0x30, 0x00, 10, 20, 30];
        let mut wire = (dive.len() as u16).to_le_bytes().to_vec();
        wire.extend_from_slice(&dive);
        wire.push(checksum::xor8(&dive, 0x00));

        let mut port = crate::testing::FakePort::new();
        port.push_rx(&wire);

        let context = Context::new();
        let mut device = AqualandDevice::open(&context, Box::new(port)).unwrap();

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
