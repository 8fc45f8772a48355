//! Uwatec MemoMouse downloader. The interface box replays every stored
//! dive as a stream of length/checksum packets, acknowledged one by one.

use crate::bytes;
use crate::checksum;
use crate::common::Family;
use crate::context::{Context, DevInfo};
use crate::device::{Canceller, Device, DeviceBase, DiveCallback, Progress, RawDive};
use crate::error::{Error, Result};
use crate::iostream::{Direction, FlowControl, IoStream, LineParams, Parity, StopBits, Timeout};

const ACK: u8 = 0x60;

pub(crate) const FP_SIZE: usize = 4;

pub struct MemoMouseDevice {
    base: DeviceBase,
    stream: Box<dyn IoStream>,
}

impl MemoMouseDevice {
    pub fn open(context: &Context, mut stream: Box<dyn IoStream>) -> Result<Self> {
        stream.configure(&LineParams::new(
            9600,
            8,
            Parity::None,
            StopBits::One,
            FlowControl::None,
        ))?;
        stream.set_timeout(Timeout::Ms(1000))?;
        stream.set_rts(false)?;
        stream.purge(Direction::All)?;

        Ok(Self {
            base: DeviceBase::new(context, Family::UwatecMemoMouse),
            stream,
        })
    }

    /// One `[len][data…][xor]` packet, acknowledged after verification.
    fn read_packet(&mut self) -> Result<Vec<u8>> {
        self.base.check_cancelled()?;
        let mut length = [0u8; 1];
        self.stream.read_exact(&mut length)?;
        let len = length[0] as usize;
        let mut packet = vec![0u8; len + 1];
        self.stream.read_exact(&mut packet)?;
        if checksum::xor8(&packet[..len], length[0]) != packet[len] {
            return Err(Error::Protocol("packet checksum mismatch"));
        }
        packet.truncate(len);
        self.stream.write_all(&[ACK])?;
        Ok(packet)
    }

    fn transfer(&mut self, buffer: &mut Vec<u8>) -> Result<()> {
        // Wait for the mouse to start talking.
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

        // The first packet leads with the total transfer size.
        let first = self.read_packet()?;
        if first.len() < 2 {
            return Err(Error::Protocol("undersized leading packet"));
        }
        let total = bytes::u16_le(&first) as usize;
        let mut progress = Progress::new(total as u32);

        buffer.extend_from_slice(&first[2..]);
        progress.set(&self.base, buffer.len() as u32);
        while buffer.len() < total {
            let packet = self.read_packet()?;
            if packet.is_empty() {
                return Err(Error::Protocol("empty data packet"));
            }
            buffer.extend_from_slice(&packet);
            progress.set(&self.base, buffer.len().min(total) as u32);
        }
        buffer.truncate(total);

        self.base.set_devinfo(DevInfo {
            model: 0x1D,
            firmware: 0,
            serial: 0,
        });
        Ok(())
    }
}

impl Device for MemoMouseDevice {
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
        self.transfer(buffer)
    }

    fn foreach(&mut self, callback: DiveCallback<'_>) -> Result<()> {
        let mut data = Vec::new();
        self.transfer(&mut data)?;

        // The stream is `[len u16_le][dive]…`, oldest first.
        let mut dives = Vec::new();
        let mut offset = 0;
        while offset + 2 <= data.len() {
            let len = bytes::u16_le(&data[offset..]) as usize;
            offset += 2;
            if len < FP_SIZE || offset + len > data.len() {
                return Err(Error::DataFormat("dive record truncated"));
            }
            dives.push(&data[offset..offset + len]);
            offset += len;
        }

        for &dive in dives.iter().rev() {
            let fingerprint = &dive[..FP_SIZE];
            if self.base.fingerprint_reached(fingerprint) {
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
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(payload: &[u8]) -> Vec<u8> {
        let mut out = vec![payload.len() as u8];
        out.extend_from_slice(payload);
        out.push(checksum::xor8(payload, payload.len() as u8));
        out
    }

    #[test]
    fn test_packet_stream_splits_dives() {
        let dive_old = [0x01, 0x00, 0x00, 0x00, 0xAA];
        let dive_new = [0x02, 0x00, 0x00, 0x00, 0xBB, 0xCC];

        let mut data = Vec::new();
        data.extend_from_slice(&(dive_old.len() as u16).to_le_bytes());
        data.extend_from_slice(&dive_old);
        data.extend_from_slice(&(dive_new.len() as u16).to_le_bytes());
        data.extend_from_slice(&dive_new);

        let total = data.len() as u16;
        let mut first = total.to_le_bytes().to_vec();
        first.extend_from_slice(&data[..6]);

        let mut port = crate::testing::FakePort::new();
        port.push_rx(&packet(&first));
        port.expect(&[ACK], &packet(&data[6..]));
        port.expect(&[ACK], &[]);

        let context = Context::new();
        let mut device = MemoMouseDevice::open(&context, Box::new(port)).unwrap();

        let mut dives = Vec::new();
        device
            .foreach(&mut |raw| {
                dives.push(raw.data.to_vec());
                true
            })
            .unwrap();
        assert_eq!(dives.len(), 2);
        assert_eq!(dives[0], dive_new);
        assert_eq!(dives[1], dive_old);
    }
}
