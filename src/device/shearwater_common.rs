//! Shared transfer protocol for the Shearwater computers. Requests ride
//! in small XOR-framed packets; bulk data comes back as numbered
//! 128-byte blocks.

use crate::bytes;
use crate::checksum;
use crate::common::Family;
use crate::context::{Context, DevInfo, LogLevel};
use crate::device::{DeviceBase, Progress};
use crate::error::{Error, Result};
use crate::iostream::{Direction, FlowControl, IoStream, LineParams, Parity, StopBits, Timeout};

const SOF: u8 = 0x01;

const CMD_IDENTITY: u8 = 0x22;
const CMD_DOWNLOAD: u8 = 0x35;

/// Bulk transfer block size.
pub(crate) const BLOCK: usize = 128;

pub(crate) struct ShearwaterCommon {
    pub(crate) base: DeviceBase,
    stream: Box<dyn IoStream>,
}

impl ShearwaterCommon {
    pub(crate) fn open(
        context: &Context,
        mut stream: Box<dyn IoStream>,
        family: Family,
    ) -> Result<Self> {
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
            base: DeviceBase::new(context, family),
            stream,
        };
        device.identify()?;
        Ok(device)
    }

    /// `[0x01][len][payload][xor]` both ways.
    fn transfer(&mut self, payload: &[u8]) -> Result<Vec<u8>> {
        self.base.check_cancelled()?;

        let mut packet = vec![SOF, payload.len() as u8];
        packet.extend_from_slice(payload);
        packet.push(checksum::xor8(&packet, 0x00));
        if self.base.context.log_enabled(LogLevel::Debug) {
            log::debug!("packet: {}", bytes::bytes_to_hex(&packet));
        }
        self.stream.write_all(&packet)?;

        let mut header = [0u8; 2];
        self.stream.read_exact(&mut header)?;
        if header[0] != SOF {
            return Err(Error::Protocol("packet framing mismatch"));
        }
        let len = header[1] as usize;
        let mut rest = vec![0u8; len + 1];
        self.stream.read_exact(&mut rest)?;
        if checksum::xor8(&rest[..len], checksum::xor8(&header, 0x00)) != rest[len] {
            return Err(Error::Protocol("packet checksum mismatch"));
        }
        rest.truncate(len);
        Ok(rest)
    }

    fn identify(&mut self) -> Result<()> {
        let identity = self.transfer(&[CMD_IDENTITY])?;
        if identity.len() < 7 || identity[0] != CMD_IDENTITY {
            return Err(Error::Protocol("unexpected identity reply"));
        }
        self.base.set_devinfo(DevInfo {
            model: identity[1] as u32,
            firmware: identity[2] as u32,
            serial: bytes::u32_be(&identity[3..7]),
        });
        Ok(())
    }

    /// Pull `size` bytes starting at `address` as numbered blocks.
    pub(crate) fn download(
        &mut self,
        address: u32,
        size: u32,
        progress: &mut Progress,
    ) -> Result<Vec<u8>> {
        let mut request = vec![CMD_DOWNLOAD];
        request.extend_from_slice(&address.to_be_bytes()[1..]);
        request.extend_from_slice(&size.to_be_bytes()[1..]);
        let ack = self.transfer(&request)?;
        if ack.first() != Some(&CMD_DOWNLOAD) {
            return Err(Error::Protocol("download not acknowledged"));
        }

        let mut data = vec![0u8; size as usize];
        let mut offset = 0;
        let mut sequence = 0u8;
        while offset < data.len() {
            self.base.check_cancelled()?;
            let chunk = (data.len() - offset).min(BLOCK);
            let mut block = vec![0u8; chunk + 1];
            self.stream.read_exact(&mut block)?;
            if block[0] != sequence {
                return Err(Error::Protocol("block out of sequence"));
            }
            sequence = sequence.wrapping_add(1);
            data[offset..offset + chunk].copy_from_slice(&block[1..]);
            offset += chunk;
            progress.advance(&self.base, chunk as u32);
        }
        Ok(data)
    }

    pub(crate) fn family(&self) -> Family {
        self.base.family()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::testing::FakePort;

    pub(crate) fn packet(payload: &[u8]) -> Vec<u8> {
        let mut out = vec![SOF, payload.len() as u8];
        out.extend_from_slice(payload);
        out.push(checksum::xor8(&out, 0x00));
        out
    }

    pub(crate) fn script_identify(port: &mut FakePort, model: u8) {
        let mut identity = vec![CMD_IDENTITY, model, 0x21];
        identity.extend_from_slice(&0x005B1A2Bu32.to_be_bytes());
        port.expect(&packet(&[CMD_IDENTITY]), &packet(&identity));
    }

    pub(crate) fn script_download(port: &mut FakePort, address: u32, data: &[u8]) {
        let mut request = vec![CMD_DOWNLOAD];
        request.extend_from_slice(&address.to_be_bytes()[1..]);
        request.extend_from_slice(&(data.len() as u32).to_be_bytes()[1..]);
        let mut response = packet(&[CMD_DOWNLOAD, 0x00]);
        for (sequence, chunk) in data.chunks(BLOCK).enumerate() {
            response.push(sequence as u8);
            response.extend_from_slice(chunk);
        }
        port.expect(&packet(&request), &response);
    }
}
