//! Suunto Vyper downloader (Vyper, Cobra, Stinger, Mosquito, Spyder).
//!
//! Half-duplex RS-485 behind an RS-232 level shifter: RTS selects the
//! talk/listen direction and every byte written comes back as an echo.
//! Dive payloads are transmitted tail-first and reversed after reassembly.

use crate::common::Family;
use crate::context::{Context, DevInfo};
use crate::device::{Canceller, Device, DeviceBase, DiveCallback, Progress, RawDive};
use crate::error::{Error, Result};
use crate::iostream::{Direction, FlowControl, IoStream, LineParams, Parity, StopBits, Timeout};
use crate::{bytes, checksum};

const CMD_READ: u8 = 0x05;
const CMD_WRITE: u8 = 0x06;
const CMD_DIVE_FIRST: u8 = 0x08;
const CMD_DIVE_NEXT: u8 = 0x09;

const SZ_MEMORY: u32 = 0x2000;
const SZ_PACKET: usize = 32;

pub(crate) const FP_OFFSET: usize = 9;
pub(crate) const FP_SIZE: usize = 5;

const ADDR_VERSION: u32 = 0x24;

pub struct VyperDevice {
    base: DeviceBase,
    stream: Box<dyn IoStream>,
}

impl VyperDevice {
    pub fn open(context: &Context, mut stream: Box<dyn IoStream>) -> Result<Self> {
        stream.configure(&LineParams::new(
            2400,
            8,
            Parity::Odd,
            StopBits::One,
            FlowControl::None,
        ))?;
        stream.set_timeout(Timeout::Ms(1000))?;
        // Power the interface from the DTR line, listen by default.
        stream.set_dtr(true)?;
        stream.set_rts(false)?;
        stream.sleep(100);
        stream.purge(Direction::All)?;

        let mut device = Self {
            base: DeviceBase::new(context, Family::SuuntoVyper),
            stream,
        };
        device.identify()?;
        Ok(device)
    }

    /// Send a command and verify its RS-485 echo.
    fn send(&mut self, command: &[u8]) -> Result<()> {
        self.base.check_cancelled()?;
        self.stream.purge(Direction::Input)?;
        self.stream.set_rts(true)?;
        self.stream.write_all(command)?;
        self.stream.set_rts(false)?;

        let mut echo = vec![0u8; command.len()];
        self.stream.read_exact(&mut echo)?;
        if echo != command {
            return Err(Error::Protocol("command echo mismatch"));
        }
        Ok(())
    }

    /// One reply packet: `[cmd][len][data…][xor]`, checksum over the whole
    /// packet folding to zero.
    fn recv_packet(&mut self, cmd: u8) -> Result<Vec<u8>> {
        self.base.check_cancelled()?;
        let mut header = [0u8; 2];
        self.stream.read_exact(&mut header)?;
        if header[0] != cmd {
            return Err(Error::Protocol("reply opcode mismatch"));
        }
        let len = header[1] as usize;
        let mut rest = vec![0u8; len + 1];
        self.stream.read_exact(&mut rest)?;
        if checksum::xor8(&rest, checksum::xor8(&header, 0x00)) != 0 {
            return Err(Error::Protocol("reply checksum mismatch"));
        }
        rest.truncate(len);
        Ok(rest)
    }

    fn identify(&mut self) -> Result<()> {
        let mut version = [0u8; 6];
        self.read_memory(ADDR_VERSION, &mut version)?;
        self.base.set_devinfo(DevInfo {
            model: version[0] as u32,
            firmware: version[1] as u32,
            serial: bytes::u32_be(&version[2..6]),
        });
        Ok(())
    }

    fn read_memory(&mut self, address: u32, buf: &mut [u8]) -> Result<()> {
        if address + buf.len() as u32 > SZ_MEMORY {
            return Err(Error::InvalidArgs("address window outside memory"));
        }
        let mut offset = 0;
        while offset < buf.len() {
            let chunk = (buf.len() - offset).min(SZ_PACKET);
            let addr = address + offset as u32;
            let mut command = vec![CMD_READ, (addr >> 8) as u8, addr as u8, chunk as u8];
            command.push(checksum::xor8(&command, 0x00));
            self.send(&command)?;

            let payload = self.recv_packet(CMD_READ)?;
            if payload.len() != chunk + 3 || payload[..3] != command[1..4] {
                return Err(Error::Protocol("read reply window mismatch"));
            }
            buf[offset..offset + chunk].copy_from_slice(&payload[3..]);
            offset += chunk;
        }
        Ok(())
    }

    fn write_memory(&mut self, address: u32, data: &[u8]) -> Result<()> {
        if address + data.len() as u32 > SZ_MEMORY {
            return Err(Error::InvalidArgs("address window outside memory"));
        }
        let mut offset = 0;
        while offset < data.len() {
            let chunk = (data.len() - offset).min(SZ_PACKET);
            let addr = address + offset as u32;
            let mut command = vec![CMD_WRITE, (addr >> 8) as u8, addr as u8, chunk as u8];
            command.extend_from_slice(&data[offset..offset + chunk]);
            command.push(checksum::xor8(&command, 0x00));
            self.send(&command)?;

            let reply = self.recv_packet(CMD_WRITE)?;
            if reply.len() != 3 || reply != command[1..4] {
                return Err(Error::Protocol("write reply window mismatch"));
            }
            offset += chunk;
        }
        Ok(())
    }

    /// Pull one dive; the device streams packets until an empty one, with
    /// the payload bytes in reverse order.
    fn read_dive(&mut self, first: bool, progress: &mut Progress) -> Result<Vec<u8>> {
        let cmd = if first { CMD_DIVE_FIRST } else { CMD_DIVE_NEXT };
        let command = [cmd, 0xA5, checksum::xor8(&[cmd, 0xA5], 0x00)];
        self.send(&command)?;

        let mut dive = Vec::new();
        loop {
            let packet = self.recv_packet(cmd)?;
            if packet.is_empty() {
                break;
            }
            progress.advance(&self.base, packet.len() as u32);
            dive.extend_from_slice(&packet);
        }
        dive.reverse();
        Ok(dive)
    }
}

impl Device for VyperDevice {
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

    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<()> {
        self.read_memory(address, buf)
    }

    fn write(&mut self, address: u32, data: &[u8]) -> Result<()> {
        self.write_memory(address, data)
    }

    fn dump(&mut self, buffer: &mut Vec<u8>) -> Result<()> {
        let mut progress = Progress::new(SZ_MEMORY);
        let start = buffer.len();
        buffer.resize(start + SZ_MEMORY as usize, 0);
        let mut offset = 0usize;
        while offset < SZ_MEMORY as usize {
            let chunk = (SZ_MEMORY as usize - offset).min(SZ_PACKET);
            self.read_memory(offset as u32, &mut buffer[start + offset..start + offset + chunk])?;
            offset += chunk;
            progress.set(&self.base, offset as u32);
        }
        Ok(())
    }

    fn foreach(&mut self, callback: DiveCallback<'_>) -> Result<()> {
        let mut progress = Progress::new(SZ_MEMORY);
        let mut first = true;
        loop {
            let dive = self.read_dive(first, &mut progress)?;
            first = false;
            if dive.is_empty() {
                break;
            }
            if dive.len() < FP_OFFSET + FP_SIZE {
                return Err(Error::DataFormat("dive shorter than its fingerprint"));
            }
            let fingerprint = &dive[FP_OFFSET..FP_OFFSET + FP_SIZE];
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

    fn packet(cmd: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![cmd, payload.len() as u8];
        out.extend_from_slice(payload);
        out.push(checksum::xor8(&out, 0x00));
        out
    }

    fn script_identify(port: &mut FakePort) {
        let command = {
            let mut c = vec![CMD_READ, 0x00, 0x24, 0x06];
            c.push(checksum::xor8(&c, 0x00));
            c
        };
        let mut response = command.clone(); // echo
        let mut payload = vec![0x00, 0x24, 0x06];
        payload.extend_from_slice(&[0x0A, 0x03, 0x00, 0x01, 0xE2, 0x40]);
        response.extend_from_slice(&packet(CMD_READ, &payload));
        port.expect(&command, &response);
    }

    fn dive_command(cmd: u8) -> Vec<u8> {
        vec![cmd, 0xA5, checksum::xor8(&[cmd, 0xA5], 0x00)]
    }

    #[test]
    fn test_dive_reassembly_reverses_packets() {
        let mut port = FakePort::new();
        script_identify(&mut port);

        // One dive, two packets, transmitted tail-first.
        let dive: Vec<u8> = (0u8..40).collect();
        let mut reversed = dive.clone();
        reversed.reverse();
        let mut response = dive_command(CMD_DIVE_FIRST); // echo
        response.extend_from_slice(&packet(CMD_DIVE_FIRST, &reversed[..32]));
        response.extend_from_slice(&packet(CMD_DIVE_FIRST, &reversed[32..]));
        response.extend_from_slice(&packet(CMD_DIVE_FIRST, &[]));
        port.expect(&dive_command(CMD_DIVE_FIRST), &response);

        let mut response = dive_command(CMD_DIVE_NEXT);
        response.extend_from_slice(&packet(CMD_DIVE_NEXT, &[]));
        port.expect(&dive_command(CMD_DIVE_NEXT), &response);

        let context = Context::new();
        let mut device = VyperDevice::open(&context, Box::new(port)).unwrap();
        assert_eq!(device.devinfo().unwrap().model, 0x0A);

        let mut dives = Vec::new();
        device
            .foreach(&mut |raw| {
                dives.push(raw.data.to_vec());
                true
            })
            .unwrap();
        assert_eq!(dives, vec![dive]);
    }

    #[test]
    fn test_echo_mismatch_is_protocol_error() {
        let mut port = FakePort::new();
        let command = {
            let mut c = vec![CMD_READ, 0x00, 0x24, 0x06];
            c.push(checksum::xor8(&c, 0x00));
            c
        };
        // Corrupt one echoed byte.
        let mut response = command.clone();
        response[1] ^= 0x80;
        port.expect(&command, &response);

        let context = Context::new();
        let result = VyperDevice::open(&context, Box::new(port));
        assert!(matches!(result, Err(Error::Protocol(_))));
    }
}
