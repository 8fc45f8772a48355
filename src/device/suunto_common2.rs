//! Shared protocol and download template for the second-generation Suunto
//! serial computers (Vyper2, D9 and their siblings).
//!
//! Frames are `[opcode][len_be_u16][params…][xor]` in both directions; the
//! reply echoes the request parameters before the payload. Dives live in a
//! profile ring, newest last, each followed by a 16-bit length trailer; the
//! pointer block names the write position and the dive count.

use crate::common::Family;
use crate::context::{DevInfo, LogLevel};
use crate::device::{DeviceBase, DiveCallback, Progress, RawDive};
use crate::error::{Error, Result};
use crate::iostream::{Direction, FlowControl, IoStream, LineParams, Parity, StopBits, Timeout};
use crate::ringbuffer::Ring;
use crate::{bytes, checksum};

const CMD_VERSION: u8 = 0x0F;
const CMD_READ: u8 = 0x05;
const CMD_WRITE: u8 = 0x06;

/// Read/write granularity on the wire.
const SZ_PACKET: usize = 0x78;

/// Fingerprint bytes taken from the start of each dive (the encoded
/// timestamp).
pub(crate) const FP_SIZE: usize = 5;
const FP_OFFSET: usize = 0x04;

/// Address of the `[write_ptr_be][count_be]` pointer block.
const ADDR_POINTERS: u32 = 0x0190;
const ADDR_SERIAL: u32 = 0x0023;

#[derive(Debug, Clone, Copy)]
pub(crate) struct Common2Layout {
    pub memsize: u32,
    pub rb_profile: Ring,
}

pub(crate) struct Common2Device {
    pub(crate) base: DeviceBase,
    stream: Box<dyn IoStream>,
    layout: &'static Common2Layout,
}

impl Common2Device {
    pub(crate) fn open(
        base: DeviceBase,
        mut stream: Box<dyn IoStream>,
        layout: &'static Common2Layout,
    ) -> Result<Self> {
        stream.configure(&LineParams::new(
            9600,
            8,
            Parity::None,
            StopBits::One,
            FlowControl::None,
        ))?;
        stream.set_timeout(Timeout::Ms(3000))?;
        stream.set_dtr(true)?;
        stream.set_rts(false)?;
        stream.purge(Direction::All)?;

        let mut device = Self {
            base,
            stream,
            layout,
        };
        device.identify()?;
        Ok(device)
    }

    /// One framed command/response turn.
    fn transfer(&mut self, cmd: u8, params: &[u8], expected: usize) -> Result<Vec<u8>> {
        self.base.check_cancelled()?;

        let mut request = Vec::with_capacity(params.len() + 4);
        request.push(cmd);
        request.extend_from_slice(&(params.len() as u16).to_be_bytes());
        request.extend_from_slice(params);
        request.push(checksum::xor8(&request, 0x00));
        if self.base.context.log_enabled(LogLevel::Debug) {
            log::debug!("cmd: {}", bytes::bytes_to_hex(&request));
        }
        self.stream.write_all(&request)?;

        let mut header = [0u8; 3];
        self.stream.read_exact(&mut header)?;
        if header[0] != cmd {
            return Err(Error::Protocol("response opcode mismatch"));
        }
        let len = bytes::u16_be(&header[1..3]) as usize;
        if len != params.len() + expected {
            return Err(Error::Protocol("response length mismatch"));
        }

        let mut payload = vec![0u8; len + 1];
        self.stream.read_exact(&mut payload)?;
        let crc = payload[len];
        if checksum::xor8(&payload[..len], checksum::xor8(&header, 0x00)) != crc {
            return Err(Error::Protocol("response checksum mismatch"));
        }

        // The device echoes the request parameters ahead of the payload.
        if &payload[..params.len()] != params {
            return Err(Error::Protocol("echoed parameters mismatch"));
        }
        payload.truncate(len);
        payload.drain(..params.len());
        Ok(payload)
    }

    fn identify(&mut self) -> Result<()> {
        let version = self.transfer(CMD_VERSION, &[], 4)?;
        let mut serial = [0u8; 4];
        self.read_memory(ADDR_SERIAL, &mut serial)?;
        self.base.set_devinfo(DevInfo {
            model: version[0] as u32,
            firmware: bytes::u16_be(&version[2..4]) as u32,
            serial: bytes::u32_be(&serial),
        });
        Ok(())
    }

    pub(crate) fn read_memory(&mut self, address: u32, buf: &mut [u8]) -> Result<()> {
        if address + buf.len() as u32 > self.layout.memsize {
            return Err(Error::InvalidArgs("address window outside memory"));
        }
        let mut offset = 0;
        while offset < buf.len() {
            let chunk = (buf.len() - offset).min(SZ_PACKET);
            let addr = address + offset as u32;
            let params = [(addr >> 8) as u8, addr as u8, chunk as u8];
            let payload = self.transfer(CMD_READ, &params, chunk)?;
            if payload.len() != chunk {
                return Err(Error::Protocol("short read payload"));
            }
            buf[offset..offset + chunk].copy_from_slice(&payload);
            offset += chunk;
        }
        Ok(())
    }

    pub(crate) fn write_memory(&mut self, address: u32, data: &[u8]) -> Result<()> {
        if address + data.len() as u32 > self.layout.memsize {
            return Err(Error::InvalidArgs("address window outside memory"));
        }
        let mut offset = 0;
        while offset < data.len() {
            let chunk = (data.len() - offset).min(SZ_PACKET);
            let addr = address + offset as u32;
            let mut params = vec![(addr >> 8) as u8, addr as u8, chunk as u8];
            params.extend_from_slice(&data[offset..offset + chunk]);
            self.transfer(CMD_WRITE, &params, 0)?;
            offset += chunk;
        }
        Ok(())
    }

    /// Read a ring window ending at `end`, stitching across the wrap.
    fn read_ring(&mut self, end: u32, len: u32, out: &mut Vec<u8>) -> Result<()> {
        let ring = self.layout.rb_profile;
        let start = ring.decrement(end, len);
        let split = out.len();
        if start < end || len == 0 {
            out.resize(split + len as usize, 0);
            self.read_memory(start, &mut out[split..])?;
        } else {
            let tail = (ring.end - start) as usize;
            out.resize(split + len as usize, 0);
            let (first, second) = out[split..].split_at_mut(tail);
            self.read_memory(start, first)?;
            self.read_memory(ring.begin, second)?;
        }
        Ok(())
    }

    pub(crate) fn dump_memory(&mut self, buffer: &mut Vec<u8>) -> Result<()> {
        let mut progress = Progress::new(self.layout.memsize);
        let start = buffer.len();
        buffer.resize(start + self.layout.memsize as usize, 0);
        let mut offset = 0usize;
        while offset < self.layout.memsize as usize {
            let chunk = (self.layout.memsize as usize - offset).min(SZ_PACKET);
            let address = offset as u32;
            let window = &mut buffer[start + offset..start + offset + chunk];
            self.read_memory(address, window)?;
            offset += chunk;
            progress.set(&self.base, offset as u32);
        }
        Ok(())
    }

    pub(crate) fn foreach_dive(&mut self, callback: DiveCallback<'_>) -> Result<()> {
        let ring = self.layout.rb_profile;
        let mut progress = Progress::new(ring.size());

        let mut pointers = [0u8; 4];
        self.read_memory(ADDR_POINTERS, &mut pointers)?;
        let write_ptr = ring.check(bytes::u16_be(&pointers[0..2]) as u32)?;
        let count = bytes::u16_be(&pointers[2..4]) as usize;

        // First pass: walk the length trailers backward to size every dive
        // and find where the ring overwrote the tail of the history.
        let mut lengths = Vec::with_capacity(count);
        let mut end = write_ptr;
        let mut total: u32 = 0;
        for _ in 0..count {
            let mut trailer = Vec::with_capacity(2);
            self.read_ring(end, 2, &mut trailer)?;
            let len = bytes::u16_be(&trailer) as u32;
            if len == 0 || len + 2 > ring.size() {
                return Err(Error::DataFormat("dive length outside profile ring"));
            }
            if total + len + 2 > ring.size() {
                // Overwritten by newer dives; the rest is unreachable.
                break;
            }
            total += len + 2;
            lengths.push(len);
            end = ring.decrement(end, len + 2);
        }
        progress.refine_maximum(&self.base, total);

        // Second pass: download newest first.
        let mut end = write_ptr;
        for len in lengths {
            self.base.check_cancelled()?;
            let mut dive = Vec::with_capacity(len as usize);
            let data_end = ring.decrement(end, 2);
            self.read_ring(data_end, len, &mut dive)?;
            end = ring.decrement(end, len + 2);
            progress.advance(&self.base, len + 2);

            if dive.len() < FP_OFFSET + FP_SIZE {
                return Err(Error::DataFormat("dive shorter than its fingerprint"));
            }
            let fingerprint = dive[FP_OFFSET..FP_OFFSET + FP_SIZE].to_vec();
            if self.base.fingerprint_reached(&fingerprint) {
                break;
            }
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

    pub(crate) fn family(&self) -> Family {
        self.base.family()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::context::Context;
    use crate::testing::FakePort;

    pub(crate) fn frame(cmd: u8, params: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.push(cmd);
        out.extend_from_slice(&(params.len() as u16).to_be_bytes());
        out.extend_from_slice(params);
        out.push(checksum::xor8(&out, 0x00));
        out
    }

    /// Script the open/identify exchange shared by every test.
    pub(crate) fn script_identify(port: &mut FakePort, model: u8) {
        let mut version = vec![model, 0x00, 0x01, 0x2C];
        let mut payload = Vec::new();
        payload.append(&mut version);
        port.expect(&frame(CMD_VERSION, &[]), &frame(CMD_VERSION, &payload));
        let params = [0x00, 0x23, 0x04];
        let mut answer = params.to_vec();
        answer.extend_from_slice(&[0x00, 0xBC, 0x61, 0x4E]);
        port.expect(&frame(CMD_READ, &params), &frame(CMD_READ, &answer));
    }

    static LAYOUT: Common2Layout = Common2Layout {
        memsize: 0x8000,
        rb_profile: Ring::new(0x019A, 0x8000),
    };

    #[test]
    fn test_identify_reports_devinfo() {
        let mut port = FakePort::new();
        script_identify(&mut port, 0x0E);

        let context = Context::new();
        let base = DeviceBase::new(&context, Family::SuuntoD9);
        let device = Common2Device::open(base, Box::new(port), &LAYOUT).unwrap();
        let devinfo = device.base.devinfo().unwrap();
        assert_eq!(devinfo.model, 0x0E);
        assert_eq!(devinfo.firmware, 0x012C);
        assert_eq!(devinfo.serial, 0x00BC614E);
    }

    #[test]
    fn test_corrupted_checksum_is_protocol_error() {
        let mut port = FakePort::new();
        let mut bad = frame(CMD_VERSION, &[0x0E, 0x00, 0x01, 0x2C]);
        let last = bad.len() - 1;
        bad[last] ^= 0xFF;
        port.expect(&frame(CMD_VERSION, &[]), &bad);

        let context = Context::new();
        let base = DeviceBase::new(&context, Family::SuuntoD9);
        let result = Common2Device::open(base, Box::new(port), &LAYOUT);
        assert!(matches!(result, Err(Error::Protocol(_))));
    }
}
