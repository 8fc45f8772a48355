//! Zeagle N2iTiON3 downloader. Requests are STX/ETX frames closed by the
//! two's complement of the additive sum; memory is the familiar
//! logbook/profile ring pair, so the Oceanic walker drives the download.

use crate::bytes;
use crate::checksum;
use crate::common::Family;
use crate::context::{Context, DevInfo};
use crate::device::oceanic_common::{self, OceanicLayout, OceanicProtocol};
use crate::device::{Canceller, Device, DeviceBase, DiveCallback};
use crate::error::{Error, Result};
use crate::iostream::{Direction, FlowControl, IoStream, LineParams, Parity, StopBits, Timeout};
use crate::ringbuffer::Ring;

const STX: u8 = 0x02;
const ETX: u8 = 0x03;

const CMD_READ: u8 = 0x41; // 'A'
const CMD_VERSION: u8 = 0x56; // 'V'

/// Largest window one read frame can carry.
const SZ_CHUNK: usize = 0x80;

pub(crate) static LAYOUT: OceanicLayout = OceanicLayout {
    memsize: 0x8000,
    cf_pointers: 0x0040,
    rb_logbook: Ring::new(0x4000, 0x4400),
    rb_profile: Ring::new(0x0080, 0x3FA0),
    entry_size: 0x10,
};

pub struct N2ition3Device {
    base: DeviceBase,
    stream: Box<dyn IoStream>,
}

impl N2ition3Device {
    pub fn open(context: &Context, mut stream: Box<dyn IoStream>) -> Result<Self> {
        stream.configure(&LineParams::new(
            4800,
            8,
            Parity::None,
            StopBits::One,
            FlowControl::None,
        ))?;
        stream.set_timeout(Timeout::Ms(1000))?;
        stream.purge(Direction::All)?;

        let mut device = Self {
            base: DeviceBase::new(context, Family::ZeagleN2ition3),
            stream,
        };
        device.identify()?;
        Ok(device)
    }

    /// `[STX][len_le_u16][payload][~sum+1][ETX]` in both directions; the
    /// device echoes the request frame before answering.
    fn transfer(&mut self, payload: &[u8], expected: usize) -> Result<Vec<u8>> {
        self.base.check_cancelled()?;

        let mut frame = vec![STX];
        frame.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        frame.extend_from_slice(payload);
        frame.push(checksum::add8_complement(payload));
        frame.push(ETX);
        self.stream.write_all(&frame)?;

        let mut echo = vec![0u8; frame.len()];
        self.stream.read_exact(&mut echo)?;
        if echo != frame {
            return Err(Error::Protocol("command echo mismatch"));
        }

        let mut header = [0u8; 3];
        self.stream.read_exact(&mut header)?;
        if header[0] != STX {
            return Err(Error::Protocol("response framing mismatch"));
        }
        let len = bytes::u16_le(&header[1..3]) as usize;
        if len != expected {
            return Err(Error::Protocol("response length mismatch"));
        }
        let mut rest = vec![0u8; len + 2];
        self.stream.read_exact(&mut rest)?;
        if rest[len + 1] != ETX {
            return Err(Error::Protocol("response framing mismatch"));
        }
        if checksum::add8(&rest[..len], rest[len]) != 0 {
            return Err(Error::Protocol("response checksum mismatch"));
        }
        rest.truncate(len);
        Ok(rest)
    }

    fn identify(&mut self) -> Result<()> {
        let version = self.transfer(&[CMD_VERSION], 8)?;
        self.base.set_devinfo(DevInfo {
            model: version[0] as u32,
            firmware: version[1] as u32,
            serial: bytes::u32_le(&version[4..8]),
        });
        Ok(())
    }
}

impl OceanicProtocol for N2ition3Device {
    fn base(&mut self) -> &mut DeviceBase {
        &mut self.base
    }

    fn read_bytes(&mut self, address: u32, buf: &mut [u8]) -> Result<()> {
        let mut offset = 0;
        while offset < buf.len() {
            let chunk = (buf.len() - offset).min(SZ_CHUNK);
            let addr = address + offset as u32;
            let payload = [CMD_READ, addr as u8, (addr >> 8) as u8, chunk as u8];
            let answer = self.transfer(&payload, chunk)?;
            buf[offset..offset + chunk].copy_from_slice(&answer);
            offset += chunk;
        }
        Ok(())
    }
}

impl Device for N2ition3Device {
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
        self.base
            .set_fingerprint(fingerprint, LAYOUT.entry_size as usize)
    }

    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<()> {
        self.read_bytes(address, buf)
    }

    fn dump(&mut self, buffer: &mut Vec<u8>) -> Result<()> {
        oceanic_common::dump(self, &LAYOUT, buffer)
    }

    fn foreach(&mut self, callback: DiveCallback<'_>) -> Result<()> {
        oceanic_common::foreach(self, &LAYOUT, callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePort;

    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut out = vec![STX];
        out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
        out.extend_from_slice(payload);
        out.push(checksum::add8_complement(payload));
        out.push(ETX);
        out
    }

    #[test]
    fn test_frame_exchange() {
        let mut port = FakePort::new();
        let request = frame(&[CMD_VERSION]);
        let mut response = request.clone(); // echo
        response.extend_from_slice(&frame(&[0x33, 0x01, 0, 0, 0x4E, 0x61, 0xBC, 0x00]));
        port.expect(&request, &response);

        let context = Context::new();
        let device = N2ition3Device::open(&context, Box::new(port)).unwrap();
        let devinfo = device.devinfo().unwrap();
        assert_eq!(devinfo.model, 0x33);
        assert_eq!(devinfo.serial, 0x00BC614E);
    }

    /// The shared walker against a flat memory image, no wire protocol.
    struct ImageProtocol {
        base: DeviceBase,
        image: Vec<u8>,
    }

    impl OceanicProtocol for ImageProtocol {
        fn base(&mut self) -> &mut DeviceBase {
            &mut self.base
        }

        fn read_bytes(&mut self, address: u32, buf: &mut [u8]) -> Result<()> {
            let address = address as usize;
            buf.copy_from_slice(&self.image[address..address + buf.len()]);
            Ok(())
        }
    }

    #[test]
    fn test_ring_overflow_truncates_to_newest() {
        // 60 logbook entries whose profiles are 0x110 bytes each: the sum
        // (0x3FC0) exceeds the profile ring (0x3F20), so only the newest
        // 59 survive.
        let profile_len = 0x110u32;
        let count = 60u32;
        let ring = LAYOUT.rb_profile;

        let mut image = vec![0xFFu8; LAYOUT.memsize as usize];
        let mut end = ring.begin + 0x40; // arbitrary write position
        for i in 0..count {
            // Entry i is the i-th newest; entries sit newest-last in the
            // logbook ring.
            let slot = LAYOUT.rb_logbook.begin + (count - 1 - i) * LAYOUT.entry_size;
            let begin = ring.decrement(end, profile_len);
            let entry = &mut image[slot as usize..(slot + LAYOUT.entry_size) as usize];
            entry.fill(0);
            entry[0] = i as u8; // keeps fingerprints distinct
            entry[0x0C..0x0E].copy_from_slice(&(begin as u16).to_le_bytes());
            entry[0x0E..0x10].copy_from_slice(&(end as u16).to_le_bytes());
            end = begin;
        }
        let write_ptr = LAYOUT.rb_logbook.begin + count * LAYOUT.entry_size;
        image[LAYOUT.cf_pointers as usize..LAYOUT.cf_pointers as usize + 2]
            .copy_from_slice(&(write_ptr as u16).to_le_bytes());

        let context = Context::new();
        let mut device = ImageProtocol {
            base: DeviceBase::new(&context, Family::ZeagleN2ition3),
            image,
        };

        let mut delivered = 0u32;
        oceanic_common::foreach(&mut device, &LAYOUT, &mut |raw| {
            assert_eq!(raw.data.len(), (LAYOUT.entry_size + profile_len) as usize);
            delivered += 1;
            true
        })
        .unwrap();
        assert_eq!(delivered, 59);
    }
}
