//! Cochran Commander downloader. An identity block, bulk memory reads,
//! and a header array pointing into a large profile ring.

use crate::bytes;
use crate::common::Family;
use crate::context::{Context, DevInfo};
use crate::device::{Canceller, Device, DeviceBase, DiveCallback, Progress, RawDive};
use crate::error::{Error, Result};
use crate::iostream::{Direction, FlowControl, IoStream, LineParams, Parity, StopBits, Timeout};
use crate::ringbuffer::{Overlap, Ring};

const CMD_IDENTITY: u8 = 0x05;
const CMD_READ: u8 = 0x06;

const SZ_IDENTITY: usize = 67;
const SZ_MEMORY: u32 = 0x20000;

const ADDR_CONFIG: u32 = 0x0100;
const ADDR_HEADERS: u32 = 0x1000;
const SZ_HEADER: usize = 0x100;
const MAX_HEADERS: u32 = 0x200;

const RB_PROFILE: Ring = Ring::new(0x10000, 0x20000);

pub(crate) const FP_SIZE: usize = 6;

pub struct CommanderDevice {
    base: DeviceBase,
    stream: Box<dyn IoStream>,
}

impl CommanderDevice {
    pub fn open(context: &Context, mut stream: Box<dyn IoStream>) -> Result<Self> {
        stream.configure(&LineParams::new(
            9600,
            8,
            Parity::None,
            StopBits::One,
            FlowControl::None,
        ))?;
        stream.set_timeout(Timeout::Ms(2000))?;
        stream.purge(Direction::All)?;

        let mut device = Self {
            base: DeviceBase::new(context, Family::CochranCommander),
            stream,
        };
        device.identify()?;
        Ok(device)
    }

    fn identify(&mut self) -> Result<()> {
        self.base.check_cancelled()?;
        self.stream.write_all(&[CMD_IDENTITY])?;
        let mut identity = [0u8; SZ_IDENTITY];
        self.stream.read_exact(&mut identity)?;
        self.base.set_devinfo(DevInfo {
            model: identity[0] as u32,
            firmware: identity[1] as u32,
            serial: bytes::u32_le(&identity[2..6]),
        });
        Ok(())
    }

    fn read_memory(&mut self, address: u32, buf: &mut [u8]) -> Result<()> {
        if address + buf.len() as u32 > SZ_MEMORY {
            return Err(Error::InvalidArgs("address window outside memory"));
        }
        self.base.check_cancelled()?;
        let mut request = vec![CMD_READ];
        request.extend_from_slice(&address.to_le_bytes());
        request.extend_from_slice(&(buf.len() as u32).to_le_bytes());
        self.stream.write_all(&request)?;
        self.stream.read_exact(buf)?;
        Ok(())
    }

    /// Read a profile window ending at `end`, stitching across the wrap.
    fn read_profile(&mut self, begin: u32, len: u32) -> Result<Vec<u8>> {
        let mut out = vec![0u8; len as usize];
        let linear = (RB_PROFILE.end - begin).min(len);
        self.read_memory(begin, &mut out[..linear as usize])?;
        if linear < len {
            self.read_memory(RB_PROFILE.begin, &mut out[linear as usize..])?;
        }
        Ok(out)
    }
}

impl Device for CommanderDevice {
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

    fn foreach(&mut self, callback: DiveCallback<'_>) -> Result<()> {
        let mut config = [0u8; 4];
        self.read_memory(ADDR_CONFIG, &mut config)?;
        let count = bytes::u16_le(&config[0..2]) as u32;
        let latest = bytes::u16_le(&config[2..4]) as u32;
        if count > MAX_HEADERS || latest >= MAX_HEADERS {
            return Err(Error::DataFormat("header index outside the array"));
        }

        let mut progress = Progress::new(RB_PROFILE.size());

        // First pass over the headers to size the transfer.
        let mut dives = Vec::new();
        let mut total = 0u32;
        let mut slot = latest;
        for _ in 0..count {
            let mut header = vec![0u8; SZ_HEADER];
            self.read_memory(ADDR_HEADERS + slot * SZ_HEADER as u32, &mut header)?;
            if !bytes::is_all(&header[..8], 0xFF) {
                let begin = RB_PROFILE.check(bytes::u32_le(&header[0x10..0x14]))?;
                let end = RB_PROFILE.check(bytes::u32_le(&header[0x14..0x18]))?;
                let len = RB_PROFILE.distance(begin, end, Overlap::Empty);
                if total + len > RB_PROFILE.size() {
                    break;
                }
                total += len;
                dives.push((header, begin, len));
            }
            slot = (slot + MAX_HEADERS - 1) % MAX_HEADERS;
        }
        progress.refine_maximum(&self.base, total);

        for (header, begin, len) in dives {
            self.base.check_cancelled()?;
            let fingerprint = header[..FP_SIZE].to_vec();
            if self.base.fingerprint_reached(&fingerprint) {
                break;
            }

            let profile = self.read_profile(begin, len)?;
            progress.advance(&self.base, len);

            let mut dive = header;
            dive.extend_from_slice(&profile);
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

    fn expect_read(port: &mut FakePort, address: u32, answer: &[u8]) {
        let mut request = vec![CMD_READ];
        request.extend_from_slice(&address.to_le_bytes());
        request.extend_from_slice(&(answer.len() as u32).to_le_bytes());
        port.expect(&request, answer);
    }

    #[test]
    fn test_header_array_walk() {
        let mut port = FakePort::new();
        let mut identity = vec![0u8; SZ_IDENTITY];
        identity[0] = 0x15;
        port.expect(&[CMD_IDENTITY], &identity);

        let mut config = vec![0u8; 4];
        config[0..2].copy_from_slice(&1u16.to_le_bytes());
        config[2..4].copy_from_slice(&0u16.to_le_bytes());
        expect_read(&mut port, ADDR_CONFIG, &config);

        let mut header = vec![0u8; SZ_HEADER];
        header[0..6].copy_from_slice(&[0x30, 0x15, 0x09, 0x12, 0x06, 0x23]);
        header[0x10..0x14].copy_from_slice(&RB_PROFILE.begin.to_le_bytes());
        header[0x14..0x18].copy_from_slice(&(RB_PROFILE.begin + 8).to_le_bytes());
        expect_read(&mut port, ADDR_HEADERS, &header);

        let profile = [1u8, 2, 3, 4, 5, 6, 7, 8];
        expect_read(&mut port, RB_PROFILE.begin, &profile);

        let context = Context::new();
        let mut device = CommanderDevice::open(&context, Box::new(port)).unwrap();

        let mut dives = Vec::new();
        device
            .foreach(&mut |raw| {
                dives.push(raw.data.to_vec());
                true
            })
            .unwrap();
        assert_eq!(dives.len(), 1);
        assert_eq!(&dives[0][SZ_HEADER..], &profile);
    }
}
