//! Reefnet Sensus Pro downloader. Same handshake-then-stream shape as the
//! original Sensus with a larger memory and a CRC-protected stream.

use crate::bytes;
use crate::checksum;
use crate::common::Family;
use crate::context::{ClockSync, Context, DevInfo};
use crate::device::reefnet_sensus::extract_dives;
use crate::device::{Canceller, Device, DeviceBase, DiveCallback, Progress};
use crate::error::{Error, Result};
use crate::iostream::{Direction, FlowControl, IoStream, LineParams, Parity, StopBits, Timeout};

const CMD_HANDSHAKE: u8 = 0x42; // 'B'
const ACK: u8 = 0x41; // 'A'

const SZ_MEMORY: usize = 0xDC00;

pub(crate) const FP_SIZE: usize = 4;

pub struct SensusProDevice {
    base: DeviceBase,
    stream: Box<dyn IoStream>,
}

impl SensusProDevice {
    pub fn open(context: &Context, mut stream: Box<dyn IoStream>) -> Result<Self> {
        stream.configure(&LineParams::new(
            19200,
            8,
            Parity::None,
            StopBits::One,
            FlowControl::None,
        ))?;
        stream.set_timeout(Timeout::Ms(3000))?;
        stream.purge(Direction::All)?;

        let mut device = Self {
            base: DeviceBase::new(context, Family::ReefnetSensusPro),
            stream,
        };
        device.handshake()?;
        Ok(device)
    }

    fn handshake(&mut self) -> Result<()> {
        self.base.check_cancelled()?;
        self.stream.write_all(&[CMD_HANDSHAKE])?;

        let mut header = [0u8; 11];
        self.stream.read_exact(&mut header)?;
        if header[0] != ACK {
            return Err(Error::Protocol("handshake not acknowledged"));
        }
        self.base.set_devinfo(DevInfo {
            model: header[1] as u32,
            firmware: header[2] as u32,
            serial: bytes::u32_le(&header[3..7]),
        });
        self.base.set_clock(bytes::u32_le(&header[7..11]));
        Ok(())
    }

    fn dump_memory(&mut self, buffer: &mut Vec<u8>) -> Result<()> {
        let mut progress = Progress::new(SZ_MEMORY as u32);
        let mut image = vec![0u8; SZ_MEMORY + 2];
        let mut offset = 0;
        while offset < image.len() {
            self.base.check_cancelled()?;
            let chunk = (image.len() - offset).min(0x400);
            self.stream.read_exact(&mut image[offset..offset + chunk])?;
            offset += chunk;
            progress.set(&self.base, offset.min(SZ_MEMORY) as u32);
        }
        if checksum::crc16_ccitt(&image[..SZ_MEMORY], 0xFFFF) != bytes::u16_le(&image[SZ_MEMORY..])
        {
            return Err(Error::Protocol("memory dump checksum mismatch"));
        }
        image.truncate(SZ_MEMORY);
        buffer.extend_from_slice(&image);
        Ok(())
    }
}

impl Device for SensusProDevice {
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

    fn dump(&mut self, buffer: &mut Vec<u8>) -> Result<()> {
        self.dump_memory(buffer)
    }

    fn foreach(&mut self, callback: DiveCallback<'_>) -> Result<()> {
        let mut image = Vec::new();
        self.dump_memory(&mut image)?;
        // Dive framing is unchanged from the original Sensus.
        extract_dives(&self.base, &image, callback)
    }
}
