//! Mares Icon HD downloader. Commands go out as `[cmd][cmd ^ 0xA5]`, the
//! device leads every answer with `0xAA` and closes it with `0xEA`.

use crate::bytes;
use crate::common::Family;
use crate::context::{Context, DevInfo};
use crate::device::{Canceller, Device, DeviceBase, DiveCallback, Progress, RawDive};
use crate::error::{Error, Result};
use crate::iostream::{Direction, FlowControl, IoStream, LineParams, Parity, StopBits, Timeout};

const XOR: u8 = 0xA5;
const ACK: u8 = 0xAA;
const END: u8 = 0xEA;

const CMD_VERSION: u8 = 0xC2;
const CMD_READ: u8 = 0xE7;

const SZ_VERSION: usize = 140;
const SZ_MEMORY: u32 = 0x100000;

/// The packed datetime word opening each dive.
pub(crate) const FP_SIZE: usize = 4;

const CFG_NDIVES: u32 = 0x0000;
const CFG_WRITE_PTR: u32 = 0x0004;

/// Dive storage starts past the configuration area.
const DATA_BEGIN: u32 = 0x1000;

pub struct IconHdDevice {
    base: DeviceBase,
    stream: Box<dyn IoStream>,
}

impl IconHdDevice {
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
            base: DeviceBase::new(context, Family::MaresIconHD),
            stream,
        };
        device.identify()?;
        Ok(device)
    }

    /// `[cmd][cmd^0xA5]` out; `ACK … END` back.
    fn command(&mut self, cmd: u8, params: &[u8], answer: &mut [u8]) -> Result<()> {
        self.base.check_cancelled()?;
        self.stream.write_all(&[cmd, cmd ^ XOR])?;

        let mut ack = [0u8; 1];
        self.stream.read_exact(&mut ack)?;
        if ack[0] != ACK {
            return Err(Error::Protocol("command not acknowledged"));
        }

        if !params.is_empty() {
            self.stream.write_all(params)?;
        }
        if !answer.is_empty() {
            self.stream.read_exact(answer)?;
        }

        let mut end = [0u8; 1];
        self.stream.read_exact(&mut end)?;
        if end[0] != END {
            return Err(Error::Protocol("missing end marker"));
        }
        Ok(())
    }

    fn identify(&mut self) -> Result<()> {
        let mut version = [0u8; SZ_VERSION];
        self.command(CMD_VERSION, &[], &mut version)?;
        self.base.emit_vendor(&version);
        self.base.set_devinfo(DevInfo {
            model: version[0] as u32,
            firmware: bytes::u16_le(&version[2..4]) as u32,
            serial: bytes::u32_le(&version[4..8]),
        });
        Ok(())
    }

    fn read_memory(&mut self, address: u32, buf: &mut [u8]) -> Result<()> {
        if address + buf.len() as u32 > SZ_MEMORY {
            return Err(Error::InvalidArgs("address window outside memory"));
        }
        let mut params = Vec::with_capacity(8);
        params.extend_from_slice(&address.to_le_bytes());
        params.extend_from_slice(&(buf.len() as u32).to_le_bytes());
        self.command(CMD_READ, &params, buf)
    }
}

impl Device for IconHdDevice {
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
        let mut config = [0u8; 16];
        self.read_memory(CFG_NDIVES, &mut config)?;
        let ndives = bytes::u16_le(&config[0..2]) as u32;
        let mut end = bytes::u32_le(&config[CFG_WRITE_PTR as usize..]);
        if end < DATA_BEGIN || end > SZ_MEMORY {
            return Err(Error::DataFormat("write pointer outside dive storage"));
        }

        let mut progress = Progress::new(end - DATA_BEGIN);
        let mut transferred = 0u32;
        for _ in 0..ndives {
            self.base.check_cancelled()?;
            if end < DATA_BEGIN + 4 {
                return Err(Error::DataFormat("dive chain walks out of storage"));
            }
            let mut trailer = [0u8; 4];
            self.read_memory(end - 4, &mut trailer)?;
            let len = bytes::u32_le(&trailer);
            if len < FP_SIZE as u32 || len + 4 > end - DATA_BEGIN {
                return Err(Error::DataFormat("dive length outside storage"));
            }

            let mut dive = vec![0u8; len as usize];
            self.read_memory(end - 4 - len, &mut dive)?;
            end -= len + 4;
            transferred += len + 4;
            progress.set(&self.base, transferred);

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
