//! Uwatec Smart and Galileo downloaders (and the Meridian, which speaks
//! the same commands over a serial line).
//!
//! The Smart protocol is resumable by construction: the host hands the
//! device the timestamp of the newest dive it already has, and the device
//! only transfers what is newer. The fingerprint therefore IS the
//! little-endian device timestamp of a dive.

use crate::bytes;
use crate::common::Family;
use crate::context::{ClockSync, Context, DevInfo};
use crate::device::{Canceller, Device, DeviceBase, DiveCallback, Progress, RawDive};
use crate::error::{Error, Result};
use crate::iostream::{Direction, FlowControl, IoStream, LineParams, Parity, StopBits, Timeout};

const CMD_MODEL: u8 = 0x10;
const CMD_SERIAL: u8 = 0x14;
const CMD_DEVTIME: u8 = 0x1A;
const CMD_SIZE: u8 = 0xC6;
const CMD_DATA: u8 = 0xC4;

pub(crate) const FP_SIZE: usize = 4;

pub struct SmartDevice {
    base: DeviceBase,
    stream: Box<dyn IoStream>,
}

impl SmartDevice {
    pub fn open(context: &Context, stream: Box<dyn IoStream>) -> Result<Self> {
        Self::open_with(context, stream, Family::UwatecSmart, 57600)
    }

    fn open_with(
        context: &Context,
        mut stream: Box<dyn IoStream>,
        family: Family,
        baudrate: u32,
    ) -> Result<Self> {
        stream.configure(&LineParams::new(
            baudrate,
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

    fn command(&mut self, cmd: u8, params: &[u8], answer: &mut [u8]) -> Result<()> {
        self.base.check_cancelled()?;
        let mut request = vec![cmd];
        request.extend_from_slice(params);
        self.stream.write_all(&request)?;
        self.stream.read_exact(answer)?;
        Ok(())
    }

    fn identify(&mut self) -> Result<()> {
        let mut model = [0u8; 1];
        self.command(CMD_MODEL, &[], &mut model)?;
        let mut serial = [0u8; 4];
        self.command(CMD_SERIAL, &[], &mut serial)?;
        let mut devtime = [0u8; 4];
        self.command(CMD_DEVTIME, &[], &mut devtime)?;

        self.base.set_devinfo(DevInfo {
            model: model[0] as u32,
            firmware: 0,
            serial: bytes::u32_le(&serial),
        });
        self.base.set_clock(bytes::u32_le(&devtime));
        Ok(())
    }

    /// The timestamp handed to the device; zero asks for everything.
    fn fingerprint_timestamp(&self) -> [u8; 4] {
        let mut timestamp = [0u8; 4];
        let fingerprint = self.base.fingerprint();
        if fingerprint.len() == FP_SIZE {
            timestamp.copy_from_slice(fingerprint);
        }
        timestamp
    }
}

impl Device for SmartDevice {
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

    fn foreach(&mut self, callback: DiveCallback<'_>) -> Result<()> {
        let timestamp = self.fingerprint_timestamp();

        let mut size = [0u8; 4];
        self.command(CMD_SIZE, &timestamp, &mut size)?;
        let total = bytes::u32_le(&size) as usize;
        if total == 0 {
            return Ok(());
        }
        let mut progress = Progress::new(total as u32);

        let mut data = vec![0u8; total];
        self.command(CMD_DATA, &timestamp, &mut [])?;
        let mut offset = 0;
        while offset < total {
            self.base.check_cancelled()?;
            let chunk = (total - offset).min(0x200);
            self.stream.read_exact(&mut data[offset..offset + chunk])?;
            offset += chunk;
            progress.set(&self.base, offset as u32);
        }

        // `[len u32_le][timestamp u32_le][payload]…`, oldest first.
        let mut dives = Vec::new();
        let mut offset = 0;
        while offset + 8 <= data.len() {
            let len = bytes::u32_le(&data[offset..]) as usize;
            if len < 8 || offset + len > data.len() {
                return Err(Error::DataFormat("dive record truncated"));
            }
            dives.push(&data[offset..offset + len]);
            offset += len;
        }
        if offset != data.len() {
            return Err(Error::DataFormat("trailing bytes after last dive"));
        }

        for &dive in dives.iter().rev() {
            let fingerprint = &dive[4..8];
            if self.base.fingerprint_reached(fingerprint) {
                break;
            }
            if !callback(RawDive {
                data: dive,
                fingerprint,
            }) {
                return Ok(());
            }
        }
        progress.finish(&self.base);
        Ok(())
    }
}

/// The Meridian: the Smart command set behind a serial transport.
pub struct MeridianDevice {
    inner: SmartDevice,
}

impl MeridianDevice {
    pub fn open(context: &Context, stream: Box<dyn IoStream>) -> Result<Self> {
        Ok(Self {
            inner: SmartDevice::open_with(context, stream, Family::UwatecMeridian, 115200)?,
        })
    }
}

impl Device for MeridianDevice {
    fn family(&self) -> Family {
        self.inner.family()
    }

    fn devinfo(&self) -> Option<DevInfo> {
        self.inner.devinfo()
    }

    fn clock(&self) -> Option<ClockSync> {
        self.inner.clock()
    }

    fn canceller(&self) -> Canceller {
        self.inner.canceller()
    }

    fn set_fingerprint(&mut self, fingerprint: &[u8]) -> Result<()> {
        self.inner.set_fingerprint(fingerprint)
    }

    fn foreach(&mut self, callback: DiveCallback<'_>) -> Result<()> {
        self.inner.foreach(callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Event, EventMask};
    use crate::testing::FakePort;
    use std::sync::mpsc;

    fn dive(timestamp: u32, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&((payload.len() + 8) as u32).to_le_bytes());
        out.extend_from_slice(&timestamp.to_le_bytes());
        out.extend_from_slice(payload);
        out
    }

    fn script_identify(port: &mut FakePort) {
        port.expect(&[CMD_MODEL], &[0x10]);
        port.expect(&[CMD_SERIAL], &0xCAFE0001u32.to_le_bytes());
        port.expect(&[CMD_DEVTIME], &123456u32.to_le_bytes());
    }

    #[test]
    fn test_download_emits_clock_and_newest_first() {
        let mut port = FakePort::new();
        script_identify(&mut port);

        let mut data = dive(100, &[0xAA; 4]);
        data.extend_from_slice(&dive(200, &[0xBB; 8]));

        let mut size_request = vec![CMD_SIZE];
        size_request.extend_from_slice(&0u32.to_le_bytes());
        port.expect(&size_request, &(data.len() as u32).to_le_bytes());
        let mut data_request = vec![CMD_DATA];
        data_request.extend_from_slice(&0u32.to_le_bytes());
        port.expect(&data_request, &data);

        let context = Context::new();
        let (tx, rx) = mpsc::channel();
        context.set_event_handler(EventMask::CLOCK, move |event| {
            if let Event::Clock(clock) = event {
                tx.send(clock.devtime).unwrap();
            }
        });

        let mut device = SmartDevice::open(&context, Box::new(port)).unwrap();
        assert_eq!(rx.try_recv(), Ok(123456));

        let mut timestamps = Vec::new();
        device
            .foreach(&mut |raw| {
                timestamps.push(bytes::u32_le(raw.fingerprint));
                true
            })
            .unwrap();
        assert_eq!(timestamps, vec![200, 100]);
    }
}
