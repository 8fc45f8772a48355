//! Heinrichs Weikamp Frog downloader. Same echo/ready discipline and
//! header array as the OSTC3, without the service and firmware machinery.

use crate::bytes;
use crate::common::Family;
use crate::context::{Context, DevInfo};
use crate::device::hw_ostc3::{
    EXIT, FP_SIZE, HDR_PROFILE_LEN, INIT, NUM_HEADERS, READY, SZ_HEADER, scan_headers,
};
use crate::device::{Canceller, Device, DeviceBase, DiveCallback, Progress, RawDive};
use crate::error::{Error, Result};
use crate::iostream::{Direction, FlowControl, IoStream, LineParams, Parity, StopBits, Timeout};

const CMD_IDENTITY: u8 = 0x69;
const CMD_HEADERS: u8 = 0x61;
const CMD_DIVE: u8 = 0x66;

pub struct FrogDevice {
    base: DeviceBase,
    stream: Box<dyn IoStream>,
    started: bool,
}

impl FrogDevice {
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

        Ok(Self {
            base: DeviceBase::new(context, Family::HwFrog),
            stream,
            started: false,
        })
    }

    fn transfer(&mut self, cmd: u8, params: &[u8], answer: &mut [u8]) -> Result<()> {
        self.base.check_cancelled()?;

        self.stream.write_all(&[cmd])?;
        let mut echo = [0u8; 1];
        self.stream.read_exact(&mut echo)?;
        if echo[0] != cmd {
            return Err(Error::Protocol("command echo mismatch"));
        }

        if !params.is_empty() {
            self.stream.write_all(params)?;
        }
        if !answer.is_empty() {
            self.stream.read_exact(answer)?;
        }

        if cmd != EXIT {
            let mut ready = [0u8; 1];
            self.stream.read_exact(&mut ready)?;
            if ready[0] != READY {
                return Err(Error::Protocol("missing ready byte"));
            }
        }
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        self.transfer(INIT, &[], &mut [])?;
        self.started = true;

        let mut identity = [0u8; 16];
        self.transfer(CMD_IDENTITY, &[], &mut identity)?;
        self.base.set_devinfo(DevInfo {
            model: identity[0] as u32,
            firmware: bytes::u16_be(&identity[2..4]) as u32,
            serial: bytes::u16_le(&identity[4..6]) as u32,
        });
        Ok(())
    }
}

impl Device for FrogDevice {
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

    fn foreach(&mut self, callback: DiveCallback<'_>) -> Result<()> {
        self.start()?;

        let mut headers = vec![0u8; NUM_HEADERS * SZ_HEADER];
        let mut progress = Progress::new((NUM_HEADERS * SZ_HEADER) as u32);
        self.transfer(CMD_HEADERS, &[], &mut headers)?;
        let (latest, count) = scan_headers(&headers)?;

        let mut slots = Vec::with_capacity(count);
        let mut total = 0u32;
        let mut slot = latest;
        for _ in 0..count {
            let header = &headers[slot * SZ_HEADER..(slot + 1) * SZ_HEADER];
            if !bytes::is_all(&header[..2], 0xFF) {
                let profile_len = bytes::u24_le(&header[HDR_PROFILE_LEN..]);
                slots.push((slot, profile_len));
                total += SZ_HEADER as u32 + profile_len;
            }
            slot = (slot + NUM_HEADERS - 1) % NUM_HEADERS;
        }
        progress.refine_maximum(&self.base, total);

        for (slot, profile_len) in slots {
            self.base.check_cancelled()?;
            let header = headers[slot * SZ_HEADER..(slot + 1) * SZ_HEADER].to_vec();
            let fingerprint = &header[..FP_SIZE];
            if self.base.fingerprint_reached(fingerprint) {
                break;
            }

            let mut dive = vec![0u8; SZ_HEADER + profile_len as usize];
            self.transfer(CMD_DIVE, &[slot as u8], &mut dive)?;
            progress.advance(&self.base, SZ_HEADER as u32 + profile_len);

            if dive[..SZ_HEADER] != header[..] {
                return Err(Error::DataFormat("profile header disagrees with logbook"));
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

    fn close(&mut self) -> Result<()> {
        if self.started {
            self.transfer(EXIT, &[], &mut [])?;
            self.started = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Event, EventMask};
    use crate::device::hw_ostc3::tests::build_headers;
    use crate::testing::FakePort;
    use std::sync::mpsc;

    fn identity_answer() -> Vec<u8> {
        let mut identity = vec![0u8; 16];
        identity[0] = 0x0B;
        identity[2..4].copy_from_slice(&[0x00, 0x6E]);
        identity[4..6].copy_from_slice(&0x0099u16.to_le_bytes());
        identity
    }

    fn expect_cmd(port: &mut FakePort, cmd: u8, params: &[u8], answer: &[u8]) {
        if params.is_empty() {
            let mut response = vec![cmd];
            response.extend_from_slice(answer);
            response.push(READY);
            port.expect(&[cmd], &response);
        } else {
            port.expect(&[cmd], &[cmd]);
            let mut response = answer.to_vec();
            response.push(READY);
            port.expect(params, &response);
        }
    }

    #[test]
    fn test_header_scan_orders_slots_backward() {
        // Slot 3 carries internal number 0x0007, slot 2 number 0x0005:
        // latest = 3, count = 2, download order [3, 2].
        let headers = build_headers(&[(2, 0x0005), (3, 0x0007)]);

        let mut port = FakePort::new();
        expect_cmd(&mut port, INIT, &[], &[]);
        expect_cmd(&mut port, CMD_IDENTITY, &[], &identity_answer());
        expect_cmd(&mut port, CMD_HEADERS, &[], &headers);
        expect_cmd(&mut port, CMD_DIVE, &[3], &headers[3 * SZ_HEADER..4 * SZ_HEADER]);
        expect_cmd(&mut port, CMD_DIVE, &[2], &headers[2 * SZ_HEADER..3 * SZ_HEADER]);

        let context = Context::new();
        let (tx, rx) = mpsc::channel();
        context.set_event_handler(EventMask::PROGRESS, move |event| {
            if let Event::Progress { current, maximum } = event {
                tx.send((*current, *maximum)).unwrap();
            }
        });

        let mut device = FrogDevice::open(&context, Box::new(port)).unwrap();
        let mut order = Vec::new();
        device
            .foreach(&mut |raw| {
                order.push(raw.data[3]);
                true
            })
            .unwrap();
        assert_eq!(order, vec![3, 2]);

        // The provisional maximum is refined once to the aggregated size.
        let events: Vec<_> = rx.try_iter().collect();
        assert!(events.iter().all(|&(_, max)| max == 2 * SZ_HEADER as u32));
        assert_eq!(events.last(), Some(&(2 * SZ_HEADER as u32, 2 * SZ_HEADER as u32)));
    }
}
