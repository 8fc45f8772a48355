//! Heinrichs Weikamp OSTC (Mk1/Mk2/2N) downloader. One command pulls the
//! whole dive journal; dives are framed by `0xFA 0xFA … 0xFB 0xFB …
//! 0xFD 0xFD` markers inside the image.

use crate::bytes;
use crate::common::Family;
use crate::context::{Context, DevInfo};
use crate::device::{Canceller, Device, DeviceBase, DiveCallback, Progress, RawDive};
use crate::error::{Error, Result};
use crate::iostream::{Direction, FlowControl, IoStream, LineParams, Parity, StopBits, Timeout};

const CMD_DOWNLOAD: u8 = 0x61; // 'a'
const CMD_IDENTITY: u8 = 0x65; // 'e'

pub(crate) const HDR_BEGIN: [u8; 2] = [0xFA, 0xFA];
pub(crate) const HDR_END: [u8; 2] = [0xFB, 0xFB];
pub(crate) const PROFILE_END: [u8; 2] = [0xFD, 0xFD];

/// Header length between the begin and end markers.
pub(crate) const SZ_HEADER: usize = 45;

pub(crate) const FP_SIZE: usize = 5;

pub struct OstcDevice {
    base: DeviceBase,
    stream: Box<dyn IoStream>,
}

impl OstcDevice {
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
            base: DeviceBase::new(context, Family::HwOstc),
            stream,
        };
        device.identify()?;
        Ok(device)
    }

    fn identify(&mut self) -> Result<()> {
        self.base.check_cancelled()?;
        self.stream.write_all(&[CMD_IDENTITY])?;
        let mut identity = [0u8; 6];
        self.stream.read_exact(&mut identity)?;
        self.base.set_devinfo(DevInfo {
            model: identity[0] as u32,
            firmware: bytes::u16_be(&identity[1..3]) as u32,
            serial: bytes::u16_le(&identity[3..5]) as u32,
        });
        Ok(())
    }

    fn download(&mut self, buffer: &mut Vec<u8>) -> Result<()> {
        self.base.check_cancelled()?;
        self.stream.purge(Direction::Input)?;
        self.stream.write_all(&[CMD_DOWNLOAD])?;

        let mut length = [0u8; 2];
        self.stream.read_exact(&mut length)?;
        let len = bytes::u16_le(&length) as usize;

        let mut progress = Progress::new(len as u32);
        let start = buffer.len();
        buffer.resize(start + len, 0);
        let mut offset = 0;
        while offset < len {
            let chunk = (len - offset).min(0x400);
            self.stream
                .read_exact(&mut buffer[start + offset..start + offset + chunk])?;
            offset += chunk;
            progress.set(&self.base, offset as u32);
        }
        Ok(())
    }
}

/// Split a journal image into `[header][profile]` dives, newest first.
pub(crate) fn extract_dives(
    base: &DeviceBase,
    image: &[u8],
    callback: DiveCallback<'_>,
) -> Result<()> {
    let mut dives = Vec::new();
    let mut offset = 0;
    while offset + 2 <= image.len() {
        if image[offset..offset + 2] != HDR_BEGIN {
            return Err(Error::DataFormat("missing dive begin marker"));
        }
        let header_end = offset + 2 + SZ_HEADER;
        if header_end + 2 > image.len() || image[header_end..header_end + 2] != HDR_END {
            return Err(Error::DataFormat("missing header end marker"));
        }
        let mut cursor = header_end + 2;
        loop {
            if cursor + 2 > image.len() {
                return Err(Error::DataFormat("missing profile end marker"));
            }
            if image[cursor..cursor + 2] == PROFILE_END {
                break;
            }
            cursor += 1;
        }
        dives.push(&image[offset..cursor + 2]);
        offset = cursor + 2;
    }

    // The journal stores dives oldest first.
    for &dive in dives.iter().rev() {
        let fingerprint = &dive[2..2 + FP_SIZE];
        if base.fingerprint_reached(fingerprint) {
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

impl Device for OstcDevice {
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
        self.download(buffer)
    }

    fn foreach(&mut self, callback: DiveCallback<'_>) -> Result<()> {
        let mut image = Vec::new();
        self.download(&mut image)?;
        extract_dives(&self.base, &image, callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakePort;

    pub(crate) fn build_dive(day: u8, profile: &[u8]) -> Vec<u8> {
        let mut dive = HDR_BEGIN.to_vec();
        let mut header = vec![0u8; SZ_HEADER];
        header[0] = day;
        header[1] = 6;
        header[2] = 15; // 2015
        header[10] = 10; // interval
        header[11] = 1; // one gas
        header[12] = 21;
        dive.extend_from_slice(&header);
        dive.extend_from_slice(&HDR_END);
        dive.extend_from_slice(profile);
        dive.extend_from_slice(&PROFILE_END);
        dive
    }

    #[test]
    fn test_journal_split_newest_first() {
        let mut image = build_dive(1, &[0x10, 0x00, 0x00]);
        image.extend_from_slice(&build_dive(2, &[0x20, 0x00, 0x00]));

        let mut port = FakePort::new();
        let mut response = vec![0u8; 6]; // identity
        response[0] = 0x20;
        port.expect(&[CMD_IDENTITY], &response);
        let mut download = (image.len() as u16).to_le_bytes().to_vec();
        download.extend_from_slice(&image);
        port.expect(&[CMD_DOWNLOAD], &download);

        let context = Context::new();
        let mut device = OstcDevice::open(&context, Box::new(port)).unwrap();

        let mut days = Vec::new();
        device
            .foreach(&mut |raw| {
                days.push(raw.data[2]);
                true
            })
            .unwrap();
        assert_eq!(days, vec![2, 1]);
    }
}
