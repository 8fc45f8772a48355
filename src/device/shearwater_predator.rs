//! Shearwater Predator downloader. No manifest on this model: the whole
//! dive log region comes down and dives are cut apart by their opening
//! (`0xFFFF`) and final (`0xFFFD`) records.

use crate::bytes;
use crate::common::Family;
use crate::context::{Context, DevInfo};
use crate::device::shearwater_common::ShearwaterCommon;
use crate::device::{Canceller, Device, DeviceBase, DiveCallback, Progress, RawDive};
use crate::error::{Error, Result};
use crate::iostream::IoStream;

const ADDR_LOG: u32 = 0x0000;
const SZ_LOG: u32 = 0x8000;

/// Every record in the log is this size.
pub(crate) const SZ_RECORD: usize = 16;

pub(crate) const FP_SIZE: usize = 4;
const FP_OFFSET: usize = 4;

pub struct PredatorDevice {
    inner: ShearwaterCommon,
}

impl PredatorDevice {
    pub fn open(context: &Context, stream: Box<dyn IoStream>) -> Result<Self> {
        Ok(Self {
            inner: ShearwaterCommon::open(context, stream, Family::ShearwaterPredator)?,
        })
    }
}

/// Cut the log region into dives, newest first.
pub(crate) fn extract_dives(
    base: &DeviceBase,
    image: &[u8],
    callback: DiveCallback<'_>,
) -> Result<()> {
    let mut dives = Vec::new();
    let mut start = None;
    for (i, record) in image.chunks_exact(SZ_RECORD).enumerate() {
        match bytes::u16_be(record) {
            0xFFFF => {
                start = Some(i * SZ_RECORD);
            }
            // The final record closes the dive.
            0xFFFD => {
                if let Some(begin) = start.take() {
                    dives.push(&image[begin..(i + 1) * SZ_RECORD]);
                }
            }
            _ => {}
        }
    }

    for &dive in dives.iter().rev() {
        if dive.len() < FP_OFFSET + FP_SIZE {
            return Err(Error::DataFormat("dive shorter than its fingerprint"));
        }
        let fingerprint = &dive[FP_OFFSET..FP_OFFSET + FP_SIZE];
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

impl Device for PredatorDevice {
    fn family(&self) -> Family {
        self.inner.family()
    }

    fn devinfo(&self) -> Option<DevInfo> {
        self.inner.base.devinfo()
    }

    fn canceller(&self) -> Canceller {
        self.inner.base.canceller()
    }

    fn set_fingerprint(&mut self, fingerprint: &[u8]) -> Result<()> {
        self.inner.base.set_fingerprint(fingerprint, FP_SIZE)
    }

    fn dump(&mut self, buffer: &mut Vec<u8>) -> Result<()> {
        let mut progress = Progress::new(SZ_LOG);
        let data = self.inner.download(ADDR_LOG, SZ_LOG, &mut progress)?;
        buffer.extend_from_slice(&data);
        Ok(())
    }

    fn foreach(&mut self, callback: DiveCallback<'_>) -> Result<()> {
        let mut progress = Progress::new(SZ_LOG);
        let image = self.inner.download(ADDR_LOG, SZ_LOG, &mut progress)?;
        extract_dives(&self.inner.base, &image, callback)
    }
}
