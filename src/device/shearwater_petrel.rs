//! Shearwater Petrel downloader. Newer firmware keeps a manifest of dive
//! records, so each dive is fetched individually instead of carving up a
//! full log download.

use crate::bytes;
use crate::common::Family;
use crate::context::{Context, DevInfo};
use crate::device::shearwater_common::ShearwaterCommon;
use crate::device::{Canceller, Device, DiveCallback, Progress, RawDive};
use crate::error::{Error, Result};
use crate::iostream::IoStream;

const ADDR_MANIFEST: u32 = 0xE00000;
const SZ_MANIFEST: u32 = 0x600;
const SZ_ENTRY: usize = 0x20;

/// Marker of a populated manifest slot.
const RECORD_VALID: u16 = 0xA5C4;

pub(crate) const FP_SIZE: usize = 4;

pub struct PetrelDevice {
    inner: ShearwaterCommon,
}

impl PetrelDevice {
    pub fn open(context: &Context, stream: Box<dyn IoStream>) -> Result<Self> {
        Ok(Self {
            inner: ShearwaterCommon::open(context, stream, Family::ShearwaterPetrel)?,
        })
    }
}

impl Device for PetrelDevice {
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

    fn foreach(&mut self, callback: DiveCallback<'_>) -> Result<()> {
        let mut progress = Progress::new(SZ_MANIFEST);
        let manifest = self
            .inner
            .download(ADDR_MANIFEST, SZ_MANIFEST, &mut progress)?;

        // Manifest slots are newest first; collect until the first
        // unused one.
        let mut entries = Vec::new();
        let mut total = SZ_MANIFEST;
        for entry in manifest.chunks_exact(SZ_ENTRY) {
            if bytes::u16_be(entry) != RECORD_VALID {
                break;
            }
            let timestamp = entry[4..8].to_vec();
            let address = bytes::u32_be(&entry[8..12]);
            let size = bytes::u32_be(&entry[12..16]);
            if size == 0 {
                return Err(Error::DataFormat("manifest entry without a size"));
            }
            total += size;
            entries.push((timestamp, address, size));
        }
        progress.refine_maximum(&self.inner.base, total);

        for (timestamp, address, size) in entries {
            if self.inner.base.fingerprint_reached(&timestamp) {
                break;
            }
            let dive = self.inner.download(address, size, &mut progress)?;
            if !callback(RawDive {
                data: &dive,
                fingerprint: &timestamp,
            }) {
                return Ok(());
            }
        }
        progress.finish(&self.inner.base);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::shearwater_common::tests::{script_download, script_identify};
    use crate::testing::FakePort;

    #[test]
    fn test_manifest_driven_download() {
        let mut manifest = vec![0u8; SZ_MANIFEST as usize];
        let dive = vec![0xABu8; 48];
        {
            let entry = &mut manifest[..SZ_ENTRY];
            entry[0..2].copy_from_slice(&RECORD_VALID.to_be_bytes());
            entry[2..4].copy_from_slice(&42u16.to_be_bytes());
            entry[4..8].copy_from_slice(&0x5050_0001u32.to_be_bytes());
            entry[8..12].copy_from_slice(&0x00A000u32.to_be_bytes());
            entry[12..16].copy_from_slice(&(dive.len() as u32).to_be_bytes());
        }

        let mut port = FakePort::new();
        script_identify(&mut port, 0x03);
        script_download(&mut port, ADDR_MANIFEST, &manifest);
        script_download(&mut port, 0x00A000, &dive);

        let context = Context::new();
        let mut device = PetrelDevice::open(&context, Box::new(port)).unwrap();

        let mut fingerprints = Vec::new();
        device
            .foreach(&mut |raw| {
                assert_eq!(raw.data, &dive[..]);
                fingerprints.push(raw.fingerprint.to_vec());
                true
            })
            .unwrap();
        assert_eq!(fingerprints, vec![0x5050_0001u32.to_be_bytes().to_vec()]);
    }

    #[test]
    fn test_fingerprint_skips_download_entirely() {
        let mut manifest = vec![0u8; SZ_MANIFEST as usize];
        {
            let entry = &mut manifest[..SZ_ENTRY];
            entry[0..2].copy_from_slice(&RECORD_VALID.to_be_bytes());
            entry[4..8].copy_from_slice(&0x5050_0001u32.to_be_bytes());
            entry[8..12].copy_from_slice(&0x00A000u32.to_be_bytes());
            entry[12..16].copy_from_slice(&48u32.to_be_bytes());
        }

        let mut port = FakePort::new();
        script_identify(&mut port, 0x03);
        script_download(&mut port, ADDR_MANIFEST, &manifest);
        // No dive download is scripted: reaching for one would fail.

        let context = Context::new();
        let mut device = PetrelDevice::open(&context, Box::new(port)).unwrap();
        device
            .set_fingerprint(&0x5050_0001u32.to_be_bytes())
            .unwrap();

        let mut calls = 0;
        device
            .foreach(&mut |_| {
                calls += 1;
                true
            })
            .unwrap();
        assert_eq!(calls, 0);
    }
}
