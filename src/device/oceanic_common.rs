//! Shared download template for the Oceanic-style computers (VT Pro,
//! VEO250, Atom 2 and their many OEM badges).
//!
//! Memory holds two rings: a logbook of fixed-size entries and a profile
//! region addressed by begin/end pointers inside each entry. The whole
//! logbook entry doubles as the dive fingerprint; a downloaded dive is the
//! entry followed by its profile window.

use crate::bytes;
use crate::device::{DeviceBase, DiveCallback, Progress, RawDive};
use crate::error::Result;
use crate::ringbuffer::{Overlap, Ring};

/// Byte offsets of the profile begin/end pointers inside a logbook entry.
const ENTRY_PROFILE_BEGIN: usize = 0x0C;
const ENTRY_PROFILE_END: usize = 0x0E;

#[derive(Debug, Clone, Copy)]
pub(crate) struct OceanicLayout {
    pub memsize: u32,
    /// Page holding the logbook write pointer.
    pub cf_pointers: u32,
    pub rb_logbook: Ring,
    pub rb_profile: Ring,
    pub entry_size: u32,
}

/// The family-specific page protocol underneath the shared walker.
pub(crate) trait OceanicProtocol {
    fn base(&mut self) -> &mut DeviceBase;
    fn read_bytes(&mut self, address: u32, buf: &mut [u8]) -> Result<()>;
}

fn read_window<P: OceanicProtocol>(
    device: &mut P,
    ring: &Ring,
    begin: u32,
    len: u32,
) -> Result<Vec<u8>> {
    let mut out = vec![0u8; len as usize];
    let linear = (ring.end - begin).min(len);
    device.read_bytes(begin, &mut out[..linear as usize])?;
    if linear < len {
        device.read_bytes(ring.begin, &mut out[linear as usize..])?;
    }
    Ok(out)
}

pub(crate) fn foreach<P: OceanicProtocol>(
    device: &mut P,
    layout: &OceanicLayout,
    callback: DiveCallback<'_>,
) -> Result<()> {
    let mut progress = Progress::new(layout.rb_profile.size() + layout.rb_logbook.size());

    let mut pointers = vec![0u8; 16];
    device.read_bytes(layout.cf_pointers, &mut pointers)?;
    let last = layout
        .rb_logbook
        .check(bytes::u16_le(&pointers[0..2]) as u32)?;

    // Walk logbook entries backward from the write pointer, collecting the
    // profile windows until an unused (all 0xFF) slot turns up.
    let max_entries = layout.rb_logbook.size() / layout.entry_size;
    let mut dives = Vec::new();
    let mut total = 0u32;
    let mut current = last;
    for _ in 0..max_entries {
        device.base().check_cancelled()?;
        current = layout.rb_logbook.decrement(current, layout.entry_size);
        let entry = read_window(device, &layout.rb_logbook, current, layout.entry_size)?;
        if bytes::is_all(&entry, 0xFF) {
            break;
        }

        let begin = layout
            .rb_profile
            .check(bytes::u16_le(&entry[ENTRY_PROFILE_BEGIN..]) as u32)?;
        let end = layout
            .rb_profile
            .check(bytes::u16_le(&entry[ENTRY_PROFILE_END..]) as u32)?;
        let len = layout.rb_profile.distance(begin, end, Overlap::Empty);

        if total + len > layout.rb_profile.size() {
            // Older profiles have been overwritten; stop the walk here.
            break;
        }
        total += len;
        dives.push((entry, begin, len));
    }
    let entries = dives.len() as u32 * layout.entry_size;
    progress.refine_maximum(device.base(), total + entries);

    for (entry, begin, len) in dives {
        device.base().check_cancelled()?;
        let profile = read_window(device, &layout.rb_profile, begin, len)?;
        progress.advance(device.base(), len + layout.entry_size);

        if device.base().fingerprint_reached(&entry) {
            break;
        }
        let mut dive = entry.clone();
        dive.extend_from_slice(&profile);
        if !callback(RawDive {
            data: &dive,
            fingerprint: &entry,
        }) {
            return Ok(());
        }
    }
    progress.finish(device.base());
    Ok(())
}

pub(crate) fn dump<P: OceanicProtocol>(
    device: &mut P,
    layout: &OceanicLayout,
    buffer: &mut Vec<u8>,
) -> Result<()> {
    let mut progress = Progress::new(layout.memsize);
    let start = buffer.len();
    buffer.resize(start + layout.memsize as usize, 0);
    let mut offset = 0u32;
    while offset < layout.memsize {
        let chunk = (layout.memsize - offset).min(0x10);
        device.read_bytes(
            offset,
            &mut buffer[start + offset as usize..start + (offset + chunk) as usize],
        )?;
        offset += chunk;
        progress.set(device.base(), offset);
    }
    Ok(())
}
