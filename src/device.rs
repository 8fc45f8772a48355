//! The polymorphic download-side entity.
//!
//! Each family module implements [`Device`] on top of an [`IoStream`],
//! sharing the fingerprint/cancellation/event plumbing in [`DeviceBase`].

pub mod atomics_cobalt;
pub mod citizen_aqualand;
pub mod cochran_commander;
pub mod cressi_edy;
pub mod cressi_leonardo;
pub mod diverite_nitekq;
pub mod divesystem_idive;
pub mod hw_frog;
pub mod hw_ostc;
pub mod hw_ostc3;
pub(crate) mod mares_common;
pub mod mares_darwin;
pub mod mares_iconhd;
pub mod mares_nemo;
pub mod mares_puck;
pub mod oceanic_atom2;
pub(crate) mod oceanic_common;
pub mod oceanic_veo250;
pub mod oceanic_vtpro;
pub mod reefnet_sensus;
pub mod reefnet_sensuspro;
pub mod reefnet_sensusultra;
pub(crate) mod shearwater_common;
pub mod shearwater_petrel;
pub mod shearwater_predator;
pub(crate) mod suunto_common2;
pub mod suunto_d9;
pub mod suunto_eon;
pub mod suunto_eonsteel;
pub mod suunto_solution;
pub mod suunto_vyper;
pub mod suunto_vyper2;
pub mod uwatec_aladin;
pub mod uwatec_memomouse;
pub mod uwatec_smart;
pub mod zeagle_n2ition3;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::common::Family;
use crate::context::{ClockSync, Context, DevInfo, Event};
use crate::error::{Error, Result};

/// One dive as it comes off the wire, before any parsing.
///
/// Both slices borrow from the downloader's buffers and are only valid for
/// the duration of the callback.
#[derive(Debug, Clone, Copy)]
pub struct RawDive<'a> {
    pub data: &'a [u8],
    pub fingerprint: &'a [u8],
}

/// Iteration callback for [`Device::foreach`]. Returning `false` stops the
/// enumeration early, which is a success, not an error.
pub type DiveCallback<'a> = &'a mut dyn FnMut(RawDive<'_>) -> bool;

/// Cloneable cancellation handle. Setting it makes the owning device fail
/// with [`Error::Cancelled`] at its next protocol turn.
#[derive(Debug, Clone, Default)]
pub struct Canceller(Arc<AtomicBool>);

impl Canceller {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// An open communication session with one physical dive computer.
pub trait Device {
    fn family(&self) -> Family;

    /// Identity, once the open/identify exchange has reported it.
    fn devinfo(&self) -> Option<DevInfo>;

    /// Device clock snapshot, for families that expose one.
    fn clock(&self) -> Option<ClockSync> {
        None
    }

    fn canceller(&self) -> Canceller;

    /// Remember the fingerprint of the newest already-archived dive. An
    /// empty slice clears it; any other length must match the family's
    /// fingerprint size.
    fn set_fingerprint(&mut self, fingerprint: &[u8]) -> Result<()>;

    fn read(&mut self, _address: u32, _buf: &mut [u8]) -> Result<()> {
        Err(Error::Unsupported)
    }

    fn write(&mut self, _address: u32, _data: &[u8]) -> Result<()> {
        Err(Error::Unsupported)
    }

    /// Append the entire memory image to `buffer`.
    fn dump(&mut self, _buffer: &mut Vec<u8>) -> Result<()> {
        Err(Error::Unsupported)
    }

    /// Enumerate dives newest-first, stopping at the stored fingerprint.
    fn foreach(&mut self, callback: DiveCallback<'_>) -> Result<()>;

    /// Release the transport, sending the family's exit sequence where the
    /// protocol requires one.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// State shared by every family backend.
#[derive(Debug)]
pub(crate) struct DeviceBase {
    pub(crate) context: Context,
    family: Family,
    fingerprint: Vec<u8>,
    cancel: Canceller,
    devinfo: Option<DevInfo>,
    clock: Option<ClockSync>,
}

impl DeviceBase {
    pub(crate) fn new(context: &Context, family: Family) -> Self {
        Self {
            context: context.clone(),
            family,
            fingerprint: Vec::new(),
            cancel: Canceller::default(),
            devinfo: None,
            clock: None,
        }
    }

    pub(crate) fn family(&self) -> Family {
        self.family
    }

    pub(crate) fn devinfo(&self) -> Option<DevInfo> {
        self.devinfo
    }

    pub(crate) fn clock(&self) -> Option<ClockSync> {
        self.clock
    }

    pub(crate) fn canceller(&self) -> Canceller {
        self.cancel.clone()
    }

    /// Consulted before every protocol turn.
    pub(crate) fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }

    pub(crate) fn set_fingerprint(&mut self, fingerprint: &[u8], expected: usize) -> Result<()> {
        if !fingerprint.is_empty() && fingerprint.len() != expected {
            return Err(Error::InvalidArgs("fingerprint length"));
        }
        self.fingerprint = fingerprint.to_vec();
        Ok(())
    }

    pub(crate) fn fingerprint(&self) -> &[u8] {
        &self.fingerprint
    }

    /// True when `candidate` matches the stored fingerprint, which halts
    /// further enumeration.
    pub(crate) fn fingerprint_reached(&self, candidate: &[u8]) -> bool {
        !self.fingerprint.is_empty() && self.fingerprint == candidate
    }

    pub(crate) fn emit_waiting(&self) {
        self.context.emit(&Event::Waiting);
    }

    pub(crate) fn emit_vendor(&self, data: &[u8]) {
        self.context.emit(&Event::Vendor(data));
    }

    /// Record identity and report it; only the first call per session
    /// reaches the event sink.
    pub(crate) fn set_devinfo(&mut self, devinfo: DevInfo) {
        if self.devinfo.is_none() {
            log::info!(
                "{}: model={:#06x} firmware={:#x} serial={}",
                self.family,
                devinfo.model,
                devinfo.firmware,
                devinfo.serial
            );
            self.context.emit(&Event::DevInfo(devinfo));
        }
        self.devinfo = Some(devinfo);
    }

    pub(crate) fn set_clock(&mut self, devtime: u32) {
        let clock = ClockSync {
            systime: jiff::Timestamp::now(),
            devtime,
        };
        if self.clock.is_none() {
            self.context.emit(&Event::Clock(clock));
        }
        self.clock = Some(clock);
    }
}

/// Progress accounting for one `foreach`/`dump` session.
///
/// Events are monotone non-decreasing; the maximum starts provisional and
/// may be refined exactly once, after the header scan has sized the real
/// transfer.
#[derive(Debug)]
pub(crate) struct Progress {
    current: u32,
    maximum: u32,
    refined: bool,
}

impl Progress {
    pub(crate) fn new(maximum: u32) -> Self {
        Self {
            current: 0,
            maximum,
            refined: false,
        }
    }

    pub(crate) fn refine_maximum(&mut self, base: &DeviceBase, maximum: u32) {
        if self.refined {
            return;
        }
        self.refined = true;
        self.maximum = maximum.max(self.current);
        self.emit(base);
    }

    pub(crate) fn advance(&mut self, base: &DeviceBase, delta: u32) {
        self.set(base, self.current.saturating_add(delta));
    }

    pub(crate) fn set(&mut self, base: &DeviceBase, current: u32) {
        if current > self.current {
            self.current = current.min(self.maximum);
            self.emit(base);
        }
    }

    pub(crate) fn finish(&mut self, base: &DeviceBase) {
        self.set(base, self.maximum);
    }

    fn emit(&self, base: &DeviceBase) {
        base.context.emit(&Event::Progress {
            current: self.current,
            maximum: self.maximum,
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;
    use crate::context::EventMask;

    #[test]
    fn test_fingerprint_length_policy() {
        let context = Context::new();
        let mut base = DeviceBase::new(&context, Family::SuuntoVyper);

        assert!(base.set_fingerprint(&[1, 2, 3, 4, 5], 5).is_ok());
        assert!(base.fingerprint_reached(&[1, 2, 3, 4, 5]));
        assert!(!base.fingerprint_reached(&[1, 2, 3, 4, 6]));

        assert!(matches!(
            base.set_fingerprint(&[1, 2], 5),
            Err(Error::InvalidArgs(_))
        ));

        // Empty clears; nothing matches an empty fingerprint.
        base.set_fingerprint(&[], 5).unwrap();
        assert!(!base.fingerprint_reached(&[]));
    }

    #[test]
    fn test_progress_is_monotone_and_refined_once() {
        let context = Context::new();
        let (tx, rx) = mpsc::channel();
        context.set_event_handler(EventMask::PROGRESS, move |event| {
            if let Event::Progress { current, maximum } = event {
                tx.send((*current, *maximum)).unwrap();
            }
        });

        let base = DeviceBase::new(&context, Family::HwFrog);
        let mut progress = Progress::new(1000);
        progress.set(&base, 100);
        progress.set(&base, 50); // ignored, would regress
        progress.refine_maximum(&base, 400);
        progress.refine_maximum(&base, 900); // ignored, refined already
        progress.advance(&base, 200);
        progress.finish(&base);

        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events, vec![(100, 1000), (100, 400), (300, 400), (400, 400)]);
        let mut last = 0;
        for (current, _) in events {
            assert!(current >= last);
            last = current;
        }
    }

    #[test]
    fn test_canceller_trips_base() {
        let context = Context::new();
        let base = DeviceBase::new(&context, Family::AtomicsCobalt);
        assert!(base.check_cancelled().is_ok());
        base.canceller().cancel();
        assert!(matches!(base.check_cancelled(), Err(Error::Cancelled)));
    }
}
