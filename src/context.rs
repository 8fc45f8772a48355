use std::fmt::Display;
use std::sync::{Arc, Mutex};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Device identity, reported once per session as soon as it is known.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevInfo {
    pub model: u32,
    pub firmware: u32,
    pub serial: u32,
}

/// Host/device clock pair captured at the same instant, for families that
/// expose a device clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockSync {
    pub systime: jiff::Timestamp,
    pub devtime: u32,
}

/// Events emitted by device code during `foreach` and `dump`.
#[derive(Debug, Clone, PartialEq)]
pub enum Event<'a> {
    /// Polling for the device signature; the user may need to press a
    /// button on the computer.
    Waiting,
    /// Monotone non-decreasing within a session. The maximum is provisional
    /// until the headers have been scanned and is refined exactly once.
    Progress { current: u32, maximum: u32 },
    DevInfo(DevInfo),
    Clock(ClockSync),
    /// Raw vendor diagnostic bytes, borrowed from the protocol buffer.
    Vendor(&'a [u8]),
}

bitflags! {
    /// Which events a registered handler wants to see.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EventMask: u32 {
        const WAITING  = 1 << 0;
        const PROGRESS = 1 << 1;
        const DEVINFO  = 1 << 2;
        const CLOCK    = 1 << 3;
        const VENDOR   = 1 << 4;
    }
}

impl Event<'_> {
    fn mask(&self) -> EventMask {
        match self {
            Event::Waiting => EventMask::WAITING,
            Event::Progress { .. } => EventMask::PROGRESS,
            Event::DevInfo(_) => EventMask::DEVINFO,
            Event::Clock(_) => EventMask::CLOCK,
            Event::Vendor(_) => EventMask::VENDOR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub enum LogLevel {
    None = 0,
    Error,
    Warning,
    Info,
    Debug,
    All,
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, ""),
            Self::Error => write!(f, "Error"),
            Self::Warning => write!(f, "Warning"),
            Self::Info => write!(f, "Info"),
            Self::Debug => write!(f, "Debug"),
            Self::All => write!(f, "All"),
        }
    }
}

type EventHandler = Box<dyn FnMut(&Event<'_>) + Send>;

struct ContextInner {
    loglevel: Mutex<LogLevel>,
    handler: Mutex<Option<(EventMask, EventHandler)>>,
}

/// Shared library state: the log filter and the event sink.
///
/// A `Context` is cheap to clone and may be shared between devices; each
/// clone refers to the same sink. Log records go through the `log` facade,
/// gated by the context's level.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            inner: Arc::new(ContextInner {
                loglevel: Mutex::new(LogLevel::Warning),
                handler: Mutex::new(None),
            }),
        }
    }
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_loglevel(&self, loglevel: LogLevel) {
        if let Ok(mut level) = self.inner.loglevel.lock() {
            *level = loglevel;
        }
    }

    pub(crate) fn log_enabled(&self, level: LogLevel) -> bool {
        self.inner
            .loglevel
            .lock()
            .map(|current| *current >= level)
            .unwrap_or(false)
    }

    /// Register the event sink. Only events selected by `mask` are
    /// delivered; registering again replaces the previous handler.
    pub fn set_event_handler<F>(&self, mask: EventMask, handler: F)
    where
        F: FnMut(&Event<'_>) + Send + 'static,
    {
        if let Ok(mut slot) = self.inner.handler.lock() {
            *slot = Some((mask, Box::new(handler)));
        }
    }

    pub(crate) fn emit(&self, event: &Event<'_>) {
        if let Ok(mut slot) = self.inner.handler.lock()
            && let Some((mask, handler)) = slot.as_mut()
            && mask.contains(event.mask())
        {
            handler(event);
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context").finish_non_exhaustive()
    }
}
