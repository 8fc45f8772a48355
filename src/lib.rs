//! Native download and parsing library for consumer dive computers.
//!
//! The crate talks to dive computers from many vendors over a caller
//! supplied byte transport, downloads their stored dive logs, and decodes
//! each vendor's binary blobs into a common canonical record: dive-level
//! [`Field`]s plus a time-ordered [`Sample`] stream.
//!
//! The two polymorphic entry points are [`Device`] (the download side,
//! opened per family from the modules under [`device`]) and [`Parser`]
//! (the decode side, usually obtained through [`parser::for_device`]).
//! Transports implement [`IoStream`]; progress, identity and clock events
//! arrive through the shared [`Context`].

mod bytes;
mod checksum;
mod common;
mod context;
pub mod device;
pub mod error;
pub mod iostream;
pub mod parser;
mod ringbuffer;
#[cfg(test)]
pub(crate) mod testing;
mod version;

pub use crate::bytes::{bytes_to_hex, hex_string_to_bytes};
pub use crate::common::Family;
pub use crate::context::{ClockSync, Context, DevInfo, Event, EventMask, LogLevel};
pub use crate::device::{Canceller, Device, DiveCallback, RawDive};
pub use crate::error::{Error, Result};
pub use crate::iostream::{
    Direction, FlowControl, IoStream, Line, LineParams, Parity, StopBits, Timeout,
};
pub use crate::parser::{
    Deco, DecoKind, DiveMode, EventFlags, EventKind, Field, FieldString, FieldType, Fingerprint,
    Gasmix, Parser, Salinity, Sample, SampleCallback, SampleEvent, Tank, TankKind, Water,
};
pub use crate::version::version;
