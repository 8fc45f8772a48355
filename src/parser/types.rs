use std::fmt::{self, Display};

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::bytes::{bytes_to_hex, hex_string_to_bytes};

/// Opaque vendor-extracted dive identifier used to short-circuit
/// redownload. Length is family-specific, typically 4 to 16 bytes.
#[derive(Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    data: Vec<u8>,
}

impl Fingerprint {
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl TryFrom<&str> for Fingerprint {
    type Error = std::num::ParseIntError;

    fn try_from(value: &str) -> std::result::Result<Self, Self::Error> {
        Ok(Self {
            data: hex_string_to_bytes(value)?,
        })
    }
}

impl From<&[u8]> for Fingerprint {
    fn from(value: &[u8]) -> Self {
        Self {
            data: value.to_vec(),
        }
    }
}

impl From<Vec<u8>> for Fingerprint {
    fn from(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bytes_to_hex(&self.data))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint(0x{})", bytes_to_hex(&self.data))
    }
}

/// A breathing gas, as fractions summing to one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gasmix {
    pub helium: f64,
    pub oxygen: f64,
    pub nitrogen: f64,
}

impl Gasmix {
    /// Build a mix from percentages, with the balance as nitrogen.
    pub(crate) fn from_percent(oxygen: u32, helium: u32) -> Self {
        Self {
            helium: helium as f64 / 100.0,
            oxygen: oxygen as f64 / 100.0,
            nitrogen: 100u32.saturating_sub(oxygen + helium) as f64 / 100.0,
        }
    }

    pub fn is_air(&self) -> bool {
        self.helium == 0.0 && (self.oxygen - 0.21).abs() < 0.005
    }
}

impl Default for Gasmix {
    fn default() -> Self {
        Self {
            helium: 0.,
            oxygen: 0.21,
            nitrogen: 0.79,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Water {
    #[default]
    Fresh,
    Salt,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Salinity {
    pub water: Water,
    /// Density in kg/m³.
    pub density: f64,
}

impl Display for Salinity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.water {
            Water::Fresh => write!(f, "fresh {}", self.density),
            Water::Salt => write!(f, "salt {}", self.density),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiveMode {
    Freedive,
    Gauge,
    #[default]
    OpenCircuit,
    ClosedCircuit,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TankKind {
    #[default]
    None,
    Metric,
    Imperial,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tank {
    /// Index into the dive's gasmix table, when the link is known.
    pub gasmix: Option<usize>,
    pub kind: TankKind,
    /// Water volume in liters.
    pub volume: f64,
    /// Work pressure (bar)
    pub work_pressure: f64,
    /// Begin pressure (bar)
    pub begin_pressure: f64,
    /// End pressure (bar)
    pub end_pressure: f64,
}

/// A human-readable dive attribute; the value string is newly allocated
/// and owned by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldString {
    pub desc: String,
    pub value: String,
}

impl FieldString {
    pub(crate) fn new(desc: &str, value: impl Into<String>) -> Self {
        Self {
            desc: desc.to_string(),
            value: value.into(),
        }
    }
}

/// Addresses one dive-level attribute in [`Parser::field`].
///
/// [`Parser::field`]: crate::parser::Parser::field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    DiveTime,
    MaxDepth,
    AvgDepth,
    GasMixCount,
    GasMix,
    Salinity,
    Atmospheric,
    TemperatureSurface,
    TemperatureMinimum,
    TemperatureMaximum,
    TankCount,
    Tank,
    DiveMode,
    String,
}

/// One dive-level attribute value, SI units throughout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Field {
    /// Seconds
    DiveTime(u32),
    /// Meters
    MaxDepth(f64),
    /// Meters
    AvgDepth(f64),
    GasMixCount(u32),
    GasMix(Gasmix),
    Salinity(Salinity),
    /// Bar
    Atmospheric(f64),
    /// Celsius
    TemperatureSurface(f64),
    TemperatureMinimum(f64),
    TemperatureMaximum(f64),
    TankCount(u32),
    Tank(Tank),
    DiveMode(DiveMode),
    String(FieldString),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[default]
    None,
    Deco,
    Rbt,
    Ascent,
    Ceiling,
    Workload,
    Transmitter,
    Violation,
    Bookmark,
    Surface,
    SafetyStop,
    Gaschange,
    SafetyStopVoluntary,
    SafetyStopMandatory,
    Deepstop,
    CeilingSafetyStop,
    Floor,
    Divetime,
    Maxdepth,
    Olf,
    Po2,
    Airtime,
    Rgbm,
    Heading,
    TissueLevel,
}

bitflags! {
    /// Begin/end markers for events that span an interval.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct EventFlags: u32 {
        const BEGIN = 1 << 0;
        const END   = 1 << 1;
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleEvent {
    pub kind: EventKind,
    /// Offset in seconds relative to the enclosing time sample.
    pub time: u32,
    pub flags: EventFlags,
    pub value: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecoKind {
    Ndl,
    SafetyStop,
    DecoStop,
    DeepStop,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Deco {
    pub kind: DecoKind,
    /// Stop or no-deco time in seconds.
    pub time: u32,
    /// Stop depth in meters, zero for NDL.
    pub depth: f64,
}

/// One timepoint attribute in the sample stream.
///
/// Samples arrive in non-decreasing time order; exactly one `Time` sample
/// precedes the group of same-instant samples it stamps. `Vendor` payloads
/// borrow from the parser's blob and are only valid during the callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Sample<'a> {
    /// Seconds since the start of the dive.
    Time(u32),
    /// Meters
    Depth(f64),
    /// Tank pressure (bar)
    Pressure { tank: u32, value: f64 },
    /// Celsius
    Temperature(f64),
    Event(SampleEvent),
    /// Remaining bottom time (minutes)
    Rbt(u32),
    /// Beats per minute
    Heartbeat(u32),
    /// Degrees
    Bearing(u32),
    Vendor { kind: u32, data: &'a [u8] },
    /// Setpoint (bar)
    Setpoint(f64),
    /// Loop oxygen partial pressure (bar)
    Ppo2(f64),
    /// CNS toxicity as a fraction
    Cns(f64),
    Deco(Deco),
    /// Index into the dive's gasmix table.
    Gasmix(u32),
}

// Unit conversion constants shared by the family parsers.
pub(crate) const BAR: f64 = 100000.0;
pub(crate) const ATM: f64 = 1.01325;
pub(crate) const PSI: f64 = 0.0689475729;
pub(crate) const FEET: f64 = 0.3048;
pub(crate) const GRAVITY: f64 = 9.80665;
pub(crate) const DENSITY_FRESH: f64 = 1000.0;
pub(crate) const DENSITY_SALT: f64 = 1025.0;

pub(crate) fn fahrenheit_to_celsius(value: f64) -> f64 {
    (value - 32.0) / 1.8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_hex_round_trip() {
        let fingerprint = Fingerprint::try_from("00DEAD42").unwrap();
        assert_eq!(fingerprint.as_bytes(), &[0x00, 0xDE, 0xAD, 0x42]);
        assert_eq!(fingerprint.to_string(), "00DEAD42");
    }

    #[test]
    fn test_gasmix_from_percent() {
        let mix = Gasmix::from_percent(33, 0);
        assert!((mix.oxygen - 0.33).abs() < 1e-9);
        assert!((mix.nitrogen - 0.67).abs() < 1e-9);
        assert!(!mix.is_air());
        assert!(Gasmix::default().is_air());
    }

    #[test]
    fn test_field_serde_round_trip() {
        let field = Field::Salinity(Salinity {
            water: Water::Salt,
            density: 1025.0,
        });
        let json = serde_json::to_string(&field).unwrap();
        let back: Field = serde_json::from_str(&json).unwrap();
        assert_eq!(back, field);
    }

    #[test]
    fn test_temperature_conversion() {
        assert!((fahrenheit_to_celsius(32.0)).abs() < 1e-9);
        assert!((fahrenheit_to_celsius(212.0) - 100.0).abs() < 1e-9);
    }
}
