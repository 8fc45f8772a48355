//! Parser for the Reefnet Sensus. Samples are absolute pressure words;
//! calendar time comes from anchoring the dive's tick stamp to the
//! session's clock pair.

use crate::bytes;
use crate::common::Family;
use crate::context::ClockSync;
use crate::error::{Error, Result};
use crate::parser::types::*;
use crate::parser::{Parser, SampleCallback};

const HEADER_SIZE: usize = 4;
const INTERVAL: u32 = 10;

pub(crate) fn tick_datetime(clock: ClockSync, ticks: u32) -> Result<jiff::civil::DateTime> {
    let elapsed = i64::from(clock.devtime) - i64::from(ticks);
    let timestamp = clock
        .systime
        .checked_sub(jiff::Span::new().seconds(elapsed))
        .map_err(|_| Error::DataFormat("timestamp out of range"))?;
    Ok(timestamp.to_zoned(jiff::tz::TimeZone::UTC).datetime())
}

/// Absolute pressure in millibar to depth in meters of salt water.
pub(crate) fn pressure_to_depth(millibar: u16) -> f64 {
    let delta = f64::from(millibar) / 1000.0 - ATM;
    if delta <= 0.0 {
        0.0
    } else {
        delta * BAR / (DENSITY_SALT * GRAVITY)
    }
}

pub struct SensusParser {
    data: Vec<u8>,
    clock: Option<ClockSync>,
}

impl SensusParser {
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            clock: None,
        }
    }

    pub fn set_clock(&mut self, clock: ClockSync) {
        self.clock = Some(clock);
    }

    fn profile(&self) -> Result<&[u8]> {
        if self.data.len() < HEADER_SIZE {
            return Err(Error::DataFormat("dive header truncated"));
        }
        Ok(&self.data[HEADER_SIZE..])
    }
}

impl Default for SensusParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser for SensusParser {
    fn family(&self) -> Family {
        Family::ReefnetSensus
    }

    fn set_data(&mut self, data: &[u8]) -> Result<()> {
        self.data = data.to_vec();
        Ok(())
    }

    fn datetime(&mut self) -> Result<jiff::civil::DateTime> {
        if self.data.len() < HEADER_SIZE {
            return Err(Error::DataFormat("dive header truncated"));
        }
        let clock = self.clock.ok_or(Error::Unsupported)?;
        tick_datetime(clock, bytes::u32_le(&self.data))
    }

    fn field(&mut self, kind: FieldType, index: u32) -> Result<Field> {
        let profile = self.profile()?;
        let records = (profile.len() / 2) as u32;
        match kind {
            FieldType::DiveTime => Ok(Field::DiveTime(records * INTERVAL)),
            FieldType::MaxDepth => {
                let mut maxdepth: f64 = 0.0;
                for sample in profile.chunks_exact(2) {
                    maxdepth = maxdepth.max(pressure_to_depth(bytes::u16_le(sample)));
                }
                Ok(Field::MaxDepth(maxdepth))
            }
            FieldType::GasMixCount => Ok(Field::GasMixCount(1)),
            FieldType::GasMix if index == 0 => Ok(Field::GasMix(Gasmix::default())),
            FieldType::GasMix => Err(Error::InvalidArgs("gas mix index out of range")),
            FieldType::Salinity => Ok(Field::Salinity(Salinity {
                water: Water::Salt,
                density: DENSITY_SALT,
            })),
            _ => Err(Error::Unsupported),
        }
    }

    fn samples_foreach(&mut self, callback: SampleCallback<'_>) -> Result<()> {
        let profile = self.profile()?;
        for (i, sample) in profile.chunks_exact(2).enumerate() {
            callback(Sample::Time((i as u32 + 1) * INTERVAL));
            callback(Sample::Depth(pressure_to_depth(bytes::u16_le(sample))));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pressure_to_depth_at_surface() {
        assert_eq!(pressure_to_depth(1013), 0.0);
        let depth = pressure_to_depth(2026);
        let expected = (2.026 - ATM) * BAR / (DENSITY_SALT * GRAVITY);
        assert!((depth - expected).abs() < 1e-9);
    }

    #[test]
    fn test_datetime_requires_clock() {
        let mut parser = SensusParser::new();
        parser
            .set_data(&[0, 0, 0, 0, 0xE9, 0x04])
            .unwrap();
        assert!(matches!(parser.datetime(), Err(Error::Unsupported)));
    }
}
