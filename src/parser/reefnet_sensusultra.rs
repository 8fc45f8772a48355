//! Parser for the Reefnet Sensus Ultra. Dive records carry their own
//! sample interval next to the tick stamp.

use crate::bytes;
use crate::common::Family;
use crate::context::ClockSync;
use crate::error::{Error, Result};
use crate::parser::reefnet_sensus::{pressure_to_depth, tick_datetime};
use crate::parser::types::*;
use crate::parser::{Parser, SampleCallback};

const HEADER_SIZE: usize = 8;

pub struct SensusUltraParser {
    data: Vec<u8>,
    clock: Option<ClockSync>,
}

impl SensusUltraParser {
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            clock: None,
        }
    }

    pub fn set_clock(&mut self, clock: ClockSync) {
        self.clock = Some(clock);
    }

    fn interval(&self) -> Result<u32> {
        if self.data.len() < HEADER_SIZE {
            return Err(Error::DataFormat("dive header truncated"));
        }
        let interval = bytes::u16_le(&self.data[4..6]) as u32;
        if interval == 0 {
            return Err(Error::DataFormat("zero sample interval"));
        }
        Ok(interval)
    }
}

impl Default for SensusUltraParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser for SensusUltraParser {
    fn family(&self) -> Family {
        Family::ReefnetSensusUltra
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
        let interval = self.interval()?;
        let profile = &self.data[HEADER_SIZE..];
        match kind {
            FieldType::DiveTime => Ok(Field::DiveTime((profile.len() / 2) as u32 * interval)),
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
            _ => Err(Error::Unsupported),
        }
    }

    fn samples_foreach(&mut self, callback: SampleCallback<'_>) -> Result<()> {
        let interval = self.interval()?;
        for (i, sample) in self.data[HEADER_SIZE..].chunks_exact(2).enumerate() {
            callback(Sample::Time((i as u32 + 1) * interval));
            callback(Sample::Depth(pressure_to_depth(bytes::u16_le(sample))));
        }
        Ok(())
    }
}
