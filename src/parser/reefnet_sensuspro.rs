//! Parser for the Reefnet Sensus Pro: one-second pressure sampling, same
//! tick anchoring and depth conversion as the original Sensus.

use crate::bytes;
use crate::common::Family;
use crate::context::ClockSync;
use crate::error::{Error, Result};
use crate::parser::reefnet_sensus::{pressure_to_depth, tick_datetime};
use crate::parser::types::*;
use crate::parser::{Parser, SampleCallback};

const HEADER_SIZE: usize = 4;
const INTERVAL: u32 = 1;

pub struct SensusProParser {
    data: Vec<u8>,
    clock: Option<ClockSync>,
}

impl SensusProParser {
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

impl Default for SensusProParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser for SensusProParser {
    fn family(&self) -> Family {
        Family::ReefnetSensusPro
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
        match kind {
            FieldType::DiveTime => Ok(Field::DiveTime((profile.len() / 2) as u32 * INTERVAL)),
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
        let profile = self.profile()?;
        for (i, sample) in profile.chunks_exact(2).enumerate() {
            callback(Sample::Time((i as u32 + 1) * INTERVAL));
            callback(Sample::Depth(pressure_to_depth(bytes::u16_le(sample))));
        }
        Ok(())
    }
}
