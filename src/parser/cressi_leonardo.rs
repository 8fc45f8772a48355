//! Parser for the Cressi Leonardo: plain binary datetime and
//! little-endian decimeter depth words every twenty seconds.

use crate::bytes;
use crate::common::Family;
use crate::error::{Error, Result};
use crate::parser::types::*;
use crate::parser::{Parser, SampleCallback, civil_datetime};

const HEADER_SIZE: usize = 8;
const INTERVAL: u32 = 20;

pub struct LeonardoParser {
    data: Vec<u8>,
}

impl LeonardoParser {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    fn profile(&self) -> Result<&[u8]> {
        if self.data.len() < HEADER_SIZE {
            return Err(Error::DataFormat("dive header truncated"));
        }
        Ok(&self.data[HEADER_SIZE..])
    }
}

impl Default for LeonardoParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser for LeonardoParser {
    fn family(&self) -> Family {
        Family::CressiLeonardo
    }

    fn set_data(&mut self, data: &[u8]) -> Result<()> {
        self.data = data.to_vec();
        Ok(())
    }

    fn datetime(&mut self) -> Result<jiff::civil::DateTime> {
        if self.data.len() < HEADER_SIZE {
            return Err(Error::DataFormat("dive header truncated"));
        }
        civil_datetime(
            2000 + self.data[0] as i16,
            self.data[1] as i8,
            self.data[2] as i8,
            self.data[3] as i8,
            self.data[4] as i8,
            0,
        )
    }

    fn field(&mut self, kind: FieldType, index: u32) -> Result<Field> {
        let profile = self.profile()?;
        let records = (profile.len() / 2) as u32;
        let o2 = self.data[5] as u32;
        match kind {
            FieldType::DiveTime => Ok(Field::DiveTime(records * INTERVAL)),
            FieldType::MaxDepth => {
                let mut maxdepth: f64 = 0.0;
                for sample in profile.chunks_exact(2) {
                    maxdepth = maxdepth.max(bytes::u16_le(sample) as f64 / 10.0);
                }
                Ok(Field::MaxDepth(maxdepth))
            }
            FieldType::GasMixCount => Ok(Field::GasMixCount(1)),
            FieldType::GasMix if index == 0 => Ok(Field::GasMix(Gasmix::from_percent(
                if o2 == 0 { 21 } else { o2 },
                0,
            ))),
            FieldType::GasMix => Err(Error::InvalidArgs("gas mix index out of range")),
            FieldType::DiveMode => Ok(Field::DiveMode(DiveMode::OpenCircuit)),
            _ => Err(Error::Unsupported),
        }
    }

    fn samples_foreach(&mut self, callback: SampleCallback<'_>) -> Result<()> {
        let profile = self.profile()?;
        for (i, sample) in profile.chunks_exact(2).enumerate() {
            callback(Sample::Time((i as u32 + 1) * INTERVAL));
            if i == 0 {
                callback(Sample::Gasmix(0));
            }
            callback(Sample::Depth(bytes::u16_le(sample) as f64 / 10.0));
        }
        Ok(())
    }
}
