//! Parser for the Uwatec Aladin. Dives open with the device-epoch
//! timestamp (half seconds since 1994) and carry a quarter-meter depth
//! trace at twenty second intervals.

use crate::bytes;
use crate::common::Family;
use crate::error::{Error, Result};
use crate::parser::types::*;
use crate::parser::{Parser, SampleCallback};

const HEADER_SIZE: usize = 4;
const INTERVAL: u32 = 20;

const EPOCH: jiff::civil::DateTime = jiff::civil::DateTime::constant(1994, 1, 1, 0, 0, 0, 0);

pub struct AladinParser {
    data: Vec<u8>,
}

impl AladinParser {
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

impl Default for AladinParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser for AladinParser {
    fn family(&self) -> Family {
        Family::UwatecAladin
    }

    fn set_data(&mut self, data: &[u8]) -> Result<()> {
        self.data = data.to_vec();
        Ok(())
    }

    fn datetime(&mut self) -> Result<jiff::civil::DateTime> {
        if self.data.len() < HEADER_SIZE {
            return Err(Error::DataFormat("dive header truncated"));
        }
        let ticks = bytes::u32_le(&self.data) as i64;
        EPOCH
            .checked_add(jiff::Span::new().seconds(ticks / 2))
            .map_err(|_| Error::DataFormat("timestamp out of range"))
    }

    fn field(&mut self, kind: FieldType, index: u32) -> Result<Field> {
        let profile = self.profile()?;
        match kind {
            FieldType::DiveTime => Ok(Field::DiveTime(profile.len() as u32 * INTERVAL)),
            FieldType::MaxDepth => {
                let max = profile.iter().copied().max().unwrap_or(0);
                Ok(Field::MaxDepth(f64::from(max) * 0.25))
            }
            FieldType::GasMixCount => Ok(Field::GasMixCount(1)),
            FieldType::GasMix if index == 0 => Ok(Field::GasMix(Gasmix::default())),
            FieldType::GasMix => Err(Error::InvalidArgs("gas mix index out of range")),
            FieldType::DiveMode => Ok(Field::DiveMode(DiveMode::OpenCircuit)),
            _ => Err(Error::Unsupported),
        }
    }

    fn samples_foreach(&mut self, callback: SampleCallback<'_>) -> Result<()> {
        let profile = self.profile()?;
        for (i, &raw) in profile.iter().enumerate() {
            callback(Sample::Time((i as u32 + 1) * INTERVAL));
            if i == 0 {
                callback(Sample::Gasmix(0));
            }
            callback(Sample::Depth(f64::from(raw) * 0.25));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_and_depth_scale() {
        let mut data = Vec::new();
        // 1994-01-02 00:00:00 is 86400 seconds past the epoch.
        data.extend_from_slice(&(2 * 86400u32).to_le_bytes());
        data.extend_from_slice(&[40, 80, 20]);

        let mut parser = AladinParser::new();
        parser.set_data(&data).unwrap();

        let datetime = parser.datetime().unwrap();
        assert_eq!(datetime.year(), 1994);
        assert_eq!(datetime.day(), 2);

        let Field::MaxDepth(depth) = parser.field(FieldType::MaxDepth, 0).unwrap() else {
            panic!("wrong field variant");
        };
        assert!((depth - 20.0).abs() < 1e-9);
    }
}
