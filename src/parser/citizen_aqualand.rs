//! Parser for the Citizen Aqualand watches: BCD timestamp and a tenth
//! meter depth byte every five seconds.

use crate::bytes;
use crate::common::Family;
use crate::error::{Error, Result};
use crate::parser::types::*;
use crate::parser::{Parser, SampleCallback, civil_datetime};

const HEADER_SIZE: usize = 8;
const INTERVAL: u32 = 5;

pub struct AqualandParser {
    data: Vec<u8>,
}

impl AqualandParser {
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

impl Default for AqualandParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser for AqualandParser {
    fn family(&self) -> Family {
        Family::CitizenAqualand
    }

    fn set_data(&mut self, data: &[u8]) -> Result<()> {
        self.data = data.to_vec();
        Ok(())
    }

    fn datetime(&mut self) -> Result<jiff::civil::DateTime> {
        if self.data.len() < HEADER_SIZE {
            return Err(Error::DataFormat("dive header truncated"));
        }
        let mut parts = [0u8; 6];
        for (i, slot) in parts.iter_mut().enumerate() {
            *slot = bytes::bcd(self.data[i]).ok_or(Error::DataFormat("timestamp is not BCD"))?;
        }
        civil_datetime(
            2000 + parts[0] as i16,
            parts[1] as i8,
            parts[2] as i8,
            parts[3] as i8,
            parts[4] as i8,
            parts[5] as i8,
        )
    }

    fn field(&mut self, kind: FieldType, index: u32) -> Result<Field> {
        let profile = self.profile()?;
        match kind {
            FieldType::DiveTime => Ok(Field::DiveTime(profile.len() as u32 * INTERVAL)),
            FieldType::MaxDepth => {
                let max = profile.iter().copied().max().unwrap_or(0);
                Ok(Field::MaxDepth(f64::from(max) / 10.0))
            }
            FieldType::GasMixCount => Ok(Field::GasMixCount(1)),
            FieldType::GasMix if index == 0 => Ok(Field::GasMix(Gasmix::default())),
            FieldType::GasMix => Err(Error::InvalidArgs("gas mix index out of range")),
            _ => Err(Error::Unsupported),
        }
    }

    fn samples_foreach(&mut self, callback: SampleCallback<'_>) -> Result<()> {
        let profile = self.profile()?;
        for (i, &raw) in profile.iter().enumerate() {
            callback(Sample::Time((i as u32 + 1) * INTERVAL));
            callback(Sample::Depth(f64::from(raw) / 10.0));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_profile() {
        let mut parser = AqualandParser::new();
        parser
            .set_data(&[0x24, 0x01, 0x15, 0x13, 0x30, 0x00, 0, 0, 55, 103, 40])
            .unwrap();

        let datetime = parser.datetime().unwrap();
        assert_eq!(datetime.year(), 2024);
        assert_eq!(datetime.hour(), 13);

        let Field::MaxDepth(depth) = parser.field(FieldType::MaxDepth, 0).unwrap() else {
            panic!("wrong field variant");
        };
        assert!((depth - 10.3).abs() < 1e-9);
    }
}
