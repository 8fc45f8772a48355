//! Parser for the Mares Darwin. The slimmest Mares format: one byte of
//! depth in fifths of a meter per twenty second sample.

use crate::common::Family;
use crate::error::{Error, Result};
use crate::parser::types::*;
use crate::parser::{Parser, SampleCallback, civil_datetime};

const HEADER_SIZE: usize = 6;
const INTERVAL: u32 = 20;

pub struct DarwinParser {
    #[expect(dead_code, reason = "kept for the Darwin Air record layout")]
    model: u32,
    data: Vec<u8>,
}

impl DarwinParser {
    pub fn new(model: u32) -> Self {
        Self {
            model,
            data: Vec::new(),
        }
    }

    fn profile(&self) -> Result<&[u8]> {
        if self.data.len() < HEADER_SIZE {
            return Err(Error::DataFormat("dive header truncated"));
        }
        Ok(&self.data[HEADER_SIZE..])
    }
}

impl Parser for DarwinParser {
    fn family(&self) -> Family {
        Family::MaresDarwin
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
        let o2 = self.data[5] as u32;
        match kind {
            FieldType::DiveTime => Ok(Field::DiveTime(profile.len() as u32 * INTERVAL)),
            FieldType::MaxDepth => {
                let max = profile.iter().copied().max().unwrap_or(0);
                Ok(Field::MaxDepth(f64::from(max) * 0.2))
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
        for (i, &raw) in profile.iter().enumerate() {
            callback(Sample::Time((i as u32 + 1) * INTERVAL));
            if i == 0 {
                callback(Sample::Gasmix(0));
            }
            callback(Sample::Depth(f64::from(raw) * 0.2));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifth_meter_depths() {
        let mut parser = DarwinParser::new(0x04);
        parser.set_data(&[19, 12, 31, 23, 45, 0, 50, 100, 25]).unwrap();

        let Field::MaxDepth(depth) = parser.field(FieldType::MaxDepth, 0).unwrap() else {
            panic!("wrong field variant");
        };
        assert!((depth - 20.0).abs() < 1e-9);

        let datetime = parser.datetime().unwrap();
        assert_eq!(datetime.year(), 2019);
        assert_eq!(datetime.hour(), 23);
    }
}
