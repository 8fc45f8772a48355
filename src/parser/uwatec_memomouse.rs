//! Parser for dives replayed through the Uwatec MemoMouse. Same device
//! epoch as the Aladin, with the source computer's model byte and a
//! quarter-meter depth trace.

use crate::bytes;
use crate::common::Family;
use crate::error::{Error, Result};
use crate::parser::types::*;
use crate::parser::{Parser, SampleCallback};

const HEADER_SIZE: usize = 6;
const INTERVAL: u32 = 20;

const EPOCH: jiff::civil::DateTime = jiff::civil::DateTime::constant(1994, 1, 1, 0, 0, 0, 0);

pub struct MemoMouseParser {
    data: Vec<u8>,
}

impl MemoMouseParser {
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

impl Default for MemoMouseParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser for MemoMouseParser {
    fn family(&self) -> Family {
        Family::UwatecMemoMouse
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
        let o2 = self.data[4] as u32;
        match kind {
            FieldType::DiveTime => Ok(Field::DiveTime(profile.len() as u32 * INTERVAL)),
            FieldType::MaxDepth => {
                let max = profile.iter().copied().max().unwrap_or(0);
                Ok(Field::MaxDepth(f64::from(max) * 0.25))
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
            callback(Sample::Depth(f64::from(raw) * 0.25));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nitrox_header() {
        let mut data = Vec::new();
        data.extend_from_slice(&1000u32.to_le_bytes());
        data.push(32); // EAN32
        data.push(0x12); // model byte of the source computer
        data.extend_from_slice(&[10, 20]);

        let mut parser = MemoMouseParser::new();
        parser.set_data(&data).unwrap();

        let Field::GasMix(mix) = parser.field(FieldType::GasMix, 0).unwrap() else {
            panic!("wrong field variant");
        };
        assert!((mix.oxygen - 0.32).abs() < 1e-9);
        assert_eq!(
            parser.field(FieldType::DiveTime, 0).unwrap(),
            Field::DiveTime(40)
        );
    }
}
