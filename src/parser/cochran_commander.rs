//! Parser for the Cochran Commander. The timestamp is BCD with the
//! fields in reverse order (seconds first), and the profile alternates
//! depth words with temperature.

use crate::bytes;
use crate::common::Family;
use crate::error::{Error, Result};
use crate::parser::types::*;
use crate::parser::{Parser, SampleCallback, civil_datetime};

const HEADER_SIZE: usize = 0x100;
const RECORD_SIZE: usize = 4;
const INTERVAL: u32 = 2;

pub struct CommanderParser {
    data: Vec<u8>,
}

impl CommanderParser {
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

impl Default for CommanderParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser for CommanderParser {
    fn family(&self) -> Family {
        Family::CochranCommander
    }

    fn set_data(&mut self, data: &[u8]) -> Result<()> {
        self.data = data.to_vec();
        Ok(())
    }

    fn datetime(&mut self) -> Result<jiff::civil::DateTime> {
        if self.data.len() < HEADER_SIZE {
            return Err(Error::DataFormat("dive header truncated"));
        }
        // Stored seconds first: [SS MM HH DD MO YY].
        let mut parts = [0u8; 6];
        for (i, slot) in parts.iter_mut().enumerate() {
            *slot = bytes::bcd(self.data[i]).ok_or(Error::DataFormat("timestamp is not BCD"))?;
        }
        civil_datetime(
            2000 + parts[5] as i16,
            parts[4] as i8,
            parts[3] as i8,
            parts[2] as i8,
            parts[1] as i8,
            parts[0] as i8,
        )
    }

    fn field(&mut self, kind: FieldType, index: u32) -> Result<Field> {
        let profile = self.profile()?;
        let records = (profile.len() / RECORD_SIZE) as u32;
        let o2 = self.data[6] as u32;
        match kind {
            FieldType::DiveTime => Ok(Field::DiveTime(records * INTERVAL)),
            FieldType::MaxDepth => {
                let mut maxdepth: f64 = 0.0;
                for record in profile.chunks_exact(RECORD_SIZE) {
                    maxdepth = maxdepth.max(bytes::u16_le(record) as f64 / 10.0 * FEET);
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
        for (i, record) in profile.chunks_exact(RECORD_SIZE).enumerate() {
            callback(Sample::Time((i as u32 + 1) * INTERVAL));
            if i == 0 {
                callback(Sample::Gasmix(0));
            }
            callback(Sample::Depth(bytes::u16_le(record) as f64 / 10.0 * FEET));
            callback(Sample::Temperature(fahrenheit_to_celsius(f64::from(
                record[2],
            ))));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reversed_timestamp() {
        let mut data = vec![0u8; HEADER_SIZE];
        data[0..6].copy_from_slice(&[0x30, 0x15, 0x09, 0x12, 0x06, 0x23]);
        data.extend_from_slice(&331u16.to_le_bytes());
        data.push(75);
        data.push(0);

        let mut parser = CommanderParser::new();
        parser.set_data(&data).unwrap();

        let datetime = parser.datetime().unwrap();
        assert_eq!(datetime.year(), 2023);
        assert_eq!(datetime.month(), 6);
        assert_eq!(datetime.day(), 12);
        assert_eq!(datetime.hour(), 9);
        assert_eq!(datetime.minute(), 15);
        assert_eq!(datetime.second(), 30);

        let Field::MaxDepth(depth) = parser.field(FieldType::MaxDepth, 0).unwrap() else {
            panic!("wrong field variant");
        };
        assert!((depth - 33.1 * FEET).abs() < 1e-9);
    }
}
