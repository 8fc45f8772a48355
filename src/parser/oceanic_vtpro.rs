//! Parser for the Oceanic VT Pro dive format: day-first timestamp and the
//! shared 8-byte imperial profile records.

use crate::bytes;
use crate::common::Family;
use crate::error::{Error, Result};
use crate::parser::oceanic_atom2::resolve_year;
use crate::parser::types::*;
use crate::parser::{Parser, SampleCallback, civil_datetime};

const HEADER_SIZE: usize = 0x10;
const RECORD_SIZE: usize = 8;

const INTERVALS: [u32; 4] = [15, 30, 60, 120];

pub struct VtProParser {
    data: Vec<u8>,
}

impl VtProParser {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    fn interval(&self) -> Result<u32> {
        if self.data.len() < HEADER_SIZE {
            return Err(Error::DataFormat("logbook entry truncated"));
        }
        Ok(INTERVALS[(self.data[7] >> 4 & 0x03) as usize])
    }
}

impl Default for VtProParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser for VtProParser {
    fn family(&self) -> Family {
        Family::OceanicVtPro
    }

    fn set_data(&mut self, data: &[u8]) -> Result<()> {
        self.data = data.to_vec();
        Ok(())
    }

    fn datetime(&mut self) -> Result<jiff::civil::DateTime> {
        if self.data.len() < HEADER_SIZE {
            return Err(Error::DataFormat("logbook entry truncated"));
        }
        // Day first on this generation.
        let mut parts = [0u8; 6];
        for (i, slot) in parts.iter_mut().enumerate() {
            *slot = bytes::bcd(self.data[i]).ok_or(Error::DataFormat("timestamp is not BCD"))?;
        }
        civil_datetime(
            resolve_year(parts[2]),
            parts[1] as i8,
            parts[0] as i8,
            parts[3] as i8,
            parts[4] as i8,
            parts[5] as i8,
        )
    }

    fn field(&mut self, kind: FieldType, index: u32) -> Result<Field> {
        let interval = self.interval()?;
        let records = (self.data.len() - HEADER_SIZE) / RECORD_SIZE;
        match kind {
            FieldType::DiveTime => Ok(Field::DiveTime(records as u32 * interval)),
            FieldType::MaxDepth => {
                let mut maxdepth: f64 = 0.0;
                for record in self.data[HEADER_SIZE..].chunks_exact(RECORD_SIZE) {
                    maxdepth = maxdepth.max(bytes::u16_le(record) as f64 / 16.0 * FEET);
                }
                Ok(Field::MaxDepth(maxdepth))
            }
            FieldType::GasMixCount => Ok(Field::GasMixCount(1)),
            FieldType::GasMix if index == 0 => {
                let o2 = self.data[6] as u32;
                Ok(Field::GasMix(Gasmix::from_percent(
                    if o2 == 0 { 21 } else { o2 },
                    0,
                )))
            }
            FieldType::GasMix => Err(Error::InvalidArgs("gas mix index out of range")),
            FieldType::DiveMode => Ok(Field::DiveMode(DiveMode::OpenCircuit)),
            _ => Err(Error::Unsupported),
        }
    }

    fn samples_foreach(&mut self, callback: SampleCallback<'_>) -> Result<()> {
        let interval = self.interval()?;
        for (i, record) in self.data[HEADER_SIZE..]
            .chunks_exact(RECORD_SIZE)
            .enumerate()
        {
            callback(Sample::Time((i as u32 + 1) * interval));
            if i == 0 {
                callback(Sample::Gasmix(0));
            }
            callback(Sample::Depth(bytes::u16_le(record) as f64 / 16.0 * FEET));
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
    fn test_day_first_timestamp() {
        let mut data = vec![0u8; HEADER_SIZE];
        data[0..6].copy_from_slice(&[0x28, 0x11, 0x15, 0x08, 0x15, 0x00]);
        data[7] = 0x00; // 15 s interval

        let mut parser = VtProParser::new();
        parser.set_data(&data).unwrap();

        let datetime = parser.datetime().unwrap();
        assert_eq!(datetime.year(), 2015);
        assert_eq!(datetime.month(), 11);
        assert_eq!(datetime.day(), 28);
    }
}
