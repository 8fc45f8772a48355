//! Parser for the DiveSystem iDive family: a device-epoch timestamp,
//! per-dive interval and sample count, and metric depth/temperature
//! records.

use crate::bytes;
use crate::common::Family;
use crate::error::{Error, Result};
use crate::parser::types::*;
use crate::parser::{Parser, SampleCallback};

const HEADER_SIZE: usize = 32;
const RECORD_SIZE: usize = 4;

const EPOCH: jiff::civil::DateTime = jiff::civil::DateTime::constant(2000, 1, 1, 0, 0, 0, 0);

pub struct IDiveParser {
    #[expect(dead_code, reason = "kept for the iX3M record layout")]
    model: u32,
    data: Vec<u8>,
}

impl IDiveParser {
    pub fn new(model: u32) -> Self {
        Self {
            model,
            data: Vec::new(),
        }
    }

    fn interval(&self) -> Result<u32> {
        if self.data.len() < HEADER_SIZE {
            return Err(Error::DataFormat("dive header truncated"));
        }
        let interval = self.data[4] as u32;
        if interval == 0 {
            return Err(Error::DataFormat("zero sample interval"));
        }
        Ok(interval)
    }
}

impl Parser for IDiveParser {
    fn family(&self) -> Family {
        Family::DiveSystemIDive
    }

    fn set_data(&mut self, data: &[u8]) -> Result<()> {
        self.data = data.to_vec();
        Ok(())
    }

    fn datetime(&mut self) -> Result<jiff::civil::DateTime> {
        if self.data.len() < HEADER_SIZE {
            return Err(Error::DataFormat("dive header truncated"));
        }
        let seconds = bytes::u32_le(&self.data) as i64;
        EPOCH
            .checked_add(jiff::Span::new().seconds(seconds))
            .map_err(|_| Error::DataFormat("timestamp out of range"))
    }

    fn field(&mut self, kind: FieldType, index: u32) -> Result<Field> {
        let interval = self.interval()?;
        let profile = &self.data[HEADER_SIZE..];
        let records = (profile.len() / RECORD_SIZE) as u32;
        let o2 = self.data[5] as u32;
        match kind {
            FieldType::DiveTime => Ok(Field::DiveTime(records * interval)),
            FieldType::MaxDepth => {
                let mut maxdepth: f64 = 0.0;
                for record in profile.chunks_exact(RECORD_SIZE) {
                    maxdepth = maxdepth.max(bytes::u16_le(record) as f64 / 100.0);
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
        let interval = self.interval()?;
        for (i, record) in self.data[HEADER_SIZE..]
            .chunks_exact(RECORD_SIZE)
            .enumerate()
        {
            callback(Sample::Time((i as u32 + 1) * interval));
            if i == 0 {
                callback(Sample::Gasmix(0));
            }
            callback(Sample::Depth(bytes::u16_le(record) as f64 / 100.0));
            let temp = bytes::u16_le(&record[2..4]) as i16;
            callback(Sample::Temperature(f64::from(temp) / 10.0));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_records() {
        let mut data = vec![0u8; HEADER_SIZE];
        data[0..4].copy_from_slice(&86400u32.to_le_bytes());
        data[4] = 2;
        data[5] = 28;
        data.extend_from_slice(&1500u16.to_le_bytes());
        data.extend_from_slice(&195u16.to_le_bytes());

        let mut parser = IDiveParser::new(0x05);
        parser.set_data(&data).unwrap();

        let datetime = parser.datetime().unwrap();
        assert_eq!(datetime.day(), 2);

        let Field::MaxDepth(depth) = parser.field(FieldType::MaxDepth, 0).unwrap() else {
            panic!("wrong field variant");
        };
        assert!((depth - 15.0).abs() < 1e-9);
    }
}
