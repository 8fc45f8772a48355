//! Parser for the Suunto EON and Solution Alpha. BCD timestamp, one gas,
//! tank pressure bracket in the header, depth trace in feet.

use crate::bytes;
use crate::common::Family;
use crate::error::{Error, Result};
use crate::parser::types::*;
use crate::parser::{Parser, SampleCallback, civil_datetime};

const HEADER_SIZE: usize = 0x0C;

pub struct EonParser {
    data: Vec<u8>,
}

impl EonParser {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    fn header(&self) -> Result<&[u8]> {
        if self.data.len() < HEADER_SIZE {
            return Err(Error::DataFormat("dive header truncated"));
        }
        Ok(&self.data)
    }

    fn interval(&self) -> Result<u32> {
        let header = self.header()?;
        let interval = header[6] as u32;
        if interval == 0 {
            return Err(Error::DataFormat("zero sample interval"));
        }
        Ok(interval)
    }
}

impl Default for EonParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser for EonParser {
    fn family(&self) -> Family {
        Family::SuuntoEon
    }

    fn set_data(&mut self, data: &[u8]) -> Result<()> {
        self.data = data.to_vec();
        Ok(())
    }

    fn datetime(&mut self) -> Result<jiff::civil::DateTime> {
        let header = self.header()?;
        let mut parts = [0u8; 6];
        for (i, slot) in parts.iter_mut().enumerate() {
            *slot = bytes::bcd(header[i]).ok_or(Error::DataFormat("timestamp is not BCD"))?;
        }
        let year = if parts[0] < 90 {
            2000 + parts[0] as i16
        } else {
            1900 + parts[0] as i16
        };
        civil_datetime(
            year,
            parts[1] as i8,
            parts[2] as i8,
            parts[3] as i8,
            parts[4] as i8,
            parts[5] as i8,
        )
    }

    fn field(&mut self, kind: FieldType, index: u32) -> Result<Field> {
        let header = self.header()?;
        let nsamples = (self.data.len() - HEADER_SIZE) as u32;
        match kind {
            FieldType::DiveTime => Ok(Field::DiveTime(nsamples * self.interval()?)),
            FieldType::MaxDepth => {
                let max = self.data[HEADER_SIZE..].iter().copied().max().unwrap_or(0);
                Ok(Field::MaxDepth(f64::from(max) * FEET))
            }
            FieldType::GasMixCount => Ok(Field::GasMixCount(1)),
            FieldType::GasMix if index == 0 => {
                let o2 = header[7] as u32;
                Ok(Field::GasMix(Gasmix::from_percent(
                    if o2 == 0 { 21 } else { o2 },
                    0,
                )))
            }
            FieldType::GasMix => Err(Error::InvalidArgs("gas mix index out of range")),
            FieldType::TankCount => Ok(Field::TankCount(1)),
            FieldType::Tank if index == 0 => Ok(Field::Tank(Tank {
                gasmix: Some(0),
                kind: TankKind::None,
                volume: 0.0,
                work_pressure: 0.0,
                begin_pressure: bytes::u16_be(&header[8..10]) as f64 / 100.0,
                end_pressure: bytes::u16_be(&header[10..12]) as f64 / 100.0,
            })),
            FieldType::Tank => Err(Error::InvalidArgs("tank index out of range")),
            FieldType::DiveMode => Ok(Field::DiveMode(DiveMode::OpenCircuit)),
            _ => Err(Error::Unsupported),
        }
    }

    fn samples_foreach(&mut self, callback: SampleCallback<'_>) -> Result<()> {
        let interval = self.interval()?;
        for (i, &depth_ft) in self.data[HEADER_SIZE..].iter().enumerate() {
            callback(Sample::Time((i as u32 + 1) * interval));
            if i == 0 {
                callback(Sample::Gasmix(0));
            }
            callback(Sample::Depth(f64::from(depth_ft) * FEET));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_dive() -> Vec<u8> {
        let mut data = vec![
            0x95, 0x07, 0x23, 0x11, 0x30, 0x00, // 1995-07-23 11:30:00
            20,   // interval
            0,    // air
            0x4E, 0x20, // 200.00 bar
            0x13, 0x88, // 50.00 bar
        ];
        data.extend_from_slice(&[33, 66, 33]);
        data
    }

    #[test]
    fn test_header_and_samples() {
        let mut parser = EonParser::new();
        parser.set_data(&build_dive()).unwrap();

        let datetime = parser.datetime().unwrap();
        assert_eq!(datetime.year(), 1995);
        assert_eq!(datetime.minute(), 30);

        let Field::Tank(tank) = parser.field(FieldType::Tank, 0).unwrap() else {
            panic!("wrong field variant");
        };
        assert!((tank.begin_pressure - 200.0).abs() < 1e-9);
        assert!((tank.end_pressure - 50.0).abs() < 1e-9);

        let mut count = 0;
        parser
            .samples_foreach(&mut |sample| {
                if let Sample::Depth(_) = sample {
                    count += 1;
                }
            })
            .unwrap();
        assert_eq!(count, 3);
    }
}
