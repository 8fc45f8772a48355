//! Parser for the Mares Nemo and Puck ranges. The model byte picks the
//! record layout: air-integrated variants interleave tank pressure with
//! the depth words.

use crate::bytes;
use crate::common::Family;
use crate::error::{Error, Result};
use crate::parser::types::*;
use crate::parser::{Parser, SampleCallback, civil_datetime};

const HEADER_SIZE: usize = 8;

const MODEL_NEMO: u32 = 0x00;
const MODEL_NEMO_WIDE: u32 = 0x01;
const MODEL_NEMO_AIR: u32 = 0x02;
const MODEL_PUCK: u32 = 0x07;
const MODEL_PUCK_AIR: u32 = 0x18;

pub struct NemoParser {
    model: u32,
    data: Vec<u8>,
}

impl NemoParser {
    pub fn new(model: u32) -> Self {
        Self {
            model,
            data: Vec::new(),
        }
    }

    fn record_size(&self) -> usize {
        match self.model {
            MODEL_NEMO_AIR | MODEL_PUCK_AIR => 4,
            MODEL_NEMO | MODEL_NEMO_WIDE | MODEL_PUCK => 2,
            _ => 2,
        }
    }

    fn air_integrated(&self) -> bool {
        self.record_size() == 4
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

impl Parser for NemoParser {
    fn family(&self) -> Family {
        Family::MaresNemo
    }

    fn set_data(&mut self, data: &[u8]) -> Result<()> {
        self.data = data.to_vec();
        Ok(())
    }

    fn datetime(&mut self) -> Result<jiff::civil::DateTime> {
        let header = self.header()?;
        civil_datetime(
            2000 + header[0] as i16,
            header[1] as i8,
            header[2] as i8,
            header[3] as i8,
            header[4] as i8,
            0,
        )
    }

    fn field(&mut self, kind: FieldType, index: u32) -> Result<Field> {
        let interval = self.interval()?;
        let record = self.record_size();
        let profile = &self.data[HEADER_SIZE..];
        let records = (profile.len() / record) as u32;
        let o2 = self.data[5] as u32;
        match kind {
            FieldType::DiveTime => Ok(Field::DiveTime(records * interval)),
            FieldType::MaxDepth => {
                let mut maxdepth: f64 = 0.0;
                for sample in profile.chunks_exact(record) {
                    maxdepth = maxdepth.max(bytes::u16_le(sample) as f64 / 100.0);
                }
                Ok(Field::MaxDepth(maxdepth))
            }
            FieldType::GasMixCount => Ok(Field::GasMixCount(1)),
            FieldType::GasMix if index == 0 => Ok(Field::GasMix(Gasmix::from_percent(
                if o2 == 0 { 21 } else { o2 },
                0,
            ))),
            FieldType::GasMix => Err(Error::InvalidArgs("gas mix index out of range")),
            FieldType::TankCount if self.air_integrated() => Ok(Field::TankCount(1)),
            FieldType::Tank if self.air_integrated() && index == 0 => {
                let mut begin = 0.0;
                let mut end = 0.0;
                for (i, sample) in profile.chunks_exact(record).enumerate() {
                    let pressure = bytes::u16_le(&sample[2..4]) as f64 / 100.0;
                    if i == 0 {
                        begin = pressure;
                    }
                    end = pressure;
                }
                Ok(Field::Tank(Tank {
                    gasmix: Some(0),
                    kind: TankKind::Metric,
                    volume: 0.0,
                    work_pressure: 0.0,
                    begin_pressure: begin,
                    end_pressure: end,
                }))
            }
            FieldType::DiveMode => Ok(Field::DiveMode(DiveMode::OpenCircuit)),
            _ => Err(Error::Unsupported),
        }
    }

    fn samples_foreach(&mut self, callback: SampleCallback<'_>) -> Result<()> {
        let interval = self.interval()?;
        let record = self.record_size();
        let air = self.air_integrated();
        for (i, sample) in self.data[HEADER_SIZE..].chunks_exact(record).enumerate() {
            callback(Sample::Time((i as u32 + 1) * interval));
            if i == 0 {
                callback(Sample::Gasmix(0));
            }
            callback(Sample::Depth(bytes::u16_le(sample) as f64 / 100.0));
            if air {
                callback(Sample::Pressure {
                    tank: 0,
                    value: bytes::u16_le(&sample[2..4]) as f64 / 100.0,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_dive(air: bool) -> Vec<u8> {
        let mut data = vec![23, 4, 18, 9, 15, 0, 5, 0];
        for depth in [500u16, 1200, 800] {
            data.extend_from_slice(&depth.to_le_bytes());
            if air {
                data.extend_from_slice(&18000u16.to_le_bytes());
            }
        }
        data
    }

    #[test]
    fn test_puck_records() {
        let mut parser = NemoParser::new(MODEL_PUCK);
        parser.set_data(&build_dive(false)).unwrap();

        let Field::MaxDepth(depth) = parser.field(FieldType::MaxDepth, 0).unwrap() else {
            panic!("wrong field variant");
        };
        assert!((depth - 12.0).abs() < 1e-9);
        assert!(matches!(
            parser.field(FieldType::TankCount, 0),
            Err(Error::Unsupported)
        ));
    }

    #[test]
    fn test_air_model_reads_pressure() {
        let mut parser = NemoParser::new(MODEL_NEMO_AIR);
        parser.set_data(&build_dive(true)).unwrap();

        let mut pressures = Vec::new();
        parser
            .samples_foreach(&mut |sample| {
                if let Sample::Pressure { value, .. } = sample {
                    pressures.push(value);
                }
            })
            .unwrap();
        assert_eq!(pressures.len(), 3);
        assert!((pressures[0] - 180.0).abs() < 1e-9);
    }
}
