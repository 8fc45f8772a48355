//! Parser for the Atomic Aquatics Cobalt. Depth is not stored: the
//! profile carries absolute pressure, and the header supplies the
//! atmospheric pressure and water density the conversion needs.

use crate::bytes;
use crate::common::Family;
use crate::error::{Error, Result};
use crate::parser::types::*;
use crate::parser::{Parser, SampleCallback, civil_datetime};

const HEADER_SIZE: usize = 0x10;
const RECORD_SIZE: usize = 6;

const EVENT_ASCENT: u8 = 0x01;
const EVENT_VIOLATION: u8 = 0x02;

#[derive(Debug, Clone)]
struct Cache {
    interval: u32,
    mix: Gasmix,
    atmospheric: f64,
    salinity: Salinity,
    /// Weight density of the water column in N/m³.
    hydrostatic: f64,
}

pub struct CobaltParser {
    data: Vec<u8>,
    cache: Option<Cache>,
}

impl CobaltParser {
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            cache: None,
        }
    }

    fn cache(&mut self) -> Result<&Cache> {
        if self.cache.is_none() {
            let data = &self.data;
            if data.len() < HEADER_SIZE {
                return Err(Error::DataFormat("dive header truncated"));
            }
            let o2 = data[6] as u32;
            let he = data[7] as u32;
            if o2 + he > 100 {
                return Err(Error::DataFormat("gas fractions exceed 100%"));
            }
            let atmospheric = bytes::u16_le(&data[8..10]) as f64 / 1000.0;
            let salinity = if data[10] != 0 {
                Salinity {
                    water: Water::Salt,
                    density: DENSITY_SALT,
                }
            } else {
                Salinity {
                    water: Water::Fresh,
                    density: DENSITY_FRESH,
                }
            };
            let interval = data[12] as u32;
            if interval == 0 {
                return Err(Error::DataFormat("zero sample interval"));
            }
            self.cache = Some(Cache {
                interval,
                mix: Gasmix::from_percent(if o2 == 0 { 21 } else { o2 }, he),
                atmospheric,
                hydrostatic: salinity.density * GRAVITY,
                salinity,
            });
        }
        self.cache.as_ref().ok_or(Error::DataFormat("no dive data"))
    }

    fn depth(cache: &Cache, millibar: u16) -> f64 {
        let delta = f64::from(millibar) / 1000.0 - cache.atmospheric;
        if delta <= 0.0 {
            0.0
        } else {
            delta * BAR / cache.hydrostatic
        }
    }
}

impl Default for CobaltParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser for CobaltParser {
    fn family(&self) -> Family {
        Family::AtomicsCobalt
    }

    fn set_data(&mut self, data: &[u8]) -> Result<()> {
        self.data = data.to_vec();
        self.cache = None;
        Ok(())
    }

    fn datetime(&mut self) -> Result<jiff::civil::DateTime> {
        if self.data.len() < HEADER_SIZE {
            return Err(Error::DataFormat("dive header truncated"));
        }
        civil_datetime(
            bytes::u16_le(&self.data[0..2]) as i16,
            self.data[2] as i8,
            self.data[3] as i8,
            self.data[4] as i8,
            self.data[5] as i8,
            0,
        )
    }

    fn field(&mut self, kind: FieldType, index: u32) -> Result<Field> {
        let records = (self.data.len().saturating_sub(HEADER_SIZE) / RECORD_SIZE) as u32;
        let cache = self.cache()?.clone();
        let cache = &cache;
        match kind {
            FieldType::DiveTime => Ok(Field::DiveTime(records * cache.interval)),
            FieldType::MaxDepth => {
                let mut maxdepth: f64 = 0.0;
                for record in self.data[HEADER_SIZE..].chunks_exact(RECORD_SIZE) {
                    maxdepth = maxdepth.max(Self::depth(cache, bytes::u16_le(record)));
                }
                Ok(Field::MaxDepth(maxdepth))
            }
            FieldType::GasMixCount => Ok(Field::GasMixCount(1)),
            FieldType::GasMix if index == 0 => Ok(Field::GasMix(cache.mix.clone())),
            FieldType::GasMix => Err(Error::InvalidArgs("gas mix index out of range")),
            FieldType::Atmospheric => Ok(Field::Atmospheric(cache.atmospheric)),
            FieldType::Salinity => Ok(Field::Salinity(cache.salinity.clone())),
            FieldType::TankCount => Ok(Field::TankCount(1)),
            FieldType::Tank if index == 0 => {
                let mut begin = 0.0;
                let mut end = 0.0;
                for (i, record) in self.data[HEADER_SIZE..]
                    .chunks_exact(RECORD_SIZE)
                    .enumerate()
                {
                    let pressure = bytes::u16_le(&record[2..4]) as f64 * PSI;
                    if i == 0 {
                        begin = pressure;
                    }
                    end = pressure;
                }
                Ok(Field::Tank(Tank {
                    gasmix: Some(0),
                    kind: TankKind::Imperial,
                    volume: 0.0,
                    work_pressure: 0.0,
                    begin_pressure: begin,
                    end_pressure: end,
                }))
            }
            FieldType::Tank => Err(Error::InvalidArgs("tank index out of range")),
            FieldType::DiveMode => Ok(Field::DiveMode(DiveMode::OpenCircuit)),
            _ => Err(Error::Unsupported),
        }
    }

    fn samples_foreach(&mut self, callback: SampleCallback<'_>) -> Result<()> {
        self.cache()?;
        let cache = self.cache.as_ref().ok_or(Error::DataFormat("no cache"))?;
        for (i, record) in self.data[HEADER_SIZE..]
            .chunks_exact(RECORD_SIZE)
            .enumerate()
        {
            callback(Sample::Time((i as u32 + 1) * cache.interval));
            if i == 0 {
                callback(Sample::Gasmix(0));
            }
            callback(Sample::Depth(Self::depth(cache, bytes::u16_le(record))));
            callback(Sample::Pressure {
                tank: 0,
                value: bytes::u16_le(&record[2..4]) as f64 * PSI,
            });
            callback(Sample::Temperature(f64::from(record[4] as i8)));

            let events = record[5];
            if events & EVENT_ASCENT != 0 {
                callback(Sample::Event(SampleEvent {
                    kind: EventKind::Ascent,
                    time: 0,
                    flags: EventFlags::empty(),
                    value: 0,
                }));
            }
            if events & EVENT_VIOLATION != 0 {
                callback(Sample::Event(SampleEvent {
                    kind: EventKind::Violation,
                    time: 0,
                    flags: EventFlags::empty(),
                    value: 0,
                }));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_dive(salt: bool, pressure_mbar: u16) -> Vec<u8> {
        let mut data = vec![0u8; HEADER_SIZE];
        data[0..2].copy_from_slice(&2016u16.to_le_bytes());
        data[2] = 7;
        data[3] = 4;
        data[4] = 11;
        data[5] = 20;
        data[6] = 21;
        data[8..10].copy_from_slice(&1013u16.to_le_bytes());
        data[10] = salt as u8;
        data[12] = 10; // interval
        let mut record = pressure_mbar.to_le_bytes().to_vec();
        record.extend_from_slice(&2500u16.to_le_bytes());
        record.push(22);
        record.push(0);
        data.extend_from_slice(&record);
        data
    }

    #[test]
    fn test_pressure_to_depth_conversion() {
        // 3.000 bar absolute, 1.013 bar atmospheric, salt water: the
        // 1.987 bar water column works out to 19.763 m.
        let mut parser = CobaltParser::new();
        parser.set_data(&build_dive(true, 0x0BB8)).unwrap();

        let Field::MaxDepth(depth) = parser.field(FieldType::MaxDepth, 0).unwrap() else {
            panic!("wrong field variant");
        };
        let hydrostatic = DENSITY_SALT * GRAVITY;
        let expected = (3.000 - 1.013) * BAR / hydrostatic;
        assert!((depth - expected).abs() < 1e-3);
        assert!((depth - 19.76).abs() < 0.02);
    }

    #[test]
    fn test_surface_clamps_to_zero() {
        let mut parser = CobaltParser::new();
        parser.set_data(&build_dive(false, 1000)).unwrap();
        let Field::MaxDepth(depth) = parser.field(FieldType::MaxDepth, 0).unwrap() else {
            panic!("wrong field variant");
        };
        assert_eq!(depth, 0.0);
    }

    #[test]
    fn test_idempotent_fields() {
        let mut parser = CobaltParser::new();
        parser.set_data(&build_dive(true, 2000)).unwrap();
        let first = parser.field(FieldType::MaxDepth, 0).unwrap();
        let second = parser.field(FieldType::MaxDepth, 0).unwrap();
        assert_eq!(first, second);
    }
}
