//! Parser for the Oceanic Atom 2 dive format: a 16-byte logbook entry
//! (BCD timestamp, gas, tank pressure bracket, profile pointers) followed
//! by 8-byte profile records in imperial units.

use crate::bytes;
use crate::common::Family;
use crate::error::{Error, Result};
use crate::parser::types::*;
use crate::parser::{Parser, SampleCallback, civil_datetime};

const HEADER_SIZE: usize = 0x10;
const RECORD_SIZE: usize = 8;

const INTERVALS: [u32; 4] = [15, 30, 60, 120];

const EVENT_ASCENT: u8 = 0x01;
const EVENT_SAFETY_STOP: u8 = 0x02;

/// Some firmware revisions only store the final digit of the year. Trust
/// the host clock for the decade, but only once it is actually past 2010.
pub(crate) fn resolve_year(two_digit: u8) -> i16 {
    let mut year = 2000 + two_digit as i16;
    if two_digit < 10 {
        let now = jiff::Zoned::now().date().year();
        if now >= 2010 {
            year = (now / 10) * 10 + two_digit as i16;
            if year > now {
                year -= 10;
            }
        }
    }
    year
}

#[derive(Debug)]
struct Cache {
    interval: u32,
    mix: Gasmix,
    salinity: Salinity,
    divetime: u32,
    maxdepth: f64,
}

/// OEM badges that write the timestamp day first instead of year first.
const MODELS_DAY_FIRST: [u32; 2] = [0x4154, 0x4744];

pub struct Atom2Parser {
    model: u32,
    data: Vec<u8>,
    cache: Option<Cache>,
}

impl Atom2Parser {
    pub fn new(model: u32) -> Self {
        Self {
            model,
            data: Vec::new(),
            cache: None,
        }
    }

    fn cache(&mut self) -> Result<&Cache> {
        if self.cache.is_none() {
            if self.data.len() < HEADER_SIZE {
                return Err(Error::DataFormat("logbook entry truncated"));
            }
            let header = &self.data[..HEADER_SIZE];
            let o2 = header[6] as u32;
            let flags = header[7];
            let interval = INTERVALS[(flags >> 4 & 0x03) as usize];
            let salinity = if flags & 0x01 != 0 {
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

            let records = (self.data.len() - HEADER_SIZE) / RECORD_SIZE;
            let mut maxdepth: f64 = 0.0;
            for i in 0..records {
                let record = &self.data[HEADER_SIZE + i * RECORD_SIZE..];
                maxdepth = maxdepth.max(bytes::u16_le(record) as f64 / 16.0 * FEET);
            }

            self.cache = Some(Cache {
                interval,
                mix: Gasmix::from_percent(if o2 == 0 { 21 } else { o2 }, 0),
                salinity,
                divetime: records as u32 * interval,
                maxdepth,
            });
        }
        self.cache.as_ref().ok_or(Error::DataFormat("no dive data"))
    }
}

impl Parser for Atom2Parser {
    fn family(&self) -> Family {
        Family::OceanicAtom2
    }

    fn set_data(&mut self, data: &[u8]) -> Result<()> {
        self.data = data.to_vec();
        self.cache = None;
        Ok(())
    }

    fn datetime(&mut self) -> Result<jiff::civil::DateTime> {
        if self.data.len() < HEADER_SIZE {
            return Err(Error::DataFormat("logbook entry truncated"));
        }
        let mut parts = [0u8; 6];
        for (i, slot) in parts.iter_mut().enumerate() {
            *slot = bytes::bcd(self.data[i]).ok_or(Error::DataFormat("timestamp is not BCD"))?;
        }
        let (year, month, day) = if MODELS_DAY_FIRST.contains(&self.model) {
            (parts[2], parts[1], parts[0])
        } else {
            (parts[0], parts[1], parts[2])
        };
        civil_datetime(
            resolve_year(year),
            month as i8,
            day as i8,
            parts[3] as i8,
            parts[4] as i8,
            parts[5] as i8,
        )
    }

    fn field(&mut self, kind: FieldType, index: u32) -> Result<Field> {
        let begin = if self.data.len() >= HEADER_SIZE {
            bytes::u16_le(&self.data[8..10]) as f64 * PSI
        } else {
            0.0
        };
        let end = if self.data.len() >= HEADER_SIZE {
            bytes::u16_le(&self.data[10..12]) as f64 * PSI
        } else {
            0.0
        };
        let cache = self.cache()?;
        match kind {
            FieldType::DiveTime => Ok(Field::DiveTime(cache.divetime)),
            FieldType::MaxDepth => Ok(Field::MaxDepth(cache.maxdepth)),
            FieldType::GasMixCount => Ok(Field::GasMixCount(1)),
            FieldType::GasMix if index == 0 => Ok(Field::GasMix(cache.mix.clone())),
            FieldType::GasMix => Err(Error::InvalidArgs("gas mix index out of range")),
            FieldType::Salinity => Ok(Field::Salinity(cache.salinity.clone())),
            FieldType::TankCount => Ok(Field::TankCount(1)),
            FieldType::Tank if index == 0 => Ok(Field::Tank(Tank {
                gasmix: Some(0),
                kind: TankKind::Imperial,
                volume: 0.0,
                work_pressure: 0.0,
                begin_pressure: begin,
                end_pressure: end,
            })),
            FieldType::Tank => Err(Error::InvalidArgs("tank index out of range")),
            FieldType::DiveMode => Ok(Field::DiveMode(DiveMode::OpenCircuit)),
            _ => Err(Error::Unsupported),
        }
    }

    fn samples_foreach(&mut self, callback: SampleCallback<'_>) -> Result<()> {
        self.cache()?;
        let cache = self.cache.as_ref().ok_or(Error::DataFormat("no cache"))?;
        let profile = &self.data[HEADER_SIZE..];

        let mut in_safety_stop = false;
        for (i, record) in profile.chunks_exact(RECORD_SIZE).enumerate() {
            callback(Sample::Time((i as u32 + 1) * cache.interval));
            if i == 0 {
                callback(Sample::Gasmix(0));
            }
            callback(Sample::Depth(bytes::u16_le(record) as f64 / 16.0 * FEET));
            callback(Sample::Temperature(fahrenheit_to_celsius(f64::from(
                record[2],
            ))));
            callback(Sample::Pressure {
                tank: 0,
                value: bytes::u16_le(&record[3..5]) as f64 * PSI,
            });

            let events = record[5];
            if events & EVENT_ASCENT != 0 {
                callback(Sample::Event(SampleEvent {
                    kind: EventKind::Ascent,
                    time: 0,
                    flags: EventFlags::empty(),
                    value: 0,
                }));
            }
            // The wire only flags presence; begin/end comes from the
            // transition.
            let stop = events & EVENT_SAFETY_STOP != 0;
            if stop != in_safety_stop {
                callback(Sample::Event(SampleEvent {
                    kind: EventKind::SafetyStop,
                    time: 0,
                    flags: if stop {
                        EventFlags::BEGIN
                    } else {
                        EventFlags::END
                    },
                    value: 0,
                }));
                in_safety_stop = stop;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_dive() -> Vec<u8> {
        let mut data = vec![
            0x23, 0x06, 0x15, 0x14, 0x45, 0x30, // 2023-06-15 14:45:30
            36,   // EAN36
            0x01, // salt, 15 s interval
            0xB8, 0x0B, // 3000 psi
            0xE8, 0x03, // 1000 psi
            0, 0, 0, 0, // profile pointers, unused here
        ];
        // depth 528/16 = 33 ft, 77 F, 2900 psi, safety stop flagged
        let mut record = Vec::new();
        record.extend_from_slice(&528u16.to_le_bytes());
        record.push(77);
        record.extend_from_slice(&2900u16.to_le_bytes());
        record.push(EVENT_SAFETY_STOP);
        record.extend_from_slice(&[0, 0]);
        data.extend_from_slice(&record);
        // second record, stop cleared
        let mut record = Vec::new();
        record.extend_from_slice(&264u16.to_le_bytes());
        record.push(78);
        record.extend_from_slice(&2850u16.to_le_bytes());
        record.push(0);
        record.extend_from_slice(&[0, 0]);
        data.extend_from_slice(&record);
        data
    }

    #[test]
    fn test_imperial_conversions() {
        let mut parser = Atom2Parser::new(0x4342);
        parser.set_data(&build_dive()).unwrap();

        let mut depths = Vec::new();
        let mut pressures = Vec::new();
        parser
            .samples_foreach(&mut |sample| match sample {
                Sample::Depth(d) => depths.push(d),
                Sample::Pressure { value, .. } => pressures.push(value),
                _ => {}
            })
            .unwrap();

        assert!((depths[0] - 33.0 * FEET).abs() < 1e-9);
        assert!((pressures[0] - 2900.0 * PSI).abs() < 1e-9);

        let datetime = parser.datetime().unwrap();
        assert_eq!(datetime.year(), 2023);
        assert_eq!(datetime.second(), 30);
    }

    #[test]
    fn test_safety_stop_begin_end_derivation() {
        let mut parser = Atom2Parser::new(0x4342);
        parser.set_data(&build_dive()).unwrap();

        let mut stops = Vec::new();
        parser
            .samples_foreach(&mut |sample| {
                if let Sample::Event(event) = sample
                    && event.kind == EventKind::SafetyStop
                {
                    stops.push(event.flags);
                }
            })
            .unwrap();
        assert_eq!(stops, vec![EventFlags::BEGIN, EventFlags::END]);
    }

    #[test]
    fn test_salinity_flag() {
        let mut parser = Atom2Parser::new(0x4342);
        parser.set_data(&build_dive()).unwrap();
        let Field::Salinity(salinity) = parser.field(FieldType::Salinity, 0).unwrap() else {
            panic!("wrong field variant");
        };
        assert_eq!(salinity.water, Water::Salt);
    }
}
