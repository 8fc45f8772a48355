//! Parser for the Shearwater Predator. A dive is a run of 16-byte
//! records: an opening record (`0xFFFF`), samples, and a final record
//! (`0xFFFD`) with the sensor calibration block. There is no gas table
//! in the header; mixes are collected from the samples in order of
//! appearance.

use crate::bytes;
use crate::common::Family;
use crate::error::{Error, Result};
use crate::parser::types::*;
use crate::parser::{Parser, SampleCallback};

pub(crate) const SZ_RECORD: usize = 16;
const INTERVAL: u32 = 10;

/// Seconds since 2000-01-01 00:00:00.
const EPOCH: jiff::civil::DateTime = jiff::civil::DateTime::constant(2000, 1, 1, 0, 0, 0, 0);

#[derive(Debug)]
pub(crate) struct Cache {
    mode: DiveMode,
    mixes: Vec<Gasmix>,
    nsamples: u32,
    maxdepth: f64,
    sensor_cal: Option<[u16; 3]>,
}

pub struct PredatorParser {
    family: Family,
    serial: u32,
    data: Vec<u8>,
    cache: Option<Cache>,
}

impl PredatorParser {
    pub fn new(serial: u32) -> Self {
        Self::with_family(Family::ShearwaterPredator, serial)
    }

    pub(crate) fn with_family(family: Family, serial: u32) -> Self {
        Self {
            family,
            serial,
            data: Vec::new(),
            cache: None,
        }
    }

    fn cache(&mut self) -> Result<&Cache> {
        if self.cache.is_none() {
            let data = &self.data;
            if data.len() < 2 * SZ_RECORD || bytes::u16_be(data) != 0xFFFF {
                return Err(Error::DataFormat("opening record missing"));
            }
            let mode = match data[3] {
                0 => DiveMode::OpenCircuit,
                1 => DiveMode::ClosedCircuit,
                _ => return Err(Error::DataFormat("unknown dive mode")),
            };

            let mut mixes: Vec<Gasmix> = Vec::new();
            let mut nsamples = 0;
            let mut maxdepth: f64 = 0.0;
            let mut sensor_cal = None;
            for record in data.chunks_exact(SZ_RECORD).skip(1) {
                match bytes::u16_be(record) {
                    0xFFFD => {
                        sensor_cal = Some([
                            bytes::u16_be(&record[2..4]),
                            bytes::u16_be(&record[4..6]),
                            bytes::u16_be(&record[6..8]),
                        ]);
                        break;
                    }
                    0xFFFF => return Err(Error::DataFormat("nested opening record")),
                    _ => {}
                }
                nsamples += 1;
                maxdepth = maxdepth.max(bytes::u16_be(record) as f64 / 10.0 * FEET);

                let o2 = record[3] as u32;
                let he = record[4] as u32;
                if o2 + he > 100 {
                    return Err(Error::DataFormat("gas fractions exceed 100%"));
                }
                let mix = Gasmix::from_percent(if o2 == 0 { 21 } else { o2 }, he);
                if !mixes.iter().any(|m| {
                    (m.oxygen - mix.oxygen).abs() < 0.005 && (m.helium - mix.helium).abs() < 0.005
                }) {
                    mixes.push(mix);
                }
            }
            if mixes.is_empty() {
                mixes.push(Gasmix::default());
            }

            self.cache = Some(Cache {
                mode,
                mixes,
                nsamples,
                maxdepth,
                sensor_cal,
            });
        }
        self.cache.as_ref().ok_or(Error::DataFormat("no dive data"))
    }

    fn mix_index(mixes: &[Gasmix], o2: u32, he: u32) -> u32 {
        let wanted = Gasmix::from_percent(if o2 == 0 { 21 } else { o2 }, he);
        mixes
            .iter()
            .position(|m| {
                (m.oxygen - wanted.oxygen).abs() < 0.005 && (m.helium - wanted.helium).abs() < 0.005
            })
            .unwrap_or(0) as u32
    }
}

impl Parser for PredatorParser {
    fn family(&self) -> Family {
        self.family
    }

    fn set_data(&mut self, data: &[u8]) -> Result<()> {
        self.data = data.to_vec();
        self.cache = None;
        Ok(())
    }

    fn datetime(&mut self) -> Result<jiff::civil::DateTime> {
        if self.data.len() < SZ_RECORD || bytes::u16_be(&self.data) != 0xFFFF {
            return Err(Error::DataFormat("opening record missing"));
        }
        let seconds = bytes::u32_be(&self.data[4..8]) as i64;
        EPOCH
            .checked_add(jiff::Span::new().seconds(seconds))
            .map_err(|_| Error::DataFormat("timestamp out of range"))
    }

    fn field(&mut self, kind: FieldType, index: u32) -> Result<Field> {
        let serial = self.serial;
        let cache = self.cache()?;
        match kind {
            FieldType::DiveTime => Ok(Field::DiveTime(cache.nsamples * INTERVAL)),
            FieldType::MaxDepth => Ok(Field::MaxDepth(cache.maxdepth)),
            FieldType::GasMixCount => Ok(Field::GasMixCount(cache.mixes.len() as u32)),
            FieldType::GasMix => cache
                .mixes
                .get(index as usize)
                .cloned()
                .map(Field::GasMix)
                .ok_or(Error::InvalidArgs("gas mix index out of range")),
            FieldType::DiveMode => Ok(Field::DiveMode(cache.mode)),
            FieldType::String => match index {
                0 => Ok(Field::String(FieldString::new(
                    "Serial",
                    format!("{serial:08X}"),
                ))),
                1..=3 => {
                    let cal = cache.sensor_cal.ok_or(Error::Unsupported)?;
                    let raw = cal[(index - 1) as usize];
                    // 1024 (1000?)
                    let value = raw + 1024;
                    Ok(Field::String(FieldString::new(
                        &format!("Sensor {index} calibration"),
                        format!("{value}"),
                    )))
                }
                _ => Err(Error::Unsupported),
            },
            _ => Err(Error::Unsupported),
        }
    }

    fn samples_foreach(&mut self, callback: SampleCallback<'_>) -> Result<()> {
        self.cache()?;
        let cache = self.cache.as_ref().ok_or(Error::DataFormat("no cache"))?;
        let ccr = cache.mode == DiveMode::ClosedCircuit;

        let mut time = 0;
        let mut gas: Option<u32> = None;
        for record in self.data.chunks_exact(SZ_RECORD).skip(1) {
            match bytes::u16_be(record) {
                0xFFFD => break,
                _ => {}
            }
            time += INTERVAL;
            callback(Sample::Time(time));

            let index = Self::mix_index(&cache.mixes, record[3] as u32, record[4] as u32);
            if gas != Some(index) {
                callback(Sample::Gasmix(index));
                gas = Some(index);
            }

            callback(Sample::Depth(bytes::u16_be(record) as f64 / 10.0 * FEET));
            callback(Sample::Temperature(fahrenheit_to_celsius(f64::from(
                record[2],
            ))));
            if ccr {
                callback(Sample::Ppo2(f64::from(record[5]) / 100.0));
                callback(Sample::Setpoint(f64::from(record[9]) / 100.0));
            }
            callback(Sample::Cns(f64::from(record[8]) / 100.0));

            let stop_depth = record[7];
            if stop_depth > 0 {
                callback(Sample::Deco(Deco {
                    kind: DecoKind::DecoStop,
                    time: u32::from(record[6]) * 60,
                    depth: f64::from(stop_depth) * FEET,
                }));
            } else {
                callback(Sample::Deco(Deco {
                    kind: DecoKind::Ndl,
                    time: u32::from(record[6]) * 60,
                    depth: 0.0,
                }));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample(depth_dft: u16, o2: u8, he: u8, stop: u8) -> Vec<u8> {
        let mut record = depth_dft.to_be_bytes().to_vec();
        record.push(75); // temperature F
        record.push(o2);
        record.push(he);
        record.push(110); // ppo2
        record.push(12); // ndl/stop minutes
        record.push(stop);
        record.push(5); // cns
        record.push(130); // setpoint
        record.extend_from_slice(&[0; 6]);
        record
    }

    pub(crate) fn build_dive(mode: u8) -> Vec<u8> {
        let mut data = Vec::new();
        let mut opening = 0xFFFFu16.to_be_bytes().to_vec();
        opening.push(2); // log version
        opening.push(mode);
        opening.extend_from_slice(&0x1000u32.to_be_bytes());
        opening.extend_from_slice(&[0; 8]);
        data.extend_from_slice(&opening);

        data.extend_from_slice(&sample(450, 21, 0, 0));
        data.extend_from_slice(&sample(900, 10, 50, 10));

        let mut closing = 0xFFFDu16.to_be_bytes().to_vec();
        closing.extend_from_slice(&100u16.to_be_bytes());
        closing.extend_from_slice(&110u16.to_be_bytes());
        closing.extend_from_slice(&120u16.to_be_bytes());
        closing.extend_from_slice(&[0; 8]);
        data.extend_from_slice(&closing);
        data
    }

    #[test]
    fn test_mix_discovery_and_deco() {
        let mut parser = PredatorParser::new(0xDEAD01);
        parser.set_data(&build_dive(1)).unwrap();

        assert_eq!(
            parser.field(FieldType::GasMixCount, 0).unwrap(),
            Field::GasMixCount(2)
        );

        let mut gas_changes = Vec::new();
        let mut deco = Vec::new();
        parser
            .samples_foreach(&mut |s| match s {
                Sample::Gasmix(idx) => gas_changes.push(idx),
                Sample::Deco(d) => deco.push(d.kind),
                _ => {}
            })
            .unwrap();
        assert_eq!(gas_changes, vec![0, 1]);
        assert_eq!(deco, vec![DecoKind::Ndl, DecoKind::DecoStop]);
    }

    #[test]
    fn test_sensor_calibration_keeps_offset() {
        let mut parser = PredatorParser::new(0xDEAD01);
        parser.set_data(&build_dive(1)).unwrap();

        let Field::String(cal) = parser.field(FieldType::String, 1).unwrap() else {
            panic!("wrong field variant");
        };
        assert_eq!(cal.value, "1124");
    }
}
