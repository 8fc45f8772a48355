//! Parser for the Mares Icon HD generation. The header leads with a
//! packed datetime bitfield and a three-slot gas table.

use crate::bytes;
use crate::common::Family;
use crate::error::{Error, Result};
use crate::parser::types::*;
use crate::parser::{Parser, SampleCallback, civil_datetime};

const HEADER_SIZE: usize = 16;

const MODEL_ICON_AIR: u32 = 0x15;
const MODEL_QUAD_AIR: u32 = 0x23;
const MODEL_SMART_AIR: u32 = 0x24;

/// Bit layout: 0-4 hour, 5-10 minute, 11-15 day, 16-19 month, 20-31
/// absolute year.
fn unpack_datetime(packed: u32) -> Result<jiff::civil::DateTime> {
    let hour = packed & 0x1F;
    let minute = packed >> 5 & 0x3F;
    let day = packed >> 11 & 0x1F;
    let month = packed >> 16 & 0x0F;
    let year = (packed >> 20 & 0x0FFF) as i16;
    civil_datetime(
        year,
        month as i8,
        day as i8,
        hour as i8,
        minute as i8,
        0,
    )
}

#[derive(Debug)]
struct Cache {
    interval: u32,
    mode: DiveMode,
    mixes: Vec<Gasmix>,
    nsamples: usize,
    maxdepth: f64,
}

pub struct IconHdParser {
    model: u32,
    data: Vec<u8>,
    cache: Option<Cache>,
}

impl IconHdParser {
    pub fn new(model: u32) -> Self {
        Self {
            model,
            data: Vec::new(),
            cache: None,
        }
    }

    /// Air-integrated models append a tank pressure word to each record.
    fn record_size(&self) -> usize {
        match self.model {
            MODEL_ICON_AIR | MODEL_QUAD_AIR | MODEL_SMART_AIR => 6,
            _ => 4,
        }
    }

    fn cache(&mut self) -> Result<&Cache> {
        if self.cache.is_none() {
            let record = self.record_size();
            let data = &self.data;
            if data.len() < HEADER_SIZE {
                return Err(Error::DataFormat("dive header truncated"));
            }
            let nsamples = bytes::u16_le(&data[4..6]) as usize;
            let interval = data[6] as u32;
            if interval == 0 {
                return Err(Error::DataFormat("zero sample interval"));
            }
            if HEADER_SIZE + nsamples * record > data.len() {
                return Err(Error::DataFormat("sample stream truncated"));
            }
            let mode = match data[7] & 0x0F {
                0 | 1 => DiveMode::OpenCircuit,
                4 => DiveMode::Gauge,
                5 => DiveMode::Freedive,
                _ => return Err(Error::DataFormat("unknown dive mode")),
            };

            let mut mixes = Vec::new();
            for i in 0..3 {
                let o2 = data[8 + i * 2] as u32;
                let he = data[9 + i * 2] as u32;
                if o2 == 0 {
                    break;
                }
                if o2 + he > 100 {
                    return Err(Error::DataFormat("gas fractions exceed 100%"));
                }
                mixes.push(Gasmix::from_percent(o2, he));
            }
            if mixes.is_empty() {
                mixes.push(Gasmix::default());
            }

            let mut maxdepth: f64 = 0.0;
            for i in 0..nsamples {
                let sample = &data[HEADER_SIZE + i * record..];
                maxdepth = maxdepth.max(bytes::u16_le(sample) as f64 / 10.0);
            }

            self.cache = Some(Cache {
                interval,
                mode,
                mixes,
                nsamples,
                maxdepth,
            });
        }
        self.cache.as_ref().ok_or(Error::DataFormat("no dive data"))
    }
}

impl Parser for IconHdParser {
    fn family(&self) -> Family {
        Family::MaresIconHD
    }

    fn set_data(&mut self, data: &[u8]) -> Result<()> {
        self.data = data.to_vec();
        self.cache = None;
        Ok(())
    }

    fn datetime(&mut self) -> Result<jiff::civil::DateTime> {
        if self.data.len() < 4 {
            return Err(Error::DataFormat("dive header truncated"));
        }
        unpack_datetime(bytes::u32_le(&self.data))
    }

    fn field(&mut self, kind: FieldType, index: u32) -> Result<Field> {
        let cache = self.cache()?;
        match kind {
            FieldType::DiveTime => Ok(Field::DiveTime(cache.nsamples as u32 * cache.interval)),
            FieldType::MaxDepth => Ok(Field::MaxDepth(cache.maxdepth)),
            FieldType::GasMixCount => Ok(Field::GasMixCount(cache.mixes.len() as u32)),
            FieldType::GasMix => cache
                .mixes
                .get(index as usize)
                .cloned()
                .map(Field::GasMix)
                .ok_or(Error::InvalidArgs("gas mix index out of range")),
            FieldType::DiveMode => Ok(Field::DiveMode(cache.mode)),
            _ => Err(Error::Unsupported),
        }
    }

    fn samples_foreach(&mut self, callback: SampleCallback<'_>) -> Result<()> {
        let record_size = self.record_size();
        self.cache()?;
        let cache = self.cache.as_ref().ok_or(Error::DataFormat("no cache"))?;
        for i in 0..cache.nsamples {
            let record = &self.data[HEADER_SIZE + i * record_size..];
            callback(Sample::Time((i as u32 + 1) * cache.interval));
            if i == 0 {
                callback(Sample::Gasmix(0));
            }
            callback(Sample::Depth(bytes::u16_le(record) as f64 / 10.0));
            let temp = bytes::u16_le(&record[2..4]) as i16;
            callback(Sample::Temperature(f64::from(temp) / 10.0));
            if record_size == 6 {
                callback(Sample::Pressure {
                    tank: 0,
                    value: bytes::u16_le(&record[4..6]) as f64 / 100.0,
                });
            }
        }
        Ok(())
    }
}
