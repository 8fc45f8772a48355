//! Parser for the Dive Rite NiTek Q. Three programmable mixes in the
//! header; each sample carries its active mix index next to the depth.

use crate::bytes;
use crate::common::Family;
use crate::error::{Error, Result};
use crate::parser::types::*;
use crate::parser::{Parser, SampleCallback, civil_datetime};

const HEADER_SIZE: usize = 12;
const RECORD_SIZE: usize = 3;

#[derive(Debug)]
struct Cache {
    interval: u32,
    mixes: Vec<Gasmix>,
}

pub struct NitekQParser {
    data: Vec<u8>,
    cache: Option<Cache>,
}

impl NitekQParser {
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
            let interval = data[7] as u32;
            if interval == 0 {
                return Err(Error::DataFormat("zero sample interval"));
            }
            let mut mixes = Vec::with_capacity(3);
            for i in 0..3 {
                let o2 = data[8 + i] as u32;
                if o2 == 0 {
                    break;
                }
                if o2 > 100 {
                    return Err(Error::DataFormat("gas fraction exceeds 100%"));
                }
                mixes.push(Gasmix::from_percent(o2, 0));
            }
            if mixes.is_empty() {
                mixes.push(Gasmix::default());
            }
            self.cache = Some(Cache { interval, mixes });
        }
        self.cache.as_ref().ok_or(Error::DataFormat("no dive data"))
    }
}

impl Default for NitekQParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser for NitekQParser {
    fn family(&self) -> Family {
        Family::DiveRiteNitekQ
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
        let mut parts = [0u8; 6];
        for (i, slot) in parts.iter_mut().enumerate() {
            *slot = bytes::bcd(self.data[i]).ok_or(Error::DataFormat("timestamp is not BCD"))?;
        }
        civil_datetime(
            2000 + parts[0] as i16,
            parts[1] as i8,
            parts[2] as i8,
            parts[3] as i8,
            parts[4] as i8,
            parts[5] as i8,
        )
    }

    fn field(&mut self, kind: FieldType, index: u32) -> Result<Field> {
        let records = (self.data.len().saturating_sub(HEADER_SIZE) / RECORD_SIZE) as u32;
        let cache = self.cache()?;
        match kind {
            FieldType::DiveTime => Ok(Field::DiveTime(records * cache.interval)),
            FieldType::MaxDepth => {
                let mut maxdepth: f64 = 0.0;
                for record in self.data[HEADER_SIZE..].chunks_exact(RECORD_SIZE) {
                    maxdepth = maxdepth.max(bytes::u16_le(record) as f64 / 10.0);
                }
                Ok(Field::MaxDepth(maxdepth))
            }
            FieldType::GasMixCount => Ok(Field::GasMixCount(cache.mixes.len() as u32)),
            FieldType::GasMix => cache
                .mixes
                .get(index as usize)
                .cloned()
                .map(Field::GasMix)
                .ok_or(Error::InvalidArgs("gas mix index out of range")),
            FieldType::DiveMode => Ok(Field::DiveMode(DiveMode::OpenCircuit)),
            _ => Err(Error::Unsupported),
        }
    }

    fn samples_foreach(&mut self, callback: SampleCallback<'_>) -> Result<()> {
        self.cache()?;
        let cache = self.cache.as_ref().ok_or(Error::DataFormat("no cache"))?;

        let mut gas: Option<u32> = None;
        for (i, record) in self.data[HEADER_SIZE..]
            .chunks_exact(RECORD_SIZE)
            .enumerate()
        {
            callback(Sample::Time((i as u32 + 1) * cache.interval));
            let index = u32::from(record[2] & 0x03);
            if index as usize >= cache.mixes.len() {
                return Err(Error::DataFormat("gas change outside the mix table"));
            }
            if gas != Some(index) {
                callback(Sample::Gasmix(index));
                gas = Some(index);
            }
            callback(Sample::Depth(bytes::u16_le(record) as f64 / 10.0));
        }
        Ok(())
    }
}
