//! Parser for the Suunto EON Steel dive files: a device-epoch timestamp,
//! a gas table, then a self-describing `[type][length][payload]` record
//! stream at a variable sample rate.

use crate::bytes;
use crate::common::Family;
use crate::error::{Error, Result};
use crate::parser::types::*;
use crate::parser::{Parser, SampleCallback};

/// Device epoch: seconds since 2000-01-01 00:00:00 local time.
const EPOCH: jiff::civil::DateTime = jiff::civil::DateTime::constant(2000, 1, 1, 0, 0, 0, 0);

const REC_TIME: u8 = 0x01;
const REC_DEPTH: u8 = 0x02;
const REC_TEMPERATURE: u8 = 0x03;
const REC_PRESSURE: u8 = 0x04;
const REC_GASMIX: u8 = 0x05;
const REC_PPO2: u8 = 0x06;
const REC_SETPOINT: u8 = 0x07;
const REC_CNS: u8 = 0x08;
const REC_DECO: u8 = 0x09;
const REC_VENDOR: u8 = 0x7F;

#[derive(Debug)]
struct Cache {
    mode: DiveMode,
    mixes: Vec<Gasmix>,
    header: usize,
    divetime: u32,
    maxdepth: f64,
}

pub struct EonSteelParser {
    data: Vec<u8>,
    cache: Option<Cache>,
}

impl EonSteelParser {
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            cache: None,
        }
    }

    fn cache(&mut self) -> Result<&Cache> {
        if self.cache.is_none() {
            let (mode, mixes, header) = Self::scan_header(&self.data)?;
            let mut divetime = 0;
            let mut maxdepth: f64 = 0.0;
            Self::walk(&self.data, header, &mixes, &mut |sample| match sample {
                Sample::Time(t) => divetime = t,
                Sample::Depth(d) => maxdepth = maxdepth.max(d),
                _ => {}
            })?;
            self.cache = Some(Cache {
                mode,
                mixes,
                header,
                divetime,
                maxdepth,
            });
        }
        self.cache.as_ref().ok_or(Error::DataFormat("no dive data"))
    }

    fn scan_header(data: &[u8]) -> Result<(DiveMode, Vec<Gasmix>, usize)> {
        if data.len() < 6 {
            return Err(Error::DataFormat("dive header truncated"));
        }
        let mode = match data[4] {
            0 => DiveMode::OpenCircuit,
            1 => DiveMode::ClosedCircuit,
            2 => DiveMode::Gauge,
            3 => DiveMode::Freedive,
            _ => return Err(Error::DataFormat("unknown dive mode")),
        };
        let ngases = data[5] as usize;
        if ngases == 0 || ngases > 10 {
            return Err(Error::DataFormat("gas mix count out of range"));
        }
        let header = 6 + ngases * 2;
        if data.len() < header {
            return Err(Error::DataFormat("gas table truncated"));
        }
        let mut mixes = Vec::with_capacity(ngases);
        for i in 0..ngases {
            let o2 = data[6 + i * 2] as u32;
            let he = data[7 + i * 2] as u32;
            if o2 + he > 100 {
                return Err(Error::DataFormat("gas fractions exceed 100%"));
            }
            mixes.push(Gasmix::from_percent(if o2 == 0 { 21 } else { o2 }, he));
        }
        Ok((mode, mixes, header))
    }

    fn walk(
        data: &[u8],
        header: usize,
        mixes: &[Gasmix],
        callback: SampleCallback<'_>,
    ) -> Result<()> {
        let mut offset = header;
        let mut have_time = false;
        while offset + 2 <= data.len() {
            let kind = data[offset];
            let len = data[offset + 1] as usize;
            offset += 2;
            if offset + len > data.len() {
                return Err(Error::DataFormat("record payload truncated"));
            }
            let payload = &data[offset..offset + len];
            offset += len;

            if kind == REC_TIME {
                if len != 4 {
                    return Err(Error::DataFormat("bad time record length"));
                }
                callback(Sample::Time(bytes::u32_le(payload)));
                have_time = true;
                continue;
            }
            if !have_time {
                return Err(Error::DataFormat("sample record before first timestamp"));
            }

            match (kind, len) {
                (REC_DEPTH, 2) => {
                    callback(Sample::Depth(bytes::u16_le(payload) as f64 / 100.0));
                }
                (REC_TEMPERATURE, 2) => {
                    let raw = bytes::u16_le(payload) as i16;
                    callback(Sample::Temperature(f64::from(raw) / 10.0));
                }
                (REC_PRESSURE, 3) => {
                    callback(Sample::Pressure {
                        tank: payload[0] as u32,
                        value: bytes::u16_le(&payload[1..]) as f64 / 100.0,
                    });
                }
                (REC_GASMIX, 1) => {
                    let idx = payload[0] as u32;
                    if idx as usize >= mixes.len() {
                        return Err(Error::DataFormat("gas change outside the mix table"));
                    }
                    callback(Sample::Gasmix(idx));
                }
                (REC_PPO2, 2) => {
                    callback(Sample::Ppo2(bytes::u16_le(payload) as f64 / 1000.0));
                }
                (REC_SETPOINT, 2) => {
                    callback(Sample::Setpoint(bytes::u16_le(payload) as f64 / 1000.0));
                }
                (REC_CNS, 1) => {
                    callback(Sample::Cns(payload[0] as f64 / 100.0));
                }
                (REC_DECO, 5) => {
                    let kind = match payload[0] {
                        0 => DecoKind::Ndl,
                        1 => DecoKind::SafetyStop,
                        2 => DecoKind::DecoStop,
                        3 => DecoKind::DeepStop,
                        _ => return Err(Error::DataFormat("unknown deco kind")),
                    };
                    callback(Sample::Deco(Deco {
                        kind,
                        time: bytes::u16_le(&payload[1..3]) as u32,
                        depth: bytes::u16_le(&payload[3..5]) as f64 / 10.0,
                    }));
                }
                (REC_VENDOR, _) => {
                    callback(Sample::Vendor {
                        kind: u32::from(REC_VENDOR),
                        data: payload,
                    });
                }
                // Skip unknown-but-well-framed records; the format is
                // self-describing exactly so old parsers survive new
                // firmware.
                _ => {}
            }
        }
        Ok(())
    }
}

impl Default for EonSteelParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser for EonSteelParser {
    fn family(&self) -> Family {
        Family::SuuntoEonSteel
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
        let seconds = bytes::u32_le(&self.data) as i64;
        EPOCH
            .checked_add(jiff::Span::new().seconds(seconds))
            .map_err(|_| Error::DataFormat("timestamp out of range"))
    }

    fn field(&mut self, kind: FieldType, index: u32) -> Result<Field> {
        let cache = self.cache()?;
        match kind {
            FieldType::DiveTime => Ok(Field::DiveTime(cache.divetime)),
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
        self.cache()?;
        let cache = self.cache.as_ref().ok_or(Error::DataFormat("no cache"))?;
        Self::walk(&self.data, cache.header, &cache.mixes, callback)
    }
}
