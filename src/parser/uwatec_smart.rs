//! Parser for the Uwatec Smart generation (Smart Pro/Com/Tec/Z, Galileo,
//! Meridian). Dives carry a device-epoch timestamp and fixed-size records
//! with depth, tank pressure and temperature.

use crate::bytes;
use crate::common::Family;
use crate::error::{Error, Result};
use crate::parser::types::*;
use crate::parser::{Parser, SampleCallback};

const HEADER_SIZE: usize = 10;
const RECORD_SIZE: usize = 6;
const INTERVAL: u32 = 4;

/// Half seconds since 2000-01-01 00:00:00.
const EPOCH: jiff::civil::DateTime = jiff::civil::DateTime::constant(2000, 1, 1, 0, 0, 0, 0);

const ALARM_ASCENT: u8 = 0x01;
const ALARM_RBT: u8 = 0x02;

pub struct SmartParser {
    #[expect(dead_code, reason = "kept for model-specific record layouts")]
    model: u32,
    data: Vec<u8>,
}

impl SmartParser {
    pub fn new(model: u32) -> Self {
        Self {
            model,
            data: Vec::new(),
        }
    }

    fn profile(&self) -> Result<&[u8]> {
        if self.data.len() < HEADER_SIZE {
            return Err(Error::DataFormat("dive header truncated"));
        }
        Ok(&self.data[HEADER_SIZE..])
    }
}

impl Parser for SmartParser {
    fn family(&self) -> Family {
        Family::UwatecSmart
    }

    fn set_data(&mut self, data: &[u8]) -> Result<()> {
        self.data = data.to_vec();
        Ok(())
    }

    fn datetime(&mut self) -> Result<jiff::civil::DateTime> {
        if self.data.len() < HEADER_SIZE {
            return Err(Error::DataFormat("dive header truncated"));
        }
        let ticks = bytes::u32_le(&self.data[4..8]) as i64;
        EPOCH
            .checked_add(jiff::Span::new().seconds(ticks / 2))
            .map_err(|_| Error::DataFormat("timestamp out of range"))
    }

    fn field(&mut self, kind: FieldType, index: u32) -> Result<Field> {
        let profile = self.profile()?;
        let records = (profile.len() / RECORD_SIZE) as u32;
        let o2 = self.data[8] as u32;
        match kind {
            FieldType::DiveTime => Ok(Field::DiveTime(records * INTERVAL)),
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
            FieldType::TankCount => Ok(Field::TankCount(1)),
            FieldType::Tank if index == 0 => {
                let mut begin = 0.0;
                let mut end = 0.0;
                for (i, record) in profile.chunks_exact(RECORD_SIZE).enumerate() {
                    let pressure = bytes::u16_le(&record[2..4]) as f64 / 100.0;
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
            FieldType::Tank => Err(Error::InvalidArgs("tank index out of range")),
            FieldType::DiveMode => Ok(Field::DiveMode(DiveMode::OpenCircuit)),
            _ => Err(Error::Unsupported),
        }
    }

    fn samples_foreach(&mut self, callback: SampleCallback<'_>) -> Result<()> {
        let profile = self.profile()?;
        for (i, record) in profile.chunks_exact(RECORD_SIZE).enumerate() {
            callback(Sample::Time((i as u32 + 1) * INTERVAL));
            if i == 0 {
                callback(Sample::Gasmix(0));
            }
            callback(Sample::Depth(bytes::u16_le(record) as f64 / 100.0));
            callback(Sample::Pressure {
                tank: 0,
                value: bytes::u16_le(&record[2..4]) as f64 / 100.0,
            });
            callback(Sample::Temperature(f64::from(record[4] as i8)));

            let alarms = record[5];
            if alarms & ALARM_ASCENT != 0 {
                callback(Sample::Event(SampleEvent {
                    kind: EventKind::Ascent,
                    time: 0,
                    flags: EventFlags::empty(),
                    value: 0,
                }));
            }
            if alarms & ALARM_RBT != 0 {
                callback(Sample::Event(SampleEvent {
                    kind: EventKind::Rbt,
                    time: 0,
                    flags: EventFlags::empty(),
                    value: 0,
                }));
            }
        }
        Ok(())
    }
}
