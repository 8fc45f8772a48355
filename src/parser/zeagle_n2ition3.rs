//! Parser for the Zeagle N2iTiON3: a 16-byte logbook entry ahead of
//! metric 4-byte profile records.

use crate::bytes;
use crate::common::Family;
use crate::error::{Error, Result};
use crate::parser::types::*;
use crate::parser::{Parser, SampleCallback, civil_datetime};

const HEADER_SIZE: usize = 0x10;
const RECORD_SIZE: usize = 4;

const INTERVALS: [u32; 4] = [15, 30, 60, 120];

const EVENT_ASCENT: u8 = 0x01;
const EVENT_DECO: u8 = 0x04;

pub struct N2ition3Parser {
    data: Vec<u8>,
}

impl N2ition3Parser {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    fn interval(&self) -> Result<u32> {
        if self.data.len() < HEADER_SIZE {
            return Err(Error::DataFormat("logbook entry truncated"));
        }
        Ok(INTERVALS[(self.data[7] >> 4 & 0x03) as usize])
    }
}

impl Default for N2ition3Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser for N2ition3Parser {
    fn family(&self) -> Family {
        Family::ZeagleN2ition3
    }

    fn set_data(&mut self, data: &[u8]) -> Result<()> {
        self.data = data.to_vec();
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
        let interval = self.interval()?;
        let profile = &self.data[HEADER_SIZE..];
        let records = (profile.len() / RECORD_SIZE) as u32;
        let o2 = self.data[6] as u32;
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
        let mut in_deco = false;
        for (i, record) in self.data[HEADER_SIZE..]
            .chunks_exact(RECORD_SIZE)
            .enumerate()
        {
            callback(Sample::Time((i as u32 + 1) * interval));
            if i == 0 {
                callback(Sample::Gasmix(0));
            }
            callback(Sample::Depth(bytes::u16_le(record) as f64 / 100.0));
            callback(Sample::Temperature(f64::from(record[2] as i8)));

            let events = record[3];
            if events & EVENT_ASCENT != 0 {
                callback(Sample::Event(SampleEvent {
                    kind: EventKind::Ascent,
                    time: 0,
                    flags: EventFlags::empty(),
                    value: 0,
                }));
            }
            let deco = events & EVENT_DECO != 0;
            if deco != in_deco {
                callback(Sample::Event(SampleEvent {
                    kind: EventKind::Deco,
                    time: 0,
                    flags: if deco {
                        EventFlags::BEGIN
                    } else {
                        EventFlags::END
                    },
                    value: 0,
                }));
                in_deco = deco;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_profile() {
        let mut data = vec![0u8; HEADER_SIZE];
        data[0..6].copy_from_slice(&[0x21, 0x02, 0x14, 0x09, 0x00, 0x00]);
        data[6] = 0;
        data[7] = 0x00; // 15 s
        for (depth, temp, events) in [(900u16, 21i8, 0u8), (1500, 19, EVENT_DECO), (700, 19, 0)] {
            data.extend_from_slice(&depth.to_le_bytes());
            data.push(temp as u8);
            data.push(events);
        }

        let mut parser = N2ition3Parser::new();
        parser.set_data(&data).unwrap();

        let mut deco_flags = Vec::new();
        parser
            .samples_foreach(&mut |sample| {
                if let Sample::Event(event) = sample
                    && event.kind == EventKind::Deco
                {
                    deco_flags.push(event.flags);
                }
            })
            .unwrap();
        assert_eq!(deco_flags, vec![EventFlags::BEGIN, EventFlags::END]);

        let datetime = parser.datetime().unwrap();
        assert_eq!(datetime.year(), 2021);
        assert_eq!(datetime.month(), 2);
    }
}
