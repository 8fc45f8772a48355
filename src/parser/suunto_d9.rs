//! Parser for the Suunto D9 generation (D4, D6, D9, Vyper2, Vytec DS).
//!
//! The profile is fixed-interval depth telemetry; asynchronous events live
//! in a separate stream after the samples, synchronized by a running
//! marker: the header names the sample ordinal of the first event, and
//! each event record carries the offset to the next one.

use crate::common::Family;
use crate::error::{Error, Result};
use crate::parser::types::*;
use crate::parser::{Parser, SampleCallback, civil_datetime};
use crate::bytes;

const HEADER_SIZE: usize = 0x20;

/// Helium-capable model (D9 HelO2).
const MODEL_HELO2: u32 = 0x12;

#[derive(Debug)]
struct Cache {
    interval: u32,
    mode: DiveMode,
    mixes: Vec<Gasmix>,
    nsamples: usize,
    marker: usize,
    events: usize,
    maxdepth: f64,
}

pub struct D9Parser {
    model: u32,
    data: Vec<u8>,
    cache: Option<Cache>,
}

impl D9Parser {
    pub fn new(model: u32) -> Self {
        Self {
            model,
            data: Vec::new(),
            cache: None,
        }
    }

    fn cache(&mut self) -> Result<&Cache> {
        if self.cache.is_none() {
            self.cache = Some(Self::scan(&self.data, self.model)?);
        }
        self.cache.as_ref().ok_or(Error::DataFormat("no dive data"))
    }

    fn scan(data: &[u8], model: u32) -> Result<Cache> {
        if data.len() < HEADER_SIZE {
            return Err(Error::DataFormat("dive header truncated"));
        }

        let interval = data[0x02] as u32;
        if interval == 0 {
            return Err(Error::DataFormat("zero sample interval"));
        }

        let mode = match data[0x03] {
            0 | 1 => DiveMode::OpenCircuit,
            2 => DiveMode::Gauge,
            3 => DiveMode::Freedive,
            _ => return Err(Error::DataFormat("unknown dive mode")),
        };

        let ngases = data[0x0A] as usize;
        if ngases == 0 || ngases > 3 {
            return Err(Error::DataFormat("gas mix count out of range"));
        }
        let mut mixes = Vec::with_capacity(ngases);
        for i in 0..ngases {
            let o2 = data[0x0B + i] as u32;
            let he = if model == MODEL_HELO2 {
                data[0x0E + i] as u32
            } else {
                0
            };
            if o2 + he > 100 {
                return Err(Error::DataFormat("gas fractions exceed 100%"));
            }
            mixes.push(Gasmix::from_percent(if o2 == 0 { 21 } else { o2 }, he));
        }

        let marker = bytes::u16_be(&data[0x12..0x14]) as usize;
        let nsamples = bytes::u16_be(&data[0x14..0x16]) as usize;
        let events = HEADER_SIZE + nsamples * 2;
        if events > data.len() {
            return Err(Error::DataFormat("sample stream truncated"));
        }

        let mut maxdepth: f64 = 0.0;
        for i in 0..nsamples {
            let raw = bytes::u16_be(&data[HEADER_SIZE + i * 2..]) as f64;
            maxdepth = maxdepth.max(raw / 100.0);
        }

        Ok(Cache {
            interval,
            mode,
            mixes,
            nsamples,
            marker,
            events,
            maxdepth,
        })
    }

    fn mix_index(mixes: &[Gasmix], o2: u32, he: u32) -> Result<u32> {
        let wanted = Gasmix::from_percent(if o2 == 0 { 21 } else { o2 }, he);
        mixes
            .iter()
            .position(|mix| {
                (mix.oxygen - wanted.oxygen).abs() < 0.005
                    && (mix.helium - wanted.helium).abs() < 0.005
            })
            .map(|idx| idx as u32)
            .ok_or(Error::DataFormat("gas change to a mix not in the table"))
    }
}

impl Parser for D9Parser {
    fn family(&self) -> Family {
        Family::SuuntoD9
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
        let year = bytes::u16_be(&self.data[0x04..0x06]) as i16;
        civil_datetime(
            year,
            self.data[0x06] as i8,
            self.data[0x07] as i8,
            self.data[0x08] as i8,
            self.data[0x09] as i8,
            0,
        )
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
        self.cache()?;
        let cache = self.cache.as_ref().ok_or(Error::DataFormat("no cache"))?;
        let data = &self.data;

        let mut events = cache.events;
        let mut marker = cache.marker;

        for i in 1..=cache.nsamples {
            let time = i as u32 * cache.interval;
            callback(Sample::Time(time));

            if i == 1 {
                // The starting mix comes from the header gas table.
                callback(Sample::Gasmix(0));
            }

            // Consume every event scheduled for this sample ordinal.
            while marker == i && events < data.len() {
                let tag = data[events];
                let (consumed, next) = match tag {
                    0x00 => break,
                    // ascent warning: [seconds][next]
                    0x01 => {
                        if events + 3 > data.len() {
                            return Err(Error::DataFormat("event record truncated"));
                        }
                        callback(Sample::Event(SampleEvent {
                            kind: EventKind::Ascent,
                            time: 0,
                            flags: EventFlags::empty(),
                            value: data[events + 1] as u32,
                        }));
                        (3, data[events + 2])
                    }
                    // bookmark: [value][next]
                    0x02 => {
                        if events + 3 > data.len() {
                            return Err(Error::DataFormat("event record truncated"));
                        }
                        callback(Sample::Event(SampleEvent {
                            kind: EventKind::Bookmark,
                            time: 0,
                            flags: EventFlags::empty(),
                            value: data[events + 1] as u32,
                        }));
                        (3, data[events + 2])
                    }
                    // mandatory stop begin/end: [flags][next]
                    0x03 => {
                        if events + 3 > data.len() {
                            return Err(Error::DataFormat("event record truncated"));
                        }
                        let flags = if data[events + 1] == 0 {
                            EventFlags::BEGIN
                        } else {
                            EventFlags::END
                        };
                        callback(Sample::Event(SampleEvent {
                            kind: EventKind::SafetyStopMandatory,
                            time: 0,
                            flags,
                            value: 0,
                        }));
                        (3, data[events + 2])
                    }
                    // gas change: [o2][next]
                    0x05 => {
                        if events + 3 > data.len() {
                            return Err(Error::DataFormat("event record truncated"));
                        }
                        let idx = Self::mix_index(&cache.mixes, data[events + 1] as u32, 0)?;
                        callback(Sample::Gasmix(idx));
                        (3, data[events + 2])
                    }
                    // gas change with helium: [o2][he][next]
                    0x06 => {
                        if events + 4 > data.len() {
                            return Err(Error::DataFormat("event record truncated"));
                        }
                        let idx = Self::mix_index(
                            &cache.mixes,
                            data[events + 1] as u32,
                            data[events + 2] as u32,
                        )?;
                        callback(Sample::Gasmix(idx));
                        (4, data[events + 3])
                    }
                    _ => return Err(Error::DataFormat("unknown event tag")),
                };
                events += consumed;
                if next == 0 {
                    // No further events.
                    marker = usize::MAX;
                } else {
                    marker += next as usize;
                }
            }

            let raw = bytes::u16_be(&data[HEADER_SIZE + (i - 1) * 2..]) as f64;
            callback(Sample::Depth(raw / 100.0));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 12 samples at 1 s with a gas change to EAN33 at t = 10 s.
    fn build_dive() -> Vec<u8> {
        let nsamples = 12u16;
        let mut data = vec![0u8; HEADER_SIZE];
        data[0x00] = 0x00;
        data[0x01] = 0x2A; // dive number 42
        data[0x02] = 1; // interval
        data[0x03] = 1; // nitrox
        data[0x04..0x06].copy_from_slice(&2011u16.to_be_bytes());
        data[0x06] = 8;
        data[0x07] = 14;
        data[0x08] = 9;
        data[0x09] = 30;
        data[0x0A] = 2; // two mixes
        data[0x0B] = 21;
        data[0x0C] = 33;
        data[0x12..0x14].copy_from_slice(&10u16.to_be_bytes()); // first event marker
        data[0x14..0x16].copy_from_slice(&nsamples.to_be_bytes());

        for i in 0..nsamples {
            let depth_cm = 100 + i * 50;
            data.extend_from_slice(&depth_cm.to_be_bytes());
        }
        // Event stream: gas change to 33% O2, next marker 10 samples away.
        data.extend_from_slice(&[0x05, 33, 0x0A]);
        data
    }

    #[test]
    fn test_gas_change_event_at_marker() {
        let mut parser = D9Parser::new(0x0E);
        parser.set_data(&build_dive()).unwrap();

        let mut changes = Vec::new();
        let mut current_time = 0;
        parser
            .samples_foreach(&mut |sample| match sample {
                Sample::Time(t) => current_time = t,
                Sample::Gasmix(idx) => changes.push((current_time, idx)),
                _ => {}
            })
            .unwrap();

        // Initial mix at the first sample, EAN33 at t = 10 s.
        assert_eq!(changes, vec![(1, 0), (10, 1)]);

        let Field::GasMix(mix) = parser.field(FieldType::GasMix, 1).unwrap() else {
            panic!("wrong field variant");
        };
        assert!((mix.oxygen - 0.33).abs() < 1e-9);
        assert!((mix.helium).abs() < 1e-9);
    }

    #[test]
    fn test_samples_are_time_ordered() {
        let mut parser = D9Parser::new(0x0E);
        parser.set_data(&build_dive()).unwrap();

        let mut times = Vec::new();
        parser
            .samples_foreach(&mut |sample| {
                if let Sample::Time(t) = sample {
                    times.push(t);
                }
            })
            .unwrap();
        assert_eq!(times.len(), 12);
        assert!(times.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_fields_and_datetime() {
        let mut parser = D9Parser::new(0x0E);
        parser.set_data(&build_dive()).unwrap();

        assert_eq!(
            parser.field(FieldType::DiveTime, 0).unwrap(),
            Field::DiveTime(12)
        );
        assert_eq!(
            parser.field(FieldType::GasMixCount, 0).unwrap(),
            Field::GasMixCount(2)
        );
        let Field::MaxDepth(depth) = parser.field(FieldType::MaxDepth, 0).unwrap() else {
            panic!("wrong field variant");
        };
        assert!((depth - 6.50).abs() < 1e-9);

        let datetime = parser.datetime().unwrap();
        assert_eq!(datetime.year(), 2011);
        assert_eq!(datetime.month(), 8);
        assert_eq!(datetime.hour(), 9);

        // Idempotent between set_data calls.
        assert_eq!(
            parser.field(FieldType::DiveTime, 0).unwrap(),
            Field::DiveTime(12)
        );
    }

    #[test]
    fn test_unsupported_field() {
        let mut parser = D9Parser::new(0x0E);
        parser.set_data(&build_dive()).unwrap();
        assert!(matches!(
            parser.field(FieldType::Atmospheric, 0),
            Err(Error::Unsupported)
        ));
    }
}
