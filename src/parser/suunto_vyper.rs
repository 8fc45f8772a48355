//! Parser for the Suunto Vyper generation. The profile is a stream of
//! signed depth deltas in feet, one per sample interval, with a few
//! reserved token bytes for asynchronous events.

use crate::common::Family;
use crate::error::{Error, Result};
use crate::parser::types::*;
use crate::parser::{Parser, SampleCallback, civil_datetime};

const HEADER_SIZE: usize = 0x12;

const TOKEN_BOOKMARK: u8 = 0x78;
const TOKEN_SURFACE: u8 = 0x79;
const TOKEN_DECO_BEGIN: u8 = 0x7A;
const TOKEN_DECO_END: u8 = 0x7B;
const TOKEN_ASCENT: u8 = 0x7C;
const TOKEN_END: u8 = 0x7E;

#[derive(Debug)]
struct Cache {
    interval: u32,
    mix: Gasmix,
    divetime: u32,
    maxdepth: f64,
}

pub struct VyperParser {
    data: Vec<u8>,
    cache: Option<Cache>,
}

impl VyperParser {
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            cache: None,
        }
    }

    fn cache(&mut self) -> Result<&Cache> {
        if self.cache.is_none() {
            let mut divetime = 0;
            let mut maxdepth: f64 = 0.0;
            let cache = Self::walk(&self.data, &mut |sample| {
                match sample {
                    Sample::Time(t) => divetime = t,
                    Sample::Depth(d) => maxdepth = maxdepth.max(d),
                    _ => {}
                };
            })?;
            self.cache = Some(Cache {
                interval: cache.0,
                mix: cache.1,
                divetime,
                maxdepth,
            });
        }
        self.cache.as_ref().ok_or(Error::DataFormat("no dive data"))
    }

    /// Decode the profile once, returning the header-derived interval and
    /// gas mix while feeding samples to `callback`.
    fn walk(data: &[u8], callback: SampleCallback<'_>) -> Result<(u32, Gasmix)> {
        if data.len() < HEADER_SIZE {
            return Err(Error::DataFormat("dive header truncated"));
        }
        let interval = data[0x00] as u32;
        if interval == 0 {
            return Err(Error::DataFormat("zero sample interval"));
        }
        let o2 = data[0x0E] as u32;
        let mix = Gasmix::from_percent(if o2 == 0 { 21 } else { o2 }, 0);

        let mut depth_ft: f64 = 0.0;
        let mut time = 0u32;
        let mut nsamples = 0u32;
        for &byte in &data[HEADER_SIZE..] {
            match byte {
                TOKEN_END => break,
                TOKEN_BOOKMARK | TOKEN_SURFACE | TOKEN_DECO_BEGIN | TOKEN_DECO_END
                | TOKEN_ASCENT => {
                    let (kind, flags) = match byte {
                        TOKEN_BOOKMARK => (EventKind::Bookmark, EventFlags::empty()),
                        TOKEN_SURFACE => (EventKind::Surface, EventFlags::empty()),
                        TOKEN_DECO_BEGIN => (EventKind::Deco, EventFlags::BEGIN),
                        TOKEN_DECO_END => (EventKind::Deco, EventFlags::END),
                        _ => (EventKind::Ascent, EventFlags::empty()),
                    };
                    callback(Sample::Event(SampleEvent {
                        kind,
                        time: 0,
                        flags,
                        value: 0,
                    }));
                }
                delta => {
                    time += interval;
                    nsamples += 1;
                    depth_ft += f64::from(delta as i8);
                    if depth_ft < 0.0 {
                        depth_ft = 0.0;
                    }
                    callback(Sample::Time(time));
                    if nsamples == 1 {
                        callback(Sample::Gasmix(0));
                    }
                    callback(Sample::Depth(depth_ft * FEET));
                }
            }
        }
        Ok((interval, mix))
    }
}

impl Default for VyperParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser for VyperParser {
    fn family(&self) -> Family {
        Family::SuuntoVyper
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
        let raw = &self.data[0x09..0x0E];
        let year = if raw[0] < 90 {
            2000 + raw[0] as i16
        } else {
            1900 + raw[0] as i16
        };
        civil_datetime(
            year,
            raw[1] as i8,
            raw[2] as i8,
            raw[3] as i8,
            raw[4] as i8,
            0,
        )
    }

    fn field(&mut self, kind: FieldType, index: u32) -> Result<Field> {
        let cache = self.cache()?;
        match kind {
            FieldType::DiveTime => Ok(Field::DiveTime(cache.divetime)),
            FieldType::MaxDepth => Ok(Field::MaxDepth(cache.maxdepth)),
            FieldType::GasMixCount => Ok(Field::GasMixCount(1)),
            FieldType::GasMix if index == 0 => Ok(Field::GasMix(cache.mix.clone())),
            FieldType::GasMix => Err(Error::InvalidArgs("gas mix index out of range")),
            FieldType::DiveMode => Ok(Field::DiveMode(DiveMode::OpenCircuit)),
            _ => Err(Error::Unsupported),
        }
    }

    fn samples_foreach(&mut self, callback: SampleCallback<'_>) -> Result<()> {
        Self::walk(&self.data, callback)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_dive() -> Vec<u8> {
        let mut data = vec![0u8; HEADER_SIZE];
        data[0x00] = 20; // interval
        data[0x09..0x0E].copy_from_slice(&[9, 7, 23, 14, 5]);
        data[0x0E] = 32; // EAN32
        // Down 10 ft, down 20 ft, deco begins, up 5 ft, deco ends, end.
        data.extend_from_slice(&[
            10,
            20,
            TOKEN_DECO_BEGIN,
            (-5i8) as u8,
            TOKEN_DECO_END,
            TOKEN_END,
        ]);
        data
    }

    #[test]
    fn test_profile_decodes_depth_deltas() {
        let mut parser = VyperParser::new();
        parser.set_data(&build_dive()).unwrap();

        let mut depths = Vec::new();
        let mut events = Vec::new();
        parser
            .samples_foreach(&mut |sample| match sample {
                Sample::Depth(d) => depths.push(d),
                Sample::Event(e) => events.push(e),
                _ => {}
            })
            .unwrap();

        assert_eq!(depths.len(), 3);
        assert!((depths[0] - 10.0 * FEET).abs() < 1e-9);
        assert!((depths[1] - 30.0 * FEET).abs() < 1e-9);
        assert!((depths[2] - 25.0 * FEET).abs() < 1e-9);

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::Deco);
        assert!(events[0].flags.contains(EventFlags::BEGIN));
        assert!(events[1].flags.contains(EventFlags::END));
    }

    #[test]
    fn test_header_fields() {
        let mut parser = VyperParser::new();
        parser.set_data(&build_dive()).unwrap();

        assert_eq!(
            parser.field(FieldType::DiveTime, 0).unwrap(),
            Field::DiveTime(60)
        );
        let Field::GasMix(mix) = parser.field(FieldType::GasMix, 0).unwrap() else {
            panic!("wrong field variant");
        };
        assert!((mix.oxygen - 0.32).abs() < 1e-9);

        let datetime = parser.datetime().unwrap();
        assert_eq!(datetime.year(), 2009);
        assert_eq!(datetime.day(), 23);
    }
}
