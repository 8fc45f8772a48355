//! Parser for the Heinrichs Weikamp computers (OSTC, Frog, OSTC3). The
//! profile encoding is shared across the range; only the header layout
//! differs between the marker-framed classic journal and the 256-byte
//! header slots of the newer models.

use crate::bytes;
use crate::common::Family;
use crate::error::{Error, Result};
use crate::parser::types::*;
use crate::parser::{Parser, SampleCallback, civil_datetime};

const CLASSIC_HEADER: usize = 45;
const SLOT_HEADER: usize = 0x100;

/// Sample info bits: the optional extensions following the depth word.
const INFO_TEMPERATURE: u8 = 0x80;
const INFO_GASCHANGE: u8 = 0x40;

#[derive(Debug)]
struct Header {
    date: [u8; 5],
    interval: u32,
    mixes: Vec<Gasmix>,
    initial: u32,
    mode: DiveMode,
    battery_mv: u32,
    firmware: Option<(u8, u8)>,
    serial: Option<u32>,
    profile: usize,
    /// Marker bytes after the profile (the classic journal framing).
    trailer: usize,
}

impl Header {
    fn profile_window<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        &data[self.profile..data.len() - self.trailer]
    }
}

#[derive(Debug)]
struct Cache {
    header: Header,
    divetime: u32,
    maxdepth: f64,
}

pub struct OstcParser {
    family: Family,
    data: Vec<u8>,
    cache: Option<Cache>,
}

impl OstcParser {
    pub fn new(family: Family) -> Self {
        Self {
            family,
            data: Vec::new(),
            cache: None,
        }
    }

    fn cache(&mut self) -> Result<&Cache> {
        if self.cache.is_none() {
            let header = Self::scan_header(self.family, &self.data)?;
            let mut divetime = 0;
            let mut maxdepth: f64 = 0.0;
            Self::walk(header.profile_window(&self.data), &header, &mut |sample| {
                match sample {
                    Sample::Time(t) => divetime = t,
                    Sample::Depth(d) => maxdepth = maxdepth.max(d),
                    _ => {}
                }
            })?;
            self.cache = Some(Cache {
                header,
                divetime,
                maxdepth,
            });
        }
        self.cache.as_ref().ok_or(Error::DataFormat("no dive data"))
    }

    fn scan_header(family: Family, data: &[u8]) -> Result<Header> {
        match family {
            Family::HwOstc => {
                // [0xFA 0xFA][header][0xFB 0xFB][profile][0xFD 0xFD]
                if data.len() < 2 + CLASSIC_HEADER + 2 + 2 {
                    return Err(Error::DataFormat("dive header truncated"));
                }
                if data[0..2] != [0xFA, 0xFA]
                    || data[2 + CLASSIC_HEADER..4 + CLASSIC_HEADER] != [0xFB, 0xFB]
                {
                    return Err(Error::DataFormat("dive markers missing"));
                }
                let header = &data[2..2 + CLASSIC_HEADER];
                let mixes = Self::gas_table(&header[12..22], header[11] as usize)?;
                Ok(Header {
                    date: [header[0], header[1], header[2], header[3], header[4]],
                    interval: header[10] as u32,
                    initial: (header[22] as u32).min(mixes.len() as u32 - 1),
                    mode: Self::mode(header[23])?,
                    battery_mv: bytes::u16_le(&header[24..26]) as u32,
                    firmware: None,
                    serial: None,
                    mixes,
                    profile: 4 + CLASSIC_HEADER,
                    trailer: 2,
                })
            }
            _ => {
                if data.len() < SLOT_HEADER {
                    return Err(Error::DataFormat("dive header truncated"));
                }
                let mixes = Self::gas_table(&data[0x0E..0x18], data[0x0D] as usize)?;
                Ok(Header {
                    date: [data[0x02], data[0x03], data[0x04], data[0x05], data[0x06]],
                    interval: data[0x07] as u32,
                    initial: (data[0x18] as u32).min(mixes.len() as u32 - 1),
                    mode: Self::mode(data[0x19])?,
                    battery_mv: bytes::u16_le(&data[0x1A..0x1C]) as u32,
                    firmware: Some((data[0x1C], data[0x1D])),
                    serial: Some(bytes::u32_le(&data[0x1E..0x22])),
                    mixes,
                    profile: SLOT_HEADER,
                    trailer: 0,
                })
            }
        }
    }

    fn mode(byte: u8) -> Result<DiveMode> {
        match byte {
            0 => Ok(DiveMode::OpenCircuit),
            1 => Ok(DiveMode::ClosedCircuit),
            2 => Ok(DiveMode::Gauge),
            3 => Ok(DiveMode::Freedive),
            _ => Err(Error::DataFormat("unknown dive mode")),
        }
    }

    fn gas_table(table: &[u8], ngases: usize) -> Result<Vec<Gasmix>> {
        if ngases == 0 || ngases > 5 {
            return Err(Error::DataFormat("gas mix count out of range"));
        }
        let mut mixes = Vec::with_capacity(ngases);
        for i in 0..ngases {
            let o2 = table[i * 2] as u32;
            let he = table[i * 2 + 1] as u32;
            if o2 + he > 100 {
                return Err(Error::DataFormat("gas fractions exceed 100%"));
            }
            mixes.push(Gasmix::from_percent(if o2 == 0 { 21 } else { o2 }, he));
        }
        Ok(mixes)
    }

    /// Samples are `[depth u16_le cm][info]`, where the info bits announce
    /// optional temperature and gas-change extensions. Depth 0xFFFF ends
    /// the profile.
    fn walk(profile: &[u8], header: &Header, callback: SampleCallback<'_>) -> Result<()> {
        if header.interval == 0 {
            return Err(Error::DataFormat("zero sample interval"));
        }
        let mut offset = 0;
        let mut time = 0;
        let mut nsamples = 0u32;
        let mut gas = header.initial;
        while offset + 2 <= profile.len() {
            let raw = bytes::u16_le(&profile[offset..]);
            if raw == 0xFFFF {
                break;
            }
            if offset + 3 > profile.len() {
                return Err(Error::DataFormat("sample truncated"));
            }
            let info = profile[offset + 2];
            offset += 3;

            time += header.interval;
            nsamples += 1;
            callback(Sample::Time(time));
            if nsamples == 1 {
                callback(Sample::Gasmix(gas));
            }
            callback(Sample::Depth(raw as f64 / 100.0));

            if info & INFO_TEMPERATURE != 0 {
                if offset + 2 > profile.len() {
                    return Err(Error::DataFormat("temperature extension truncated"));
                }
                let value = bytes::u16_le(&profile[offset..]) as i16;
                callback(Sample::Temperature(f64::from(value) / 10.0));
                offset += 2;
            }
            if info & INFO_GASCHANGE != 0 {
                if offset + 1 > profile.len() {
                    return Err(Error::DataFormat("gas change extension truncated"));
                }
                let index = profile[offset] as u32;
                if index as usize >= header.mixes.len() {
                    return Err(Error::DataFormat("gas change outside the mix table"));
                }
                if index != gas {
                    gas = index;
                    callback(Sample::Gasmix(gas));
                }
                offset += 1;
            }
        }
        Ok(())
    }
}

impl Parser for OstcParser {
    fn family(&self) -> Family {
        self.family
    }

    fn set_data(&mut self, data: &[u8]) -> Result<()> {
        self.data = data.to_vec();
        self.cache = None;
        Ok(())
    }

    fn datetime(&mut self) -> Result<jiff::civil::DateTime> {
        let cache = self.cache()?;
        let [day, month, year, hour, minute] = cache.header.date;
        civil_datetime(
            2000 + year as i16,
            month as i8,
            day as i8,
            hour as i8,
            minute as i8,
            0,
        )
    }

    fn field(&mut self, kind: FieldType, index: u32) -> Result<Field> {
        let cache = self.cache()?;
        match kind {
            FieldType::DiveTime => Ok(Field::DiveTime(cache.divetime)),
            FieldType::MaxDepth => Ok(Field::MaxDepth(cache.maxdepth)),
            FieldType::GasMixCount => Ok(Field::GasMixCount(cache.header.mixes.len() as u32)),
            FieldType::GasMix => cache
                .header
                .mixes
                .get(index as usize)
                .cloned()
                .map(Field::GasMix)
                .ok_or(Error::InvalidArgs("gas mix index out of range")),
            FieldType::DiveMode => Ok(Field::DiveMode(cache.header.mode)),
            FieldType::String => {
                let string = match index {
                    0 => cache
                        .header
                        .serial
                        .map(|serial| FieldString::new("Serial", format!("{serial}"))),
                    1 => cache.header.firmware.map(|(major, minor)| {
                        FieldString::new("FW Version", format!("{major}.{minor:02}"))
                    }),
                    2 => Some(FieldString::new(
                        "Battery",
                        format!("{:.2} V", cache.header.battery_mv as f64 / 1000.0),
                    )),
                    _ => None,
                };
                string.map(Field::String).ok_or(Error::Unsupported)
            }
            _ => Err(Error::Unsupported),
        }
    }

    fn samples_foreach(&mut self, callback: SampleCallback<'_>) -> Result<()> {
        self.cache()?;
        let cache = self.cache.as_ref().ok_or(Error::DataFormat("no cache"))?;
        Self::walk(cache.header.profile_window(&self.data), &cache.header, callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(depth_cm: u16, info: u8, extra: &[u8]) -> Vec<u8> {
        let mut out = depth_cm.to_le_bytes().to_vec();
        out.push(info);
        out.extend_from_slice(extra);
        out
    }

    fn build_slot_dive() -> Vec<u8> {
        let mut data = vec![0u8; SLOT_HEADER];
        data[0x00..0x02].copy_from_slice(&7u16.to_le_bytes());
        data[0x02] = 24; // day
        data[0x03] = 3; // month
        data[0x04] = 18; // 2018
        data[0x05] = 10;
        data[0x06] = 45;
        data[0x07] = 2; // interval
        data[0x0D] = 2; // gases
        data[0x0E..0x12].copy_from_slice(&[21, 0, 50, 0]);
        data[0x18] = 0;
        data[0x19] = 0; // OC
        data[0x1A..0x1C].copy_from_slice(&4100u16.to_le_bytes());
        data[0x1C] = 2;
        data[0x1D] = 9;
        data[0x1E..0x22].copy_from_slice(&12345u32.to_le_bytes());

        data.extend_from_slice(&sample(500, 0, &[]));
        data.extend_from_slice(&sample(
            1500,
            INFO_TEMPERATURE,
            &150u16.to_le_bytes(),
        ));
        data.extend_from_slice(&sample(600, INFO_GASCHANGE, &[1]));
        data.extend_from_slice(&0xFFFFu16.to_le_bytes());
        data
    }

    #[test]
    fn test_slot_dive_profile() {
        let mut parser = OstcParser::new(Family::HwOstc3);
        parser.set_data(&build_slot_dive()).unwrap();

        let mut gas_changes = Vec::new();
        let mut temperatures = Vec::new();
        parser
            .samples_foreach(&mut |sample| match sample {
                Sample::Gasmix(idx) => gas_changes.push(idx),
                Sample::Temperature(t) => temperatures.push(t),
                _ => {}
            })
            .unwrap();
        assert_eq!(gas_changes, vec![0, 1]);
        assert_eq!(temperatures.len(), 1);
        assert!((temperatures[0] - 15.0).abs() < 1e-9);

        assert_eq!(
            parser.field(FieldType::DiveTime, 0).unwrap(),
            Field::DiveTime(6)
        );
        let datetime = parser.datetime().unwrap();
        assert_eq!(datetime.year(), 2018);
        assert_eq!(datetime.day(), 24);
    }

    #[test]
    fn test_classic_journal_dive() {
        let mut data = vec![0xFA, 0xFA];
        let mut header = vec![0u8; CLASSIC_HEADER];
        header[0] = 24;
        header[1] = 3;
        header[2] = 12; // 2012-03-24
        header[10] = 10; // interval
        header[11] = 1;
        header[12] = 21;
        data.extend_from_slice(&header);
        data.extend_from_slice(&[0xFB, 0xFB]);
        data.extend_from_slice(&sample(800, 0, &[]));
        data.extend_from_slice(&[0xFD, 0xFD]);

        let mut parser = OstcParser::new(Family::HwOstc);
        parser.set_data(&data).unwrap();

        assert_eq!(
            parser.field(FieldType::DiveTime, 0).unwrap(),
            Field::DiveTime(10)
        );
        let Field::MaxDepth(depth) = parser.field(FieldType::MaxDepth, 0).unwrap() else {
            panic!("wrong field variant");
        };
        assert!((depth - 8.0).abs() < 1e-9);
        assert_eq!(parser.datetime().unwrap().year(), 2012);
    }

    #[test]
    fn test_string_fields_transfer_ownership() {
        let mut parser = OstcParser::new(Family::HwOstc3);
        parser.set_data(&build_slot_dive()).unwrap();

        let Field::String(serial) = parser.field(FieldType::String, 0).unwrap() else {
            panic!("wrong field variant");
        };
        assert_eq!(serial.desc, "Serial");
        assert_eq!(serial.value, "12345");

        let Field::String(firmware) = parser.field(FieldType::String, 1).unwrap() else {
            panic!("wrong field variant");
        };
        assert_eq!(firmware.value, "2.09");

        assert!(matches!(
            parser.field(FieldType::String, 9),
            Err(Error::Unsupported)
        ));
    }
}
