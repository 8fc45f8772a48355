//! Parser for the Cressi Edy: BCD timestamp, one nitrox mix, big-endian
//! decimeter depth words at a model-fixed sample interval.

use crate::bytes;
use crate::common::Family;
use crate::error::{Error, Result};
use crate::parser::types::*;
use crate::parser::{Parser, SampleCallback, civil_datetime};

const HEADER_SIZE: usize = 8;

/// The Tusa IQ-700 is an Edy behind another label, sampling twice as
/// fast.
const MODEL_IQ700: u32 = 0x09;

pub struct EdyParser {
    model: u32,
    data: Vec<u8>,
}

impl EdyParser {
    pub fn new(model: u32) -> Self {
        Self {
            model,
            data: Vec::new(),
        }
    }

    fn interval(&self) -> u32 {
        if self.model == MODEL_IQ700 { 15 } else { 30 }
    }

    fn profile(&self) -> Result<&[u8]> {
        if self.data.len() < HEADER_SIZE {
            return Err(Error::DataFormat("dive header truncated"));
        }
        Ok(&self.data[HEADER_SIZE..])
    }
}

impl Parser for EdyParser {
    fn family(&self) -> Family {
        Family::CressiEdy
    }

    fn set_data(&mut self, data: &[u8]) -> Result<()> {
        self.data = data.to_vec();
        Ok(())
    }

    fn datetime(&mut self) -> Result<jiff::civil::DateTime> {
        if self.data.len() < HEADER_SIZE {
            return Err(Error::DataFormat("dive header truncated"));
        }
        let mut parts = [0u8; 5];
        for (i, slot) in parts.iter_mut().enumerate() {
            *slot = bytes::bcd(self.data[i]).ok_or(Error::DataFormat("timestamp is not BCD"))?;
        }
        civil_datetime(
            2000 + parts[0] as i16,
            parts[1] as i8,
            parts[2] as i8,
            parts[3] as i8,
            parts[4] as i8,
            0,
        )
    }

    fn field(&mut self, kind: FieldType, index: u32) -> Result<Field> {
        let profile = self.profile()?;
        let records = (profile.len() / 2) as u32;
        let o2 = self.data[5] as u32;
        match kind {
            FieldType::DiveTime => Ok(Field::DiveTime(records * self.interval())),
            FieldType::MaxDepth => {
                let mut maxdepth: f64 = 0.0;
                for sample in profile.chunks_exact(2) {
                    maxdepth = maxdepth.max(bytes::u16_be(sample) as f64 / 10.0);
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
        let profile = self.profile()?;
        for (i, sample) in profile.chunks_exact(2).enumerate() {
            callback(Sample::Time((i as u32 + 1) * self.interval()));
            if i == 0 {
                callback(Sample::Gasmix(0));
            }
            callback(Sample::Depth(bytes::u16_be(sample) as f64 / 10.0));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimeter_depths() {
        let mut data = vec![0x22, 0x08, 0x05, 0x16, 0x40, 32, 0, 0];
        data.extend_from_slice(&182u16.to_be_bytes());
        data.extend_from_slice(&240u16.to_be_bytes());

        let mut parser = EdyParser::new(0x08);
        parser.set_data(&data).unwrap();

        let datetime = parser.datetime().unwrap();
        assert_eq!(datetime.year(), 2022);
        assert_eq!(datetime.hour(), 16);

        let Field::MaxDepth(depth) = parser.field(FieldType::MaxDepth, 0).unwrap() else {
            panic!("wrong field variant");
        };
        assert!((depth - 24.0).abs() < 1e-9);
    }
}
