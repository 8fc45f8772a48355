//! Parser for the Suunto Solution. The device stores no clock; a dive is
//! just a depth trace in feet at a fixed three second interval.

use crate::common::Family;
use crate::error::{Error, Result};
use crate::parser::types::*;
use crate::parser::{Parser, SampleCallback};

const INTERVAL: u32 = 3;

pub struct SolutionParser {
    data: Vec<u8>,
}

impl SolutionParser {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }
}

impl Default for SolutionParser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser for SolutionParser {
    fn family(&self) -> Family {
        Family::SuuntoSolution
    }

    fn set_data(&mut self, data: &[u8]) -> Result<()> {
        self.data = data.to_vec();
        Ok(())
    }

    fn datetime(&mut self) -> Result<jiff::civil::DateTime> {
        // No clock on this device.
        Err(Error::Unsupported)
    }

    fn field(&mut self, kind: FieldType, index: u32) -> Result<Field> {
        if self.data.is_empty() {
            return Err(Error::DataFormat("no dive data"));
        }
        match kind {
            FieldType::DiveTime => Ok(Field::DiveTime(self.data.len() as u32 * INTERVAL)),
            FieldType::MaxDepth => {
                let max = self.data.iter().copied().max().unwrap_or(0);
                Ok(Field::MaxDepth(f64::from(max) * FEET))
            }
            FieldType::GasMixCount => Ok(Field::GasMixCount(1)),
            FieldType::GasMix if index == 0 => Ok(Field::GasMix(Gasmix::default())),
            FieldType::GasMix => Err(Error::InvalidArgs("gas mix index out of range")),
            _ => Err(Error::Unsupported),
        }
    }

    fn samples_foreach(&mut self, callback: SampleCallback<'_>) -> Result<()> {
        if self.data.is_empty() {
            return Err(Error::DataFormat("no dive data"));
        }
        for (i, &depth_ft) in self.data.iter().enumerate() {
            callback(Sample::Time((i as u32 + 1) * INTERVAL));
            callback(Sample::Depth(f64::from(depth_ft) * FEET));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_trace() {
        let mut parser = SolutionParser::new();
        parser.set_data(&[10, 33, 20]).unwrap();

        assert_eq!(
            parser.field(FieldType::DiveTime, 0).unwrap(),
            Field::DiveTime(9)
        );
        let Field::MaxDepth(depth) = parser.field(FieldType::MaxDepth, 0).unwrap() else {
            panic!("wrong field variant");
        };
        assert!((depth - 33.0 * FEET).abs() < 1e-9);
        assert!(matches!(parser.datetime(), Err(Error::Unsupported)));
    }
}
