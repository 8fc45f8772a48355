//! Parser for the Shearwater Petrel. The log format is the Predator's;
//! only the family tag (and the manifest-driven download that produced
//! the blob) differ.

use crate::common::Family;
use crate::error::Result;
use crate::parser::shearwater_predator::PredatorParser;
use crate::parser::types::*;
use crate::parser::{Parser, SampleCallback};

pub struct PetrelParser {
    inner: PredatorParser,
}

impl PetrelParser {
    pub fn new(serial: u32) -> Self {
        Self {
            inner: PredatorParser::with_family(Family::ShearwaterPetrel, serial),
        }
    }
}

impl Parser for PetrelParser {
    fn family(&self) -> Family {
        self.inner.family()
    }

    fn set_data(&mut self, data: &[u8]) -> Result<()> {
        self.inner.set_data(data)
    }

    fn datetime(&mut self) -> Result<jiff::civil::DateTime> {
        self.inner.datetime()
    }

    fn field(&mut self, kind: FieldType, index: u32) -> Result<Field> {
        self.inner.field(kind, index)
    }

    fn samples_foreach(&mut self, callback: SampleCallback<'_>) -> Result<()> {
        self.inner.samples_foreach(callback)
    }
}
