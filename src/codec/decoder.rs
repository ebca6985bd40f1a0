//! Line decoder for fixed-width TDDF settlement lines.
//!
//! Decoding is two-phase: classify the line by its record-type tag, then
//! extract the typed fields the active layout version defines for that
//! family. Field-level failures never fail the line; they are reported in
//! [`DecodedLine::field_failures`] with the field left absent.

use super::layout::{LayoutVersion, RecordType, MIN_TAGGED_LINE_LEN, TYPE_TAG_LEN, TYPE_TAG_START};
use super::record::{FieldMap, TddfRecord};
use std::sync::Arc;
use thiserror::Error;

/// Line-level decode failures. Field-level problems are not errors; they
/// surface as [`FieldFailure`] entries instead.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("line too short to carry a record-type tag: {length} chars, need {minimum}")]
    LineTooShort { length: usize, minimum: usize },
}

/// A field that failed to decode, with the layout field name and reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldFailure {
    pub field: String,
    pub reason: String,
}

/// Result of decoding one line: the typed record, the raw field map it was
/// built from, and any per-field failures.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedLine {
    pub record: TddfRecord,
    pub fields: FieldMap,
    pub field_failures: Vec<FieldFailure>,
}

impl DecodedLine {
    pub fn record_type(&self) -> RecordType {
        self.record.record_type()
    }
}

/// Read the two-character record-type tag, or `None` when the line is too
/// short to carry one.
pub fn record_type_tag(line: &str) -> Option<&str> {
    line.get(TYPE_TAG_START - 1..TYPE_TAG_START - 1 + TYPE_TAG_LEN)
}

/// Decoder bound to one layout version.
///
/// Cheap to clone; workers share the underlying layout tables.
#[derive(Debug, Clone)]
pub struct TddfDecoder {
    layout: Arc<LayoutVersion>,
}

impl TddfDecoder {
    pub fn new(layout: Arc<LayoutVersion>) -> Self {
        Self { layout }
    }

    pub fn layout_name(&self) -> &str {
        self.layout.name()
    }

    /// Decode one physical line.
    ///
    /// Unknown tags decode to [`TddfRecord::Other`] rather than erroring, so
    /// unrecognized record families still count as decoded lines.
    pub fn decode_line(&self, line: &str) -> Result<DecodedLine, DecodeError> {
        let tag = record_type_tag(line).ok_or(DecodeError::LineTooShort {
            length: line.chars().count(),
            minimum: MIN_TAGGED_LINE_LEN,
        })?;
        let record_type = RecordType::from_tag(tag);

        let mut fields = FieldMap::new();
        let mut field_failures = Vec::new();
        if let Some(layout) = self.layout.layout_for(record_type) {
            for spec in &layout.fields {
                match spec.extract(line) {
                    Ok(Some(value)) => {
                        fields.insert(spec.name.to_string(), value);
                    }
                    Ok(None) => {}
                    Err(reason) => field_failures.push(FieldFailure {
                        field: spec.name.to_string(),
                        reason,
                    }),
                }
            }
        }

        let record = TddfRecord::from_fields(record_type, &fields, line, tag);
        Ok(DecodedLine {
            record,
            fields,
            field_failures,
        })
    }
}
