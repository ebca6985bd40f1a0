//! Fixed-width TDDF codec.
//!
//! Settlement files arrive as fixed-width text where character positions,
//! not delimiters, carry meaning. This module classifies each line by the
//! record-type tag at positions 18-19, then decodes the typed fields the
//! active layout version defines for that record family.
//!
//! Layout tables are versioned: offsets have shifted between mainframe
//! format revisions, so the tables live in a [`LayoutRegistry`] keyed by
//! version name and every version is vetted against known-good sample
//! lines before it may be served.

pub mod decoder;
pub mod fields;
pub mod layout;
pub mod record;

pub use decoder::{record_type_tag, DecodeError, DecodedLine, FieldFailure, TddfDecoder};
pub use fields::{parse_mmddccyy, Amount, FieldKind, FieldValue};
pub use layout::{
    FieldSpec, LayoutError, LayoutRegistry, LayoutVersion, RecordLayout, RecordType, SampleCheck,
    MIN_TAGGED_LINE_LEN, SAMPLE_BATCH_HEADER_LINE, SAMPLE_DETAIL_LINE,
};
pub use record::{
    BatchHeaderRecord, DetailTransactionRecord, FieldMap, GeographicExtensionRecord, OtherRecord,
    PurchasingExtensionRecord, TddfRecord,
};
