//! Versioned positional layout tables.
//!
//! The upstream network has shipped more than one byte-offset convention for
//! the same monetary fields across format revisions, so layouts are data,
//! not code: every record type's field table lives in a named
//! [`LayoutVersion`], and a [`LayoutRegistry`] refuses to serve a version
//! until it has decoded its known-good sample lines correctly. Processing
//! always names the layout version it ran under.

use super::fields::{parse_mmddccyy, Amount, FieldKind, FieldValue};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Byte window of the record-type tag, 1-based positions 18-19.
pub const TYPE_TAG_START: usize = 18;
pub const TYPE_TAG_LEN: usize = 2;

/// Minimum line length from which a record-type tag can be read.
pub const MIN_TAGGED_LINE_LEN: usize = TYPE_TAG_START + TYPE_TAG_LEN - 1;

/// Record families carried by a TDDF file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordType {
    BatchHeader,
    DetailTransaction,
    PurchasingExtension,
    GeographicExtension,
    Other,
}

impl RecordType {
    /// Map a two-character tag to its record family; unknown tags fall
    /// through to `Other` so no line is ever dropped on the floor.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "10" => Self::BatchHeader,
            "47" => Self::DetailTransaction,
            "56" => Self::PurchasingExtension,
            "68" => Self::GeographicExtension,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BatchHeader => "batch_header",
            Self::DetailTransaction => "detail_transaction",
            Self::PurchasingExtension => "purchasing_extension",
            Self::GeographicExtension => "geographic_extension",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RecordType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "batch_header" => Ok(Self::BatchHeader),
            "detail_transaction" => Ok(Self::DetailTransaction),
            "purchasing_extension" => Ok(Self::PurchasingExtension),
            "geographic_extension" => Ok(Self::GeographicExtension),
            "other" => Ok(Self::Other),
            _ => Err(format!("Invalid record type: {s}")),
        }
    }
}

/// One positional field: name, 1-based start, width, and semantic kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub start: usize,
    pub len: usize,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub const fn new(name: &'static str, start: usize, len: usize, kind: FieldKind) -> Self {
        Self {
            name,
            start,
            len,
            kind,
        }
    }

    /// Extract and decode this field from a raw line.
    ///
    /// `Ok(None)` means the line is too short for this field (truncated
    /// trailing extensions must not poison earlier fields); `Err` is a
    /// field-level decode failure with the reason.
    pub fn extract(&self, line: &str) -> Result<Option<FieldValue>, String> {
        let begin = self.start - 1;
        let end = begin + self.len;
        let Some(raw) = line.get(begin..end) else {
            return Ok(None);
        };

        match self.kind {
            FieldKind::Text => {
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(FieldValue::Text(trimmed.to_string())))
                }
            }
            FieldKind::AmountCents => match Amount::from_digits(raw) {
                Some(amount) => Ok(Some(FieldValue::Amount(amount))),
                None => Err(format!("non-numeric amount field: {raw:?}")),
            },
            FieldKind::DateMmddccyy => match parse_mmddccyy(raw) {
                Some(date) => Ok(Some(FieldValue::Date(date))),
                None => Err(format!("invalid MMDDCCYY date field: {raw:?}")),
            },
        }
    }
}

/// Ordered field table for one record type.
#[derive(Debug, Clone)]
pub struct RecordLayout {
    pub record_type: RecordType,
    pub fields: Vec<FieldSpec>,
}

/// A complete, named revision of the TDDF offset tables.
#[derive(Debug, Clone)]
pub struct LayoutVersion {
    name: String,
    layouts: HashMap<RecordType, RecordLayout>,
}

impl LayoutVersion {
    pub fn new(name: impl Into<String>, layouts: Vec<RecordLayout>) -> Self {
        Self {
            name: name.into(),
            layouts: layouts
                .into_iter()
                .map(|layout| (layout.record_type, layout))
                .collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn layout_for(&self, record_type: RecordType) -> Option<&RecordLayout> {
        self.layouts.get(&record_type)
    }
}

/// A known-good line used to vet a layout version before it may be served.
#[derive(Debug, Clone)]
pub struct SampleCheck {
    pub description: &'static str,
    pub line: &'static str,
    pub record_type: RecordType,
    pub field: &'static str,
    pub expected: FieldValue,
}

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("unknown layout version: {0}")]
    UnknownVersion(String),

    #[error("layout version {version} failed sample validation ({sample}): {reason}")]
    SampleValidationFailed {
        version: String,
        sample: &'static str,
        reason: String,
    },
}

/// Registry of vetted layout versions.
///
/// Built-in versions cover the current table ("2022.2", the default) and
/// the historical revision ("2021.1") whose 93-103 window was mapped to the
/// authorization amount; the old table is retained so archived files decode
/// byte-for-byte the way they originally did.
pub struct LayoutRegistry {
    versions: RwLock<HashMap<String, Arc<LayoutVersion>>>,
    default_version: String,
}

impl LayoutRegistry {
    /// Registry pre-loaded with the built-in, sample-validated versions.
    pub fn builtin() -> Result<Self, LayoutError> {
        let registry = Self {
            versions: RwLock::new(HashMap::new()),
            default_version: "2022.2".to_string(),
        };
        registry.register(layout_2021_1())?;
        registry.register(layout_2022_2())?;
        Ok(registry)
    }

    /// Validate a version against its known-good samples, then admit it.
    pub fn register(&self, version: LayoutVersion) -> Result<(), LayoutError> {
        for check in sample_checks(version.name()) {
            let layout = version.layout_for(check.record_type).ok_or_else(|| {
                LayoutError::SampleValidationFailed {
                    version: version.name().to_string(),
                    sample: check.description,
                    reason: format!("no layout for record type {}", check.record_type),
                }
            })?;
            let spec = layout
                .fields
                .iter()
                .find(|spec| spec.name == check.field)
                .ok_or_else(|| LayoutError::SampleValidationFailed {
                    version: version.name().to_string(),
                    sample: check.description,
                    reason: format!("layout has no field {}", check.field),
                })?;
            match spec.extract(check.line) {
                Ok(Some(value)) if value == check.expected => {}
                Ok(other) => {
                    return Err(LayoutError::SampleValidationFailed {
                        version: version.name().to_string(),
                        sample: check.description,
                        reason: format!("field {} decoded to {other:?}", check.field),
                    });
                }
                Err(reason) => {
                    return Err(LayoutError::SampleValidationFailed {
                        version: version.name().to_string(),
                        sample: check.description,
                        reason,
                    });
                }
            }
        }

        self.versions
            .write()
            .insert(version.name().to_string(), Arc::new(version));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<LayoutVersion>, LayoutError> {
        self.versions
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| LayoutError::UnknownVersion(name.to_string()))
    }

    pub fn default_version(&self) -> Result<Arc<LayoutVersion>, LayoutError> {
        self.get(&self.default_version)
    }

    pub fn default_version_name(&self) -> &str {
        &self.default_version
    }

    pub fn version_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.versions.read().keys().cloned().collect();
        names.sort();
        names
    }
}

/// Known-good sample line: a settled Visa purchase, 103 bytes.
///
/// Offsets of note: reference number at 20-42, transaction date at 47-54,
/// transaction amount 000000000005502 at 69-83 (55.02), merchant amount
/// 00000008539 at 93-103 (85.39).
pub const SAMPLE_DETAIL_LINE: &str = "4445026579380000 4724013342264900010123456123411282022A123450000000100000000000550205VS0000000000008539";

/// Known-good batch header sample, 56 bytes.
pub const SAMPLE_BATCH_HEADER_LINE: &str =
    "4445026579380000 100000012406152022000000000450670000124";

fn sample_checks(version: &str) -> Vec<SampleCheck> {
    let mut checks = vec![
        SampleCheck {
            description: "detail transaction amount window",
            line: SAMPLE_DETAIL_LINE,
            record_type: RecordType::DetailTransaction,
            field: "transaction_amount",
            expected: FieldValue::Amount(Amount::from_cents(5502)),
        },
        SampleCheck {
            description: "detail reference number window",
            line: SAMPLE_DETAIL_LINE,
            record_type: RecordType::DetailTransaction,
            field: "reference_number",
            expected: FieldValue::Text("24013342264900010123456".to_string()),
        },
        SampleCheck {
            description: "detail transaction date window",
            line: SAMPLE_DETAIL_LINE,
            record_type: RecordType::DetailTransaction,
            field: "transaction_date",
            expected: FieldValue::Date(
                chrono::NaiveDate::from_ymd_opt(2022, 11, 28).expect("valid sample date"),
            ),
        },
    ];
    if version == "2022.2" {
        checks.push(SampleCheck {
            description: "detail merchant amount window",
            line: SAMPLE_DETAIL_LINE,
            record_type: RecordType::DetailTransaction,
            field: "merchant_amount",
            expected: FieldValue::Amount(Amount::from_cents(8539)),
        });
    }
    checks
}

fn detail_common_fields() -> Vec<FieldSpec> {
    vec![
        FieldSpec::new("merchant_number", 1, 16, FieldKind::Text),
        FieldSpec::new("reference_number", 20, 23, FieldKind::Text),
        FieldSpec::new("account_last_four", 43, 4, FieldKind::Text),
        FieldSpec::new("transaction_date", 47, 8, FieldKind::DateMmddccyy),
        FieldSpec::new("authorization_number", 55, 6, FieldKind::Text),
        FieldSpec::new("batch_number", 61, 8, FieldKind::Text),
        FieldSpec::new("transaction_amount", 69, 15, FieldKind::AmountCents),
        FieldSpec::new("transaction_code", 84, 2, FieldKind::Text),
        FieldSpec::new("card_type", 86, 2, FieldKind::Text),
        FieldSpec::new("plan_code", 88, 5, FieldKind::Text),
    ]
}

fn extension_and_header_layouts() -> Vec<RecordLayout> {
    vec![
        RecordLayout {
            record_type: RecordType::BatchHeader,
            fields: vec![
                FieldSpec::new("merchant_number", 1, 16, FieldKind::Text),
                FieldSpec::new("batch_number", 20, 8, FieldKind::Text),
                FieldSpec::new("batch_date", 28, 8, FieldKind::DateMmddccyy),
                FieldSpec::new("net_amount", 36, 15, FieldKind::AmountCents),
                FieldSpec::new("record_count", 51, 6, FieldKind::Text),
            ],
        },
        RecordLayout {
            record_type: RecordType::PurchasingExtension,
            fields: vec![
                FieldSpec::new("reference_number", 20, 23, FieldKind::Text),
                FieldSpec::new("sales_tax_amount", 43, 11, FieldKind::AmountCents),
                FieldSpec::new("customer_code", 54, 16, FieldKind::Text),
                FieldSpec::new("discount_amount", 70, 11, FieldKind::AmountCents),
            ],
        },
        RecordLayout {
            record_type: RecordType::GeographicExtension,
            fields: vec![
                FieldSpec::new("reference_number", 20, 23, FieldKind::Text),
                FieldSpec::new("merchant_city", 43, 13, FieldKind::Text),
                FieldSpec::new("merchant_state", 56, 2, FieldKind::Text),
                FieldSpec::new("merchant_zip", 58, 9, FieldKind::Text),
                FieldSpec::new("country_code", 67, 3, FieldKind::Text),
            ],
        },
    ]
}

/// Current production table: the 93-103 window is the merchant settlement
/// amount.
fn layout_2022_2() -> LayoutVersion {
    let mut detail = detail_common_fields();
    detail.push(FieldSpec::new(
        "merchant_amount",
        93,
        11,
        FieldKind::AmountCents,
    ));

    let mut layouts = extension_and_header_layouts();
    layouts.push(RecordLayout {
        record_type: RecordType::DetailTransaction,
        fields: detail,
    });
    LayoutVersion::new("2022.2", layouts)
}

/// Historical table: 93-103 was mis-mapped to the authorization amount.
/// Kept so archived files reprocess exactly as they originally decoded.
fn layout_2021_1() -> LayoutVersion {
    let mut detail = detail_common_fields();
    detail.push(FieldSpec::new(
        "authorization_amount",
        93,
        11,
        FieldKind::AmountCents,
    ));

    let mut layouts = extension_and_header_layouts();
    layouts.push(RecordLayout {
        record_type: RecordType::DetailTransaction,
        fields: detail,
    });
    LayoutVersion::new("2021.1", layouts)
}
