//! Typed record variants produced by the codec.
//!
//! Each record family carries its own fixed, named field set; values that
//! failed field-level decoding are `None`. Unrecognized tags land in
//! [`TddfRecord::Other`] with the tag and raw line preserved, so every
//! physical line has a typed representation.

use super::fields::{Amount, FieldValue};
use super::layout::RecordType;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Decoded field values keyed by layout field name.
///
/// A `BTreeMap` keeps JSONB serialization stable across runs, which matters
/// for the raw-line fallback of duplicate detection.
pub type FieldMap = BTreeMap<String, FieldValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchHeaderRecord {
    pub merchant_number: Option<String>,
    pub batch_number: Option<String>,
    pub batch_date: Option<NaiveDate>,
    pub net_amount: Option<Amount>,
    pub record_count: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailTransactionRecord {
    pub merchant_number: Option<String>,
    pub reference_number: Option<String>,
    pub account_last_four: Option<String>,
    pub transaction_date: Option<NaiveDate>,
    pub authorization_number: Option<String>,
    pub batch_number: Option<String>,
    pub transaction_amount: Option<Amount>,
    pub transaction_code: Option<String>,
    pub card_type: Option<String>,
    pub plan_code: Option<String>,
    /// Merchant settlement amount (93-103 window, "2022.2" onward).
    pub merchant_amount: Option<Amount>,
    /// Authorization amount as the historical "2021.1" table mapped 93-103.
    pub authorization_amount: Option<Amount>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PurchasingExtensionRecord {
    pub reference_number: Option<String>,
    pub sales_tax_amount: Option<Amount>,
    pub customer_code: Option<String>,
    pub discount_amount: Option<Amount>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeographicExtensionRecord {
    pub reference_number: Option<String>,
    pub merchant_city: Option<String>,
    pub merchant_state: Option<String>,
    pub merchant_zip: Option<String>,
    pub country_code: Option<String>,
}

/// Catch-all for unrecognized record-type tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtherRecord {
    pub tag: String,
    pub raw: String,
}

/// One decoded TDDF record, tagged by family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record_type", rename_all = "snake_case")]
pub enum TddfRecord {
    BatchHeader(BatchHeaderRecord),
    DetailTransaction(DetailTransactionRecord),
    PurchasingExtension(PurchasingExtensionRecord),
    GeographicExtension(GeographicExtensionRecord),
    Other(OtherRecord),
}

impl TddfRecord {
    pub fn record_type(&self) -> RecordType {
        match self {
            Self::BatchHeader(_) => RecordType::BatchHeader,
            Self::DetailTransaction(_) => RecordType::DetailTransaction,
            Self::PurchasingExtension(_) => RecordType::PurchasingExtension,
            Self::GeographicExtension(_) => RecordType::GeographicExtension,
            Self::Other(_) => RecordType::Other,
        }
    }

    /// Reference/reconciliation number when this record family carries one.
    ///
    /// Records without a reference fall back to raw-line equality for
    /// duplicate detection.
    pub fn reference_number(&self) -> Option<&str> {
        match self {
            Self::DetailTransaction(record) => record.reference_number.as_deref(),
            Self::PurchasingExtension(record) => record.reference_number.as_deref(),
            Self::GeographicExtension(record) => record.reference_number.as_deref(),
            Self::BatchHeader(_) | Self::Other(_) => None,
        }
    }

    /// The monetary field that feeds aggregation sums, if this family has
    /// one and it decoded.
    pub fn primary_amount(&self) -> Option<Amount> {
        match self {
            Self::BatchHeader(record) => record.net_amount,
            Self::DetailTransaction(record) => record.transaction_amount,
            Self::PurchasingExtension(record) => record.sales_tax_amount,
            Self::GeographicExtension(_) | Self::Other(_) => None,
        }
    }

    /// The business date used for period bucketing, if one decoded.
    pub fn business_date(&self) -> Option<NaiveDate> {
        match self {
            Self::BatchHeader(record) => record.batch_date,
            Self::DetailTransaction(record) => record.transaction_date,
            Self::PurchasingExtension(_) | Self::GeographicExtension(_) | Self::Other(_) => None,
        }
    }

    /// Build the typed record for `record_type` from a decoded field map.
    pub fn from_fields(record_type: RecordType, fields: &FieldMap, raw: &str, tag: &str) -> Self {
        let text = |name: &str| -> Option<String> {
            fields.get(name).and_then(|v| v.as_text()).map(String::from)
        };
        let amount = |name: &str| -> Option<Amount> { fields.get(name).and_then(|v| v.as_amount()) };
        let date = |name: &str| -> Option<NaiveDate> { fields.get(name).and_then(|v| v.as_date()) };

        match record_type {
            RecordType::BatchHeader => Self::BatchHeader(BatchHeaderRecord {
                merchant_number: text("merchant_number"),
                batch_number: text("batch_number"),
                batch_date: date("batch_date"),
                net_amount: amount("net_amount"),
                record_count: text("record_count"),
            }),
            RecordType::DetailTransaction => Self::DetailTransaction(DetailTransactionRecord {
                merchant_number: text("merchant_number"),
                reference_number: text("reference_number"),
                account_last_four: text("account_last_four"),
                transaction_date: date("transaction_date"),
                authorization_number: text("authorization_number"),
                batch_number: text("batch_number"),
                transaction_amount: amount("transaction_amount"),
                transaction_code: text("transaction_code"),
                card_type: text("card_type"),
                plan_code: text("plan_code"),
                merchant_amount: amount("merchant_amount"),
                authorization_amount: amount("authorization_amount"),
            }),
            RecordType::PurchasingExtension => Self::PurchasingExtension(PurchasingExtensionRecord {
                reference_number: text("reference_number"),
                sales_tax_amount: amount("sales_tax_amount"),
                customer_code: text("customer_code"),
                discount_amount: amount("discount_amount"),
            }),
            RecordType::GeographicExtension => Self::GeographicExtension(GeographicExtensionRecord {
                reference_number: text("reference_number"),
                merchant_city: text("merchant_city"),
                merchant_state: text("merchant_state"),
                merchant_zip: text("merchant_zip"),
                country_code: text("country_code"),
            }),
            RecordType::Other => Self::Other(OtherRecord {
                tag: tag.to_string(),
                raw: raw.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_other_record_retains_tag_and_raw() {
        let record = TddfRecord::from_fields(
            RecordType::Other,
            &FieldMap::new(),
            "some unrecognized line content",
            "99",
        );
        match &record {
            TddfRecord::Other(other) => {
                assert_eq!(other.tag, "99");
                assert_eq!(other.raw, "some unrecognized line content");
            }
            _ => panic!("expected Other variant"),
        }
        assert_eq!(record.record_type(), RecordType::Other);
        assert!(record.reference_number().is_none());
        assert!(record.primary_amount().is_none());
    }

    #[test]
    fn test_detail_record_exposes_reference_and_amount() {
        let mut fields = FieldMap::new();
        fields.insert(
            "reference_number".to_string(),
            FieldValue::Text("24013342264900010123456".to_string()),
        );
        fields.insert(
            "transaction_amount".to_string(),
            FieldValue::Amount(Amount::from_cents(5502)),
        );

        let record =
            TddfRecord::from_fields(RecordType::DetailTransaction, &fields, "raw", "47");
        assert_eq!(record.reference_number(), Some("24013342264900010123456"));
        assert_eq!(record.primary_amount().unwrap().cents(), 5502);
    }

    #[test]
    fn test_record_serialization_is_tagged() {
        let record = TddfRecord::Other(OtherRecord {
            tag: "99".to_string(),
            raw: "raw line".to_string(),
        });
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["record_type"], "other");
        let back: TddfRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}
