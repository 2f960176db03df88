//! Product payloads returned by the catalog API
//!
//! A product body is decoded in two stages. The strict stage deserializes
//! the body into [`ProductResponse`]; when the vendor sends something that
//! does not fit (a missing name, a price encoded as a string) the lenient
//! stage pulls each price out of the JSON object on its own. Both stages
//! produce the same [`PriceRecord`], so the merge step never needs to know
//! which one succeeded.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// The four price fields written to the output table, in column order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PriceField {
    /// Catalog list price
    Base,
    /// Price for the logged-in account
    Personal,
    /// Recommended wholesale price
    Roc,
    /// Recommended retail price
    Rrc,
}

impl PriceField {
    /// All fields in output column order
    pub const ALL: [PriceField; 4] = [
        PriceField::Base,
        PriceField::Personal,
        PriceField::Roc,
        PriceField::Rrc,
    ];

    /// JSON key of the field, also used as the output column header
    pub fn key(self) -> &'static str {
        match self {
            PriceField::Base => "priceBase",
            PriceField::Personal => "pricePersonal",
            PriceField::Roc => "priceRoc",
            PriceField::Rrc => "priceRrc",
        }
    }
}

/// Strict shape of a product-info response
///
/// Only the fields the pipeline needs are declared; the rest of the vendor
/// payload (images, analogs, ETIM features, stock) is ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductResponse {
    /// Vendor article code
    pub article: String,
    /// Product name
    pub name: String,
    /// Catalog list price
    pub price_base: Option<f64>,
    /// Price for the logged-in account
    pub price_personal: Option<f64>,
    /// Recommended wholesale price
    pub price_roc: Option<f64>,
    /// Recommended retail price
    pub price_rrc: Option<f64>,
}

/// Per-field optional prices for one article
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PriceRecord {
    /// Catalog list price
    pub price_base: Option<f64>,
    /// Price for the logged-in account
    pub price_personal: Option<f64>,
    /// Recommended wholesale price
    pub price_roc: Option<f64>,
    /// Recommended retail price
    pub price_rrc: Option<f64>,
}

/// Why a product body could not be decoded at all
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    /// The body is valid JSON but not an object
    #[error("expected a JSON object, got {0}")]
    NotAnObject(&'static str),
}

impl PriceRecord {
    /// Value of one field, `None` when missing or not a finite number
    pub fn get(&self, field: PriceField) -> Option<f64> {
        let value = match field {
            PriceField::Base => self.price_base,
            PriceField::Personal => self.price_personal,
            PriceField::Roc => self.price_roc,
            PriceField::Rrc => self.price_rrc,
        };
        value.filter(|v| v.is_finite())
    }

    /// Decode a raw product body
    ///
    /// Tries the strict [`ProductResponse`] shape first. On a validation
    /// failure the failure is logged and each price is extracted on its own
    /// with [`coerce_number`]. Only a body that is not a JSON object fails.
    pub fn decode(value: &Value) -> Result<Self, DecodeError> {
        let Value::Object(map) = value else {
            return Err(DecodeError::NotAnObject(json_kind(value)));
        };

        match ProductResponse::deserialize(value) {
            Ok(product) => Ok(product.into()),
            Err(e) => {
                let article = map.get("article").and_then(Value::as_str).unwrap_or("?");
                tracing::warn!(
                    article = %article,
                    error = %e,
                    "product payload failed validation, extracting prices field by field"
                );
                Ok(Self::extract_lenient(map))
            }
        }
    }

    fn extract_lenient(map: &serde_json::Map<String, Value>) -> Self {
        let field = |f: PriceField| map.get(f.key()).and_then(coerce_number);
        Self {
            price_base: field(PriceField::Base),
            price_personal: field(PriceField::Personal),
            price_roc: field(PriceField::Roc),
            price_rrc: field(PriceField::Rrc),
        }
    }
}

impl From<ProductResponse> for PriceRecord {
    fn from(p: ProductResponse) -> Self {
        Self {
            price_base: p.price_base,
            price_personal: p.price_personal,
            price_roc: p.price_roc,
            price_rrc: p.price_rrc,
        }
    }
}

/// Best-effort conversion of a JSON value to a finite number
///
/// Accepts JSON numbers and strings holding a decimal number (surrounding
/// whitespace and a decimal comma are tolerated). Everything else,
/// including `null`, booleans and non-finite values, yields `None`.
pub fn coerce_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().replace(',', ".").parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strict_decode_ignores_vendor_fields() {
        let body = json!({
            "article": "MVA20-1-016-C",
            "name": "Автоматический выключатель ВА47-29 1Р 16А",
            "priceBase": 210.5,
            "pricePersonal": 150,
            "priceRoc": null,
            "priceRrc": 260.0,
            "imageUrls": ["https://cdn.example/1.png"],
            "isArchived": false
        });

        let record = PriceRecord::decode(&body).unwrap();
        assert_eq!(record.get(PriceField::Base), Some(210.5));
        assert_eq!(record.get(PriceField::Personal), Some(150.0));
        assert_eq!(record.get(PriceField::Roc), None);
        assert_eq!(record.get(PriceField::Rrc), Some(260.0));
    }

    #[test]
    fn invalid_field_falls_back_to_per_field_extraction() {
        let body = json!({
            "article": "X1",
            "name": "x",
            "priceBase": 12.5,
            "pricePersonal": null,
            "priceRoc": "bad",
            "priceRrc": 7
        });

        let record = PriceRecord::decode(&body).unwrap();
        assert_eq!(record.get(PriceField::Base), Some(12.5));
        assert_eq!(record.get(PriceField::Personal), None);
        assert_eq!(record.get(PriceField::Roc), None);
        assert_eq!(record.get(PriceField::Rrc), Some(7.0));
    }

    #[test]
    fn missing_required_name_still_yields_prices() {
        let body = json!({ "priceBase": "99.90", "priceRrc": " 120 " });

        let record = PriceRecord::decode(&body).unwrap();
        assert_eq!(record.get(PriceField::Base), Some(99.9));
        assert_eq!(record.get(PriceField::Personal), None);
        assert_eq!(record.get(PriceField::Rrc), Some(120.0));
    }

    #[test]
    fn non_object_body_is_rejected() {
        assert_eq!(
            PriceRecord::decode(&json!([1, 2, 3])),
            Err(DecodeError::NotAnObject("array"))
        );
        assert_eq!(
            PriceRecord::decode(&Value::Null),
            Err(DecodeError::NotAnObject("null"))
        );
    }

    #[test]
    fn coerce_number_rules() {
        assert_eq!(coerce_number(&json!(3)), Some(3.0));
        assert_eq!(coerce_number(&json!("1,5")), Some(1.5));
        assert_eq!(coerce_number(&json!("NaN")), None);
        assert_eq!(coerce_number(&json!("inf")), None);
        assert_eq!(coerce_number(&json!(true)), None);
        assert_eq!(coerce_number(&json!({})), None);
        assert_eq!(coerce_number(&Value::Null), None);
    }

    #[test]
    fn field_keys_follow_column_order() {
        let keys: Vec<_> = PriceField::ALL.iter().map(|f| f.key()).collect();
        assert_eq!(keys, ["priceBase", "pricePersonal", "priceRoc", "priceRrc"]);
    }

    #[test]
    fn record_get_hides_non_finite_values() {
        let record = PriceRecord {
            price_base: Some(f64::NAN),
            price_personal: Some(f64::INFINITY),
            price_roc: Some(1.0),
            price_rrc: None,
        };
        assert_eq!(record.get(PriceField::Base), None);
        assert_eq!(record.get(PriceField::Personal), None);
        assert_eq!(record.get(PriceField::Roc), Some(1.0));
    }
}
