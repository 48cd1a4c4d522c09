// Extraction RPC envelope and post-processing of model output
//
// The document model returns JSON, sometimes wrapped in a markdown code
// fence and sometimes split across chunks. Everything here normalizes that
// output before stage 2 persists it.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;

use crate::error::{Result, StockflowError};

/// Supplier fields as parsed off the document, all optional
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SupplierStub {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub website: Option<String>,
    pub address: Option<String>,
}

impl SupplierStub {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.email.is_none()
            && self.phone.is_none()
            && self.website.is_none()
            && self.address.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedLineItem {
    #[serde(default)]
    pub sku: Option<String>,
    pub product_name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub quantity: i64,
    #[serde(default)]
    pub unit_cost: Option<f64>,
    #[serde(default)]
    pub total_cost: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DocumentTotals {
    #[serde(default)]
    pub subtotal: Option<f64>,
    #[serde(default)]
    pub tax: Option<f64>,
    #[serde(default)]
    pub total: Option<f64>,
}

/// Structured document contents produced by stage 1
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedDocument {
    #[serde(default)]
    pub number: Option<String>,
    #[serde(default)]
    pub supplier: SupplierStub,
    #[serde(default)]
    pub line_items: Vec<ExtractedLineItem>,
    #[serde(default)]
    pub totals: Option<DocumentTotals>,
    #[serde(default)]
    pub currency: Option<String>,
}

/// Wire envelope returned by the extraction RPC
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionEnvelope {
    pub success: bool,
    #[serde(default)]
    pub extracted_data: Option<ExtractedDocument>,
    /// Large documents come back split; chunks merge in order
    #[serde(default)]
    pub chunks: Option<Vec<ExtractedDocument>>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub field_confidences: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ExtractionEnvelope {
    /// Validate the envelope and pull out the document
    pub fn into_document(self) -> Result<(ExtractedDocument, f64)> {
        if !self.success {
            return Err(StockflowError::validation(format!(
                "extraction reported failure: {}",
                self.error.as_deref().unwrap_or("no detail")
            )));
        }
        let document = self
            .extracted_data
            .or_else(|| self.chunks.and_then(merge_chunks))
            .ok_or_else(|| StockflowError::validation("extraction envelope missing extracted_data"))?;
        if document.line_items.is_empty() {
            return Err(StockflowError::validation("extraction produced no line items"));
        }
        Ok((document, self.confidence.unwrap_or(0.0)))
    }
}

/// Timeout for the extraction RPC: 60 s base + 10 s per 100 kB, capped at 120 s
pub fn adaptive_timeout(byte_size: u64) -> Duration {
    let extra = (byte_size / 100_000) * 10;
    Duration::from_secs((60 + extra).min(120))
}

/// Strip a surrounding markdown code fence (```json ... ```) if present
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    let rest = rest.strip_prefix('\n').unwrap_or(rest);
    let rest = rest.strip_suffix("```").unwrap_or(rest);
    rest.strip_suffix('\n').unwrap_or(rest).trim()
}

/// Merge chunked extraction responses into one document
///
/// Later chunks win on scalar fields; line items concatenate in chunk order.
pub fn merge_chunks(chunks: Vec<ExtractedDocument>) -> Option<ExtractedDocument> {
    let mut iter = chunks.into_iter();
    let mut merged = iter.next()?;
    for chunk in iter {
        if chunk.number.is_some() {
            merged.number = chunk.number;
        }
        if !chunk.supplier.is_empty() {
            merged.supplier = chunk.supplier;
        }
        if chunk.totals.is_some() {
            merged.totals = chunk.totals;
        }
        if chunk.currency.is_some() {
            merged.currency = chunk.currency;
        }
        merged.line_items.extend(chunk.line_items);
    }
    Some(merged)
}

fn pack_patterns() -> &'static [Regex; 3] {
    static PATTERNS: OnceLock<[Regex; 3]> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            Regex::new(r"(?i)case of (\d+)").unwrap(),
            Regex::new(r"(?i)[\-\(\s](\d+)\s*ct\b").unwrap(),
            Regex::new(r"(?i)[\-\(\s](\d+)\s*-?\s*(pack|pcs|count)\b").unwrap(),
        ]
    })
}

/// Recover pack quantities the model left at 1
///
/// Product names commonly encode the pack size ("Widget A - Case of 12").
/// When the model returned quantity 1 and a pattern matches, the captured
/// count replaces the quantity and the unit cost is recomputed from the
/// authoritative line total.
pub fn apply_pack_quantity(item: &mut ExtractedLineItem) {
    if item.quantity != 1 {
        return;
    }
    let captured = pack_patterns()
        .iter()
        .find_map(|re| re.captures(&item.product_name))
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<i64>().ok());
    let Some(quantity) = captured.filter(|q| *q > 1) else {
        return;
    };
    item.quantity = quantity;
    if let Some(total) = item.total_cost {
        item.unit_cost = Some(total / quantity as f64);
    }
}

/// Run the pack heuristics over every line item of a document
pub fn post_process(document: &mut ExtractedDocument) {
    for item in &mut document.line_items {
        apply_pack_quantity(item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str, quantity: i64, total: Option<f64>) -> ExtractedLineItem {
        ExtractedLineItem {
            sku: None,
            product_name: name.to_string(),
            description: None,
            quantity,
            unit_cost: None,
            total_cost: total,
        }
    }

    #[test]
    fn fence_stripping_handles_plain_and_fenced() {
        assert_eq!(strip_code_fences("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("  ```json\n{}\n```  "), "{}");
    }

    #[test]
    fn adaptive_timeout_scales_and_caps() {
        assert_eq!(adaptive_timeout(10_000), Duration::from_secs(60));
        assert_eq!(adaptive_timeout(250_000), Duration::from_secs(80));
        assert_eq!(adaptive_timeout(5_000_000), Duration::from_secs(120));
    }

    #[test]
    fn case_of_pattern_recovers_quantity_and_unit_cost() {
        let mut li = item("Widget A - Case of 12", 1, Some(39.0));
        apply_pack_quantity(&mut li);
        assert_eq!(li.quantity, 12);
        let unit = li.unit_cost.unwrap();
        assert!((unit - 3.25).abs() < 0.01);
    }

    #[test]
    fn ct_and_pack_patterns_match() {
        let mut li = item("Paper Towels - 24 ct", 1, Some(48.0));
        apply_pack_quantity(&mut li);
        assert_eq!(li.quantity, 24);

        let mut li = item("Batteries (8-Pack)", 1, Some(16.0));
        apply_pack_quantity(&mut li);
        assert_eq!(li.quantity, 8);

        let mut li = item("Bolts (100 pcs)", 1, None);
        apply_pack_quantity(&mut li);
        assert_eq!(li.quantity, 100);
    }

    #[test]
    fn explicit_quantity_is_left_alone() {
        let mut li = item("Widget A - Case of 12", 3, Some(120.0));
        apply_pack_quantity(&mut li);
        assert_eq!(li.quantity, 3);
        assert_eq!(li.unit_cost, None);
    }

    #[test]
    fn chunk_merge_concatenates_items_and_keeps_last_header() {
        let first = ExtractedDocument {
            number: Some("1001".into()),
            supplier: SupplierStub::default(),
            line_items: vec![item("A", 1, None)],
            totals: None,
            currency: None,
        };
        let second = ExtractedDocument {
            number: None,
            supplier: SupplierStub {
                name: Some("Acme".into()),
                ..Default::default()
            },
            line_items: vec![item("B", 2, None)],
            totals: Some(DocumentTotals {
                total: Some(50.0),
                ..Default::default()
            }),
            currency: None,
        };
        let merged = merge_chunks(vec![first, second]).unwrap();
        assert_eq!(merged.number.as_deref(), Some("1001"));
        assert_eq!(merged.supplier.name.as_deref(), Some("Acme"));
        assert_eq!(merged.line_items.len(), 2);
        assert_eq!(merged.totals.unwrap().total, Some(50.0));
    }

    #[test]
    fn envelope_validation_rejects_empty_payloads() {
        let envelope = ExtractionEnvelope {
            success: true,
            extracted_data: None,
            chunks: None,
            confidence: Some(0.9),
            field_confidences: None,
            error: None,
        };
        assert!(envelope.into_document().is_err());

        let envelope = ExtractionEnvelope {
            success: false,
            extracted_data: None,
            chunks: None,
            confidence: None,
            field_confidences: None,
            error: Some("model refused".into()),
        };
        assert!(envelope.into_document().is_err());
    }
}
