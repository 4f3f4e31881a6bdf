//! Document types exchanged between the pipeline and the external agents.
//!
//! Everything here is plain data. Binary payloads are held in [`Bytes`] so a
//! batch can be handed to several downstream steps without copying.

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Providers and items
// ---------------------------------------------------------------------------

/// Where a Source step pulls its documents from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Provider {
    Gmail,
    Outlook,
    GoogleDrive,
    OneDrive,
    Dropbox,
    /// Manual upload; documents are read from a local directory.
    Upload,
}

impl Provider {
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Gmail => "Gmail",
            Self::Outlook => "Outlook",
            Self::GoogleDrive => "Google Drive",
            Self::OneDrive => "OneDrive",
            Self::Dropbox => "Dropbox",
            Self::Upload => "Upload",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Opaque handle to one email or file returned by `list_items`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemRef {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl ItemRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), label: None }
    }
}

/// One MIME part. Parts nest: a `multipart/*` part carries children.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MimePart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub mime_type: String,
    #[serde(default, skip_serializing)]
    pub body: Bytes,
    /// Declared size in bytes; providers report it even when the body is elided.
    pub size: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parts: Vec<MimePart>,
}

impl MimePart {
    /// A leaf part whose declared size matches its body.
    pub fn leaf(filename: impl Into<String>, mime_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        Self {
            filename: Some(filename.into()),
            mime_type: mime_type.into(),
            size: body.len() as u64,
            body,
            parts: Vec::new(),
        }
    }

    /// A container part (e.g. `multipart/mixed`) holding `parts`.
    pub fn multipart(mime_type: impl Into<String>, parts: Vec<MimePart>) -> Self {
        Self {
            filename: None,
            mime_type: mime_type.into(),
            body: Bytes::new(),
            size: 0,
            parts,
        }
    }
}

/// A fetched email or file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawItem {
    pub id: String,
    /// Header name → value. Names are matched case-insensitively.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub parts: Vec<MimePart>,
}

impl RawItem {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A qualifying PDF or image pulled out of an item's part tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub mime_type: String,
    #[serde(skip)]
    pub bytes: Bytes,
    pub size: u64,
}

// ---------------------------------------------------------------------------
// Agent outputs
// ---------------------------------------------------------------------------

/// Result of the Classify agent for one attachment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    pub is_invoice: bool,
    /// In `[0, 1]`.
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_fields: Option<serde_json::Value>,
}

impl Classification {
    pub fn new(is_invoice: bool, confidence: f32) -> Self {
        Self {
            is_invoice,
            confidence: confidence.clamp(0.0, 1.0),
            raw_fields: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxIds {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supplier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buyer: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    #[serde(default)]
    pub quantity: f64,
    #[serde(default)]
    pub unit_price: f64,
    #[serde(default)]
    pub amount: f64,
}

/// Normalized record returned by the Extract agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedInvoice {
    #[serde(default)]
    pub invoice_number: Option<String>,
    #[serde(default)]
    pub po_number: Option<String>,
    /// As printed on the document; normalization is the consumer's concern.
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub tax_ids: TaxIds,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
    pub extraction_confidence: f32,
}

// ---------------------------------------------------------------------------
// Storage
// ---------------------------------------------------------------------------

/// Identifier assigned by the storage sink to an inserted row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RowId(pub String);

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One persisted row: the shared invoice header plus a single line item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvoiceRow {
    pub source_ref: String,
    pub filename: String,
    pub invoice_number: Option<String>,
    pub po_number: Option<String>,
    pub invoice_date: Option<String>,
    pub supplier_tax_id: Option<String>,
    pub buyer_tax_id: Option<String>,
    pub currency: Option<String>,
    pub line_index: u32,
    pub line: LineItem,
    pub extraction_confidence: f32,
    pub needs_review: bool,
}

/// A notification produced by an Alert step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub channel: String,
    pub subject: String,
    pub body: String,
}
