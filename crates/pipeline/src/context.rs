//! Context analysis: does this email or file look invoice-related at all?

use std::collections::BTreeSet;

use agents::RawItem;
use serde::{Deserialize, Serialize};

use crate::attachments::PartWalker;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextSignals {
    pub is_likely_invoice: bool,
    pub matched_keywords: BTreeSet<String>,
}

/// Lower-case `text` and collapse every run of non-alphanumerics into one
/// space, padded at both ends so phrase lookups respect word boundaries.
fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push(' ');
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        out.push_str(&word.to_lowercase());
        out.push(' ');
    }
    if out.len() == 1 {
        out.push(' ');
    }
    out
}

/// Inspect subject, sender, body and attachment filenames for `keywords`.
pub fn analyze_context(item: &RawItem, keywords: &[String], max_depth: usize) -> ContextSignals {
    let mut text = String::new();
    for header in ["subject", "from"] {
        if let Some(value) = item.header(header) {
            text.push_str(value);
            text.push('\n');
        }
    }
    text.push_str(&item.body);
    for (_, part) in PartWalker::new(&item.parts, max_depth) {
        if let Some(name) = &part.filename {
            text.push('\n');
            text.push_str(name);
        }
    }

    let haystack = normalize(&text);
    let matched_keywords: BTreeSet<String> = keywords
        .iter()
        .filter(|kw| {
            let needle = normalize(kw);
            !needle.trim().is_empty() && haystack.contains(&needle)
        })
        .cloned()
        .collect();

    ContextSignals {
        is_likely_invoice: !matched_keywords.is_empty(),
        matched_keywords,
    }
}
