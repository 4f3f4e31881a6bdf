//! Attachment discovery over a (possibly nested) MIME part tree.
//!
//! Traversal uses an explicit stack rather than recursion, and parts below
//! `max_depth` are never visited, so a malformed or hostile message cannot
//! blow the stack.

use agents::{Attachment, MimePart};
use tracing::{debug, warn};

/// Pre-order, left-to-right iterator over a part forest with a depth cap.
pub struct PartWalker<'a> {
    stack: Vec<(usize, &'a MimePart)>,
    max_depth: usize,
    truncated: bool,
}

impl<'a> PartWalker<'a> {
    pub fn new(parts: &'a [MimePart], max_depth: usize) -> Self {
        Self {
            stack: parts.iter().rev().map(|p| (0, p)).collect(),
            max_depth,
            truncated: false,
        }
    }

    /// Whether any part was dropped because it sat below the depth cap.
    pub fn truncated(&self) -> bool {
        self.truncated
    }
}

impl<'a> Iterator for PartWalker<'a> {
    /// `(depth, part)`; top-level parts have depth 0.
    type Item = (usize, &'a MimePart);

    fn next(&mut self) -> Option<Self::Item> {
        let (depth, part) = self.stack.pop()?;
        if !part.parts.is_empty() {
            if depth + 1 < self.max_depth {
                self.stack
                    .extend(part.parts.iter().rev().map(|child| (depth + 1, child)));
            } else {
                self.truncated = true;
            }
        }
        Some((depth, part))
    }
}

/// Limits applied while collecting attachments.
#[derive(Debug, Clone, Copy)]
pub struct AttachmentLimits {
    pub max_bytes: u64,
    pub max_depth: usize,
}

/// Media type without parameters, lower-cased.
fn essence(mime_type: &str) -> String {
    mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// PDFs and images are the only media the extraction agents accept.
pub fn is_supported_media(mime_type: &str) -> bool {
    let essence = essence(mime_type);
    essence == "application/pdf" || essence.starts_with("image/")
}

/// Collect every qualifying leaf part, in document order.
pub fn collect_attachments(parts: &[MimePart], limits: AttachmentLimits) -> Vec<Attachment> {
    let mut walker = PartWalker::new(parts, limits.max_depth);
    let mut found = Vec::new();

    for (_, part) in walker.by_ref() {
        if !part.parts.is_empty() || !is_supported_media(&part.mime_type) {
            continue;
        }
        if part.body.is_empty() {
            debug!(filename = ?part.filename, "skipping part without payload");
            continue;
        }
        // A provider may declare more than it delivered; the larger figure counts.
        let size = part.size.max(part.body.len() as u64);
        if size > limits.max_bytes {
            debug!(filename = ?part.filename, size, cap = limits.max_bytes, "skipping oversized part");
            continue;
        }

        let filename = part
            .filename
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| format!("attachment-{}", found.len() + 1));

        found.push(Attachment {
            filename,
            mime_type: essence(&part.mime_type),
            bytes: part.body.clone(),
            size,
        });
    }

    if walker.truncated() {
        warn!(max_depth = limits.max_depth, "part tree exceeds depth cap; deeper parts ignored");
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMITS: AttachmentLimits = AttachmentLimits {
        max_bytes: 1024,
        max_depth: 16,
    };

    #[test]
    fn nested_parts_are_found_in_document_order() {
        let parts = vec![
            MimePart::leaf("body.txt", "text/plain", &b"hello"[..]),
            MimePart::multipart(
                "multipart/mixed",
                vec![
                    MimePart::leaf("a.pdf", "application/pdf", &b"pdf-a"[..]),
                    MimePart::multipart(
                        "multipart/related",
                        vec![MimePart::leaf("scan.jpg", "image/jpeg", &b"jpg"[..])],
                    ),
                ],
            ),
            MimePart::leaf("b.pdf", "Application/PDF; name=b.pdf", &b"pdf-b"[..]),
        ];

        let found = collect_attachments(&parts, LIMITS);
        let names: Vec<_> = found.iter().map(|a| a.filename.as_str()).collect();
        assert_eq!(names, vec!["a.pdf", "scan.jpg", "b.pdf"]);
        assert_eq!(found[2].mime_type, "application/pdf");
    }

    #[test]
    fn unsupported_and_oversized_parts_are_skipped() {
        let parts = vec![
            MimePart::leaf("sheet.xlsx", "application/vnd.ms-excel", &b"x"[..]),
            MimePart::leaf("huge.pdf", "application/pdf", vec![0u8; 2048]),
            MimePart::leaf("ok.png", "image/png", &b"png"[..]),
        ];
        let found = collect_attachments(&parts, LIMITS);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].filename, "ok.png");
    }

    #[test]
    fn declared_size_counts_against_the_cap() {
        let mut truncated = MimePart::leaf("big.pdf", "application/pdf", &b"%PDF"[..]);
        truncated.size = 4096;
        let mut elided = MimePart::leaf("elided.pdf", "application/pdf", &b""[..]);
        elided.size = 10;

        assert!(collect_attachments(&[truncated, elided], LIMITS).is_empty());
    }

    #[test]
    fn depth_cap_stops_descent() {
        // Five levels of nesting with the PDF at the bottom.
        let mut part = MimePart::leaf("deep.pdf", "application/pdf", &b"deep"[..]);
        for _ in 0..5 {
            part = MimePart::multipart("multipart/mixed", vec![part]);
        }
        let parts = vec![part];

        let shallow = AttachmentLimits { max_depth: 3, ..LIMITS };
        assert!(collect_attachments(&parts, shallow).is_empty());
        assert_eq!(collect_attachments(&parts, LIMITS).len(), 1);
    }

    #[test]
    fn unnamed_parts_get_a_generated_filename() {
        let mut part = MimePart::leaf("", "image/png", &b"png"[..]);
        part.filename = None;
        let found = collect_attachments(&[part], LIMITS);
        assert_eq!(found[0].filename, "attachment-1");
    }
}
