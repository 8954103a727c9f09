//! `Content-Range` header parsing.

use crate::error::TransferError;

/// A parsed `Content-Range: bytes <start>-<end>/<total|*>` or
/// `Content-Range: bytes */<total>` (the form used with 416).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    /// Inclusive byte span of the body; `None` for the unsatisfied form.
    pub span: Option<(u64, u64)>,
    /// Full resource length; `None` when the server sent `*`.
    pub total: Option<u64>,
}

impl ContentRange {
    pub fn parse(value: &str) -> Result<Self, TransferError> {
        let malformed = || TransferError::Protocol(format!("malformed Content-Range '{value}'"));

        let rest = value.trim().strip_prefix("bytes").ok_or_else(malformed)?;
        let rest = rest.trim_start();
        let (span, total) = rest.split_once('/').ok_or_else(malformed)?;

        let total = match total.trim() {
            "*" => None,
            t => Some(t.parse::<u64>().map_err(|_| malformed())?),
        };

        let span = match span.trim() {
            "*" => None,
            s => {
                let (start, end) = s.split_once('-').ok_or_else(malformed)?;
                let start: u64 = start.trim().parse().map_err(|_| malformed())?;
                let end: u64 = end.trim().parse().map_err(|_| malformed())?;
                if end < start {
                    return Err(malformed());
                }
                if let Some(total) = total {
                    if end >= total {
                        return Err(malformed());
                    }
                }
                Some((start, end))
            }
        };

        if span.is_none() && total.is_none() {
            return Err(malformed());
        }
        Ok(Self { span, total })
    }

    /// Number of body bytes covered by the span.
    pub fn len(&self) -> u64 {
        self.span.map(|(start, end)| end - start + 1).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
