//! HTTP byte-range parsing
//!
//! Only single ranges are honored. A multi-range request is answered with its
//! first range; a header that does not parse is ignored (full content).

use crate::error::{Error, Result};

/// One `Range: bytes=...` specifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `bytes=start-` or `bytes=start-end`
    From { start: u64, end: Option<u64> },
    /// `bytes=-n`: the last `n` bytes
    Suffix(u64),
}

impl ByteRange {
    /// Parse a `Range` header value; `None` when it is not a bytes range
    pub fn parse(header: &str) -> Option<Self> {
        let spec = header.trim().strip_prefix("bytes=")?;
        let first = spec.split(',').next()?.trim();
        let (start, end) = first.split_once('-')?;
        let (start, end) = (start.trim(), end.trim());

        if start.is_empty() {
            return end.parse().ok().map(ByteRange::Suffix);
        }

        let start: u64 = start.parse().ok()?;
        let end = if end.is_empty() {
            None
        } else {
            Some(end.parse::<u64>().ok()?)
        };
        Some(ByteRange::From { start, end })
    }

    /// Resolve against a file size into an inclusive `(start, end)` span
    pub fn resolve(&self, size: u64) -> Result<(u64, u64)> {
        let unsatisfiable = || Error::RangeNotSatisfiable { size };
        if size == 0 {
            return Err(unsatisfiable());
        }

        match *self {
            ByteRange::From { start, end } => {
                if start >= size {
                    return Err(unsatisfiable());
                }
                let end = end.map_or(size - 1, |e| e.min(size - 1));
                if end < start {
                    return Err(unsatisfiable());
                }
                Ok((start, end))
            }
            ByteRange::Suffix(0) => Err(unsatisfiable()),
            ByteRange::Suffix(n) => Ok((size.saturating_sub(n), size - 1)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        assert_eq!(
            ByteRange::parse("bytes=0-99"),
            Some(ByteRange::From { start: 0, end: Some(99) })
        );
        assert_eq!(
            ByteRange::parse("bytes=100-"),
            Some(ByteRange::From { start: 100, end: None })
        );
        assert_eq!(ByteRange::parse("bytes=-500"), Some(ByteRange::Suffix(500)));
        assert_eq!(
            ByteRange::parse("bytes=0-1, 5-9"),
            Some(ByteRange::From { start: 0, end: Some(1) })
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(ByteRange::parse("items=0-1"), None);
        assert_eq!(ByteRange::parse("bytes=abc-"), None);
        assert_eq!(ByteRange::parse("bytes=5"), None);
        assert_eq!(ByteRange::parse("bytes=-"), None);
    }

    #[test]
    fn test_resolve_clamps_end_to_file() {
        let range = ByteRange::From { start: 10, end: Some(10_000) };
        assert_eq!(range.resolve(100).unwrap(), (10, 99));
        assert_eq!(ByteRange::From { start: 0, end: None }.resolve(100).unwrap(), (0, 99));
    }

    #[test]
    fn test_resolve_suffix() {
        assert_eq!(ByteRange::Suffix(10).resolve(100).unwrap(), (90, 99));
        // Suffix longer than the file covers the whole file
        assert_eq!(ByteRange::Suffix(500).resolve(100).unwrap(), (0, 99));
    }

    #[test]
    fn test_resolve_unsatisfiable() {
        assert!(matches!(
            ByteRange::From { start: 100, end: None }.resolve(100),
            Err(Error::RangeNotSatisfiable { size: 100 })
        ));
        assert!(ByteRange::From { start: 50, end: Some(10) }.resolve(100).is_err());
        assert!(ByteRange::Suffix(0).resolve(100).is_err());
    }
}
