use bytes::Bytes;

/// Parse a `Range` header against an entity of `len` bytes.
///
/// Returns sorted inclusive ranges, overlapping or adjacent ones merged.
/// `None` when the header is malformed or no range is satisfiable, the
/// whole entity is then served.
pub fn parse(header: &str, len: u64) -> Option<Vec<(u64, u64)>> {
    let spec = header.trim().strip_prefix("bytes=")?;
    if len == 0 {
        return None;
    }

    let mut ranges = vec![];
    for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (start, end) = part.split_once('-')?;
        let (start, end) = match (start.trim(), end.trim()) {
            ("", "") => return None,
            ("", suffix) => {
                let n: u64 = suffix.parse().ok()?;
                if n == 0 {
                    continue;
                }
                (len.saturating_sub(n), len - 1)
            }
            (s, "") => (s.parse().ok()?, len - 1),
            (s, e) => {
                let s: u64 = s.parse().ok()?;
                let e: u64 = e.parse().ok()?;
                if e < s {
                    return None;
                }
                (s, e.min(len - 1))
            }
        };
        if start < len {
            ranges.push((start, end));
        }
    }

    ranges.sort_unstable();
    let mut merged: Vec<(u64, u64)> = vec![];
    for (s, e) in ranges {
        match merged.last_mut() {
            Some(last) if s <= last.1.saturating_add(1) => last.1 = last.1.max(e),
            _ => merged.push((s, e)),
        }
    }
    match merged.is_empty() {
        true => None,
        false => Some(merged),
    }
}

pub fn content_range((start, end): (u64, u64), len: u64) -> String {
    format!("bytes {}-{}/{}", start, end, len)
}

/// Framing of a `multipart/byteranges` body
pub struct ByteRanges {
    pub boundary: String,
}

impl ByteRanges {
    pub fn new() -> Self {
        Self {
            boundary: format!("{:016x}", rand::random::<u64>()),
        }
    }

    pub fn content_type(&self) -> String {
        format!("multipart/byteranges; boundary={}", self.boundary)
    }

    pub fn part_header(&self, media_type: &str, range: (u64, u64), len: u64) -> Bytes {
        Bytes::from(format!(
            "--{}\r\nContent-Type: {}\r\nContent-Range: {}\r\n\r\n",
            self.boundary,
            media_type,
            content_range(range, len)
        ))
    }

    pub fn part_end(&self) -> Bytes {
        Bytes::from_static(b"\r\n")
    }

    pub fn closing(&self) -> Bytes {
        Bytes::from(format!("--{}--\r\n", self.boundary))
    }

    /// Length of the whole body
    pub fn length(&self, media_type: &str, ranges: &[(u64, u64)], len: u64) -> u64 {
        let parts: u64 = ranges
            .iter()
            .map(|r| {
                self.part_header(media_type, *r, len).len() as u64
                    + (r.1 - r.0 + 1)
                    + self.part_end().len() as u64
            })
            .sum();
        parts + self.closing().len() as u64
    }
}

impl Default for ByteRanges {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_ranges() {
        assert_eq!(parse("bytes=0-9", 100), Some(vec![(0, 9)]));
        assert_eq!(parse("bytes=90-", 100), Some(vec![(90, 99)]));
        assert_eq!(parse("bytes=-10", 100), Some(vec![(90, 99)]));
        assert_eq!(parse("bytes=-500", 100), Some(vec![(0, 99)]));
        assert_eq!(parse("bytes=50-500", 100), Some(vec![(50, 99)]));
    }

    #[test]
    fn merged_ranges() {
        assert_eq!(parse("bytes=0-9, 5-19, 50-59", 100), Some(vec![(0, 19), (50, 59)]));
        assert_eq!(parse("bytes=10-19,0-9", 100), Some(vec![(0, 19)]));
    }

    #[test]
    fn ignored_ranges() {
        assert_eq!(parse("bytes=200-300", 100), None);
        assert_eq!(parse("bytes=9-0", 100), None);
        assert_eq!(parse("items=0-9", 100), None);
        assert_eq!(parse("bytes=a-b", 100), None);
        assert_eq!(parse("bytes=0-9", 0), None);
        assert_eq!(parse("bytes=0-9,200-", 100), Some(vec![(0, 9)]));
    }

    #[test]
    fn multipart_length() {
        let framing = ByteRanges::new();
        let ranges = [(0, 9), (50, 59)];
        let expected: usize = framing.part_header("text/plain", ranges[0], 100).len()
            + 10
            + 2
            + framing.part_header("text/plain", ranges[1], 100).len()
            + 10
            + 2
            + framing.closing().len();
        assert_eq!(framing.length("text/plain", &ranges, 100), expected as u64);
    }
}
