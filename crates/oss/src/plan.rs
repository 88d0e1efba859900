//! Chunk planning
//!
//! Splits an object into contiguous inclusive byte ranges.

/// One contiguous byte range of an object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Part {
    /// Zero-based position in the plan
    pub index: usize,
    /// First byte, inclusive
    pub start: u64,
    /// Last byte, inclusive
    pub end: u64,
}

impl Part {
    /// One-based part number used on the wire
    pub fn number(&self) -> usize {
        self.index + 1
    }

    /// Bytes covered by this part
    pub fn size(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Value for `Range` / `x-oss-copy-source-range`
    pub fn range_header(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// Number of parts for an object of `total` bytes
pub fn part_count(total: u64, part_size: u64) -> u64 {
    total.div_ceil(part_size.max(1))
}

/// Plan the ranges for an object of `total` bytes.
///
/// An empty object yields no parts; callers handle it separately.
pub fn plan(total: u64, part_size: u64) -> Vec<Part> {
    let part_size = part_size.max(1);
    (0..part_count(total, part_size))
        .map(|i| {
            let start = i * part_size;
            Part {
                index: i as usize,
                start,
                end: (start + part_size - 1).min(total - 1),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MB: u64 = 1024 * 1024;

    #[test]
    fn test_25mb_in_10mb_parts() {
        let parts = plan(25 * MB, 10 * MB);
        assert_eq!(parts.len(), 3);
        assert_eq!(
            parts.iter().map(Part::size).collect::<Vec<_>>(),
            vec![10 * MB, 10 * MB, 5 * MB]
        );
        assert_eq!(parts[2].end, 25 * MB - 1);
        assert_eq!(parts[1].range_header(), format!("bytes={}-{}", 10 * MB, 20 * MB - 1));
        assert_eq!(parts[2].number(), 3);
    }

    #[test]
    fn test_exact_multiple() {
        let parts = plan(20, 10);
        assert_eq!(parts.len(), 2);
        assert_eq!((parts[1].start, parts[1].end), (10, 19));
    }

    #[test]
    fn test_empty_object_has_no_parts() {
        assert!(plan(0, 10).is_empty());
        assert_eq!(part_count(0, 10), 0);
    }

    #[test]
    fn test_ranges_are_contiguous_for_many_shapes() {
        for total in [1u64, 2, 7, 99, 100, 101, 1023, 4096] {
            for part_size in [1u64, 3, 10, 64, 100, 5000] {
                let parts = plan(total, part_size);
                assert_eq!(parts.len() as u64, total.div_ceil(part_size));
                assert_eq!(parts[0].start, 0);
                assert_eq!(parts.last().unwrap().end, total - 1);
                for pair in parts.windows(2) {
                    assert_eq!(pair[0].end + 1, pair[1].start);
                    assert_eq!(pair[0].index + 1, pair[1].index);
                }
                assert_eq!(parts.iter().map(Part::size).sum::<u64>(), total);
            }
        }
    }
}
