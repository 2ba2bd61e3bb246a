use std::ops::RangeInclusive;

/// Split pages `1..=total_pages` into at most `workers` contiguous ranges.
///
/// The first `total_pages % workers` ranges get one extra page. With more
/// workers than pages, each page gets its own range and the surplus
/// workers get nothing.
pub fn partition(total_pages: u32, workers: usize) -> Vec<RangeInclusive<u32>> {
    if total_pages == 0 || workers == 0 {
        return Vec::new();
    }
    let workers = u32::try_from(workers).unwrap_or(u32::MAX).min(total_pages);
    let base = total_pages / workers;
    let remainder = total_pages % workers;

    let mut ranges = Vec::with_capacity(workers as usize);
    let mut start = 1;
    for i in 0..workers {
        let len = if i < remainder { base + 1 } else { base };
        ranges.push(start..=start + len - 1);
        start += len;
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_covers(total: u32, ranges: &[RangeInclusive<u32>]) {
        let mut expected = 1;
        for r in ranges {
            assert_eq!(*r.start(), expected, "gap or overlap before {r:?}");
            assert!(r.start() <= r.end(), "empty range {r:?}");
            expected = r.end() + 1;
        }
        assert_eq!(expected, total + 1);
    }

    #[test]
    fn uneven_split_front_loads_remainder() {
        let ranges = partition(10, 3);
        assert_eq!(ranges, vec![1..=4, 5..=7, 8..=10]);
    }

    #[test]
    fn more_workers_than_pages() {
        let ranges = partition(3, 8);
        assert_eq!(ranges, vec![1..=1, 2..=2, 3..=3]);
    }

    #[test]
    fn coverage_for_all_small_shapes() {
        for total in 1..=60 {
            for workers in 1..=20 {
                let ranges = partition(total, workers);
                assert_eq!(ranges.len(), workers.min(total as usize));
                assert_covers(total, &ranges);
                let sizes: Vec<u32> = ranges.iter().map(|r| r.end() - r.start() + 1).collect();
                let max = sizes.iter().max().unwrap();
                let min = sizes.iter().min().unwrap();
                assert!(max - min <= 1);
            }
        }
    }

    #[test]
    fn nothing_to_split() {
        assert!(partition(0, 4).is_empty());
        assert!(partition(5, 0).is_empty());
    }
}
