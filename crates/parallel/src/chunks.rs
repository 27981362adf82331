//! Balanced chunking of long pixel sequences with progress reporting

use std::ops::Range;

/// One contiguous slice of a larger index space
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position of this chunk in the plan
    pub index: usize,
    pub range: Range<usize>,
    /// Share of the total covered once this chunk is done, 0..=100
    pub progress: u8,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

/// Partition of `0..total` into at most `count` contiguous chunks.
///
/// Chunk sizes differ by at most one, so a plan over `total >= count` items
/// has exactly `count` chunks. Progress values are non-decreasing and the
/// last chunk always reports 100.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    total: usize,
    count: usize,
}

impl ChunkPlan {
    pub fn new(total: usize, count: usize) -> Self {
        Self {
            total,
            count: count.max(1).min(total.max(1)),
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Number of chunks the plan yields (zero for an empty index space)
    pub fn len(&self) -> usize {
        if self.total == 0 {
            0
        } else {
            self.count
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn boundary(&self, i: usize) -> usize {
        // u128 keeps total * i exact for any usize total
        ((self.total as u128 * i as u128) / self.count as u128) as usize
    }

    pub fn chunk(&self, index: usize) -> Option<Chunk> {
        if index >= self.len() {
            return None;
        }
        let start = self.boundary(index);
        let end = self.boundary(index + 1);
        Some(Chunk {
            index,
            range: start..end,
            progress: ((end as u128 * 100) / self.total as u128) as u8,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = Chunk> + '_ {
        (0..self.len()).filter_map(move |i| self.chunk(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_million_pixels_in_ten_chunks() {
        let plan = ChunkPlan::new(1_000_000, 10);
        let chunks: Vec<_> = plan.iter().collect();

        assert_eq!(chunks.len(), 10);
        assert!(chunks.iter().all(|c| c.len() == 100_000));
        let progress: Vec<u8> = chunks.iter().map(|c| c.progress).collect();
        assert_eq!(progress, vec![10, 20, 30, 40, 50, 60, 70, 80, 90, 100]);
    }

    #[test]
    fn test_uneven_total_is_balanced() {
        let plan = ChunkPlan::new(1005, 10);
        let chunks: Vec<_> = plan.iter().collect();

        assert_eq!(chunks.len(), 10);
        let sizes: Vec<usize> = chunks.iter().map(Chunk::len).collect();
        assert!(sizes.iter().all(|&s| s == 100 || s == 101), "sizes: {:?}", sizes);
        assert_eq!(sizes.iter().sum::<usize>(), 1005);
        assert_eq!(chunks.last().map(|c| c.progress), Some(100));
        assert!(chunks.windows(2).all(|w| w[0].progress <= w[1].progress));
        assert!(chunks.windows(2).all(|w| w[0].range.end == w[1].range.start));
    }

    #[test]
    fn test_fewer_items_than_chunks() {
        let plan = ChunkPlan::new(3, 10);
        let chunks: Vec<_> = plan.iter().collect();
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].range, 2..3);
        assert_eq!(chunks[2].progress, 100);
    }

    #[test]
    fn test_empty_total() {
        let plan = ChunkPlan::new(0, 10);
        assert!(plan.is_empty());
        assert_eq!(plan.iter().count(), 0);
    }
}
