//! Square patches over a raster grid

/// A `size` x `size` window anchored at (row, col)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Patch {
    pub row: usize,
    pub col: usize,
    pub size: usize,
}

impl Patch {
    pub fn contains(&self, row: usize, col: usize) -> bool {
        row >= self.row && row < self.row + self.size && col >= self.col && col < self.col + self.size
    }

    /// Source coordinates of every cell, row-major
    pub fn cells(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (self.row..self.row + self.size)
            .flat_map(move |r| (self.col..self.col + self.size).map(move |c| (r, c)))
    }
}

/// Iterator over patch anchors in row-major order.
///
/// Only patches lying fully inside the grid are produced. With `clamp_edges`
/// a final patch is added flush with the bottom and right edges so that the
/// union of patches covers every cell, which is what inference needs.
#[derive(Debug, Clone)]
pub struct PatchIterator {
    row_starts: Vec<usize>,
    col_starts: Vec<usize>,
    size: usize,
    next: usize,
}

impl PatchIterator {
    /// Training patches: anchors at multiples of `stride` with the patch inside the grid
    pub fn strided(rows: usize, cols: usize, size: usize, stride: usize) -> Self {
        Self::build(rows, cols, size, stride, false)
    }

    /// Inference tiles: non-overlapping patches, the last row/column clamped to the edge
    pub fn covering(rows: usize, cols: usize, size: usize) -> Self {
        Self::build(rows, cols, size, size, true)
    }

    fn build(rows: usize, cols: usize, size: usize, stride: usize, clamp_edges: bool) -> Self {
        let starts = |extent: usize| -> Vec<usize> {
            if size == 0 || extent < size {
                return Vec::new();
            }
            let last = extent - size;
            let mut starts: Vec<usize> = (0..=last).step_by(stride.max(1)).collect();
            if clamp_edges && starts.last() != Some(&last) {
                starts.push(last);
            }
            starts
        };
        Self {
            row_starts: starts(rows),
            col_starts: starts(cols),
            size,
            next: 0,
        }
    }

    /// Total number of patches
    pub fn patch_count(&self) -> usize {
        self.row_starts.len() * self.col_starts.len()
    }
}

impl Iterator for PatchIterator {
    type Item = Patch;

    fn next(&mut self) -> Option<Patch> {
        let per_row = self.col_starts.len();
        if per_row == 0 || self.next >= self.patch_count() {
            return None;
        }
        let patch = Patch {
            row: self.row_starts[self.next / per_row],
            col: self.col_starts[self.next % per_row],
            size: self.size,
        };
        self.next += 1;
        Some(patch)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.patch_count().saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for PatchIterator {}
