//! Half-open byte ranges used throughout the token tree

use std::fmt;

/// A half-open `[start, end)` range of byte offsets.
///
/// Regions order by `(start, end)`, which is the order children appear in
/// a token tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Region {
    pub start: usize,
    pub end: usize,
}

impl Region {
    pub const fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    pub const fn empty_at(pos: usize) -> Self {
        Self {
            start: pos,
            end: pos,
        }
    }

    pub const fn len(&self) -> usize {
        self.end - self.start
    }

    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// True if `pos` lies inside the region (end excluded)
    pub const fn contains(&self, pos: usize) -> bool {
        self.start <= pos && pos < self.end
    }

    /// True if `other` lies entirely inside this region
    pub const fn covers(&self, other: Region) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// True if the two regions share at least one byte
    pub const fn intersects(&self, other: Region) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn intersection(&self, other: Region) -> Option<Region> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start < end).then(|| Region::new(start, end))
    }

    /// Smallest region containing both
    pub fn cover(&self, other: Region) -> Region {
        Region::new(self.start.min(other.start), self.end.max(other.end))
    }

    /// Move both ends by `delta` bytes
    pub fn shifted(&self, delta: isize) -> Region {
        Region::new(shift(self.start, delta), shift(self.end, delta))
    }
}

impl From<std::ops::Range<usize>> for Region {
    fn from(range: std::ops::Range<usize>) -> Self {
        Region::new(range.start, range.end)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

pub(crate) fn shift(pos: usize, delta: isize) -> usize {
    pos.saturating_add_signed(delta)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_is_start_then_end() {
        let mut regions = vec![Region::new(3, 5), Region::new(0, 4), Region::new(0, 2)];
        regions.sort();
        assert_eq!(
            regions,
            vec![Region::new(0, 2), Region::new(0, 4), Region::new(3, 5)]
        );
    }

    #[test]
    fn intersects_excludes_touching_regions() {
        let a = Region::new(0, 4);
        assert!(a.intersects(Region::new(3, 6)));
        assert!(!a.intersects(Region::new(4, 6)));
        assert_eq!(a.intersection(Region::new(2, 9)), Some(Region::new(2, 4)));
        assert_eq!(a.intersection(Region::new(4, 9)), None);
    }

    #[test]
    fn covers_and_cover() {
        let a = Region::new(2, 8);
        assert!(a.covers(Region::new(2, 8)));
        assert!(a.covers(Region::new(3, 3)));
        assert!(!a.covers(Region::new(1, 3)));
        assert_eq!(a.cover(Region::new(10, 12)), Region::new(2, 12));
    }

    #[test]
    fn shifted_moves_both_ends() {
        assert_eq!(Region::new(4, 6).shifted(3), Region::new(7, 9));
        assert_eq!(Region::new(4, 6).shifted(-4), Region::new(0, 2));
    }
}
