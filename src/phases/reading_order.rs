// Reading-order sorter: bands by vertical overlap, then direction within a band

use std::cmp::Ordering;

use crate::core::config::Config;
use crate::core::types::{OrderedRegion, ReadingDirection, Region};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SortOptions {
    /// Two regions share a band when their vertical overlap is strictly
    /// greater than this fraction of the shorter region's height
    pub band_overlap_fraction: f32,
    pub direction: ReadingDirection,
}

impl Default for SortOptions {
    fn default() -> Self {
        Self {
            band_overlap_fraction: 0.5,
            direction: ReadingDirection::RightToLeft,
        }
    }
}

impl SortOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            band_overlap_fraction: config.band_overlap_fraction(),
            direction: config.reading_direction(),
        }
    }
}

/// Orders the regions of one page into a linear reading sequence.
///
/// Bands are the connected components of the "shares a band" relation, so a
/// chain of pairwise-overlapping regions forms one band even when its ends do
/// not overlap. Bands read top to bottom by their smallest `y1`; regions
/// inside a band read by `x1` in the configured direction, ties by `y1`.
///
/// Tall regions spanning several rows merge those rows into one band. That
/// misorders some irregular layouts and is accepted as is.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadingOrderSorter {
    options: SortOptions,
}

impl ReadingOrderSorter {
    pub fn new(options: SortOptions) -> Self {
        Self { options }
    }

    /// Returns every input region exactly once with `reading_order` 0..n.
    /// The result depends only on the geometry, not on input order.
    pub fn sort(&self, regions: &[Region]) -> Vec<OrderedRegion> {
        let mut bands = self.bands(regions);

        for band in &mut bands {
            band.sort_by(|&a, &b| {
                self.within_band_cmp(&regions[a], &regions[b])
                    .then(a.cmp(&b))
            });
        }

        let band_top = |band: &Vec<usize>| band.iter().map(|&i| regions[i].y1()).min();
        bands.sort_by(|a, b| {
            band_top(a).cmp(&band_top(b)).then_with(|| {
                let keys_a = a.iter().map(|&i| self.key(&regions[i]));
                let keys_b = b.iter().map(|&i| self.key(&regions[i]));
                keys_a.cmp(keys_b)
            })
        });

        bands
            .into_iter()
            .flatten()
            .enumerate()
            .map(|(reading_order, index)| OrderedRegion {
                reading_order,
                region: regions[index],
            })
            .collect()
    }

    /// Group region indices into bands (union-find over overlapping pairs).
    fn bands(&self, regions: &[Region]) -> Vec<Vec<usize>> {
        let mut parent: Vec<usize> = (0..regions.len()).collect();

        fn find(parent: &mut [usize], mut i: usize) -> usize {
            while parent[i] != i {
                parent[i] = parent[parent[i]];
                i = parent[i];
            }
            i
        }

        for i in 0..regions.len() {
            for j in (i + 1)..regions.len() {
                if self.same_band(&regions[i], &regions[j]) {
                    let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                    if ri != rj {
                        parent[ri.max(rj)] = ri.min(rj);
                    }
                }
            }
        }

        let mut groups: Vec<Vec<usize>> = Vec::new();
        let mut slot_of_root = vec![usize::MAX; regions.len()];
        for i in 0..regions.len() {
            let root = find(&mut parent, i);
            if slot_of_root[root] == usize::MAX {
                slot_of_root[root] = groups.len();
                groups.push(Vec::new());
            }
            groups[slot_of_root[root]].push(i);
        }
        groups
    }

    fn same_band(&self, a: &Region, b: &Region) -> bool {
        let shorter = a.height().min(b.height()) as f64;
        let overlap = a.vertical_overlap(b) as f64;
        overlap > self.options.band_overlap_fraction as f64 * shorter
    }

    fn within_band_cmp(&self, a: &Region, b: &Region) -> Ordering {
        self.key(a).cmp(&self.key(b))
    }

    /// Total order on geometry: direction-aware x1, then y1, y2, x2.
    fn key(&self, r: &Region) -> (i64, i32, i32, i32) {
        let x = match self.options.direction {
            ReadingDirection::RightToLeft => -(r.x1() as i64),
            ReadingDirection::LeftToRight => r.x1() as i64,
        };
        (x, r.y1(), r.y2(), r.x2())
    }
}
