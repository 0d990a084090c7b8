//! Batch planning: pack ordered page images under a payload ceiling.
//!
//! ## Why greedy, not bin-packing?
//!
//! Page order must be preserved — extraction quality depends on tables that
//! span page boundaries arriving in the same request, and the merger relies
//! on batch order being page order. With reordering off the table, the only
//! degree of freedom is where to cut, and greedy left-to-right accumulation
//! provably yields the minimal number of cuts.
//!
//! A single image larger than the ceiling cannot be split, so it becomes its
//! own oversized singleton batch; the extraction client's degradation path
//! deals with the inevitable HTTP 413 downstream.

use crate::assets::PageImage;
use tracing::debug;

/// A size-bounded, order-preserving group of pages submitted in one request.
///
/// Borrow-only: batches never own image bytes, so planning is free and the
/// plan can be discarded and recomputed without touching the payloads.
#[derive(Debug)]
pub struct Batch<'a> {
    /// 0-based position of this batch in the plan.
    pub batch_index: usize,
    /// Pages in original page order.
    pub pages: Vec<&'a PageImage>,
    /// Sum of the pages' encoded byte sizes.
    pub total_size: usize,
}

impl Batch<'_> {
    /// Page indices covered by this batch, in order.
    pub fn page_indices(&self) -> Vec<usize> {
        self.pages.iter().map(|p| p.index).collect()
    }

    /// Whether this batch exceeds the ceiling it was planned under — true
    /// only for unavoidable oversized singletons.
    pub fn is_oversized(&self, max_bytes: usize) -> bool {
        self.total_size > max_bytes
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

/// Split `images` into the minimal number of order-preserving batches whose
/// cumulative byte size stays within `max_bytes`.
///
/// Guarantees:
/// - concatenating all batches' pages in `batch_index` order reproduces
///   `images` exactly (no gaps, no repeats);
/// - no batch's `total_size` exceeds `max_bytes`, except when a single image
///   alone does — that image forms a singleton batch;
/// - empty input yields an empty plan.
pub fn plan<'a>(images: &'a [PageImage], max_bytes: usize) -> Vec<Batch<'a>> {
    let mut batches: Vec<Batch<'a>> = Vec::new();
    let mut current: Vec<&'a PageImage> = Vec::new();
    let mut current_size: usize = 0;

    for image in images {
        let size = image.byte_size();

        if !current.is_empty() && current_size + size > max_bytes {
            batches.push(Batch {
                batch_index: batches.len(),
                pages: std::mem::take(&mut current),
                total_size: current_size,
            });
            current_size = 0;
        }

        // An oversized image lands here with `current` empty and immediately
        // closes its own singleton batch on the next iteration or below.
        current.push(image);
        current_size += size;
    }

    if !current.is_empty() {
        batches.push(Batch {
            batch_index: batches.len(),
            pages: current,
            total_size: current_size,
        });
    }

    debug!(
        "Planned {} batches over {} pages (ceiling {} bytes)",
        batches.len(),
        images.len(),
        max_bytes
    );
    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pages(sizes: &[usize]) -> Vec<PageImage> {
        sizes
            .iter()
            .enumerate()
            .map(|(i, &s)| PageImage::new(i, vec![0u8; s], 100, 100))
            .collect()
    }

    /// Concatenated batch pages must equal the input, in order.
    fn assert_partition(batches: &[Batch<'_>], expected_len: usize) {
        let flat: Vec<usize> = batches
            .iter()
            .flat_map(|b| b.page_indices())
            .collect();
        let expected: Vec<usize> = (0..expected_len).collect();
        assert_eq!(flat, expected, "batches must partition the page sequence");
    }

    #[test]
    fn empty_input_yields_no_batches() {
        let imgs = pages(&[]);
        assert!(plan(&imgs, 1024).is_empty());
    }

    #[test]
    fn three_3mb_pages_under_8mb_yield_two_batches() {
        let mb = 1024 * 1024;
        let imgs = pages(&[3 * mb, 3 * mb, 3 * mb]);
        let batches = plan(&imgs, 8 * mb);

        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].page_indices(), vec![0, 1]);
        assert_eq!(batches[0].total_size, 6 * mb);
        assert_eq!(batches[1].page_indices(), vec![2]);
        assert_partition(&batches, 3);
    }

    #[test]
    fn oversized_image_forms_singleton_batch() {
        let mb = 1024 * 1024;
        let imgs = pages(&[10 * mb]);
        let batches = plan(&imgs, 8 * mb);

        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
        assert!(batches[0].is_oversized(8 * mb));
    }

    #[test]
    fn oversized_image_does_not_absorb_neighbours() {
        let mb = 1024 * 1024;
        let imgs = pages(&[2 * mb, 10 * mb, 2 * mb]);
        let batches = plan(&imgs, 8 * mb);

        assert_eq!(batches.len(), 3);
        assert_eq!(batches[1].page_indices(), vec![1]);
        assert!(batches[1].is_oversized(8 * mb));
        assert!(!batches[0].is_oversized(8 * mb));
        assert_partition(&batches, 3);
    }

    #[test]
    fn exact_fit_stays_in_one_batch() {
        let imgs = pages(&[400, 600]);
        let batches = plan(&imgs, 1000);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].total_size, 1000);
    }

    #[test]
    fn one_byte_over_splits() {
        let imgs = pages(&[400, 601]);
        let batches = plan(&imgs, 1000);
        assert_eq!(batches.len(), 2);
    }

    #[test]
    fn batch_indices_are_sequential() {
        let imgs = pages(&[5, 5, 5, 5, 5]);
        let batches = plan(&imgs, 10);
        for (i, b) in batches.iter().enumerate() {
            assert_eq!(b.batch_index, i);
        }
    }

    /// Raising the ceiling never increases the batch count.
    #[test]
    fn batch_count_is_monotone_in_ceiling() {
        let sizes = [300, 700, 150, 950, 20, 420, 610, 88, 501, 263];
        let imgs = pages(&sizes);

        let mut prev = usize::MAX;
        for ceiling in [300, 500, 950, 1000, 1500, 2000, 4000] {
            let count = plan(&imgs, ceiling).len();
            assert!(
                count <= prev,
                "ceiling {ceiling} produced {count} batches, more than {prev} at a lower ceiling"
            );
            prev = count;
        }
    }

    #[test]
    fn partition_holds_for_mixed_sizes() {
        let sizes = [10, 990, 500, 501, 1, 1, 1, 2000, 3];
        let imgs = pages(&sizes);
        let batches = plan(&imgs, 1000);

        assert_partition(&batches, sizes.len());
        for b in &batches {
            assert!(b.total_size <= 1000 || b.len() == 1);
        }
    }
}
