//! Batch ordering
//!
//! Training batches group examples of similar audio length: a seeded
//! permutation is cut into mega-batches of `MEGABATCH_MULT * batch_size`,
//! each sorted longest first, and the overall longest example is moved to
//! the front so the first batch is the most memory-hungry one.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

pub const MEGABATCH_MULT: usize = 50;

pub struct LengthGroupedSampler {
    lengths: Vec<usize>,
    batch_size: usize,
    seed: u64,
}

impl LengthGroupedSampler {
    pub fn new(lengths: Vec<usize>, batch_size: usize, seed: u64) -> Self {
        Self {
            lengths,
            batch_size: batch_size.max(1),
            seed,
        }
    }

    pub fn num_batches(&self) -> usize {
        self.lengths.len().div_ceil(self.batch_size)
    }

    /// Example order for `epoch`; the same seed and epoch give the same order.
    pub fn indices(&self, epoch: usize) -> Vec<usize> {
        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(epoch as u64));
        let mut indices: Vec<usize> = (0..self.lengths.len()).collect();
        indices.shuffle(&mut rng);

        let mega = MEGABATCH_MULT * self.batch_size;
        let mut megabatches: Vec<Vec<usize>> = indices
            .chunks(mega)
            .map(|chunk| {
                let mut chunk = chunk.to_vec();
                // Stable sort keeps the shuffled order among equal lengths.
                chunk.sort_by(|&a, &b| self.lengths[b].cmp(&self.lengths[a]));
                chunk
            })
            .collect();

        let heads: Vec<usize> = megabatches.iter().map(|m| self.lengths[m[0]]).collect();
        if let Some(longest) = heads
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(&a.0)))
            .map(|(i, _)| i)
        {
            if longest != 0 {
                let first = megabatches[0][0];
                megabatches[0][0] = megabatches[longest][0];
                megabatches[longest][0] = first;
            }
        }

        megabatches.into_iter().flatten().collect()
    }

    pub fn batches(&self, epoch: usize) -> Vec<Vec<usize>> {
        self.indices(epoch)
            .chunks(self.batch_size)
            .map(<[usize]>::to_vec)
            .collect()
    }
}

/// Evaluation order: dataset order, fixed-size batches.
pub fn sequential_batches(len: usize, batch_size: usize) -> Vec<Vec<usize>> {
    (0..len)
        .collect::<Vec<_>>()
        .chunks(batch_size.max(1))
        .map(<[usize]>::to_vec)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_index_once_and_longest_first() {
        let lengths: Vec<usize> = (0..530).map(|i| (i * 37) % 1000).collect();
        let sampler = LengthGroupedSampler::new(lengths.clone(), 4, 7);
        let mut order = sampler.indices(0);
        let max = *lengths.iter().max().unwrap();
        assert_eq!(lengths[order[0]], max);

        // Mega-batches are sorted longest first behind their (possibly swapped) head.
        for chunk in order.chunks(MEGABATCH_MULT * 4) {
            assert!(chunk[1..].windows(2).all(|w| lengths[w[0]] >= lengths[w[1]]));
        }

        order.sort_unstable();
        assert_eq!(order, (0..530).collect::<Vec<_>>());
        assert_eq!(sampler.num_batches(), 133);
        assert_eq!(sampler.batches(0).len(), 133);
    }

    #[test]
    fn test_seeded_and_epoch_dependent() {
        let lengths: Vec<usize> = (0..500).collect();
        let a = LengthGroupedSampler::new(lengths.clone(), 2, 1);
        let b = LengthGroupedSampler::new(lengths, 2, 1);
        assert_eq!(a.indices(3), b.indices(3));
        assert_ne!(a.indices(0), a.indices(1));
    }

    #[test]
    fn test_sequential_batches() {
        assert_eq!(sequential_batches(5, 2), vec![vec![0, 1], vec![2, 3], vec![4]]);
        assert!(sequential_batches(0, 3).is_empty());
        assert!(LengthGroupedSampler::new(vec![], 3, 0).batches(0).is_empty());
    }
}
