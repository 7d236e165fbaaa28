use std::collections::BTreeMap;

use rand::{seq::SliceRandom, Rng};

use super::errors::EpisodeError;

/// Row indices for one N-way K-shot episode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Episode {
    pub classes: Vec<usize>,
    /// `n_shot` rows per class, grouped in `classes` order.
    pub support: Vec<usize>,
    /// `n_query` rows per class, grouped in `classes` order.
    pub query: Vec<usize>,
}

/// Draws few-shot episodes from a dataset's per-row class labels.
#[derive(Debug, Clone)]
pub struct EpisodeSampler {
    by_class: BTreeMap<usize, Vec<usize>>,
    n_way: usize,
    n_shot: usize,
    n_query: usize,
}

impl EpisodeSampler {
    pub fn new(
        labels: &[usize],
        n_way: usize,
        n_shot: usize,
        n_query: usize,
    ) -> Result<Self, EpisodeError> {
        if n_way == 0 {
            return Err(EpisodeError::ZeroWay);
        }
        let mut by_class: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (row, &lbl) in labels.iter().enumerate() {
            by_class.entry(lbl).or_default().push(row);
        }
        let needed = n_shot + n_query;
        by_class.retain(|_, rows| rows.len() >= needed);
        if by_class.len() < n_way {
            return Err(EpisodeError::NotEnoughClasses {
                found: by_class.len(),
                needed,
                n_way,
            });
        }
        Ok(Self {
            by_class,
            n_way,
            n_shot,
            n_query,
        })
    }

    pub fn n_way(&self) -> usize {
        self.n_way
    }

    pub fn sample<R: Rng>(&self, rng: &mut R) -> Episode {
        let eligible: Vec<usize> = self.by_class.keys().copied().collect();
        let classes: Vec<usize> = eligible.choose_multiple(rng, self.n_way).copied().collect();

        let mut support = Vec::with_capacity(self.n_way * self.n_shot);
        let mut query = Vec::with_capacity(self.n_way * self.n_query);
        for c in &classes {
            let mut rows: Vec<usize> = self.by_class[c]
                .choose_multiple(rng, self.n_shot + self.n_query)
                .copied()
                .collect();
            rows.shuffle(rng);
            support.extend_from_slice(&rows[..self.n_shot]);
            query.extend_from_slice(&rows[self.n_shot..]);
        }
        Episode {
            classes,
            support,
            query,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};
    use std::collections::HashSet;

    #[test]
    fn episode_has_disjoint_support_and_query() {
        let labels: Vec<usize> = (0..60).map(|i| i % 6).collect();
        let sampler = EpisodeSampler::new(&labels, 5, 1, 3).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let ep = sampler.sample(&mut rng);

        assert_eq!(ep.classes.len(), 5);
        assert_eq!(ep.classes.iter().collect::<HashSet<_>>().len(), 5);
        assert_eq!(ep.support.len(), 5);
        assert_eq!(ep.query.len(), 15);
        let support: HashSet<_> = ep.support.iter().collect();
        assert!(ep.query.iter().all(|q| !support.contains(q)));
        for (i, c) in ep.classes.iter().enumerate() {
            assert_eq!(labels[ep.support[i]], *c);
            assert!(ep.query[i * 3..(i + 1) * 3].iter().all(|&q| labels[q] == *c));
        }
    }

    #[test]
    fn small_classes_are_not_eligible() {
        let labels = vec![0, 0, 0, 1, 2, 2, 2];
        let err = EpisodeSampler::new(&labels, 3, 2, 1).unwrap_err();
        assert_eq!(
            err,
            EpisodeError::NotEnoughClasses {
                found: 2,
                needed: 3,
                n_way: 3
            }
        );
        assert_eq!(EpisodeSampler::new(&labels, 0, 1, 1).unwrap_err(), EpisodeError::ZeroWay);
    }
}
