//! Gaussian mixture model of per-group item ratings.
//!
//! Each latent group `g` rates item `i` as `N(μ_{g,i}, σ²_{g,i})`. The model
//! is immutable after construction and may be shared by reference across
//! worker threads; every sampling method takes the caller's RNG.

use std::error;
use std::fmt;

use arrayvec::ArrayVec;
use rand::Rng;
use rand_distr::StandardNormal;

/// Hard cap on the number of latent groups.
pub const MAX_NUM_GROUPS: usize = 128;

/// Hard cap on the number of items. Also bounds the search tree's branching
/// factor, so the two limits are deliberately the same constant.
pub const MAX_NUM_ITEMS: usize = 1500;

#[derive(Debug)]
pub enum ModelError {
    TooFewGroups(usize),
    TooManyGroups(usize),
    TooManyItems(usize),
    ShapeMismatch {
        mu_rows: usize,
        mu_cols: usize,
        sigma2_rows: usize,
        sigma2_cols: usize,
    },
    NonPositiveVariance { group: usize, item: usize, value: f64 },
    NonFinite { group: usize, item: usize },
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ModelError::TooFewGroups(n) => {
                write!(f, "number of groups {} is below the minimum of 2", n)
            }
            ModelError::TooManyGroups(n) => {
                write!(f, "number of groups {} > MAX_NUM_GROUPS {}", n, MAX_NUM_GROUPS)
            }
            ModelError::TooManyItems(n) => {
                write!(f, "number of items {} > MAX_NUM_ITEMS {}", n, MAX_NUM_ITEMS)
            }
            ModelError::ShapeMismatch {
                mu_rows,
                mu_cols,
                sigma2_rows,
                sigma2_cols,
            } => write!(
                f,
                "mean matrix is {}x{} but variance matrix is {}x{}",
                mu_rows, mu_cols, sigma2_rows, sigma2_cols
            ),
            ModelError::NonPositiveVariance { group, item, value } => write!(
                f,
                "variance {} for group {}, item {} is not positive",
                value, group, item
            ),
            ModelError::NonFinite { group, item } => {
                write!(f, "non-finite parameter for group {}, item {}", group, item)
            }
        }
    }
}

impl error::Error for ModelError {}

/// Per-group, per-item Gaussian rating parameters, dense `G x I`.
pub struct MixtureModel {
    num_groups: usize,
    num_items: usize,
    mu: Vec<f64>,
    sigma2: Vec<f64>,
    /// Standard deviations, precomputed because sampling is the hot path.
    sigma: Vec<f64>,
}

impl MixtureModel {
    /// Build a model from row-per-group mean and variance matrices.
    pub fn new(mu_rows: &[Vec<f64>], sigma2_rows: &[Vec<f64>]) -> Result<MixtureModel, ModelError> {
        let num_groups = mu_rows.len();
        let num_items = mu_rows.first().map(Vec::len).unwrap_or(0);
        if num_groups != sigma2_rows.len()
            || mu_rows.iter().any(|row| row.len() != num_items)
            || sigma2_rows.iter().any(|row| row.len() != num_items)
        {
            return Err(ModelError::ShapeMismatch {
                mu_rows: num_groups,
                mu_cols: num_items,
                sigma2_rows: sigma2_rows.len(),
                sigma2_cols: sigma2_rows.first().map(Vec::len).unwrap_or(0),
            });
        }
        if num_groups < 2 {
            return Err(ModelError::TooFewGroups(num_groups));
        }
        if num_groups > MAX_NUM_GROUPS {
            return Err(ModelError::TooManyGroups(num_groups));
        }
        if num_items > MAX_NUM_ITEMS {
            return Err(ModelError::TooManyItems(num_items));
        }
        for (group, (mu_row, sigma2_row)) in mu_rows.iter().zip(sigma2_rows).enumerate() {
            for (item, (&mu, &sigma2)) in mu_row.iter().zip(sigma2_row).enumerate() {
                if !mu.is_finite() || !sigma2.is_finite() {
                    return Err(ModelError::NonFinite { group, item });
                }
                if sigma2 <= 0.0 {
                    return Err(ModelError::NonPositiveVariance {
                        group,
                        item,
                        value: sigma2,
                    });
                }
            }
        }
        let mu: Vec<f64> = mu_rows.iter().flatten().copied().collect();
        let sigma2: Vec<f64> = sigma2_rows.iter().flatten().copied().collect();
        let sigma = sigma2.iter().map(|&s2| s2.sqrt()).collect();
        Ok(MixtureModel {
            num_groups,
            num_items,
            mu,
            sigma2,
            sigma,
        })
    }

    pub fn num_groups(&self) -> usize {
        self.num_groups
    }

    pub fn num_items(&self) -> usize {
        self.num_items
    }

    #[inline]
    fn index(&self, group: usize, item: usize) -> usize {
        debug_assert!(group < self.num_groups, "group {} out of range", group);
        debug_assert!(item < self.num_items, "item {} out of range", item);
        group * self.num_items + item
    }

    #[inline]
    pub fn mean_rating(&self, group: usize, item: usize) -> f64 {
        self.mu[self.index(group, item)]
    }

    /// Draw a rating from `N(μ_{g,i}, σ²_{g,i})`.
    #[inline]
    pub fn sample_rating<R: Rng>(&self, group: usize, item: usize, rng: &mut R) -> f64 {
        let z: f64 = rng.sample(StandardNormal);
        self.mu[self.index(group, item)] + z * self.sigma[self.index(group, item)]
    }

    /// Posterior over groups given the observed `(item, rating)` pairs,
    /// under a uniform prior.
    ///
    /// The likelihood exponent and the log-σ normaliser are accumulated
    /// additively before a single `exp`. With many observations the
    /// unnormalised weights can still underflow to zero for every group; in
    /// that case the uniform vector is returned.
    pub fn group_posterior(&self, items: &[usize], ratings: &[f64]) -> ArrayVec<f64, MAX_NUM_GROUPS> {
        debug_assert_eq!(items.len(), ratings.len());
        let mut mahalanobis = [0.0f64; MAX_NUM_GROUPS];
        let mut log_sigma = [0.0f64; MAX_NUM_GROUPS];
        for (&item, &rating) in items.iter().zip(ratings) {
            for group in 0..self.num_groups {
                let index = self.index(group, item);
                let diff = rating - self.mu[index];
                mahalanobis[group] += diff * diff / self.sigma2[index];
                log_sigma[group] += self.sigma[index].ln();
            }
        }
        let mut probs: ArrayVec<f64, MAX_NUM_GROUPS> = (0..self.num_groups)
            .map(|group| f64::exp(-0.5 * mahalanobis[group] - log_sigma[group]))
            .collect();
        let normaliser: f64 = probs.iter().sum();
        if normaliser == 0.0 {
            log::debug!("posterior normaliser underflowed, falling back to uniform");
            let uniform = 1.0 / self.num_groups as f64;
            probs.iter_mut().for_each(|p| *p = uniform);
        } else {
            probs.iter_mut().for_each(|p| *p /= normaliser);
        }
        probs
    }

    /// Maximum a posteriori group, ties broken towards the smaller index.
    pub fn estimated_group(&self, items: &[usize], ratings: &[f64]) -> usize {
        let probs = self.group_posterior(items, ratings);
        let mut best_group = 0;
        let mut best = probs[0];
        for (group, &p) in probs.iter().enumerate().skip(1) {
            if p > best {
                best = p;
                best_group = group;
            }
        }
        best_group
    }

    /// Mahalanobis error accumulated over the already-elicited prefix, per
    /// group. Computed once per simulation and reused by every rollout.
    pub fn init_reward_err(&self, items: &[usize], ratings: &[f64]) -> [f64; MAX_NUM_GROUPS] {
        debug_assert_eq!(items.len(), ratings.len());
        let mut err = [0.0f64; MAX_NUM_GROUPS];
        for (&item, &rating) in items.iter().zip(ratings) {
            for group in 0..self.num_groups {
                let index = self.index(group, item);
                let diff = rating - self.mu[index];
                err[group] += diff * diff / self.sigma2[index];
            }
        }
        err
    }

    fn accumulate_sampled_err<R: Rng>(
        &self,
        assumed_group: usize,
        items: &[usize],
        err: &mut [f64; MAX_NUM_GROUPS],
        rng: &mut R,
    ) {
        for &item in items {
            let rating = self.sample_rating(assumed_group, item, rng);
            for group in 0..self.num_groups {
                let index = self.index(group, item);
                let diff = rating - self.mu[index];
                err[group] += diff * diff / self.sigma2[index];
            }
        }
    }

    #[inline]
    fn argmin_err(&self, err: &[f64; MAX_NUM_GROUPS]) -> usize {
        let mut best_group = 0;
        let mut min_err = err[0];
        for (group, &e) in err.iter().enumerate().take(self.num_groups).skip(1) {
            if e < min_err {
                min_err = e;
                best_group = group;
            }
        }
        best_group
    }

    /// Score one rollout: draw fresh ratings for the path and rollout items
    /// as if the user belonged to `assumed_group`, then classify by minimum
    /// Mahalanobis error. Returns 1 iff the classification recovers the
    /// assumed group.
    ///
    /// Unlike [`MixtureModel::group_posterior`], the score is the Mahalanobis
    /// term alone, without the log-σ normaliser.
    pub fn reward<R: Rng>(
        &self,
        assumed_group: usize,
        path_items: &[usize],
        rollout_items: &[usize],
        init_err: &[f64; MAX_NUM_GROUPS],
        rng: &mut R,
    ) -> u32 {
        let mut err = *init_err;
        self.accumulate_sampled_err(assumed_group, path_items, &mut err, rng);
        self.accumulate_sampled_err(assumed_group, rollout_items, &mut err, rng);
        u32::from(self.argmin_err(&err) == assumed_group)
    }

    /// Variant of [`MixtureModel::reward`] that grants full credit only when
    /// the path items alone already classify correctly, and half credit when
    /// the classification becomes correct after the rollout completion.
    pub fn discounted_reward<R: Rng>(
        &self,
        assumed_group: usize,
        path_items: &[usize],
        rollout_items: &[usize],
        init_err: &[f64; MAX_NUM_GROUPS],
        rng: &mut R,
    ) -> f64 {
        let mut err = *init_err;
        self.accumulate_sampled_err(assumed_group, path_items, &mut err, rng);
        if self.argmin_err(&err) == assumed_group {
            return 1.0;
        }
        self.accumulate_sampled_err(assumed_group, rollout_items, &mut err, rng);
        if self.argmin_err(&err) == assumed_group {
            0.5
        } else {
            0.0
        }
    }
}
