//! Elicitation driver: runs simulated cold-start users through the planner.
//!
//! One round asks one item: the planner simulates the remaining horizon,
//! the chosen item is rated by the oracle, and the group posterior is
//! recomputed before the next round. Groups are independent, so the outer
//! loop fans out across them with rayon, one planner and RNG per worker.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time;
use std::time::Instant;

use arrayvec::ArrayVec;
use log::debug;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::csv_parser::RatingsPanel;
use crate::mixture::{MixtureModel, MAX_NUM_GROUPS};
use crate::search::{Planner, SearchSettings};

/// The per-step echo stops once this many lines have been emitted, counted
/// across all workers.
const MAX_DISP_COUNT: usize = 25;

static DISP_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Everything the driver tracks about one simulated user. The planner sees
/// all of this; the user's true group never appears here.
pub struct UserState {
    /// O(1) membership test for elicited items.
    pub used_mask: Vec<bool>,
    /// Elicited items, in elicitation order.
    pub used_list: Vec<usize>,
    /// Observed ratings, parallel to `used_list`.
    pub ratings: Vec<f64>,
    /// Current group posterior.
    pub probs: ArrayVec<f64, MAX_NUM_GROUPS>,
}

impl UserState {
    pub fn new(mixture: &MixtureModel) -> UserState {
        let uniform = 1.0 / mixture.num_groups() as f64;
        UserState {
            used_mask: vec![false; mixture.num_items()],
            used_list: Vec::new(),
            ratings: Vec::new(),
            probs: (0..mixture.num_groups()).map(|_| uniform).collect(),
        }
    }

    /// Record one elicited rating and refresh the posterior.
    pub fn record(&mut self, mixture: &MixtureModel, item: usize, rating: f64) {
        debug_assert!(!self.used_mask[item], "item {} elicited twice", item);
        self.used_mask[item] = true;
        self.used_list.push(item);
        self.ratings.push(rating);
        self.probs = mixture.group_posterior(&self.used_list, &self.ratings);
    }
}

/// Where a simulated user's ratings come from.
#[derive(Clone, Copy)]
pub enum RatingOracle<'a> {
    /// Sample the mixture with the user's true group.
    Sampled,
    /// Replay a pre-recorded ratings panel; the try index picks the user.
    Panel(&'a RatingsPanel),
}

impl RatingOracle<'_> {
    fn rating(
        &self,
        mixture: &MixtureModel,
        true_group: usize,
        user_index: usize,
        item: usize,
        rng: &mut SmallRng,
    ) -> f64 {
        match self {
            RatingOracle::Sampled => mixture.sample_rating(true_group, item, rng),
            RatingOracle::Panel(panel) => panel.rating(true_group, user_index, item),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ElicitOptions {
    /// Independent cold-start runs per group.
    pub tries: usize,
    /// Fixed item every user rates first, before the planner takes over.
    pub first_item: Option<usize>,
    pub search: SearchSettings,
    /// Base RNG seed; the wall clock is used when absent.
    pub seed: Option<u64>,
}

impl Default for ElicitOptions {
    fn default() -> Self {
        ElicitOptions {
            tries: 1000,
            first_item: None,
            search: SearchSettings::default(),
            seed: None,
        }
    }
}

pub struct ElicitReport {
    /// Fraction of tries whose final group estimate was correct, per group.
    pub success_rates: Vec<f64>,
}

impl ElicitReport {
    pub fn mean(&self) -> f64 {
        self.success_rates.iter().sum::<f64>() / self.success_rates.len() as f64
    }
}

/// One cold-start user: elicit `max_count` ratings, then predict the group.
/// Returns whether the prediction matched `true_group`.
pub fn run_user(
    mixture: &MixtureModel,
    planner: &mut Planner,
    oracle: RatingOracle,
    true_group: usize,
    user_index: usize,
    options: &ElicitOptions,
    rng: &mut SmallRng,
) -> bool {
    let mut state = UserState::new(mixture);
    if let Some(first_item) = options.first_item {
        let rating = oracle.rating(mixture, true_group, user_index, first_item, rng);
        state.record(mixture, first_item, rating);
    }
    while state.used_list.len() < options.search.max_count {
        planner.reset();
        let budget = options
            .search
            .simulations_for_round(mixture.num_items(), state.used_list.len());
        let start = Instant::now();
        let mut simulations = 0u64;
        while simulations < budget || start.elapsed() < options.search.time_floor {
            planner.run(
                mixture,
                &state.probs,
                &state.used_mask,
                &state.used_list,
                &state.ratings,
            );
            simulations += 1;
        }
        let Some(next_item) = planner.best_item() else {
            break;
        };
        let rating = oracle.rating(mixture, true_group, user_index, next_item, rng);
        if DISP_COUNT.fetch_add(1, Ordering::Relaxed) < MAX_DISP_COUNT {
            debug!(
                "step {}: item {} rated {:.3}, {} simulations in {:.0?}",
                state.used_list.len() + 1,
                next_item,
                rating,
                simulations,
                start.elapsed()
            );
        }
        state.record(mixture, next_item, rating);
    }
    mixture.estimated_group(&state.used_list, &state.ratings) == true_group
}

/// Run `tries` cold-start users for every group, in parallel across groups.
pub fn elicit_all_groups(
    mixture: &MixtureModel,
    oracle: RatingOracle,
    options: &ElicitOptions,
) -> ElicitReport {
    let base_seed = options.seed.unwrap_or_else(wall_clock_seed);
    let success_rates = (0..mixture.num_groups())
        .into_par_iter()
        .map(|true_group| {
            let mut planner = Planner::new(
                options.search.clone(),
                worker_seed(base_seed, 2 * true_group as u64),
            );
            let mut rng =
                SmallRng::seed_from_u64(worker_seed(base_seed, 2 * true_group as u64 + 1));
            let successes = (0..options.tries)
                .filter(|&user_index| {
                    run_user(
                        mixture,
                        &mut planner,
                        oracle,
                        true_group,
                        user_index,
                        options,
                        &mut rng,
                    )
                })
                .count();
            let rate = successes as f64 / options.tries as f64;
            debug!("group {} success rate {:.4}", true_group, rate);
            rate
        })
        .collect();
    ElicitReport { success_rates }
}

fn wall_clock_seed() -> u64 {
    time::SystemTime::now()
        .duration_since(time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos() as u64)
        .unwrap_or(0)
}

/// Decorrelate worker streams from one base seed (splitmix increment).
fn worker_seed(base: u64, worker: u64) -> u64 {
    base ^ (worker + 1).wrapping_mul(0x9e37_79b9_7f4a_7c15)
}
