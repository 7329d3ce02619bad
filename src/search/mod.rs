//! Monte Carlo tree search over the remaining elicitation horizon.
//!
//! One [`Planner`] per worker thread: it owns the node arena, the RNG and a
//! set of scratch buffers that are reused across simulations. The driver
//! rebuilds the tree every elicitation round with [`Planner::reset`], runs a
//! budget of simulations with [`Planner::run`], then asks for the next item
//! to elicit with [`Planner::best_item`].
//!
//! This module contains the public-facing API; the algorithm itself is in
//! `mcts_core`.

use std::time::Duration;

use log::debug;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::mixture::{MixtureModel, MAX_NUM_GROUPS, MAX_NUM_ITEMS};

pub mod arena;
pub(crate) mod mcts_core;

pub use self::arena::Arena;
pub use self::mcts_core::TreeNode;

/// Upper bound on a node's child count, and the arena block size. Equal to
/// the item cap: a freshly expanded root can have one child per item.
pub const MAX_BRANCHING: usize = MAX_NUM_ITEMS;

#[derive(Clone, Debug, PartialEq)]
pub struct SearchSettings {
    /// Total number of items the user will be asked to rate.
    pub max_count: usize,
    /// Rollouts per simulation, multiplied by the number of groups.
    pub num_rollouts: usize,
    /// Maximum tree depth, in items committed by the path.
    pub max_lookahead: usize,
    /// Random completion length per rollout.
    pub max_rollout_items: usize,
    /// When false, replace rollouts with the one-step expected-posterior
    /// reward based on mean ratings.
    pub use_montecarlo: bool,
    /// Keep simulating until this much wall time has passed, even once the
    /// simulation count is met. Zero by default, making the count the only
    /// stopping rule.
    pub time_floor: Duration,
}

impl Default for SearchSettings {
    fn default() -> Self {
        SearchSettings {
            max_count: 25,
            num_rollouts: 1,
            max_lookahead: 1,
            max_rollout_items: 0,
            use_montecarlo: true,
            time_floor: Duration::ZERO,
        }
    }
}

impl SearchSettings {
    /// Set the lookahead depth. Rollouts fill the part of the horizon the
    /// tree does not reach, so the rollout length follows as one less.
    pub fn with_lookahead(mut self, max_lookahead: usize) -> Self {
        self.max_lookahead = max_lookahead;
        self.max_rollout_items = max_lookahead.saturating_sub(1);
        self
    }

    pub fn with_max_count(mut self, max_count: usize) -> Self {
        self.max_count = max_count;
        self
    }

    pub fn with_num_rollouts(mut self, num_rollouts: usize) -> Self {
        self.num_rollouts = num_rollouts;
        self
    }

    pub fn without_montecarlo(mut self) -> Self {
        self.use_montecarlo = false;
        self
    }

    /// Simulation budget for a round. The tree must cover wide branching
    /// early, when many questions remain, and only refine narrowly near the
    /// horizon, hence the quadratic factor.
    pub fn simulations_for_round(&self, num_items: usize, num_used: usize) -> u64 {
        if !self.use_montecarlo {
            return num_items as u64;
        }
        let remaining = self.max_count.saturating_sub(num_used) as f64;
        (num_items as f64 * (1.25 + remaining * remaining)).ceil() as u64
    }
}

/// Buffers reused across simulations to keep allocations off the hot path.
#[derive(Default)]
struct Scratch {
    path: Vec<u32>,
    path_items: Vec<usize>,
    /// Elicited items plus the items committed by the current path.
    base_overlay: Vec<bool>,
    /// Per-rollout working copy of `base_overlay`.
    overlay: Vec<bool>,
    rollout_items: Vec<usize>,
    posterior_items: Vec<usize>,
    posterior_ratings: Vec<f64>,
}

pub struct Planner {
    settings: SearchSettings,
    arena: Arena<TreeNode>,
    root: u32,
    rng: SmallRng,
    scratch: Scratch,
}

impl Planner {
    pub fn new(settings: SearchSettings, seed: u64) -> Planner {
        let mut planner = Planner {
            settings,
            arena: Arena::new(),
            root: 0,
            rng: SmallRng::seed_from_u64(seed),
            scratch: Scratch::default(),
        };
        planner.reset();
        planner
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    pub fn root(&self) -> u32 {
        self.root
    }

    pub fn arena(&self) -> &Arena<TreeNode> {
        &self.arena
    }

    /// Throw away the old tree and install a fresh root. The arena's blocks
    /// are retained, so later rounds allocate out of the same memory.
    pub fn reset(&mut self) {
        debug!(
            "tree nodes allocated/reused {}/{}",
            self.arena.nodes_allocated(),
            self.arena.nodes_reused()
        );
        self.arena.reset();
        self.root = self.arena.alloc();
        self.arena.get_mut(self.root).reinit(-1);
    }

    /// Pick the item to elicit next, after the round's simulations.
    pub fn best_item(&mut self) -> Option<usize> {
        mcts_core::best_item(&self.arena, self.root, &mut self.rng)
    }

    /// One simulation: select a leaf by UCB1, expand it if eligible, score
    /// it with Monte Carlo rollouts (or the one-step expected posterior),
    /// and backpropagate the return along the path.
    ///
    /// `probs` is the driver's current group posterior; `used_mask`,
    /// `used_list` and `ratings` describe the items elicited so far.
    pub fn run(
        &mut self,
        mixture: &MixtureModel,
        probs: &[f64],
        used_mask: &[bool],
        used_list: &[usize],
        ratings: &[f64],
    ) {
        debug_assert_eq!(used_mask.len(), mixture.num_items());
        debug_assert_eq!(used_list.len(), ratings.len());
        let Planner {
            settings,
            arena,
            root,
            rng,
            scratch,
        } = self;

        let mut leaf = mcts_core::select(arena, *root, rng, &mut scratch.path);

        scratch.base_overlay.clear();
        scratch.base_overlay.extend_from_slice(used_mask);
        scratch.path_items.clear();
        for &node_index in &scratch.path[1..] {
            let item = arena.get(node_index).item as usize;
            scratch.path_items.push(item);
            scratch.base_overlay[item] = true;
        }

        // The root is expanded on sight; other leaves only once they have
        // been visited and the depth budget still allows children.
        let leaf_node = arena.get(leaf);
        if leaf_node.item < 0
            || (leaf_node.visits > 0 && scratch.path.len() < settings.max_lookahead + 1)
        {
            if mcts_core::expand(arena, leaf, &scratch.base_overlay) {
                leaf = mcts_core::ucb_child(arena, rng, leaf);
                scratch.path.push(leaf);
                let item = arena.get(leaf).item as usize;
                scratch.path_items.push(item);
                scratch.base_overlay[item] = true;
            }
        }

        let reward = if settings.use_montecarlo {
            let init_err = mixture.init_reward_err(used_list, ratings);
            let mut cumulative = [0.0f64; MAX_NUM_GROUPS];
            let mut acc = 0.0;
            for (group, &p) in probs.iter().enumerate() {
                acc += p;
                cumulative[group] = acc;
            }

            let committed = used_list.len() + scratch.path_items.len();
            let num_rollouts = settings.num_rollouts * mixture.num_groups();
            let mut total = 0.0;
            for _ in 0..num_rollouts {
                scratch.overlay.clone_from(&scratch.base_overlay);
                if settings.max_rollout_items > 0 {
                    mcts_core::fill_rollout_items(
                        rng,
                        &mut scratch.overlay,
                        committed,
                        settings.max_count,
                        &mut scratch.rollout_items,
                    );
                    scratch.rollout_items.truncate(settings.max_rollout_items);
                } else {
                    scratch.rollout_items.clear();
                }
                // The true group is unknown; weight the rollouts by the
                // current posterior.
                let assumed_group = sample_group(&cumulative[..mixture.num_groups()], rng);
                total += mixture.reward(
                    assumed_group,
                    &scratch.path_items,
                    &scratch.rollout_items,
                    &init_err,
                    rng,
                ) as f64;
            }
            total / num_rollouts as f64
        } else {
            // One step ahead only: how much posterior mass do we expect to
            // put on the right group after asking the first path item?
            match scratch.path_items.first() {
                None => 0.0,
                Some(&first_item) => {
                    scratch.posterior_items.clear();
                    scratch.posterior_items.extend_from_slice(used_list);
                    scratch.posterior_items.push(first_item);
                    scratch.posterior_ratings.clear();
                    scratch.posterior_ratings.extend_from_slice(ratings);
                    scratch.posterior_ratings.push(0.0);
                    let mut expected = 0.0;
                    for (group, &p) in probs.iter().enumerate().take(mixture.num_groups()) {
                        let last = scratch.posterior_ratings.len() - 1;
                        scratch.posterior_ratings[last] = mixture.mean_rating(group, first_item);
                        let posterior = mixture
                            .group_posterior(&scratch.posterior_items, &scratch.posterior_ratings);
                        expected += p * posterior[group];
                    }
                    expected
                }
            }
        };

        mcts_core::backpropagate(arena, &scratch.path, reward);
    }
}

/// Draw a group index from a cumulative probability vector.
fn sample_group(cumulative: &[f64], rng: &mut SmallRng) -> usize {
    let r: f64 = rng.gen();
    for (group, &bound) in cumulative.iter().enumerate() {
        if r <= bound {
            return group;
        }
    }
    // floating point slack can leave the last bound marginally below 1
    cumulative.len() - 1
}
