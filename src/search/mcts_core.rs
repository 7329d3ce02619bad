//! Core of the MCTS planner: tree nodes, the UCB1 tree policy, expansion
//! under the no-repeat-item constraint, rollout item sampling, and
//! backpropagation. The public-facing API lives in the parent module.

use arrayvec::ArrayVec;
use log::warn;
use rand::rngs::SmallRng;
use rand::Rng;

use super::arena::Arena;
use super::MAX_BRANCHING;

/// Children this close to the best UCB1 score are treated as tied.
const UCB_TIE_BAND: f64 = 1e-2;
/// Children whose exploitation score is within this fraction of the best are
/// treated as tied by the end-of-round pick.
const BEST_ITEM_TIE_RATIO: f64 = 0.95;
/// Tied candidates are tracked only roughly, up to this many.
const MAX_TIED: usize = 100;

pub struct TreeNode {
    /// Item asked at this node, or -1 for the root.
    pub item: i32,
    pub visits: u32,
    pub total_reward: f64,
    /// Arena indices of the children, one per remaining item, in item order.
    pub children: Vec<u32>,
}

impl Default for TreeNode {
    fn default() -> Self {
        TreeNode {
            item: -1,
            visits: 0,
            total_reward: 0.0,
            children: Vec::new(),
        }
    }
}

impl TreeNode {
    /// Re-initialise a node fresh out of the arena. Reused nodes keep the
    /// heap capacity of their child vector.
    pub(crate) fn reinit(&mut self, item: i32) {
        self.item = item;
        self.visits = 0;
        self.total_reward = 0.0;
        self.children.clear();
    }

    #[inline]
    pub fn mean_reward(&self) -> f64 {
        self.total_reward / self.visits as f64
    }
}

/// UCB1 pick among the children of `parent`. Any unvisited child is returned
/// immediately; otherwise ties within [`UCB_TIE_BAND`] of the running best
/// are broken uniformly at random.
///
/// `parent` must have at least one child.
pub(crate) fn ucb_child(arena: &Arena<TreeNode>, rng: &mut SmallRng, parent: u32) -> u32 {
    let node = arena.get(parent);
    // 1/4 is the variance bound for a reward in [0, 1]
    let log_n = 0.25 * f64::ln(node.visits as f64);
    let mut best_score = f64::NEG_INFINITY;
    let mut tied: ArrayVec<u32, MAX_TIED> = ArrayVec::new();
    for &child_index in &node.children {
        let child = arena.get(child_index);
        if child.visits == 0 {
            return child_index;
        }
        let score = child.mean_reward() + f64::sqrt(log_n / child.visits as f64);
        if score > best_score {
            best_score = score;
            tied.clear();
            tied.push(child_index);
        } else if score > best_score - UCB_TIE_BAND && !tied.is_full() {
            tied.push(child_index);
        }
    }
    tied[rng.gen_range(0..tied.len())]
}

/// Descend from the root to a leaf with the UCB1 policy, recording every
/// node on the way. Returns the leaf index; `path` always starts with the
/// root.
pub(crate) fn select(
    arena: &Arena<TreeNode>,
    root: u32,
    rng: &mut SmallRng,
    path: &mut Vec<u32>,
) -> u32 {
    path.clear();
    let mut current = root;
    path.push(current);
    while !arena.get(current).children.is_empty() {
        current = ucb_child(arena, rng, current);
        path.push(current);
    }
    current
}

/// Give `leaf` one child per item absent from `overlay` (the union of the
/// already-elicited items and the items on the path). Returns false when no
/// candidate remains, in which case the leaf stays terminal.
pub(crate) fn expand(arena: &mut Arena<TreeNode>, leaf: u32, overlay: &[bool]) -> bool {
    assert!(
        overlay.len() <= MAX_BRANCHING,
        "number of items {} > MAX_BRANCHING {}",
        overlay.len(),
        MAX_BRANCHING
    );
    // Take the child list out so its capacity survives while the arena is
    // borrowed mutably for allocation.
    let mut children = std::mem::take(&mut arena.get_mut(leaf).children);
    debug_assert!(children.is_empty());
    for (item, _) in overlay.iter().enumerate().filter(|(_, &used)| !used) {
        let child = arena.alloc();
        arena.get_mut(child).reinit(item as i32);
        children.push(child);
    }
    let expanded = !children.is_empty();
    arena.get_mut(leaf).children = children;
    expanded
}

/// Draw distinct items from the complement of `overlay` until the question
/// budget is exhausted, marking each draw in `overlay`. `committed` counts
/// the items already rated plus those on the path.
pub(crate) fn fill_rollout_items(
    rng: &mut SmallRng,
    overlay: &mut [bool],
    committed: usize,
    max_count: usize,
    rollout_items: &mut Vec<usize>,
) {
    rollout_items.clear();
    let num_items = overlay.len();
    for _ in committed..max_count.min(num_items) {
        // rejection sampling; the overlay can never be full here
        let mut item = rng.gen_range(0..num_items);
        while overlay[item] {
            item = rng.gen_range(0..num_items);
        }
        overlay[item] = true;
        rollout_items.push(item);
    }
}

pub(crate) fn backpropagate(arena: &mut Arena<TreeNode>, path: &[u32], reward: f64) {
    for &index in path {
        let node = arena.get_mut(index);
        node.visits += 1;
        node.total_reward += reward;
    }
}

/// End-of-round pick: the root child with the highest mean reward, ignoring
/// the exploration term. Children within 5% of the best are tied and broken
/// uniformly. Unvisited children are never picked, but their presence means
/// the simulation budget was too small, which is worth a warning.
pub(crate) fn best_item(arena: &Arena<TreeNode>, root: u32, rng: &mut SmallRng) -> Option<usize> {
    let node = arena.get(root);
    if node.children.is_empty() {
        return None;
    }
    if node
        .children
        .iter()
        .any(|&child| arena.get(child).visits == 0)
    {
        warn!("unvisited root children, increase the simulation budget");
    }
    let mut best_score = f64::NEG_INFINITY;
    for &child_index in &node.children {
        let child = arena.get(child_index);
        if child.visits > 0 && child.mean_reward() > best_score {
            best_score = child.mean_reward();
        }
    }
    if best_score == f64::NEG_INFINITY {
        // no child was ever visited; an arbitrary pick is the best we can do
        let child_index = node.children[rng.gen_range(0..node.children.len())];
        return Some(arena.get(child_index).item as usize);
    }
    let mut tied: ArrayVec<u32, MAX_TIED> = ArrayVec::new();
    for &child_index in &node.children {
        let child = arena.get(child_index);
        if child.visits > 0
            && child.mean_reward() >= BEST_ITEM_TIE_RATIO * best_score
            && !tied.is_full()
        {
            tied.push(child_index);
        }
    }
    let pick = tied[rng.gen_range(0..tied.len())];
    Some(arena.get(pick).item as usize)
}
