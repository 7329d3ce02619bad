use rand::rngs::SmallRng;
use rand::SeedableRng;

use crate::search::arena::Arena;
use crate::search::mcts_core;
use crate::search::{Planner, SearchSettings, TreeNode};
use crate::tests::uniform_model;

/// Root with one child per entry of `stats`, child `i` labelled with item
/// `i` and carrying the given `(total_reward, visits)`.
fn build_root(arena: &mut Arena<TreeNode>, stats: &[(f64, u32)]) -> u32 {
    let root = arena.alloc();
    arena.get_mut(root).reinit(-1);
    let mut children = Vec::new();
    let mut visits = 0;
    let mut total_reward = 0.0;
    for (item, &(q, n)) in stats.iter().enumerate() {
        let child = arena.alloc();
        arena.get_mut(child).reinit(item as i32);
        arena.get_mut(child).total_reward = q;
        arena.get_mut(child).visits = n;
        children.push(child);
        visits += n;
        total_reward += q;
    }
    let root_node = arena.get_mut(root);
    root_node.children = children;
    root_node.visits = visits + 1;
    root_node.total_reward = total_reward;
    root
}

#[test]
fn unvisited_child_is_selected_before_any_scoring() {
    let mut arena: Arena<TreeNode> = Arena::new();
    let root = build_root(&mut arena, &[(3.0, 5), (2.0, 4), (0.0, 0)]);
    let mut rng = SmallRng::seed_from_u64(0);

    let unvisited = arena.get(root).children[2];
    for _ in 0..50 {
        assert_eq!(mcts_core::ucb_child(&arena, &mut rng, root), unvisited);
    }
}

#[test]
fn tied_children_are_picked_uniformly() {
    let mut arena: Arena<TreeNode> = Arena::new();
    // Equal exploitation and exploration terms for all three children.
    let root = build_root(&mut arena, &[(500.0, 1000), (500.0, 1000), (500.0, 1000)]);
    let mut rng = SmallRng::seed_from_u64(42);

    let children = arena.get(root).children.clone();
    let mut counts = [0u32; 3];
    let draws = 10_000;
    for _ in 0..draws {
        let picked = mcts_core::ucb_child(&arena, &mut rng, root);
        let which = children.iter().position(|&c| c == picked).unwrap();
        counts[which] += 1;
    }

    let expected = draws as f64 / 3.0;
    let chi_squared: f64 = counts
        .iter()
        .map(|&observed| {
            let diff = observed as f64 - expected;
            diff * diff / expected
        })
        .sum();
    // 2 degrees of freedom; 13.8 is already the 99.9th percentile.
    assert!(chi_squared < 20.0, "chi squared {}: {:?}", chi_squared, counts);
}

#[test]
fn best_item_ignores_the_exploration_term() {
    let mut arena: Arena<TreeNode> = Arena::new();
    // Item 1 has the better mean but far fewer visits; an exploration-aware
    // pick would favour it even more, a visit-count pick would favour item 0.
    let root = build_root(&mut arena, &[(50.0, 100), (9.0, 10)]);
    let mut rng = SmallRng::seed_from_u64(3);
    assert_eq!(mcts_core::best_item(&arena, root, &mut rng), Some(1));
}

#[test]
fn best_item_breaks_near_ties_uniformly() {
    let mut arena: Arena<TreeNode> = Arena::new();
    // 0.87 is within 5% of 0.9; 0.5 is not.
    let root = build_root(&mut arena, &[(90.0, 100), (87.0, 100), (50.0, 100)]);
    let mut rng = SmallRng::seed_from_u64(9);

    let mut seen = [false; 3];
    for _ in 0..1000 {
        match mcts_core::best_item(&arena, root, &mut rng) {
            Some(item) => seen[item] = true,
            None => panic!("root has children"),
        }
    }
    assert_eq!(seen, [true, true, false]);
}

#[test]
fn simulation_budget_narrows_towards_the_horizon() {
    let settings = SearchSettings::default().with_max_count(25);
    assert_eq!(settings.simulations_for_round(100, 20), 2625);
    assert!(settings.simulations_for_round(100, 0) > settings.simulations_for_round(100, 20));
    let one_step = settings.without_montecarlo();
    assert_eq!(one_step.simulations_for_round(100, 0), 100);
}

/// Walk the tree, checking reward bounds, distinct items along every path
/// and the depth cap. Returns the maximum depth that carries children.
fn check_tree(
    planner: &Planner,
    node_index: u32,
    depth: usize,
    path_items: &mut Vec<i32>,
    used_mask: &[bool],
) -> usize {
    let arena = planner.arena();
    let node = arena.get(node_index);

    if node.visits > 0 {
        assert!(node.total_reward >= 0.0);
        assert!(
            node.total_reward <= node.visits as f64 + 1e-9,
            "Q {} exceeds N {}",
            node.total_reward,
            node.visits
        );
    }
    if node.item >= 0 {
        assert!(!path_items.contains(&node.item), "repeated item on path");
        assert!(!used_mask[node.item as usize], "elicited item re-planned");
    }

    let mut sibling_items = std::collections::HashSet::new();
    for &child in &node.children {
        assert!(
            sibling_items.insert(arena.get(child).item),
            "siblings share an item"
        );
    }

    path_items.push(node.item);
    let mut deepest = if node.children.is_empty() { 0 } else { depth };
    for &child in &node.children {
        deepest = deepest.max(check_tree(planner, child, depth + 1, path_items, used_mask));
    }
    path_items.pop();
    deepest
}

#[test]
fn a_round_of_simulations_preserves_the_tree_invariants() {
    let mixture = uniform_model(&[0.0, 1.0], &[1.0, 1.0], 10);
    let settings = SearchSettings::default()
        .with_max_count(5)
        .with_lookahead(3);
    let mut planner = Planner::new(settings.clone(), 123);

    let used_list = vec![0, 1];
    let ratings = vec![0.2, 0.9];
    let mut used_mask = vec![false; 10];
    used_mask[0] = true;
    used_mask[1] = true;
    let probs = mixture.group_posterior(&used_list, &ratings);

    planner.reset();
    let budget = settings.simulations_for_round(10, used_list.len());
    for _ in 0..budget {
        planner.run(&mixture, &probs, &used_mask, &used_list, &ratings);
    }

    let arena = planner.arena();
    let root = arena.get(planner.root());
    assert_eq!(root.visits as u64, budget);

    // Every simulation passes through exactly one root child.
    let child_visits: u64 = root
        .children
        .iter()
        .map(|&child| arena.get(child).visits as u64)
        .sum();
    assert_eq!(child_visits, budget);

    // Eight unseen items means eight root children.
    assert_eq!(root.children.len(), 8);

    let mut path_items = Vec::new();
    check_tree(&planner, planner.root(), 0, &mut path_items, &used_mask);
}

#[test]
fn lookahead_caps_the_expansion_depth() {
    let mixture = uniform_model(&[0.0, 1.0], &[1.0, 1.0], 10);
    let settings = SearchSettings::default()
        .with_max_count(5)
        .with_lookahead(1);
    let mut planner = Planner::new(settings.clone(), 7);

    let used_mask = vec![false; 10];
    let probs = vec![0.5, 0.5];

    planner.reset();
    let budget = settings.simulations_for_round(10, 0);
    for _ in 0..budget {
        planner.run(&mixture, &probs, &used_mask, &[], &[]);
    }

    // Depth one nodes must never have been expanded.
    let arena = planner.arena();
    let mut path_items = Vec::new();
    let deepest_parent = check_tree(&planner, planner.root(), 0, &mut path_items, &used_mask);
    assert_eq!(deepest_parent, 0, "a node beyond the root was expanded");
    for &child in &arena.get(planner.root()).children {
        assert!(arena.get(child).children.is_empty());
    }
}

#[test]
fn reset_installs_a_fresh_root() {
    let mixture = uniform_model(&[0.0, 1.0], &[1.0, 1.0], 6);
    let mut planner = Planner::new(SearchSettings::default().with_max_count(3), 1);
    let used_mask = vec![false; 6];
    let probs = vec![0.5, 0.5];
    for _ in 0..20 {
        planner.run(&mixture, &probs, &used_mask, &[], &[]);
    }
    assert!(!planner.arena().get(planner.root()).children.is_empty());

    planner.reset();
    let root = planner.arena().get(planner.root());
    assert_eq!(root.item, -1);
    assert_eq!(root.visits, 0);
    assert!(root.children.is_empty());
}

#[test]
fn one_step_planner_prefers_the_separating_item() {
    // Only item 2 distinguishes the two groups, so the expected posterior
    // mass after asking it is the largest.
    let mu = vec![vec![1.0, 1.0, 0.0, 1.0], vec![1.0, 1.0, 4.0, 1.0]];
    let sigma2 = vec![vec![1.0; 4]; 2];
    let mixture = crate::mixture::MixtureModel::new(&mu, &sigma2).unwrap();

    let settings = SearchSettings::default()
        .with_max_count(2)
        .without_montecarlo();
    let mut planner = Planner::new(settings.clone(), 77);
    let used_mask = vec![false; 4];
    let probs = vec![0.5, 0.5];

    planner.reset();
    for _ in 0..settings.simulations_for_round(4, 0) {
        planner.run(&mixture, &probs, &used_mask, &[], &[]);
    }
    assert_eq!(planner.best_item(), Some(2));
}
