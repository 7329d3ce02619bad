use rand::rngs::SmallRng;
use rand::SeedableRng;

use crate::csv_parser::{Matrix, RatingsPanel};
use crate::elicit::{self, ElicitOptions, RatingOracle, UserState};
use crate::search::{Planner, SearchSettings};
use crate::tests::uniform_model;

#[test]
fn recording_a_rating_updates_every_piece_of_state() {
    let mixture = uniform_model(&[0.0, 1.0], &[1.0, 1.0], 6);
    let mut state = UserState::new(&mixture);
    assert_eq!(state.probs.as_slice(), &[0.5, 0.5]);

    state.record(&mixture, 3, 0.8);
    assert!(state.used_mask[3]);
    assert_eq!(state.used_list, vec![3]);
    assert_eq!(state.ratings, vec![0.8]);
    assert!(state.probs[1] > state.probs[0]);
}

#[test]
fn well_separated_groups_are_identified_in_a_few_questions() {
    let mixture = uniform_model(&[0.0, 5.0], &[0.25, 0.25], 8);
    let options = ElicitOptions {
        tries: 1,
        first_item: Some(0),
        search: SearchSettings::default().with_max_count(3).with_lookahead(1),
        seed: Some(99),
    };
    let mut planner = Planner::new(options.search.clone(), 17);
    let mut rng = SmallRng::seed_from_u64(18);
    for group in 0..2 {
        assert!(elicit::run_user(
            &mixture,
            &mut planner,
            RatingOracle::Sampled,
            group,
            0,
            &options,
            &mut rng,
        ));
    }
}

#[test]
fn panel_oracle_replays_recorded_ratings() {
    let mixture = uniform_model(&[0.0, 10.0], &[1.0, 1.0], 4);
    // One user per group; values are stored negated on disk.
    let matrix = Matrix {
        rows: vec![vec![-0.0; 4], vec![-10.0; 4]],
        num_cols: 4,
    };
    let panel = RatingsPanel::from_matrix(matrix, "panel_1.csv", 2, 1, 4).unwrap();
    assert_eq!(panel.rating(1, 0, 2), 10.0);

    let options = ElicitOptions {
        tries: 1,
        first_item: None,
        search: SearchSettings::default().with_max_count(3).with_lookahead(1),
        seed: Some(4),
    };
    let mut planner = Planner::new(options.search.clone(), 5);
    let mut rng = SmallRng::seed_from_u64(6);
    assert!(elicit::run_user(
        &mixture,
        &mut planner,
        RatingOracle::Panel(&panel),
        1,
        0,
        &options,
        &mut rng,
    ));
}

#[test]
fn the_same_seed_reproduces_the_report() {
    let mixture = uniform_model(&[0.0, 2.0], &[1.0, 1.0], 10);
    let options = ElicitOptions {
        tries: 3,
        first_item: None,
        search: SearchSettings::default().with_max_count(2).with_lookahead(1),
        seed: Some(1234),
    };
    let first = elicit::elicit_all_groups(&mixture, RatingOracle::Sampled, &options);
    let second = elicit::elicit_all_groups(&mixture, RatingOracle::Sampled, &options);
    assert_eq!(first.success_rates, second.success_rates);
}

#[test]
fn two_well_separated_groups_exceed_ninety_percent_success() {
    let mixture = uniform_model(&[0.0, 1.0], &[1.0, 1.0], 50);
    let options = ElicitOptions {
        tries: 200,
        first_item: None,
        search: SearchSettings::default()
            .with_max_count(10)
            .with_num_rollouts(1)
            .with_lookahead(1),
        seed: Some(2024),
    };
    let report = elicit::elicit_all_groups(&mixture, RatingOracle::Sampled, &options);
    assert!(
        report.mean() > 0.90,
        "mean success rate {:.3}",
        report.mean()
    );
}
