//! Cold-start group elicitation for recommenders, driven by Monte Carlo
//! tree search.
//!
//! A new user belongs to one of a small number of latent preference groups
//! (nyms), modelled as a Gaussian mixture over item ratings. Starting from a
//! uniform prior, the planner picks the next item to ask the user to rate by
//! simulating the remaining question budget, so that the posterior over
//! groups is as sharp as possible when the budget runs out.
//!
//! # Examples
//!
//! One observed rating shifts the posterior towards the matching group:
//!
//! ```
//! use nymseek::mixture::MixtureModel;
//!
//! let mu = vec![vec![0.0; 4], vec![1.0; 4]];
//! let sigma2 = vec![vec![1.0; 4]; 2];
//! let mixture = MixtureModel::new(&mu, &sigma2).unwrap();
//!
//! let probs = mixture.group_posterior(&[0], &[0.8]);
//! assert!(probs[1] > probs[0]);
//! ```
//!
//! Run the full elicitation experiment over synthetic users:
//!
//! ```rust,no_run
//! use nymseek::elicit::{self, ElicitOptions, RatingOracle};
//! use nymseek::mixture::MixtureModel;
//!
//! let mu = vec![vec![0.0; 100], vec![1.0; 100]];
//! let sigma2 = vec![vec![1.0; 100]; 2];
//! let mixture = MixtureModel::new(&mu, &sigma2).unwrap();
//!
//! let report = elicit::elicit_all_groups(&mixture, RatingOracle::Sampled, &ElicitOptions::default());
//! println!("mean success rate {:.3}", report.mean());
//! ```

pub mod csv_parser;
pub mod elicit;
pub mod mixture;
pub mod search;

mod tests;

pub use elicit::{elicit_all_groups, ElicitOptions, ElicitReport, RatingOracle};
pub use mixture::MixtureModel;
pub use search::{Planner, SearchSettings};
