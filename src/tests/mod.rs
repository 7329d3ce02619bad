#[cfg(test)]
mod elicit_tests;
#[cfg(test)]
mod mcts_tests;

#[cfg(test)]
use crate::mixture::MixtureModel;

/// Model where every item of a group shares the same mean and variance.
#[cfg(test)]
pub fn uniform_model(group_mus: &[f64], group_sigma2s: &[f64], num_items: usize) -> MixtureModel {
    let mu: Vec<Vec<f64>> = group_mus.iter().map(|&mu| vec![mu; num_items]).collect();
    let sigma2: Vec<Vec<f64>> = group_sigma2s
        .iter()
        .map(|&sigma2| vec![sigma2; num_items])
        .collect();
    MixtureModel::new(&mu, &sigma2).unwrap()
}
