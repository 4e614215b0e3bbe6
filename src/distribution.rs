use rand::Rng;
use std::fmt::Debug;

use crate::config::DistributionPolicy;
use crate::structs::*;

/// Random weights are drawn in [0, RANDOM_WEIGHT_MAX)
pub const RANDOM_WEIGHT_MAX: u32 = 256;

/// Heavy-tailed weight of the flow of 1-based rank k: 10k³ + 2k
pub fn power_law(k: usize) -> f64 {
    let k = k as f64;
    10. * k * k * k + 2. * k
}

/// Turn the flow identifiers into a bounded schedule according to a distribution policy
#[derive(Debug, Clone)]
pub struct Planner {
    policy: DistributionPolicy,
    capacity: usize,
}

impl Planner {
    pub fn new(policy: DistributionPolicy, capacity: usize) -> Self {
        Planner { policy, capacity }
    }

    /// The weight of each of the `n` flows, in allocation order
    pub fn weights(&self, n: usize, rng: &mut impl Rng) -> Vec<f64> {
        match self.policy {
            DistributionPolicy::Uniform => vec![1.; n],
            DistributionPolicy::Random => (0..n)
                .map(|_| rng.gen_range(0..RANDOM_WEIGHT_MAX) as f64)
                .collect(),
            DistributionPolicy::PowerLaw => (1..=n).map(power_law).collect(),
        }
    }

    /// Compute the weight and the ratio of each flow
    pub fn flows<T: Copy>(&self, ids: &[T], rng: &mut impl Rng) -> Vec<Flow<T>> {
        let weights = self.weights(ids.len(), rng);
        let ratios = match self.policy {
            // every flow once: the remaining capacity is not used
            DistributionPolicy::Uniform => vec![1; ids.len()],
            DistributionPolicy::Random | DistributionPolicy::PowerLaw => {
                ratios(&weights, self.capacity)
            }
        };
        ids.iter()
            .zip(weights)
            .zip(ratios)
            .map(|((id, weight), ratio)| Flow {
                id: *id,
                weight,
                ratio,
            })
            .collect()
    }

    /// Build the schedule of the flows identified by `ids`
    pub fn plan<T: Copy + PartialEq + Debug>(&self, ids: &[T], rng: &mut impl Rng) -> Schedule<T> {
        assert!(ids.len() <= self.capacity, "more flows than schedule slots");
        let flows = self.flows(ids, rng);
        let schedule = Schedule::from_flows(&flows, self.capacity);
        let mut total = 0.;
        for (n, f) in flows.iter().enumerate() {
            let share = f.ratio as f64 / self.capacity as f64 * 100.;
            total += share;
            log::debug!("Flow {n:3} ratio is {share:.2}%");
        }
        log::info!(
            "{:?} distribution over {} flows: {:.2}% of {} slots, schedule length is {}",
            self.policy,
            flows.len(),
            total,
            self.capacity,
            schedule.len()
        );
        schedule
    }
}

/// ratio_i = floor(w_i / Σw · capacity), at least 1, with Σratio_i ≤ capacity.
/// When all the weights are null, every flow gets one slot.
pub fn ratios(weights: &[f64], capacity: usize) -> Vec<usize> {
    let sum: f64 = weights.iter().sum();
    if sum <= 0. {
        return vec![1; weights.len()];
    }
    let mut ratios: Vec<usize> = weights
        .iter()
        .map(|w| ((w / sum * capacity as f64) as usize).max(1))
        .collect();
    fit_to_capacity(&mut ratios, capacity);
    ratios
}

/// The ≥ 1 clamp can overflow the capacity. Remove slots one by one from the first flow
/// holding the largest ratio, so non-decreasing ratios stay non-decreasing.
fn fit_to_capacity(ratios: &mut [usize], capacity: usize) {
    let mut total: usize = ratios.iter().sum();
    while total > capacity {
        let max = *ratios.iter().max().unwrap_or(&1);
        if max <= 1 {
            break; // more flows than slots, refused upstream
        }
        if let Some(r) = ratios.iter_mut().find(|r| **r == max) {
            *r -= 1;
            total -= 1;
        }
    }
}
