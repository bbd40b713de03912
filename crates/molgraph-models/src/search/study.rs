use super::{ParameterSpec, ParameterType, SearchSpace, ValueRange};
use crate::error::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{Map, Value};
use std::f64::consts::PI;
use strum::Display;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Direction {
    Minimize,
    Maximize,
}

impl Direction {
    pub fn from_higher_better(higher_better: bool) -> Self {
        if higher_better {
            Direction::Maximize
        } else {
            Direction::Minimize
        }
    }

    pub fn is_better(&self, candidate: f64, incumbent: f64) -> bool {
        match self {
            Direction::Minimize => candidate < incumbent,
            Direction::Maximize => candidate > incumbent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum TrialState {
    Complete,
    Fail,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trial {
    pub number: usize,
    pub params: Map<String, Value>,
    /// Objective value; `None` for failed trials.
    pub value: Option<f64>,
    pub state: TrialState,
}

/// Proposes a value for one parameter given the finished trials.
pub trait Sampler {
    fn sample(
        &mut self,
        name: &str,
        spec: &ParameterSpec,
        history: &[Trial],
        direction: Direction,
    ) -> Value;
}

fn uniform_value(spec: &ParameterSpec, rng: &mut StdRng) -> Value {
    match (&spec.param_type, &spec.value_range) {
        (_, ValueRange::Choices(choices)) => {
            if choices.is_empty() {
                Value::Null
            } else {
                choices[rng.gen_range(0..choices.len())].clone()
            }
        }
        (ParameterType::Integer, &ValueRange::Bounds(low, high)) => {
            Value::from(rng.gen_range(low as i64..=high as i64))
        }
        (ParameterType::LogFloat, &ValueRange::Bounds(low, high)) => {
            Value::from(rng.gen_range(low.ln()..=high.ln()).exp())
        }
        (_, &ValueRange::Bounds(low, high)) => Value::from(rng.gen_range(low..=high)),
    }
}

/// Independent uniform sampling.
#[derive(Debug)]
pub struct RandomSampler {
    rng: StdRng,
}

impl RandomSampler {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Sampler for RandomSampler {
    fn sample(&mut self, _: &str, spec: &ParameterSpec, _: &[Trial], _: Direction) -> Value {
        uniform_value(spec, &mut self.rng)
    }
}

/// Univariate tree-structured Parzen estimator.
///
/// After `n_startup_trials` random trials, completed trials are split into the
/// best `gamma` fraction and the rest; a density is fitted to each and the
/// candidate maximising `l(x) / g(x)` among `n_ei_candidates` draws from
/// `l(x)` is proposed.
#[derive(Debug)]
pub struct TpeSampler {
    rng: StdRng,
    pub n_startup_trials: usize,
    pub n_ei_candidates: usize,
    pub gamma: f64,
}

impl TpeSampler {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            n_startup_trials: 10,
            n_ei_candidates: 24,
            gamma: 0.25,
        }
    }

    fn split<'a>(
        &self,
        mut observed: Vec<(&'a Value, f64)>,
        direction: Direction,
    ) -> (Vec<&'a Value>, Vec<&'a Value>) {
        observed.sort_by(|a, b| match direction {
            Direction::Minimize => a.1.total_cmp(&b.1),
            Direction::Maximize => b.1.total_cmp(&a.1),
        });
        let n_below =
            ((self.gamma * observed.len() as f64).ceil() as usize).clamp(1, observed.len());
        let above = observed.split_off(n_below);
        (
            observed.into_iter().map(|(v, _)| v).collect(),
            above.into_iter().map(|(v, _)| v).collect(),
        )
    }

    fn sample_categorical(
        &mut self,
        choices: &[Value],
        below: &[&Value],
        above: &[&Value],
    ) -> Value {
        let weights = |group: &[&Value]| -> Vec<f64> {
            let total = group.len() as f64 + choices.len() as f64;
            choices
                .iter()
                .map(|c| (group.iter().filter(|v| **v == c).count() as f64 + 1.0) / total)
                .collect()
        };
        let l = weights(below);
        let g = weights(above);
        let mut best = (f64::NEG_INFINITY, 0);
        for _ in 0..self.n_ei_candidates {
            let mut u: f64 = self.rng.gen();
            let mut idx = choices.len() - 1;
            for (i, w) in l.iter().enumerate() {
                if u < *w {
                    idx = i;
                    break;
                }
                u -= w;
            }
            let score = l[idx].ln() - g[idx].ln();
            if score > best.0 {
                best = (score, idx);
            }
        }
        choices[best.1].clone()
    }

    fn sample_numeric(
        &mut self,
        param_type: ParameterType,
        low: f64,
        high: f64,
        below: &[&Value],
        above: &[&Value],
    ) -> Value {
        let log = param_type == ParameterType::LogFloat;
        let to_internal = |v: f64| if log { v.ln() } else { v };
        let (lo, hi) = (to_internal(low), to_internal(high));
        let points = |group: &[&Value]| -> Vec<f64> {
            group
                .iter()
                .filter_map(|v| v.as_f64())
                .filter(|v| !log || *v > 0.0)
                .map(to_internal)
                .collect()
        };
        let l = Parzen::new(&points(below), lo, hi);
        let g = Parzen::new(&points(above), lo, hi);

        let mut best = (f64::NEG_INFINITY, (lo + hi) / 2.0);
        for _ in 0..self.n_ei_candidates {
            let x = l.sample(&mut self.rng);
            let score = l.log_pdf(x) - g.log_pdf(x);
            if score > best.0 {
                best = (score, x);
            }
        }
        let x = best.1.clamp(lo, hi);
        match param_type {
            ParameterType::Integer => {
                Value::from((x.round() as i64).clamp(low as i64, high as i64))
            }
            ParameterType::LogFloat => Value::from(x.exp().clamp(low, high)),
            _ => Value::from(x),
        }
    }
}

impl Sampler for TpeSampler {
    fn sample(
        &mut self,
        name: &str,
        spec: &ParameterSpec,
        history: &[Trial],
        direction: Direction,
    ) -> Value {
        let observed: Vec<(&Value, f64)> = history
            .iter()
            .filter(|t| t.state == TrialState::Complete)
            .filter_map(|t| Some((t.params.get(name)?, t.value?)))
            .collect();
        if observed.len() < self.n_startup_trials.max(1) {
            return uniform_value(spec, &mut self.rng);
        }
        let (below, above) = self.split(observed, direction);
        match &spec.value_range {
            ValueRange::Choices(choices) if !choices.is_empty() => {
                self.sample_categorical(choices, &below, &above)
            }
            &ValueRange::Bounds(low, high) if high > low => {
                self.sample_numeric(spec.param_type, low, high, &below, &above)
            }
            _ => uniform_value(spec, &mut self.rng),
        }
    }
}

/// Gaussian mixture over observed points plus a wide prior component.
struct Parzen {
    mus: Vec<f64>,
    sigmas: Vec<f64>,
    low: f64,
    high: f64,
}

impl Parzen {
    fn new(points: &[f64], low: f64, high: f64) -> Self {
        let span = high - low;
        let mut mus: Vec<f64> = points.iter().map(|p| p.clamp(low, high)).collect();
        mus.push((low + high) / 2.0);
        mus.sort_by(f64::total_cmp);

        let min_sigma = span / (mus.len() as f64 + 1.0).min(100.0);
        let mut sigmas: Vec<f64> = mus
            .iter()
            .enumerate()
            .map(|(i, &mu)| {
                let left = if i == 0 { mu - low } else { mu - mus[i - 1] };
                let right = if i + 1 == mus.len() { high - mu } else { mus[i + 1] - mu };
                left.max(right).clamp(min_sigma, span)
            })
            .collect();
        // prior keeps the full range reachable
        if let Some(prior) = mus.iter().position(|&m| m == (low + high) / 2.0) {
            sigmas[prior] = span;
        }
        Self {
            mus,
            sigmas,
            low,
            high,
        }
    }

    fn sample(&self, rng: &mut StdRng) -> f64 {
        let k = rng.gen_range(0..self.mus.len());
        for _ in 0..16 {
            let u1: f64 = 1.0 - rng.gen::<f64>();
            let u2: f64 = rng.gen();
            let z = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
            let x = self.mus[k] + self.sigmas[k] * z;
            if (self.low..=self.high).contains(&x) {
                return x;
            }
        }
        self.mus[k]
    }

    fn log_pdf(&self, x: f64) -> f64 {
        let density: f64 = self
            .mus
            .iter()
            .zip(&self.sigmas)
            .map(|(mu, sigma)| {
                let z = (x - mu) / sigma;
                (-0.5 * z * z).exp() / (sigma * (2.0 * PI).sqrt())
            })
            .sum::<f64>()
            / self.mus.len() as f64;
        density.max(f64::MIN_POSITIVE).ln()
    }
}

/// Trial history plus the sampler that drives it.
pub struct Study {
    name: String,
    direction: Direction,
    sampler: Box<dyn Sampler>,
    trials: Vec<Trial>,
}

impl Study {
    pub fn new(name: impl Into<String>, direction: Direction, sampler: Box<dyn Sampler>) -> Self {
        Self {
            name: name.into(),
            direction,
            sampler,
            trials: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Suggest a value for every parameter of `space`.
    pub fn ask(&mut self, space: &SearchSpace) -> Map<String, Value> {
        space
            .iter()
            .map(|(name, spec)| {
                let value = self
                    .sampler
                    .sample(name, spec, &self.trials, self.direction);
                (name.clone(), value)
            })
            .collect()
    }

    /// Record the outcome of a trial. Errors and non-finite values fail it.
    pub fn tell(&mut self, params: Map<String, Value>, outcome: Result<f64>) -> &Trial {
        let number = self.trials.len();
        let (value, state) = match outcome {
            Ok(v) if v.is_finite() => (Some(v), TrialState::Complete),
            Ok(v) => {
                warn!("Trial {number} failed: objective value {v} is not finite");
                (None, TrialState::Fail)
            }
            Err(e) => {
                warn!("Trial {number} failed with error: {e}");
                (None, TrialState::Fail)
            }
        };
        debug!(study = %self.name, number, ?value, "trial finished");
        self.trials.push(Trial {
            number,
            params,
            value,
            state,
        });
        &self.trials[number]
    }

    /// Run `n_trials` evaluations of `objective`.
    pub fn optimize<F>(&mut self, space: &SearchSpace, n_trials: usize, mut objective: F)
    where
        F: FnMut(&Map<String, Value>) -> Result<f64>,
    {
        for _ in 0..n_trials {
            let params = self.ask(space);
            let outcome = objective(&params);
            self.tell(params, outcome);
        }
    }

    pub fn trials(&self) -> &[Trial] {
        &self.trials
    }

    pub fn count(&self, state: TrialState) -> usize {
        self.trials.iter().filter(|t| t.state == state).count()
    }

    pub fn best_trial(&self) -> Option<&Trial> {
        self.trials
            .iter()
            .filter(|t| t.state == TrialState::Complete)
            .fold(None, |best: Option<&Trial>, t| match (best, t.value) {
                (Some(b), Some(v)) if !self.direction.is_better(v, b.value.unwrap_or(v)) => Some(b),
                _ => Some(t),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn space() -> SearchSpace {
        let mut space = SearchSpace::new();
        space.insert("x".into(), ParameterSpec::float(-5.0, 5.0));
        space.insert("n".into(), ParameterSpec::integer(1, 4));
        space.insert("lr".into(), ParameterSpec::log_float(1e-5, 1e-1));
        space.insert("kind".into(), ParameterSpec::categorical(["a", "b", "c"]));
        space
    }

    #[test]
    fn test_samples_stay_in_range() {
        let space = space();
        for sampler in [
            Box::new(RandomSampler::new(1)) as Box<dyn Sampler>,
            Box::new(TpeSampler::new(1)) as Box<dyn Sampler>,
        ] {
            let mut study = Study::new("range", Direction::Minimize, sampler);
            study.optimize(&space, 30, |p| {
                let x = p["x"].as_f64().unwrap();
                let n = p["n"].as_i64().unwrap();
                let lr = p["lr"].as_f64().unwrap();
                assert!((-5.0..=5.0).contains(&x));
                assert!((1..=4).contains(&n));
                assert!((1e-5..=1e-1).contains(&lr));
                assert!(["a", "b", "c"].contains(&p["kind"].as_str().unwrap()));
                Ok(x * x)
            });
            assert_eq!(study.trials().len(), 30);
        }
    }

    #[test]
    fn test_tpe_improves_on_quadratic() {
        let mut space = SearchSpace::new();
        space.insert("x".into(), ParameterSpec::float(-10.0, 10.0));
        let mut study = Study::new("quad", Direction::Minimize, Box::new(TpeSampler::new(42)));
        study.optimize(&space, 60, |p| Ok((p["x"].as_f64().unwrap() - 3.0).powi(2)));
        let best = study.best_trial().unwrap();
        assert!(best.value.unwrap() < 1.0);
    }

    #[test]
    fn test_failed_trials_are_recorded() {
        let mut study = Study::new("fail", Direction::Maximize, Box::new(RandomSampler::new(0)));
        study.optimize(&space(), 4, |p| {
            if p["n"].as_i64().unwrap() > 0 {
                Err(Error::Training("boom".into()))
            } else {
                Ok(1.0)
            }
        });
        assert_eq!(study.count(TrialState::Fail), 4);
        assert!(study.best_trial().is_none());

        let params = study.ask(&space());
        study.tell(params, Ok(f64::NAN));
        assert_eq!(study.count(TrialState::Fail), 5);
    }

    #[test]
    fn test_best_trial_direction() {
        let mut study = Study::new("best", Direction::Maximize, Box::new(RandomSampler::new(0)));
        for v in [0.2, 0.9, 0.5] {
            study.tell(Map::new(), Ok(v));
        }
        assert_eq!(study.best_trial().unwrap().value, Some(0.9));
    }
}
