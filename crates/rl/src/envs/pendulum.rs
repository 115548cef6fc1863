use std::f32::consts::PI;

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::env::{Action, ActionSpace, Env, EnvError, Step, TRUNCATED};

const MAX_SPEED: f32 = 8.0;
const MAX_TORQUE: f32 = 2.0;
const DT: f32 = 0.05;
const G: f32 = 10.0;
const M: f32 = 1.0;
const L: f32 = 1.0;
const MAX_STEPS: u32 = 200;

/// Swing-up pendulum with a single continuous torque in `[-2, 2]`.
///
/// Observations are `[cos θ, sin θ, θ̇]`; the cost penalizes distance from
/// upright, angular velocity and torque. Episodes last 200 steps.
pub struct Pendulum {
    state: Option<(f32, f32)>,
    ticks: u32,
    rng: StdRng,
}

impl Default for Pendulum {
    fn default() -> Self {
        Self::new()
    }
}

fn angle_normalize(x: f32) -> f32 {
    (x + PI).rem_euclid(2.0 * PI) - PI
}

impl Pendulum {
    #[must_use]
    pub fn new() -> Self {
        Self { state: None, ticks: 0, rng: StdRng::seed_from_u64(0) }
    }

    fn observe(theta: f32, theta_dot: f32) -> Vec<f32> {
        vec![theta.cos(), theta.sin(), theta_dot]
    }
}

impl Env for Pendulum {
    fn reset(&mut self) -> Result<Vec<f32>, EnvError> {
        let theta = self.rng.gen_range(-PI..PI);
        let theta_dot = self.rng.gen_range(-1.0..1.0);
        self.state = Some((theta, theta_dot));
        self.ticks = 0;
        Ok(Self::observe(theta, theta_dot))
    }

    fn step(&mut self, action: &Action) -> Result<Step, EnvError> {
        let torque = match action {
            Action::Continuous(a) if a.len() == 1 => a[0].clamp(-MAX_TORQUE, MAX_TORQUE),
            other => {
                return Err(EnvError::InvalidAction {
                    action: other.clone(),
                    space: self.action_space(),
                })
            }
        };
        let (theta, theta_dot) = self.state.ok_or(EnvError::NotReset)?;

        let cost = angle_normalize(theta).powi(2) + 0.1 * theta_dot * theta_dot + 0.001 * torque * torque;
        let new_theta_dot = (theta_dot
            + (3.0 * G / (2.0 * L) * theta.sin() + 3.0 / (M * L * L) * torque) * DT)
            .clamp(-MAX_SPEED, MAX_SPEED);
        let new_theta = theta + new_theta_dot * DT;

        self.state = Some((new_theta, new_theta_dot));
        self.ticks += 1;
        let step = Step::new(Self::observe(new_theta, new_theta_dot), -cost, self.ticks >= MAX_STEPS);
        Ok(if step.done { step.with_info(TRUNCATED, 1.0) } else { step })
    }

    fn seed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    fn observation_dim(&self) -> usize {
        3
    }

    fn action_space(&self) -> ActionSpace {
        ActionSpace::Continuous(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn angle_normalize_wraps() {
        assert!((angle_normalize(3.0 * PI / 2.0) + PI / 2.0).abs() < 1e-5);
        assert!((angle_normalize(0.25) - 0.25).abs() < 1e-6);
    }

    #[test]
    fn episode_lasts_two_hundred_steps() {
        let mut env = Pendulum::new();
        env.seed(1);
        env.reset().unwrap();
        for t in 1..=MAX_STEPS {
            let step = env.step(&Action::Continuous(vec![0.5])).unwrap();
            assert!(step.reward <= 0.0);
            assert_eq!(step.done, t == MAX_STEPS);
            assert_eq!(step.truncated(), t == MAX_STEPS);
            assert!(step.observation[2].abs() <= MAX_SPEED);
        }
    }

    #[test]
    fn rejects_wrong_arity() {
        let mut env = Pendulum::new();
        env.reset().unwrap();
        assert!(env.step(&Action::Continuous(vec![0.0, 1.0])).is_err());
        assert!(env.step(&Action::Discrete(0)).is_err());
    }
}
