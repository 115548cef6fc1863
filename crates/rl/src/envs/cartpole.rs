use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::env::{Action, ActionSpace, Env, EnvError, Step, TRUNCATED};

const GRAVITY: f32 = 9.8;
const CART_MASS: f32 = 1.0;
const POLE_MASS: f32 = 0.1;
const TOTAL_MASS: f32 = CART_MASS + POLE_MASS;
const POLE_HALF_LENGTH: f32 = 0.5;
const POLE_MASS_LENGTH: f32 = POLE_MASS * POLE_HALF_LENGTH;
const FORCE_MAG: f32 = 10.0;
const DT: f32 = 0.02;
const X_THRESHOLD: f32 = 2.4;
const THETA_THRESHOLD: f32 = 12.0 * std::f32::consts::PI / 180.0;
const MAX_STEPS: u32 = 500;
const INIT_RANGE: f32 = 0.05;

/// Pole balancing on a cart, pushed left (`0`) or right (`1`).
///
/// Rewards `+1` per step; the episode ends when the pole tilts past 12
/// degrees, the cart leaves the track, or after 500 steps.
pub struct CartPole {
    state: Option<[f32; 4]>,
    ticks: u32,
    rng: StdRng,
}

impl Default for CartPole {
    fn default() -> Self {
        Self::new()
    }
}

impl CartPole {
    #[must_use]
    pub fn new() -> Self {
        Self { state: None, ticks: 0, rng: StdRng::seed_from_u64(0) }
    }
}

impl Env for CartPole {
    fn reset(&mut self) -> Result<Vec<f32>, EnvError> {
        let mut s = [0.0f32; 4];
        for v in &mut s {
            *v = self.rng.gen_range(-INIT_RANGE..INIT_RANGE);
        }
        self.state = Some(s);
        self.ticks = 0;
        Ok(s.to_vec())
    }

    fn step(&mut self, action: &Action) -> Result<Step, EnvError> {
        let push = match action {
            Action::Discrete(a @ (0 | 1)) => *a,
            other => {
                return Err(EnvError::InvalidAction {
                    action: other.clone(),
                    space: self.action_space(),
                })
            }
        };
        let [x, x_dot, theta, theta_dot] = self.state.ok_or(EnvError::NotReset)?;

        let force = if push == 1 { FORCE_MAG } else { -FORCE_MAG };
        let (sin_theta, cos_theta) = theta.sin_cos();
        let temp = (force + POLE_MASS_LENGTH * theta_dot * theta_dot * sin_theta) / TOTAL_MASS;
        let theta_acc = (GRAVITY * sin_theta - cos_theta * temp)
            / (POLE_HALF_LENGTH * (4.0 / 3.0 - POLE_MASS * cos_theta * cos_theta / TOTAL_MASS));
        let x_acc = temp - POLE_MASS_LENGTH * theta_acc * cos_theta / TOTAL_MASS;

        let next = [
            x + DT * x_dot,
            x_dot + DT * x_acc,
            theta + DT * theta_dot,
            theta_dot + DT * theta_acc,
        ];
        self.state = Some(next);
        self.ticks += 1;

        let fell = next[0].abs() > X_THRESHOLD || next[2].abs() > THETA_THRESHOLD;
        let timed_out = !fell && self.ticks >= MAX_STEPS;
        let step = Step::new(next.to_vec(), 1.0, fell || timed_out);
        Ok(if timed_out { step.with_info(TRUNCATED, 1.0) } else { step })
    }

    fn seed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    fn observation_dim(&self) -> usize {
        4
    }

    fn action_space(&self) -> ActionSpace {
        ActionSpace::Discrete(2)
    }
}
