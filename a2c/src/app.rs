//! # Training loop
//!
//! [`run`] builds a [`rl::Trainer`] from command-line arguments (fresh, or
//! resumed from a checkpoint), steps it `max_iter_num` times, logs one line
//! every `log_interval` iterations and writes a checkpoint every
//! `save_model_interval` iterations.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use rl::{envs, Checkpoint, IterationReport, TrainConfig, Trainer};
use tracing_subscriber::EnvFilter;

/// Command-line flags. Every [`TrainConfig`] field has a flag with the same
/// default.
#[derive(Parser, Debug, Clone)]
#[command(name = "a2c", version, about = "Synchronous advantage actor-critic trainer")]
pub struct Args {
    /// Environment identifier, one of `rl::envs::AVAILABLE`.
    #[arg(long, default_value = "CartPole-v1")]
    pub env_name: String,
    /// Resume from this checkpoint instead of initializing fresh models.
    #[arg(long)]
    pub model_path: Option<PathBuf>,
    /// Directory checkpoints are written to.
    #[arg(long, default_value = "learned_models")]
    pub save_dir: PathBuf,
    #[arg(long, default_value_t = 1)]
    pub seed: u64,
    #[arg(long, default_value_t = 0.99)]
    pub gamma: f32,
    #[arg(long, default_value_t = 0.95)]
    pub tau: f32,
    #[arg(long, default_value_t = 1e-3)]
    pub l2_reg: f32,
    #[arg(long, default_value_t = 4)]
    pub num_threads: usize,
    #[arg(long, default_value_t = 2048)]
    pub min_batch_size: usize,
    #[arg(long, default_value_t = 500)]
    pub max_iter_num: usize,
    #[arg(long, default_value_t = 1)]
    pub log_interval: usize,
    /// 0 disables checkpointing.
    #[arg(long, default_value_t = 0)]
    pub save_model_interval: usize,
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub log_std: f32,
    #[arg(long, default_value_t = 0.01)]
    pub policy_lr: f32,
    #[arg(long, default_value_t = 0.01)]
    pub value_lr: f32,
    #[arg(long, default_value_t = 40.0)]
    pub max_grad_norm: f32,
    /// Disable policy gradient clipping.
    #[arg(long)]
    pub no_grad_clip: bool,
    #[arg(long, action = clap::ArgAction::Set, default_value_t = true)]
    pub standardize_advantages: bool,
    #[arg(long, default_value_t = 10_000)]
    pub max_episode_steps: usize,
    #[arg(long, default_value_t = 5.0)]
    pub obs_clip: f32,
}

impl Args {
    pub fn config(&self) -> TrainConfig {
        TrainConfig {
            env_name: self.env_name.clone(),
            seed: self.seed,
            gamma: self.gamma,
            tau: self.tau,
            l2_reg: self.l2_reg,
            num_threads: self.num_threads,
            min_batch_size: self.min_batch_size,
            max_iter_num: self.max_iter_num,
            log_interval: self.log_interval,
            save_model_interval: self.save_model_interval,
            log_std: self.log_std,
            policy_lr: self.policy_lr,
            value_lr: self.value_lr,
            max_grad_norm: (!self.no_grad_clip).then_some(self.max_grad_norm),
            standardize_advantages: self.standardize_advantages,
            max_episode_steps: self.max_episode_steps,
            obs_clip: self.obs_clip,
        }
    }
}

/// Installs the global `tracing` subscriber, `info` unless `RUST_LOG` says
/// otherwise.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Train according to `args`.
///
/// # Errors
///
/// Returns any configuration, checkpoint, environment or I/O error. All of
/// them end the run; nothing is retried.
pub fn run(args: &Args) -> Result<()> {
    let config = args.config();
    let env_name = config.env_name.clone();

    let mut trainer = match &args.model_path {
        Some(path) => {
            let checkpoint = Checkpoint::load(path)
                .with_context(|| format!("failed to load checkpoint {}", path.display()))?;
            Trainer::from_checkpoint(config, checkpoint, |_| envs::make(&env_name))
        }
        None => Trainer::from_env_name(config),
    }
    .context("failed to build trainer")?;

    let max_iter = trainer.config().max_iter_num;
    tracing::info!("Training {} for {} iterations...", env_name, max_iter);

    for _ in 0..max_iter {
        let report = trainer.step().with_context(|| format!("iteration {} failed", trainer.iteration()))?;

        if trainer.config().should_log(report.iteration) {
            tracing::info!("{}", format_report(&report));
        }
        tracing::debug!(
            policy_loss = report.update.policy_loss,
            value_loss = report.update.value_loss,
            episodes = report.rollout.num_episodes,
            "iteration {}",
            report.iteration
        );

        if trainer.config().should_save(report.iteration) {
            let path = checkpoint_path(&args.save_dir, &env_name);
            trainer
                .checkpoint()
                .save(&path)
                .with_context(|| format!("failed to save checkpoint {}", path.display()))?;
        }
    }

    Ok(())
}

/// Per-iteration summary line.
pub fn format_report(report: &IterationReport) -> String {
    let t = report.rollout.sample_time.as_secs_f64();
    match report.rollout.rewards {
        Some(r) => format!(
            "{}\tT_sample {:.4}\tR_min {:.2}\tR_max {:.2}\tR_avg {:.2}",
            report.iteration, t, r.min, r.max, r.avg
        ),
        None => format!("{}\tT_sample {:.4}\tR_min n/a\tR_max n/a\tR_avg n/a", report.iteration, t),
    }
}

pub fn checkpoint_path(save_dir: &Path, env_name: &str) -> PathBuf {
    save_dir.join(format!("{env_name}_a2c.json"))
}
