//! # a2c
//!
//! Entry point for the actor-critic trainer binary. See [`a2c::app::Args`]
//! for the available flags.

use a2c::app::{self, Args};
use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let args = Args::parse();
    app::init_logging();
    app::run(&args)
}
