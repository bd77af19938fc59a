//! Parallel parameter sweeps.
//!
//! Each run configuration is replayed independently over its own date window
//! of a shared, preloaded snapshot set. Results come back in input order.

use std::sync::atomic::{AtomicUsize, Ordering};

use rayon::prelude::*;
use tracing::info;

use crate::config::RunConfig;
use crate::data::OptionsSnapshot;

use super::engine::{BacktestEngine, BacktestResult};

/// One configuration's replay result.
#[derive(Debug, Clone)]
pub struct SweepOutcome {
    pub label: String,
    pub result: BacktestResult,
}

/// Snapshots within the config's date range (input must be chronological).
fn window<'a>(snapshots: &'a [OptionsSnapshot], config: &RunConfig) -> &'a [OptionsSnapshot] {
    let lo = snapshots.partition_point(|s| s.date() < config.start_date);
    let hi = snapshots.partition_point(|s| s.date() <= config.end_date);
    &snapshots[lo..hi.max(lo)]
}

pub fn run_sweep(configs: &[RunConfig], snapshots: &[OptionsSnapshot]) -> Vec<SweepOutcome> {
    let total = configs.len();
    let progress = AtomicUsize::new(0);
    info!("Sweeping {} configurations over {} snapshots", total, snapshots.len());

    configs
        .par_iter()
        .map(|config| {
            let mut strategy = config.build_strategy();
            let mut engine = BacktestEngine::new(config.backtest_config());
            let result = engine.run(strategy.as_mut(), window(snapshots, config));

            let done = progress.fetch_add(1, Ordering::Relaxed) + 1;
            if done % (total / 10).max(1) == 0 || done == total {
                info!(
                    "  {:.0}% ({}/{} configurations)",
                    done as f64 / total as f64 * 100.0,
                    done,
                    total
                );
            }

            SweepOutcome {
                label: config.label(),
                result,
            }
        })
        .collect()
}

/// Outcome with the highest Sharpe among those that traded.
pub fn best_by_sharpe(outcomes: &[SweepOutcome]) -> Option<&SweepOutcome> {
    outcomes
        .iter()
        .filter(|o| o.result.total_trades > 0)
        .max_by(|a, b| {
            a.result
                .sharpe_ratio()
                .partial_cmp(&b.result.sharpe_ratio())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
}
