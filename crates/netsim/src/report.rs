use std::collections::HashMap;

use motion_sync::{Admission, Strategy};

use crate::link::LinkStats;

/// Aggregated outcome of one simulation run.
#[derive(Debug, Default)]
pub struct Report {
    ticks: u64,
    error_sum: f64,
    max_error: f32,
    appended: u64,
    coalesced: u64,
    rejected: u64,
    strategies: HashMap<Strategy, u64>,
    pub snaps: u64,
    pub link: LinkStats,
}

impl Report {
    pub fn record_admission(&mut self, admission: Admission) {
        match admission {
            Admission::Appended => self.appended += 1,
            Admission::Coalesced => self.coalesced += 1,
            Admission::Rejected => self.rejected += 1,
        }
    }

    /// Records one resolved tick with its distance to the owner's true position.
    pub fn record_tick(&mut self, strategy: Option<Strategy>, error: f32) {
        self.ticks += 1;
        self.error_sum += error as f64;
        self.max_error = self.max_error.max(error);
        if let Some(strategy) = strategy {
            *self.strategies.entry(strategy).or_default() += 1;
        }
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    pub fn mean_error(&self) -> f64 {
        if self.ticks == 0 {
            0.0
        } else {
            self.error_sum / self.ticks as f64
        }
    }

    pub fn print(&self) {
        println!("ticks:      {}", self.ticks);
        println!(
            "packets:    {} sent, {} lost, {} delivered, {} reordered",
            self.link.sent, self.link.lost, self.link.delivered, self.link.reordered
        );
        println!(
            "admission:  {} appended, {} coalesced, {} rejected",
            self.appended, self.coalesced, self.rejected
        );
        println!(
            "error:      mean {:.4}, max {:.4}",
            self.mean_error(),
            self.max_error
        );
        println!("snaps:      {}", self.snaps);

        let mut strategies: Vec<_> = self.strategies.iter().collect();
        strategies.sort_by_key(|(strategy, _)| format!("{:?}", strategy));
        for (strategy, count) in strategies {
            let share = *count as f64 / self.ticks.max(1) as f64 * 100.0;
            println!("  {:<20} {:>6} ({:.1}%)", format!("{:?}", strategy), count, share);
        }
    }
}
