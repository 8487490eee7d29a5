//! One-way lossy link with latency, jitter and the reordering jitter causes.

use bevy::math::Vec3;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkConfig {
    /// Probability in `[0, 1]` that a packet is dropped.
    pub loss: f64,
    /// Base one-way delay in seconds.
    pub latency: f64,
    /// Maximum deviation from `latency` in seconds, uniformly distributed.
    pub jitter: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub sent: u64,
    pub lost: u64,
    pub delivered: u64,
    /// Delivered after a packet that was sent later.
    pub reordered: u64,
}

/// A packet handed to the receiver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Delivery {
    /// Send order, starting at 0.
    pub seq: u64,
    pub position: Vec3,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    seq: u64,
    arrival: f64,
    position: Vec3,
}

pub struct Link {
    config: LinkConfig,
    rng: StdRng,
    in_flight: Vec<InFlight>,
    next_seq: u64,
    highest_delivered: Option<u64>,
    stats: LinkStats,
}

impl Link {
    pub fn new(config: LinkConfig, seed: u64) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
            in_flight: Vec::new(),
            next_seq: 0,
            highest_delivered: None,
            stats: LinkStats::default(),
        }
    }

    pub fn send(&mut self, position: Vec3, now: f64) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.stats.sent += 1;

        if self.config.loss > 0.0 && self.rng.gen_bool(self.config.loss) {
            self.stats.lost += 1;
            trace!("Packet {} lost", seq);
            return;
        }

        let jitter = if self.config.jitter > 0.0 {
            self.rng.gen_range(-self.config.jitter..=self.config.jitter)
        } else {
            0.0
        };
        let arrival = now + (self.config.latency + jitter).max(0.0);
        self.in_flight.push(InFlight {
            seq,
            arrival,
            position,
        });
    }

    /// Removes and returns every packet that has arrived by `now`, in arrival order.
    pub fn deliver(&mut self, now: f64) -> Vec<Delivery> {
        let (mut ready, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.in_flight)
            .into_iter()
            .partition(|packet| packet.arrival <= now);
        self.in_flight = pending;
        ready.sort_by(|a, b| a.arrival.total_cmp(&b.arrival));

        for packet in &ready {
            match self.highest_delivered {
                Some(highest) if packet.seq < highest => {
                    self.stats.reordered += 1;
                    trace!("Packet {} arrived after {}", packet.seq, highest);
                }
                _ => self.highest_delivered = Some(packet.seq),
            }
        }
        self.stats.delivered += ready.len() as u64;

        ready
            .into_iter()
            .map(|packet| Delivery {
                seq: packet.seq,
                position: packet.position,
            })
            .collect()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }
}
