//! # Slotted Aloha
//!
//! Random-access return channel: terminals pick random slots for their
//! packets and their replicas, the gateway resolves collisions with
//! successive interference cancellation and acknowledges decoded PDUs.
//! A Slotted-Aloha frame spans a fixed number of superframes.

pub mod ncc;
pub mod tal;

pub use ncc::{SlottedAlohaNcc, SlottedAlohaNccStats};
pub use tal::{SlottedAlohaTal, SlottedAlohaTalStats};

use crate::types::TimeSf;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Static Slotted-Aloha parameters shared by terminals and gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SalohaConfig {
    /// Number of copies of every packet, including the original. 1 is pure
    /// Aloha.
    pub nb_replicas: u8,
    /// ACK timeout in Slotted-Aloha frames.
    pub timeout_saf: u16,
    /// Retransmission budget before a packet is dropped.
    pub nb_max_retransmissions: u16,
    /// Maximum packets a terminal places in one Slotted-Aloha frame.
    pub nb_max_packets: u16,
    /// Superframes per Slotted-Aloha frame.
    pub sf_per_saframe: TimeSf,
    /// Slots per carrier; the slot space is this times the carrier count.
    pub slots_per_carrier: u16,
    /// Maximum contention window of the retransmission backoff.
    pub backoff_cw_max: u16,
    /// Contention-window multiplier applied on each collision.
    pub backoff_multiple: u16,
}

impl Default for SalohaConfig {
    fn default() -> Self {
        SalohaConfig {
            nb_replicas: 2,
            timeout_saf: 2,
            nb_max_retransmissions: 3,
            nb_max_packets: 10,
            sf_per_saframe: 1,
            slots_per_carrier: 40,
            backoff_cw_max: 16,
            backoff_multiple: 2,
        }
    }
}

impl SalohaConfig {
    /// True when superframe `sfn` opens a new Slotted-Aloha frame.
    pub fn is_sa_frame(&self, sfn: TimeSf) -> bool {
        self.sf_per_saframe <= 1 || sfn % self.sf_per_saframe == 0
    }
}

/// Binary exponential backoff between retransmission attempts.
#[derive(Debug, Clone)]
pub struct Backoff {
    cw_max: u16,
    multiple: u16,
    cw: u16,
    counter: u16,
}

impl Backoff {
    pub fn new(cw_max: u16, multiple: u16) -> Self {
        Backoff {
            cw_max: cw_max.max(1),
            multiple: multiple.max(2),
            cw: 1,
            counter: 0,
        }
    }

    /// Ready to transmit: the window elapsed.
    pub fn is_ready(&self) -> bool {
        self.counter == 0
    }

    /// One Slotted-Aloha frame elapsed.
    pub fn tick(&mut self) {
        self.counter = self.counter.saturating_sub(1);
    }

    /// A loss happened: widen the window and draw a new wait.
    pub fn on_collision<R: Rng>(&mut self, rng: &mut R) {
        self.cw = self.cw.saturating_mul(self.multiple).min(self.cw_max);
        self.counter = rng.gen_range(0..=self.cw);
    }

    /// A transmission was acknowledged: back to the minimal window.
    pub fn on_success(&mut self) {
        self.cw = 1;
    }

    pub fn contention_window(&self) -> u16 {
        self.cw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn backoff_widens_and_resets() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut backoff = Backoff::new(8, 2);
        assert!(backoff.is_ready());
        backoff.on_collision(&mut rng);
        assert_eq!(backoff.contention_window(), 2);
        backoff.on_collision(&mut rng);
        backoff.on_collision(&mut rng);
        backoff.on_collision(&mut rng);
        assert_eq!(backoff.contention_window(), 8);
        backoff.on_success();
        assert_eq!(backoff.contention_window(), 1);
    }

    #[test]
    fn sa_frame_boundary() {
        let config = SalohaConfig {
            sf_per_saframe: 3,
            ..SalohaConfig::default()
        };
        assert!(config.is_sa_frame(0));
        assert!(!config.is_sa_frame(1));
        assert!(!config.is_sa_frame(2));
        assert!(config.is_sa_frame(3));
    }
}
