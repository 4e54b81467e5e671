//! Relógio de captura monotônico.
//!
//! Ancora o relógio de parede uma única vez e avança com [`Instant`], então
//! os timestamps nunca retrocedem dentro do processo mesmo se o relógio do
//! sistema for ajustado.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy)]
pub struct CaptureClock {
    origin: Instant,
    origin_epoch_ms: u64,
}

impl CaptureClock {
    pub fn new() -> Self {
        let origin_epoch_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self::with_origin(origin_epoch_ms)
    }

    /// Relógio ancorado num instante conhecido. Útil em testes.
    pub fn with_origin(origin_epoch_ms: u64) -> Self {
        Self {
            origin: Instant::now(),
            origin_epoch_ms,
        }
    }

    /// Milissegundos desde a época UNIX.
    pub fn now_ms(&self) -> u64 {
        self.origin_epoch_ms + self.origin.elapsed().as_millis() as u64
    }
}

impl Default for CaptureClock {
    fn default() -> Self {
        Self::new()
    }
}
