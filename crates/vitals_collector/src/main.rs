//! # VitalLink Collector
//!
//! Armazenamento remoto de referência: recebe as leituras encaminhadas pelo
//! monitor via UDP, mantém as mais recentes em memória e registra cada uma
//! com a sua classificação.

mod net_thread;

use tracing::{error, info, warn};
use vitals_core::alerts::evaluate_alerts;
use vitals_core::config::AppConfig;
use vitals_core::HistoryBuffer;

/// A cada quantas leituras o resumo da janela é registrado.
const SUMMARY_EVERY: u64 = 10;

fn main() {
    // ── Logging ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ── Config ──
    let config_path = AppConfig::default_path();
    let config = AppConfig::load(&config_path);

    let rx = match net_thread::spawn_receiver_thread(config.collector.port) {
        Ok(rx) => rx,
        Err(e) => {
            error!("Falha ao criar thread de rede: {e}");
            std::process::exit(1);
        }
    };

    let mut history = HistoryBuffer::new(config.history.capacity);
    let mut total: u64 = 0;

    for msg in rx.iter() {
        total += 1;
        let r = msg.reading;
        history.push(r);

        info!(
            "← {} ({} bytes) | HR {} | SpO2 {}% | {:.1}°C | t={} | #{total}",
            msg.source_addr,
            msg.raw_size,
            r.heart(),
            r.oxygen(),
            r.temperature(),
            r.timestamp_ms()
        );
        for alert in evaluate_alerts(&r, &config.thresholds) {
            warn!("{} em atenção: {} {}", alert.label, alert.value, alert.unit);
        }

        if total % SUMMARY_EVERY == 0 {
            let flagged = history
                .iter()
                .filter(|r| r.has_warnings(&config.thresholds))
                .count();
            info!(
                "Janela: {} leituras, {flagged} em atenção, FC média {:.0} bpm",
                history.len(),
                mean_heart(&history)
            );
        }
    }

    info!("Coletor encerrado após {total} leituras ({} em memória)", history.len());
}

fn mean_heart(history: &HistoryBuffer) -> f32 {
    if history.is_empty() {
        return 0.0;
    }
    let sum: u32 = history.iter().map(|r| u32::from(r.heart())).sum();
    sum as f32 / history.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use vitals_core::Reading;

    #[test]
    fn mean_heart_over_window() {
        let mut history = HistoryBuffer::new(3);
        assert_eq!(mean_heart(&history), 0.0);
        for heart in [60, 70, 80, 90] {
            history.push(Reading::new(heart, 98, 36.5, 0));
        }
        // 60 já saiu da janela
        assert_eq!(mean_heart(&history), 80.0);
    }
}
