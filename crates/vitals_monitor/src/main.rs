//! # VitalLink Monitor
//!
//! Conecta ao sensor de sinais vitais, acompanha a sessão e imprime cada
//! leitura com a sua classificação. `[platform] kind` escolhe entre o sensor
//! simulado (`simulator`, padrão) e o adaptador Bluetooth do sistema (`ble`,
//! exige compilar com a feature `ble`).
//!
//! ## Uso
//! ```bash
//! vitals_monitor              # Conecta e acompanha até o link cair
//! RUST_LOG=debug vitals_monitor
//! cargo run -p vitals_monitor --features ble
//! ```

use std::sync::Arc;
use tracing::{debug, error, info, warn};
use vitals_core::alerts::VitalStatus;
use vitals_core::config::{AlertThresholds, AppConfig, PlatformKind};
use vitals_core::{ConnectionStatus, SessionError, SessionSnapshot, VitalKind};
use vitals_monitor::{
    SessionManager, SessionOptions, SimulatedPlatform, SinkWorker, WirelessPlatform,
};

fn main() {
    // ── Logging ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // ── Carregar config ──
    let config_path = AppConfig::default_path();
    let config = AppConfig::load(&config_path);

    // Salva config padrão se não existir
    if !config_path.exists() {
        if let Err(e) = config.save(&config_path) {
            warn!("Não foi possível salvar config padrão: {e}");
        }
    }

    let problems = config.validate();
    if !problems.is_empty() {
        for p in &problems {
            error!("Config inválida: {p}");
        }
        std::process::exit(2);
    }

    // ── Engine ──
    let platform = match build_platform(&config) {
        Ok(platform) => platform,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };
    let sink = SinkWorker::from_config(&config.sink);
    let manager = match SessionManager::spawn(platform, SessionOptions::from(&config), sink) {
        Ok(manager) => manager,
        Err(e) => {
            error!("Falha ao iniciar o engine: {e}");
            std::process::exit(1);
        }
    };
    let handle = manager.handle();

    // ── Banner ──
    println!();
    println!("══════════════════════════════════════════════");
    println!("   ♥ VITALLINK MONITOR");
    println!("══════════════════════════════════════════════");
    println!("  Plataforma:   {:?}", config.platform.kind);
    println!("  Dispositivos: {}", config.device.name_prefixes.join(", "));
    println!("  Serviço:      {}", config.device.service_uuid);
    println!("  Histórico:    {} leituras", config.history.capacity);
    if config.sink.enabled {
        println!("  Sink:         {}:{}", config.sink.dest_ip, config.sink.port);
    }
    println!("══════════════════════════════════════════════");
    println!();

    let Ok(mut sub) = handle.subscribe() else {
        error!("Engine encerrado antes da assinatura");
        return;
    };

    match handle.connect() {
        Ok(s) if s.is_connected() => info!("Sessão ativa"),
        Ok(s) => {
            match &s.last_error {
                Some(e) => error!("Não foi possível conectar: {e}"),
                None => error!("Não foi possível conectar"),
            }
            manager.shutdown();
            std::process::exit(1);
        }
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    }

    // ── Loop principal ──
    let mut last_seen = 0u64;
    let mut shown_error: Option<SessionError> = None;
    while let Some(snapshot) = sub.recv() {
        if snapshot.status == ConnectionStatus::Disconnected {
            match &snapshot.last_error {
                Some(e) => warn!("Sessão encerrada: {e}"),
                None => info!("Sessão encerrada"),
            }
            break;
        }

        if snapshot.last_error != shown_error {
            if let Some(e) = &snapshot.last_error {
                report(e);
            }
            shown_error = snapshot.last_error.clone();
        }

        let stamp = snapshot.current.timestamp_ms();
        if stamp != last_seen && !snapshot.history.is_empty() {
            last_seen = stamp;
            println!("{}", render(&snapshot, &config.thresholds));
        }
    }

    manager.shutdown();
}

fn build_platform(config: &AppConfig) -> Result<Arc<dyn WirelessPlatform>, String> {
    match config.platform.kind {
        PlatformKind::Simulator => Ok(Arc::new(SimulatedPlatform::new(
            &config.simulator,
            &config.device,
        ))),
        PlatformKind::Ble => ble_platform(config),
    }
}

#[cfg(feature = "ble")]
fn ble_platform(config: &AppConfig) -> Result<Arc<dyn WirelessPlatform>, String> {
    vitals_monitor::BlePlatform::new(&config.platform)
        .map(|p| Arc::new(p) as Arc<dyn WirelessPlatform>)
        .map_err(|e| format!("Falha ao iniciar runtime BLE: {e}"))
}

#[cfg(not(feature = "ble"))]
fn ble_platform(_config: &AppConfig) -> Result<Arc<dyn WirelessPlatform>, String> {
    Err(
        "Compilado sem a feature `ble`: use --features ble ou [platform] kind = \"simulator\""
            .into(),
    )
}

/// Erros de decodificação são só diagnóstico; os demais vão para o usuário.
fn report(err: &SessionError) {
    if err.is_user_visible() {
        warn!("{err}");
    } else {
        debug!("Notificação inválida: {err}");
    }
}

fn render(snapshot: &SessionSnapshot, thresholds: &AlertThresholds) -> String {
    let r = &snapshot.current;
    let mark = |kind| match r.status(kind, thresholds) {
        VitalStatus::Normal => " ",
        VitalStatus::Warning => "!",
    };
    format!(
        "♥ {:>3} bpm{} | SpO2 {:>3}%{} | {:>4.1}°C{} | histórico {:>2}",
        r.heart(),
        mark(VitalKind::Heart),
        r.oxygen(),
        mark(VitalKind::Oxygen),
        r.temperature(),
        mark(VitalKind::Temperature),
        snapshot.history.len()
    )
}
