//! Configuração unificada via TOML.
//!
//! Um único `config.toml` cobre o monitor, o sink remoto, o sensor simulado
//! e o coletor. Toda seção usa `#[serde(default)]`, então arquivos parciais
//! funcionam.

use crate::history::DEFAULT_HISTORY_CAPACITY;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::{Uuid, uuid};

/// Serviço GATT do sensor.
pub const VITALS_SERVICE_UUID: Uuid = uuid!("12345678-1234-5678-1234-56789abcdef0");

/// Característica que notifica os sinais vitais.
pub const VITALS_CHARACTERISTIC_UUID: Uuid = uuid!("12345678-1234-5678-1234-56789abcdef1");

/// Identificação do sensor na descoberta.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Prefixos de nome aceitos na descoberta
    pub name_prefixes: Vec<String>,
    /// Serviço que contém a característica de sinais vitais
    pub service_uuid: Uuid,
    /// Característica assinada para notificações
    pub characteristic_uuid: Uuid,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name_prefixes: vec!["VitalLink".into(), "ESP32".into()],
            service_uuid: VITALS_SERVICE_UUID,
            characteristic_uuid: VITALS_CHARACTERISTIC_UUID,
        }
    }
}

/// Configuração do histórico em memória.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

/// Faixas normais de cada sinal vital. Fora delas a leitura fica em atenção.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    pub heart_min: f32,
    pub heart_max: f32,
    pub oxygen_min: f32,
    pub temperature_min: f32,
    pub temperature_max: f32,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            heart_min: 60.0,
            heart_max: 100.0,
            oxygen_min: 95.0,
            temperature_min: 36.0,
            temperature_max: 37.5,
        }
    }
}

/// Encaminhamento das leituras ao armazenamento remoto.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub enabled: bool,
    /// IP do coletor
    pub dest_ip: String,
    /// Porta UDP do coletor
    pub port: u16,
    /// Leituras pendentes antes de descartar
    pub queue_depth: usize,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dest_ip: "127.0.0.1".into(),
            port: 5006,
            queue_depth: 64,
        }
    }
}

/// Pilha sem fio usada pelo monitor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    /// Sensor simulado em processo (`[simulator]`)
    #[default]
    Simulator,
    /// Adaptador Bluetooth do sistema; exige a feature `ble` do monitor
    Ble,
}

/// Seleção e timeouts da plataforma.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    pub kind: PlatformKind,
    /// Tempo máximo procurando um sensor compatível
    pub scan_timeout_secs: f64,
    /// Limite de cada operação GATT (conexão, serviços, assinatura)
    pub gatt_timeout_secs: f64,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            kind: PlatformKind::Simulator,
            scan_timeout_secs: 10.0,
            gatt_timeout_secs: 15.0,
        }
    }
}

/// Sensor simulado usado quando não há pilha BLE real.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// A plataforma oferece Bluetooth?
    pub bluetooth_available: bool,
    /// Nome anunciado pelo sensor
    pub device_name: String,
    /// Intervalo entre notificações em segundos
    pub interval_secs: f64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            bluetooth_available: true,
            device_name: "VitalLink-Sim".into(),
            interval_secs: 1.0,
        }
    }
}

/// Configuração do coletor remoto.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Porta UDP para escutar
    pub port: u16,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self { port: 5006 }
    }
}

/// Configuração raiz do aplicativo.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub device: DeviceConfig,
    pub platform: PlatformConfig,
    pub history: HistoryConfig,
    pub thresholds: AlertThresholds,
    pub sink: SinkConfig,
    pub simulator: SimulatorConfig,
    pub collector: CollectorConfig,
}

impl AppConfig {
    /// Carrega configuração de um arquivo TOML.
    pub fn load(path: &Path) -> Self {
        if path.exists() {
            match std::fs::read_to_string(path) {
                Ok(content) => match toml::from_str::<AppConfig>(&content) {
                    Ok(config) => {
                        info!("Configuração carregada de {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        warn!("Erro ao parsear {}: {}", path.display(), e);
                    }
                },
                Err(e) => {
                    warn!("Erro ao ler {}: {}", path.display(), e);
                }
            }
        }

        info!("Usando configuração padrão");
        AppConfig::default()
    }

    /// Salva configuração em arquivo TOML.
    pub fn save(&self, path: &Path) -> Result<(), String> {
        let content = toml::to_string_pretty(self).map_err(|e| e.to_string())?;
        std::fs::write(path, content).map_err(|e| e.to_string())?;
        info!("Configuração salva em {}", path.display());
        Ok(())
    }

    /// Retorna o caminho padrão do config.toml.
    pub fn default_path() -> PathBuf {
        let exe_dir = std::env::current_exe()
            .map(|p| p.parent().unwrap_or(Path::new(".")).to_path_buf())
            .unwrap_or_else(|_| PathBuf::from("."));
        exe_dir.join("config.toml")
    }

    /// Valida a configuração e retorna lista de erros.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.device.name_prefixes.is_empty() {
            errors.push("Lista de prefixos de dispositivo vazia".into());
        }
        if self.device.name_prefixes.iter().any(|p| p.is_empty()) {
            errors.push("Prefixo de dispositivo vazio casaria com qualquer nome".into());
        }
        let p = &self.platform;
        let positive = |secs: f64| secs > 0.0;
        if !positive(p.scan_timeout_secs) || !positive(p.gatt_timeout_secs) {
            errors.push(format!(
                "Timeouts da plataforma devem ser positivos: scan {} / GATT {}",
                p.scan_timeout_secs, p.gatt_timeout_secs
            ));
        }
        if self.history.capacity == 0 {
            errors.push("Capacidade do histórico não pode ser 0".into());
        }

        let t = &self.thresholds;
        if t.heart_min > t.heart_max {
            errors.push(format!(
                "Faixa cardíaca invertida: {}–{}",
                t.heart_min, t.heart_max
            ));
        }
        if t.temperature_min > t.temperature_max {
            errors.push(format!(
                "Faixa de temperatura invertida: {}–{}",
                t.temperature_min, t.temperature_max
            ));
        }

        if self.sink.enabled && self.sink.port == 0 {
            errors.push("Porta do sink não pode ser 0".into());
        }
        if self.sink.queue_depth == 0 {
            errors.push("Fila do sink não pode ter profundidade 0".into());
        }
        if self.simulator.interval_secs < 0.05 || self.simulator.interval_secs > 60.0 {
            errors.push(format!(
                "Intervalo do simulador inválido: {} (0.05–60.0)",
                self.simulator.interval_secs
            ));
        }
        if self.collector.port == 0 {
            errors.push("Porta do coletor não pode ser 0".into());
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        let errors = config.validate();
        assert!(errors.is_empty(), "Erros: {:?}", errors);
    }

    #[test]
    fn defaults_match_known_sensor() {
        let device = DeviceConfig::default();
        assert_eq!(device.name_prefixes, ["VitalLink", "ESP32"]);
        assert_eq!(
            device.service_uuid.to_string(),
            "12345678-1234-5678-1234-56789abcdef0"
        );
        assert_eq!(
            device.characteristic_uuid.to_string(),
            "12345678-1234-5678-1234-56789abcdef1"
        );
        assert_eq!(HistoryConfig::default().capacity, 50);
    }

    #[test]
    fn roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(config.device.service_uuid, parsed.device.service_uuid);
        assert_eq!(config.thresholds, parsed.thresholds);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let partial = r#"
[thresholds]
heart_max = 120.0
"#;
        let config: AppConfig = toml::from_str(partial).unwrap();
        assert_eq!(config.thresholds.heart_max, 120.0);
        // Outros campos devem ter valor padrão
        assert_eq!(config.thresholds.heart_min, 60.0);
        assert_eq!(config.history.capacity, 50);
        assert_eq!(config.sink.port, 5006);
        assert_eq!(config.platform.kind, PlatformKind::Simulator);
    }

    #[test]
    fn platform_kind_from_toml() {
        let config: AppConfig = toml::from_str("[platform]\nkind = \"ble\"\n").unwrap();
        assert_eq!(config.platform.kind, PlatformKind::Ble);
        assert_eq!(config.platform.scan_timeout_secs, 10.0);

        let bad = toml::from_str::<AppConfig>("[platform]\nkind = \"zigbee\"\n");
        assert!(bad.is_err());

        let mut config = AppConfig::default();
        config.platform.gatt_timeout_secs = 0.0;
        assert_eq!(config.validate().len(), 1);
    }

    #[test]
    fn rejects_inverted_ranges() {
        let mut config = AppConfig::default();
        config.thresholds.heart_min = 120.0;
        config.history.capacity = 0;
        let errors = config.validate();
        assert_eq!(errors.len(), 2, "Erros: {:?}", errors);
    }

    #[test]
    fn save_and_load() {
        let path = std::env::temp_dir().join(format!("vitals_cfg_{}.toml", std::process::id()));
        let mut config = AppConfig::default();
        config.simulator.device_name = "ESP32-Bancada".into();
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path);
        assert_eq!(loaded.simulator.device_name, "ESP32-Bancada");
        let _ = std::fs::remove_file(&path);
    }
}
