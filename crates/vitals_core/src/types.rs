//! Tipos do modelo de dados: leituras de sinais vitais e estado da sessão.
//!
//! Uma [`Reading`] é imutável depois de construída. O estado da sessão é
//! publicado como [`SessionSnapshot`], uma cópia congelada que os consumidores
//! podem guardar sem nunca tocar no estado vivo do engine.

use crate::protocol::DecodeError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ──────────────────────────────────────────────
// Leitura
// ──────────────────────────────────────────────

/// Uma amostra de sinais vitais decodificada de uma notificação do sensor.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Reading {
    heart: u8,
    oxygen: u8,
    temperature: f32,
    timestamp_ms: u64,
}

impl Reading {
    pub fn new(heart: u8, oxygen: u8, temperature: f32, timestamp_ms: u64) -> Self {
        Self {
            heart,
            oxygen,
            temperature,
            timestamp_ms,
        }
    }

    /// Frequência cardíaca (bpm)
    pub fn heart(&self) -> u8 {
        self.heart
    }

    /// Saturação de oxigênio (%)
    pub fn oxygen(&self) -> u8 {
        self.oxygen
    }

    /// Temperatura corporal (°C), uma casa decimal
    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    /// Momento da captura (ms desde a época UNIX), atribuído na decodificação
    pub fn timestamp_ms(&self) -> u64 {
        self.timestamp_ms
    }

    /// Valor de um sinal vital específico, como `f32`.
    pub fn value(&self, kind: VitalKind) -> f32 {
        match kind {
            VitalKind::Heart => f32::from(self.heart),
            VitalKind::Oxygen => f32::from(self.oxygen),
            VitalKind::Temperature => self.temperature,
        }
    }
}

/// Os três sinais vitais transportados numa leitura.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VitalKind {
    Heart,
    Oxygen,
    Temperature,
}

impl VitalKind {
    pub const ALL: [VitalKind; 3] = [VitalKind::Heart, VitalKind::Oxygen, VitalKind::Temperature];

    /// Identificador estável usado em alertas e logs.
    pub fn metric(self) -> &'static str {
        match self {
            VitalKind::Heart => "heart",
            VitalKind::Oxygen => "oxygen",
            VitalKind::Temperature => "temperature",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            VitalKind::Heart => "Frequência Cardíaca",
            VitalKind::Oxygen => "SpO2",
            VitalKind::Temperature => "Temperatura",
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            VitalKind::Heart => "bpm",
            VitalKind::Oxygen => "%",
            VitalKind::Temperature => "°C",
        }
    }
}

// ──────────────────────────────────────────────
// Sessão
// ──────────────────────────────────────────────

/// Estado do link sem fio.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Descritor de erro exposto como `last_error` da sessão.
///
/// As variantes de handshake nomeiam a fase que falhou.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("Bluetooth indisponível nesta plataforma")]
    CapabilityUnavailable,

    #[error("Falha na descoberta do dispositivo: {0}")]
    DiscoveryFailed(String),

    #[error("Falha ao estabelecer o link: {0}")]
    LinkFailed(String),

    #[error("Serviço {0} não encontrado")]
    ServiceNotFound(Uuid),

    #[error("Característica {0} não encontrada")]
    CharacteristicNotFound(Uuid),

    #[error("Falha ao assinar notificações: {0}")]
    SubscriptionFailed(String),

    #[error("Link perdido")]
    LinkLost,

    #[error("Payload inválido: {0}")]
    Decode(#[from] DecodeError),
}

impl SessionError {
    /// Erros de decodificação são apenas diagnósticos; os demais são visíveis
    /// ao usuário.
    pub fn is_user_visible(&self) -> bool {
        !matches!(self, SessionError::Decode(_))
    }
}

/// Cópia imutável do estado da sessão entregue aos assinantes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub status: ConnectionStatus,
    /// Leitura mais recente (zerada antes do primeiro dado)
    pub current: Reading,
    /// Histórico, mais recente primeiro
    pub history: Vec<Reading>,
    pub last_error: Option<SessionError>,
}

impl SessionSnapshot {
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_reading_is_zeroed() {
        let r = Reading::default();
        assert_eq!(r.heart(), 0);
        assert_eq!(r.oxygen(), 0);
        assert_eq!(r.temperature(), 0.0);
        assert_eq!(r.timestamp_ms(), 0);
    }

    #[test]
    fn value_by_kind() {
        let r = Reading::new(72, 98, 36.6, 1);
        assert_eq!(r.value(VitalKind::Heart), 72.0);
        assert_eq!(r.value(VitalKind::Oxygen), 98.0);
        assert_eq!(r.value(VitalKind::Temperature), 36.6);
    }

    #[test]
    fn initial_snapshot_is_disconnected_and_empty() {
        let s = SessionSnapshot::default();
        assert_eq!(s.status, ConnectionStatus::Disconnected);
        assert!(s.history.is_empty());
        assert!(s.last_error.is_none());
        assert!(!s.is_connected());
    }

    #[test]
    fn decode_errors_are_not_user_visible() {
        assert!(!SessionError::Decode(DecodeError::TooShort(2)).is_user_visible());
        assert!(SessionError::LinkLost.is_user_visible());
    }
}
