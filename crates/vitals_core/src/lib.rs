//! # Vitals Core
//!
//! Crate compartilhada que define o modelo de dados das leituras de sinais
//! vitais, o decodificador binário das notificações BLE, a classificação por
//! thresholds, o histórico limitado e a configuração TOML.
//!
//! ## Módulos
//! - [`types`] – Leitura, estado da conexão e snapshot da sessão
//! - [`protocol`] – Payload do sensor e frame do armazenamento remoto
//! - [`alerts`] – Thresholds e classificação normal/atenção
//! - [`history`] – Buffer limitado, mais recente primeiro
//! - [`clock`] – Relógio de captura monotônico
//! - [`config`] – Configuração unificada via TOML

pub mod types;
pub mod protocol;
pub mod alerts;
pub mod history;
pub mod clock;
pub mod config;

// Re-exports convenientes
pub use types::{ConnectionStatus, Reading, SessionError, SessionSnapshot, VitalKind};
pub use protocol::{decode_reading, DecodeError, PROTOCOL_VERSION};
pub use alerts::{classify, VitalStatus};
pub use history::HistoryBuffer;
pub use config::AppConfig;
