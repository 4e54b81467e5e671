//! # Vitals Monitor
//!
//! Engine de ingestão de telemetria: conduz o ciclo de vida do link BLE com o
//! sensor, decodifica cada notificação, mantém a leitura atual e o histórico
//! e encaminha as leituras ao armazenamento remoto.
//!
//! ## Módulos
//! - [`platform`] – Fronteira com a pilha sem fio (descoberta, GATT, eventos)
//! - [`session`] – Máquina de estados da sessão e publicação de snapshots
//! - [`sink`] – Encaminhamento fire-and-forget ao armazenamento remoto
//! - [`simulator`] – Sensor simulado em processo
//! - `ble` – Plataforma btleplug (feature `ble`)

#[cfg(feature = "ble")]
pub mod ble;
pub mod platform;
pub mod session;
pub mod simulator;
pub mod sink;

#[cfg(feature = "ble")]
pub use ble::BlePlatform;
pub use platform::{WirelessPlatform, Link, LinkEvents, PlatformError};
pub use session::{EngineStopped, SessionHandle, SessionManager, SessionOptions, Subscription};
pub use simulator::SimulatedPlatform;
pub use sink::{ReadingSink, SinkWorker};
