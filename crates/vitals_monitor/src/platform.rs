//! Fronteira com a pilha sem fio da plataforma.
//!
//! O engine não conhece nenhuma pilha BLE concreta: ele conduz o handshake
//! (descoberta → link → serviço → característica → assinatura) através de
//! [`WirelessPlatform`] e [`Link`], e recebe notificações e perda de link por
//! [`LinkEvents`], que alimenta a fila única do engine.

use crossbeam_channel::Sender;
use std::fmt;
use uuid::Uuid;
use vitals_core::config::DeviceConfig;
use vitals_core::SessionError;

/// Critérios entregues ao mecanismo de descoberta da plataforma.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryFilter {
    /// O nome do dispositivo deve começar com um destes prefixos
    pub name_prefixes: Vec<String>,
    /// Serviços que o app pode acessar além dos anunciados
    pub optional_services: Vec<Uuid>,
}

impl DiscoveryFilter {
    pub fn from_device(device: &DeviceConfig) -> Self {
        Self {
            name_prefixes: device.name_prefixes.clone(),
            optional_services: vec![device.service_uuid],
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        self.name_prefixes
            .iter()
            .any(|prefix| name.starts_with(prefix.as_str()))
    }
}

/// Dispositivo escolhido na descoberta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
}

/// Erro reportado pela plataforma numa fase do handshake.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    #[error("nenhum dispositivo compatível encontrado")]
    NoDevice,

    #[error("recurso GATT não encontrado")]
    NotFound,

    #[error("{0}")]
    Backend(String),
}

/// Fases do handshake, na ordem em que acontecem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakePhase {
    Discovery,
    Link,
    Service,
    Characteristic,
    Subscription,
}

impl HandshakePhase {
    /// Converte a falha da plataforma no descritor de erro da sessão.
    pub fn failure(self, err: PlatformError, device: &DeviceConfig) -> SessionError {
        match self {
            HandshakePhase::Discovery => SessionError::DiscoveryFailed(err.to_string()),
            HandshakePhase::Link => SessionError::LinkFailed(err.to_string()),
            HandshakePhase::Service => SessionError::ServiceNotFound(device.service_uuid),
            HandshakePhase::Characteristic => {
                SessionError::CharacteristicNotFound(device.characteristic_uuid)
            }
            HandshakePhase::Subscription => SessionError::SubscriptionFailed(err.to_string()),
        }
    }
}

impl fmt::Display for HandshakePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HandshakePhase::Discovery => "descoberta",
            HandshakePhase::Link => "link",
            HandshakePhase::Service => "serviço",
            HandshakePhase::Characteristic => "característica",
            HandshakePhase::Subscription => "assinatura",
        };
        f.write_str(name)
    }
}

/// Pilha sem fio da plataforma.
///
/// As chamadas são bloqueantes e rodam fora da thread do engine; os timeouts
/// são os da própria plataforma.
pub trait WirelessPlatform: Send + Sync {
    /// `false` quando não existe nenhuma capacidade Bluetooth.
    fn is_available(&self) -> bool;

    fn discover(&self, filter: &DiscoveryFilter) -> Result<DeviceInfo, PlatformError>;

    /// Abre o link. `events` recebe a perda de link não solicitada.
    fn open_link(
        &self,
        device: &DeviceInfo,
        events: LinkEvents,
    ) -> Result<Box<dyn Link>, PlatformError>;
}

/// Link GATT ativo com o sensor.
pub trait Link: Send {
    fn device(&self) -> &DeviceInfo;

    fn resolve_service(&mut self, service: Uuid) -> Result<(), PlatformError>;

    fn resolve_characteristic(&mut self, characteristic: Uuid) -> Result<(), PlatformError>;

    /// Registra o listener de notificações na característica resolvida.
    fn subscribe(&mut self, events: LinkEvents) -> Result<(), PlatformError>;

    /// Remove o listener. Idempotente.
    fn unsubscribe(&mut self);

    /// Derruba o link. Idempotente.
    fn close(&mut self);
}

// ──────────────────────────────────────────────
// Eventos do link
// ──────────────────────────────────────────────

/// Evento assíncrono vindo da plataforma.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// Notificação da característica; `None` quando chega sem valor
    Notification(Option<Vec<u8>>),
    LinkLost,
}

/// Evento marcado com a tentativa de conexão que o originou.
#[derive(Debug, Clone)]
pub(crate) struct AttemptEvent {
    pub attempt: u64,
    pub event: LinkEvent,
}

/// Canal pelo qual a plataforma entrega eventos ao engine.
///
/// Cada tentativa de conexão recebe o seu, então eventos atrasados de uma
/// tentativa encerrada são reconhecidos e descartados.
#[derive(Clone)]
pub struct LinkEvents {
    attempt: u64,
    tx: Sender<AttemptEvent>,
}

impl LinkEvents {
    pub(crate) fn new(attempt: u64, tx: Sender<AttemptEvent>) -> Self {
        Self { attempt, tx }
    }

    /// Tentativa de conexão dona deste canal.
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    /// Entrega uma notificação. Retorna `false` se o engine já encerrou.
    pub fn notify(&self, payload: Option<Vec<u8>>) -> bool {
        self.send(LinkEvent::Notification(payload))
    }

    /// Sinaliza perda de link não solicitada.
    pub fn link_lost(&self) -> bool {
        self.send(LinkEvent::LinkLost)
    }

    fn send(&self, event: LinkEvent) -> bool {
        self.tx
            .send(AttemptEvent {
                attempt: self.attempt,
                event,
            })
            .is_ok()
    }
}

impl fmt::Debug for LinkEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkEvents")
            .field("attempt", &self.attempt)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn filter_matches_prefixes() {
        let filter = DiscoveryFilter::from_device(&DeviceConfig::default());
        assert!(filter.matches("VitalLink-01"));
        assert!(filter.matches("ESP32"));
        assert!(!filter.matches("Galaxy Buds"));
        assert!(!filter.matches("my-ESP32"));
        assert_eq!(filter.optional_services, [DeviceConfig::default().service_uuid]);
    }

    #[test]
    fn phase_failures_name_the_phase() {
        let device = DeviceConfig::default();
        let err = PlatformError::NotFound;
        assert!(matches!(
            HandshakePhase::Discovery.failure(err.clone(), &device),
            SessionError::DiscoveryFailed(_)
        ));
        assert!(matches!(
            HandshakePhase::Link.failure(err.clone(), &device),
            SessionError::LinkFailed(_)
        ));
        assert_eq!(
            HandshakePhase::Service.failure(err.clone(), &device),
            SessionError::ServiceNotFound(device.service_uuid)
        );
        assert_eq!(
            HandshakePhase::Characteristic.failure(err.clone(), &device),
            SessionError::CharacteristicNotFound(device.characteristic_uuid)
        );
        assert!(matches!(
            HandshakePhase::Subscription.failure(err, &device),
            SessionError::SubscriptionFailed(_)
        ));
    }

    #[test]
    fn events_carry_attempt() {
        let (tx, rx) = unbounded();
        let events = LinkEvents::new(7, tx);
        assert!(events.notify(Some(vec![1, 2, 3, 4])));
        assert!(events.link_lost());

        assert_eq!(events.attempt(), 7);
        let first = rx.recv().unwrap();
        assert_eq!(first.attempt, 7);
        assert_eq!(first.event, LinkEvent::Notification(Some(vec![1, 2, 3, 4])));
        assert_eq!(rx.recv().unwrap().event, LinkEvent::LinkLost);

        drop(rx);
        assert!(!events.notify(None));
    }
}
