//! Sensor simulado.
//!
//! Implementa [`WirelessPlatform`] em processo: anuncia um dispositivo com o
//! serviço e a característica conhecidos e, depois da assinatura, emite
//! payloads de 4 bytes num intervalo fixo. Também permite injetar payloads,
//! derrubar o link, falhar uma fase do handshake ou segurá-lo numa fase.

use crate::platform::{
    DeviceInfo, DiscoveryFilter, HandshakePhase, Link, LinkEvents, PlatformError,
    WirelessPlatform,
};
use crossbeam_channel::{Receiver, Sender, bounded};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;
use vitals_core::config::{DeviceConfig, SimulatorConfig};
use vitals_core::protocol::encode_sensor_payload;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Esvazia o slot só se ele ainda pertence à tentativa `attempt`.
fn release_owned(slot: &Mutex<Option<LinkEvents>>, attempt: u64) {
    let mut slot = lock(slot);
    if slot.as_ref().is_some_and(|events| events.attempt() == attempt) {
        slot.take();
    }
}

/// Estado compartilhado entre a plataforma e os links que ela abre.
#[derive(Default)]
struct Shared {
    fail_at: Mutex<Option<(HandshakePhase, PlatformError)>>,
    hold: Mutex<Option<(HandshakePhase, Receiver<()>)>>,
    /// Listener de notificações do link mais recente
    subscribed: Mutex<Option<LinkEvents>>,
    /// Listener de perda de link do link mais recente
    link_events: Mutex<Option<LinkEvents>>,
    /// Operações de teardown, em ordem
    teardown_log: Mutex<Vec<&'static str>>,
}

impl Shared {
    fn enter_phase(&self, phase: HandshakePhase) -> Result<(), PlatformError> {
        let held = {
            let mut hold = lock(&self.hold);
            if hold.as_ref().is_some_and(|(p, _)| *p == phase) {
                hold.take()
            } else {
                None
            }
        };
        if let Some((_, rx)) = held {
            debug!("Handshake segurado antes da fase {phase}");
            // Gate descartado também libera
            let _ = rx.recv();
        }

        let mut fail = lock(&self.fail_at);
        if fail.as_ref().is_some_and(|(p, _)| *p == phase) {
            if let Some((_, err)) = fail.take() {
                return Err(err);
            }
        }
        Ok(())
    }
}

/// Segura o handshake numa fase até [`HandshakeGate::release`].
pub struct HandshakeGate {
    tx: Sender<()>,
}

impl HandshakeGate {
    pub fn release(self) {
        let _ = self.tx.send(());
    }
}

pub struct SimulatedPlatform {
    available: bool,
    device_name: String,
    service: Uuid,
    characteristic: Uuid,
    interval: Option<Duration>,
    attempts: AtomicUsize,
    shared: Arc<Shared>,
}

impl SimulatedPlatform {
    pub fn new(sim: &SimulatorConfig, device: &DeviceConfig) -> Self {
        Self {
            available: sim.bluetooth_available,
            device_name: sim.device_name.clone(),
            service: device.service_uuid,
            characteristic: device.characteristic_uuid,
            interval: Some(Duration::from_secs_f64(sim.interval_secs.max(0.01))),
            attempts: AtomicUsize::new(0),
            shared: Arc::new(Shared::default()),
        }
    }

    /// Sem fluxo automático: só payloads injetados chegam ao engine.
    pub fn without_stream(mut self) -> Self {
        self.interval = None;
        self
    }

    /// Falha a próxima tentativa na fase indicada.
    pub fn fail_at(&self, phase: HandshakePhase, err: PlatformError) {
        *lock(&self.shared.fail_at) = Some((phase, err));
    }

    /// Segura a próxima tentativa antes da fase indicada.
    pub fn hold_at(&self, phase: HandshakePhase) -> HandshakeGate {
        let (tx, rx) = bounded(1);
        *lock(&self.shared.hold) = Some((phase, rx));
        HandshakeGate { tx }
    }

    /// Quantas descobertas foram iniciadas.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// `true` entre `open_link` e o fechamento (ou perda) do link.
    pub fn is_link_open(&self) -> bool {
        lock(&self.shared.link_events).is_some()
    }

    pub fn is_subscribed(&self) -> bool {
        lock(&self.shared.subscribed).is_some()
    }

    /// Entrega um payload pelo listener registrado. `false` sem assinatura.
    pub fn inject(&self, payload: Option<Vec<u8>>) -> bool {
        match lock(&self.shared.subscribed).as_ref() {
            Some(events) => events.notify(payload),
            None => false,
        }
    }

    /// Simula o sensor saindo de alcance.
    pub fn drop_link(&self) -> bool {
        lock(&self.shared.subscribed).take();
        match lock(&self.shared.link_events).take() {
            Some(events) => events.link_lost(),
            None => false,
        }
    }

    /// Ordem das operações de teardown executadas nos links.
    pub fn teardown_log(&self) -> Vec<&'static str> {
        lock(&self.shared.teardown_log).clone()
    }
}

impl WirelessPlatform for SimulatedPlatform {
    fn is_available(&self) -> bool {
        self.available
    }

    fn discover(&self, filter: &DiscoveryFilter) -> Result<DeviceInfo, PlatformError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.shared.enter_phase(HandshakePhase::Discovery)?;

        if !filter.matches(&self.device_name) {
            return Err(PlatformError::NoDevice);
        }
        Ok(DeviceInfo {
            id: format!("sim:{}", self.device_name),
            name: self.device_name.clone(),
        })
    }

    fn open_link(
        &self,
        device: &DeviceInfo,
        events: LinkEvents,
    ) -> Result<Box<dyn Link>, PlatformError> {
        self.shared.enter_phase(HandshakePhase::Link)?;
        let attempt = events.attempt();
        *lock(&self.shared.link_events) = Some(events);
        info!("Link simulado aberto com {}", device.name);

        Ok(Box::new(SimulatedLink {
            device: device.clone(),
            attempt,
            service: self.service,
            characteristic: self.characteristic,
            service_ok: false,
            characteristic_ok: false,
            interval: self.interval,
            shared: Arc::clone(&self.shared),
            stream_stop: None,
        }))
    }
}

// ──────────────────────────────────────────────
// Link
// ──────────────────────────────────────────────

struct SimulatedLink {
    device: DeviceInfo,
    /// Tentativa que abriu o link; só ela pode limpar os listeners
    attempt: u64,
    service: Uuid,
    characteristic: Uuid,
    service_ok: bool,
    characteristic_ok: bool,
    interval: Option<Duration>,
    shared: Arc<Shared>,
    /// Flag de parada da thread que gera leituras
    stream_stop: Option<Arc<AtomicBool>>,
}

impl Link for SimulatedLink {
    fn device(&self) -> &DeviceInfo {
        &self.device
    }

    fn resolve_service(&mut self, service: Uuid) -> Result<(), PlatformError> {
        self.shared.enter_phase(HandshakePhase::Service)?;
        if service != self.service {
            return Err(PlatformError::NotFound);
        }
        self.service_ok = true;
        Ok(())
    }

    fn resolve_characteristic(&mut self, characteristic: Uuid) -> Result<(), PlatformError> {
        self.shared.enter_phase(HandshakePhase::Characteristic)?;
        if !self.service_ok || characteristic != self.characteristic {
            return Err(PlatformError::NotFound);
        }
        self.characteristic_ok = true;
        Ok(())
    }

    fn subscribe(&mut self, events: LinkEvents) -> Result<(), PlatformError> {
        self.shared.enter_phase(HandshakePhase::Subscription)?;
        if !self.characteristic_ok {
            return Err(PlatformError::Backend("característica não resolvida".into()));
        }

        if let Some(interval) = self.interval {
            let stop = Arc::new(AtomicBool::new(false));
            std::thread::Builder::new()
                .name("sim-sensor".into())
                .spawn({
                    let stop = Arc::clone(&stop);
                    let events = events.clone();
                    move || stream_loop(&events, interval, &stop)
                })
                .map_err(|e| PlatformError::Backend(e.to_string()))?;
            self.stream_stop = Some(stop);
        }

        *lock(&self.shared.subscribed) = Some(events);
        Ok(())
    }

    fn unsubscribe(&mut self) {
        release_owned(&self.shared.subscribed, self.attempt);
        // A thread para no próximo tick; o que ela ainda enviar é descartado
        // pelo engine
        if let Some(stop) = self.stream_stop.take() {
            stop.store(true, Ordering::SeqCst);
        }
        lock(&self.shared.teardown_log).push("unsubscribe");
    }

    fn close(&mut self) {
        release_owned(&self.shared.link_events, self.attempt);
        lock(&self.shared.teardown_log).push("close");
        debug!("Link simulado fechado ({})", self.device.name);
    }
}

impl Drop for SimulatedLink {
    fn drop(&mut self) {
        if let Some(stop) = self.stream_stop.take() {
            stop.store(true, Ordering::SeqCst);
        }
    }
}

fn stream_loop(events: &LinkEvents, interval: Duration, stop: &AtomicBool) {
    let mut tick: u32 = 0;
    loop {
        std::thread::sleep(interval);
        if stop.load(Ordering::SeqCst) {
            break;
        }

        let (heart, oxygen, temperature) = waveform(tick);
        let payload = encode_sensor_payload(heart, oxygen, temperature);
        if !events.notify(Some(payload.to_vec())) {
            break;
        }
        tick = tick.wrapping_add(1);
    }
}

/// Sinais plausíveis e determinísticos, com uma excursão de atenção
/// ocasional para exercitar a classificação.
fn waveform(tick: u32) -> (u8, u8, f32) {
    let phase = (tick % 20) as i32;
    let swing = if phase < 10 { phase } else { 20 - phase };

    let heart = (68 + swing) as u8;
    let oxygen = if tick % 37 == 36 { 93 } else { 96 + (swing % 4) as u8 };
    let temperature = 36.4 + swing as f32 * 0.05;

    (heart, oxygen, temperature)
}
