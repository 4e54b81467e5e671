//! Gerenciador de sessão do dispositivo.
//!
//! Uma única thread (o engine) é dona da sessão e aplica, em ordem, todos os
//! comandos (`connect`, `disconnect`, consultas) e eventos do link. O
//! handshake roda numa thread própria e devolve o resultado ao engine como
//! mais um comando, marcado com o número da tentativa; resultados de uma
//! tentativa cancelada são descartados.
//!
//! Os consumidores recebem [`SessionSnapshot`]s imutáveis via
//! [`Subscription`], publicados só depois que cada evento foi aplicado por
//! inteiro. Cada assinante guarda apenas o snapshot mais novo ainda não lido:
//! quem não consome perde os intermediários, nunca acumula.
//!
//! ```text
//!  Disconnected ──connect──▶ Connecting ──ok──▶ Connected
//!       ▲                        │                 │
//!       └──── falha / cancel ────┘                 │
//!       └──────── disconnect / link perdido ───────┘
//! ```

use crate::platform::{
    AttemptEvent, DiscoveryFilter, HandshakePhase, Link, LinkEvent, LinkEvents, WirelessPlatform,
};
use crate::sink::SinkWorker;
use crossbeam_channel::{Receiver, Sender, TrySendError, bounded, select, unbounded};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use vitals_core::alerts::evaluate_alerts;
use vitals_core::clock::CaptureClock;
use vitals_core::config::{AlertThresholds, AppConfig, DeviceConfig};
use vitals_core::protocol::decode_notification;
use vitals_core::{ConnectionStatus, HistoryBuffer, Reading, SessionError, SessionSnapshot};

/// O engine já encerrou; nenhum comando pode ser aplicado.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Engine da sessão encerrado")]
pub struct EngineStopped;

/// Parâmetros da sessão.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub device: DeviceConfig,
    pub thresholds: AlertThresholds,
    pub history_capacity: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for SessionOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            device: config.device.clone(),
            thresholds: config.thresholds.clone(),
            history_capacity: config.history.capacity,
        }
    }
}

/// Notificações guardadas entre a assinatura e o fim do handshake.
const EARLY_NOTIFICATION_LIMIT: usize = 8;

type SnapshotReply = Sender<Arc<SessionSnapshot>>;

/// Caixa de um valor só: o snapshot mais novo que o assinante ainda não leu.
type SnapshotSlot = Arc<Mutex<Option<Arc<SessionSnapshot>>>>;

fn lock_slot(
    slot: &Mutex<Option<Arc<SessionSnapshot>>>,
) -> MutexGuard<'_, Option<Arc<SessionSnapshot>>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Lado do engine de uma [`Subscription`].
struct Subscriber {
    slot: SnapshotSlot,
    /// Sinal de "há novidade"; capacidade 1
    wake: Sender<()>,
}

impl Subscriber {
    /// Substitui o snapshot pendente. `false` quando o assinante foi descartado.
    fn offer(&self, snapshot: &Arc<SessionSnapshot>) -> bool {
        *lock_slot(&self.slot) = Some(Arc::clone(snapshot));
        // Cheio: o assinante já tem um aviso pendente
        !matches!(self.wake.try_send(()), Err(TrySendError::Disconnected(())))
    }
}

enum Command {
    Connect(SnapshotReply),
    Disconnect(Sender<()>),
    Snapshot(SnapshotReply),
    Subscribe {
        subscriber: Subscriber,
        reply: SnapshotReply,
    },
    HandshakeFinished { attempt: u64, outcome: Handshake },
    Shutdown,
}

/// Resultado de uma tentativa de handshake.
enum Handshake {
    Done(Box<dyn Link>),
    Failed(SessionError),
    Cancelled,
}

// ──────────────────────────────────────────────
// API pública
// ──────────────────────────────────────────────

/// Dono da thread do engine. Encerra o engine ao ser descartado.
pub struct SessionManager {
    handle: SessionHandle,
    thread: Option<JoinHandle<()>>,
}

impl SessionManager {
    /// Cria a sessão (`Disconnected`, histórico vazio) e inicia o engine.
    pub fn spawn(
        platform: Arc<dyn WirelessPlatform>,
        options: SessionOptions,
        sink: Option<SinkWorker>,
    ) -> std::io::Result<Self> {
        let (cmd_tx, cmd_rx) = unbounded::<Command>();
        let (event_tx, event_rx) = unbounded::<AttemptEvent>();

        let engine = Engine::new(platform, options, sink, cmd_tx.clone(), event_tx);
        let thread = std::thread::Builder::new()
            .name("vitals-session".into())
            .spawn(move || engine.run(&cmd_rx, &event_rx))?;

        Ok(Self {
            handle: SessionHandle { commands: cmd_tx },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Derruba o link, se houver, e espera o engine terminar.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.handle.commands.send(Command::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Ponto de acesso da camada de apresentação. Barato de clonar.
#[derive(Clone)]
pub struct SessionHandle {
    commands: Sender<Command>,
}

impl SessionHandle {
    /// Inicia (ou acompanha) o handshake e bloqueia até ele terminar.
    ///
    /// Já `Connecting`: espera a tentativa em curso, sem iniciar outra.
    /// Já `Connected`: retorna na hora.
    pub fn connect(&self) -> Result<Arc<SessionSnapshot>, EngineStopped> {
        self.request(Command::Connect)
    }

    /// Encerra a sessão ou cancela o handshake em curso. Nunca falha.
    pub fn disconnect(&self) {
        let (tx, rx) = bounded(1);
        if self.commands.send(Command::Disconnect(tx)).is_ok() {
            let _ = rx.recv();
        }
    }

    /// Estado atual.
    pub fn snapshot(&self) -> Result<Arc<SessionSnapshot>, EngineStopped> {
        self.request(Command::Snapshot)
    }

    /// Assina as atualizações. O estado atual é entregue de imediato.
    pub fn subscribe(&self) -> Result<Subscription, EngineStopped> {
        let slot = SnapshotSlot::default();
        let (wake_tx, wake) = bounded(1);
        let subscriber = Subscriber {
            slot: Arc::clone(&slot),
            wake: wake_tx,
        };
        let last = self.request(|reply| Command::Subscribe { subscriber, reply })?;
        Ok(Subscription { slot, wake, last })
    }

    fn request(
        &self,
        make: impl FnOnce(SnapshotReply) -> Command,
    ) -> Result<Arc<SessionSnapshot>, EngineStopped> {
        let (tx, rx) = bounded(1);
        self.commands.send(make(tx)).map_err(|_| EngineStopped)?;
        rx.recv().map_err(|_| EngineStopped)
    }
}

/// Visão somente leitura, sempre atual, do estado da sessão.
///
/// Guarda no máximo um snapshot pendente: publicações que chegam antes da
/// leitura substituem a anterior.
pub struct Subscription {
    slot: SnapshotSlot,
    wake: Receiver<()>,
    last: Arc<SessionSnapshot>,
}

impl Subscription {
    /// Último snapshot visto por este assinante.
    pub fn last_seen(&self) -> &Arc<SessionSnapshot> {
        &self.last
    }

    /// Snapshot mais novo, sem bloquear.
    pub fn latest(&mut self) -> Arc<SessionSnapshot> {
        self.take_pending();
        Arc::clone(&self.last)
    }

    /// Próximo snapshot ainda não visto, bloqueando. `None` quando o engine
    /// encerrou.
    pub fn recv(&mut self) -> Option<Arc<SessionSnapshot>> {
        loop {
            if let Some(snapshot) = self.take_pending() {
                return Some(snapshot);
            }
            self.wake.recv().ok()?;
        }
    }

    pub fn recv_timeout(&mut self, timeout: Duration) -> Option<Arc<SessionSnapshot>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(snapshot) = self.take_pending() {
                return Some(snapshot);
            }
            let remaining = deadline.checked_duration_since(Instant::now())?;
            self.wake.recv_timeout(remaining).ok()?;
        }
    }

    fn take_pending(&mut self) -> Option<Arc<SessionSnapshot>> {
        let snapshot = lock_slot(&self.slot).take()?;
        self.last = Arc::clone(&snapshot);
        Some(snapshot)
    }

    /// Espera o primeiro snapshot que satisfaça `pred`, incluindo o último
    /// já visto.
    pub fn wait_for(
        &mut self,
        timeout: Duration,
        pred: impl Fn(&SessionSnapshot) -> bool,
    ) -> Option<Arc<SessionSnapshot>> {
        if pred(&self.last) {
            return Some(Arc::clone(&self.last));
        }
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.checked_duration_since(Instant::now())?;
            let snapshot = self.recv_timeout(remaining)?;
            if pred(&snapshot) {
                return Some(snapshot);
            }
        }
    }
}

// ──────────────────────────────────────────────
// Engine
// ──────────────────────────────────────────────

struct PendingAttempt {
    id: u64,
    cancel: Arc<AtomicBool>,
    waiters: Vec<SnapshotReply>,
    /// Notificações que chegaram antes de `HandshakeFinished`
    early: VecDeque<Option<Vec<u8>>>,
}

struct ActiveLink {
    attempt: u64,
    link: Box<dyn Link>,
}

struct Engine {
    platform: Arc<dyn WirelessPlatform>,
    device: DeviceConfig,
    thresholds: AlertThresholds,
    clock: CaptureClock,
    sink: Option<SinkWorker>,

    // Sessão
    status: ConnectionStatus,
    current: Reading,
    history: HistoryBuffer,
    last_error: Option<SessionError>,

    // Link
    next_attempt: u64,
    pending: Option<PendingAttempt>,
    active: Option<ActiveLink>,

    // Publicação
    published: Arc<SessionSnapshot>,
    subscribers: Vec<Subscriber>,

    cmd_tx: Sender<Command>,
    event_tx: Sender<AttemptEvent>,
}

impl Engine {
    fn new(
        platform: Arc<dyn WirelessPlatform>,
        options: SessionOptions,
        sink: Option<SinkWorker>,
        cmd_tx: Sender<Command>,
        event_tx: Sender<AttemptEvent>,
    ) -> Self {
        Self {
            platform,
            device: options.device,
            thresholds: options.thresholds,
            clock: CaptureClock::new(),
            sink,
            status: ConnectionStatus::Disconnected,
            current: Reading::default(),
            history: HistoryBuffer::new(options.history_capacity),
            last_error: None,
            next_attempt: 1,
            pending: None,
            active: None,
            published: Arc::new(SessionSnapshot::default()),
            subscribers: Vec::new(),
            cmd_tx,
            event_tx,
        }
    }

    fn run(mut self, commands: &Receiver<Command>, events: &Receiver<AttemptEvent>) {
        info!("Engine da sessão iniciado");
        loop {
            select! {
                recv(commands) -> msg => match msg {
                    Ok(Command::Shutdown) | Err(_) => break,
                    Ok(cmd) => self.handle_command(cmd),
                },
                recv(events) -> msg => {
                    if let Ok(ev) = msg {
                        self.handle_link_event(ev);
                    }
                }
            }
        }
        self.teardown();
        info!("Engine da sessão encerrado");
    }

    fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Connect(reply) => self.connect(reply),
            Command::Disconnect(reply) => {
                self.disconnect();
                let _ = reply.send(());
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(Arc::clone(&self.published));
            }
            Command::Subscribe { subscriber, reply } => {
                if reply.send(Arc::clone(&self.published)).is_ok() {
                    self.subscribers.push(subscriber);
                }
            }
            Command::HandshakeFinished { attempt, outcome } => {
                self.finish_handshake(attempt, outcome)
            }
            Command::Shutdown => {}
        }
    }

    // ── connect ──

    fn connect(&mut self, reply: SnapshotReply) {
        match self.status {
            ConnectionStatus::Connected => {
                let _ = reply.send(Arc::clone(&self.published));
            }
            ConnectionStatus::Connecting => {
                debug!("connect() durante handshake: aguardando tentativa em curso");
                if let Some(pending) = self.pending.as_mut() {
                    pending.waiters.push(reply);
                }
            }
            ConnectionStatus::Disconnected => {
                if !self.platform.is_available() {
                    warn!("Bluetooth indisponível, conexão abortada");
                    self.last_error = Some(SessionError::CapabilityUnavailable);
                    self.publish();
                    let _ = reply.send(Arc::clone(&self.published));
                    return;
                }
                self.start_handshake(reply);
            }
        }
    }

    fn start_handshake(&mut self, reply: SnapshotReply) {
        let attempt = self.next_attempt;
        self.next_attempt += 1;

        let cancel = Arc::new(AtomicBool::new(false));
        self.status = ConnectionStatus::Connecting;
        self.last_error = None;
        self.pending = Some(PendingAttempt {
            id: attempt,
            cancel: Arc::clone(&cancel),
            waiters: vec![reply],
            early: VecDeque::new(),
        });
        info!("Conectando (tentativa {attempt})...");

        let platform = Arc::clone(&self.platform);
        let device = self.device.clone();
        let events = LinkEvents::new(attempt, self.event_tx.clone());
        let cmd_tx = self.cmd_tx.clone();

        let spawned = std::thread::Builder::new()
            .name(format!("ble-handshake-{attempt}"))
            .spawn(move || {
                let outcome = run_handshake(platform.as_ref(), &device, &events, &cancel);
                if let Err(crossbeam_channel::SendError(Command::HandshakeFinished {
                    outcome: Handshake::Done(mut link),
                    ..
                })) = cmd_tx.send(Command::HandshakeFinished { attempt, outcome })
                {
                    // Engine já encerrado
                    abort(link.as_mut());
                }
            });

        match spawned {
            Ok(_) => self.publish(),
            Err(e) => {
                let err = SessionError::LinkFailed(e.to_string());
                self.finish_handshake(attempt, Handshake::Failed(err));
            }
        }
    }

    fn finish_handshake(&mut self, attempt: u64, outcome: Handshake) {
        let is_current = self.pending.as_ref().is_some_and(|p| p.id == attempt);
        if !is_current {
            debug!("Resultado da tentativa {attempt} descartado (cancelada)");
            if let Handshake::Done(mut link) = outcome {
                abort(link.as_mut());
            }
            return;
        }

        let Some(pending) = self.pending.take() else {
            return;
        };

        let mut early = VecDeque::new();
        match outcome {
            Handshake::Done(link) => {
                info!("Conectado a {}", link.device().name);
                self.active = Some(ActiveLink { attempt, link });
                self.status = ConnectionStatus::Connected;
                self.last_error = None;
                early = pending.early;
            }
            Handshake::Failed(err) => {
                warn!("Falha na conexão: {err}");
                self.status = ConnectionStatus::Disconnected;
                self.last_error = Some(err);
            }
            Handshake::Cancelled => {
                self.status = ConnectionStatus::Disconnected;
            }
        }

        self.publish();
        self.reply_waiters(pending.waiters);

        if !early.is_empty() {
            debug!("Aplicando {} notificação(ões) recebidas durante o handshake", early.len());
        }
        for payload in early {
            self.apply_notification(payload.as_deref());
        }
    }

    // ── disconnect ──

    fn disconnect(&mut self) {
        match self.status {
            ConnectionStatus::Disconnected => {}
            ConnectionStatus::Connecting => {
                if let Some(pending) = self.pending.take() {
                    pending.cancel.store(true, Ordering::SeqCst);
                    info!("Handshake (tentativa {}) cancelado", pending.id);
                    self.status = ConnectionStatus::Disconnected;
                    self.last_error = None;
                    self.publish();
                    self.reply_waiters(pending.waiters);
                }
            }
            ConnectionStatus::Connected => {
                self.release_link();
                self.status = ConnectionStatus::Disconnected;
                self.last_error = None;
                info!("Desconectado manualmente");
                self.publish();
            }
        }
    }

    /// Remove o listener antes de derrubar o link.
    fn release_link(&mut self) {
        if let Some(mut active) = self.active.take() {
            abort(active.link.as_mut());
        }
    }

    // ── eventos do link ──

    fn handle_link_event(&mut self, ev: AttemptEvent) {
        let live = self.status == ConnectionStatus::Connected
            && self.active.as_ref().is_some_and(|a| a.attempt == ev.attempt);
        let handshaking = self.pending.as_ref().is_some_and(|p| p.id == ev.attempt);

        if !live {
            if !handshaking {
                debug!("Evento da tentativa {} descartado: link já encerrado", ev.attempt);
                return;
            }
            match ev.event {
                LinkEvent::Notification(payload) => self.hold_early(payload),
                LinkEvent::LinkLost => self.lose_link_during_handshake(),
            }
            return;
        }

        match ev.event {
            LinkEvent::Notification(payload) => self.apply_notification(payload.as_deref()),
            LinkEvent::LinkLost => {
                warn!("Link perdido");
                self.release_link();
                self.status = ConnectionStatus::Disconnected;
                self.last_error = Some(SessionError::LinkLost);
                self.publish();
            }
        }
    }

    /// Assinatura já ativa, mas o resultado do handshake ainda não chegou.
    fn hold_early(&mut self, payload: Option<Vec<u8>>) {
        let Some(pending) = self.pending.as_mut() else {
            return;
        };
        if pending.early.len() == EARLY_NOTIFICATION_LIMIT {
            pending.early.pop_front();
            debug!("Notificação antecipada mais antiga descartada");
        }
        pending.early.push_back(payload);
        debug!("Notificação guardada até o fim do handshake (tentativa {})", pending.id);
    }

    fn lose_link_during_handshake(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.cancel.store(true, Ordering::SeqCst);
            warn!("Link perdido durante o handshake");
            self.status = ConnectionStatus::Disconnected;
            self.last_error = Some(SessionError::LinkLost);
            self.publish();
            self.reply_waiters(pending.waiters);
        }
    }

    fn apply_notification(&mut self, payload: Option<&[u8]>) {
        let reading = match decode_notification(payload, self.clock.now_ms()) {
            Ok(reading) => reading,
            Err(e) => {
                warn!("Notificação descartada: {e}");
                self.last_error = Some(SessionError::Decode(e));
                self.publish();
                return;
            }
        };

        debug!(
            "HR:{} O2:{} T:{:.1}",
            reading.heart(),
            reading.oxygen(),
            reading.temperature()
        );
        for alert in evaluate_alerts(&reading, &self.thresholds) {
            warn!("{} em atenção: {} {}", alert.label, alert.value, alert.unit);
        }

        self.current = reading;
        self.history.push(reading);
        if matches!(self.last_error, Some(SessionError::Decode(_))) {
            self.last_error = None;
        }
        if let Some(sink) = &self.sink {
            sink.submit(reading);
        }
        self.publish();
    }

    // ── publicação ──

    fn publish(&mut self) {
        self.published = Arc::new(SessionSnapshot {
            status: self.status,
            current: self.current,
            history: self.history.to_vec(),
            last_error: self.last_error.clone(),
        });
        let snapshot = &self.published;
        self.subscribers.retain(|sub| sub.offer(snapshot));
    }

    fn reply_waiters(&self, waiters: Vec<SnapshotReply>) {
        for waiter in waiters {
            let _ = waiter.send(Arc::clone(&self.published));
        }
    }

    fn teardown(&mut self) {
        let pending = self.pending.take();
        if let Some(pending) = &pending {
            pending.cancel.store(true, Ordering::SeqCst);
        }
        let had_link = self.active.is_some();
        self.release_link();

        if pending.is_some() || had_link {
            self.status = ConnectionStatus::Disconnected;
            self.publish();
        }
        // Quem ainda espera o connect() recebe o estado final
        if let Some(pending) = pending {
            self.reply_waiters(pending.waiters);
        }
    }
}

// ──────────────────────────────────────────────
// Handshake
// ──────────────────────────────────────────────

/// descoberta → link → serviço → característica → assinatura.
///
/// Checa o cancelamento entre as fases; um link já aberto é fechado antes de
/// retornar [`Handshake::Cancelled`].
fn run_handshake(
    platform: &dyn WirelessPlatform,
    device: &DeviceConfig,
    events: &LinkEvents,
    cancel: &AtomicBool,
) -> Handshake {
    let cancelled = || cancel.load(Ordering::SeqCst);
    let fail = |phase: HandshakePhase, err| Handshake::Failed(phase.failure(err, device));

    let filter = DiscoveryFilter::from_device(device);
    debug!("Solicitando dispositivo ({:?})", filter.name_prefixes);
    let info = match platform.discover(&filter) {
        Ok(info) => info,
        Err(e) => return fail(HandshakePhase::Discovery, e),
    };
    if cancelled() {
        return Handshake::Cancelled;
    }

    debug!("Dispositivo: {} – conectando GATT", info.name);
    let mut link = match platform.open_link(&info, events.clone()) {
        Ok(link) => link,
        Err(e) => return fail(HandshakePhase::Link, e),
    };

    let phases = [
        HandshakePhase::Service,
        HandshakePhase::Characteristic,
        HandshakePhase::Subscription,
    ];
    for phase in phases {
        if cancelled() {
            abort(link.as_mut());
            return Handshake::Cancelled;
        }
        debug!("Fase: {phase}");
        let result = match phase {
            HandshakePhase::Service => link.resolve_service(device.service_uuid),
            HandshakePhase::Characteristic => {
                link.resolve_characteristic(device.characteristic_uuid)
            }
            HandshakePhase::Subscription => link.subscribe(events.clone()),
            HandshakePhase::Discovery | HandshakePhase::Link => Ok(()),
        };
        if let Err(e) = result {
            abort(link.as_mut());
            return fail(phase, e);
        }
    }

    // Cancelado durante a assinatura: o listener já registrado é removido
    if cancelled() {
        abort(link.as_mut());
        return Handshake::Cancelled;
    }
    Handshake::Done(link)
}

fn abort(link: &mut dyn Link) {
    link.unsubscribe();
    link.close();
}
