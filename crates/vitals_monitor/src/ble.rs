//! Plataforma BLE real via `btleplug`.
//!
//! O btleplug é assíncrono; as chamadas de [`WirelessPlatform`] e [`Link`]
//! são bloqueantes e rodam fora da thread do runtime, então cada uma faz
//! `block_on` num runtime tokio próprio. Notificações e desconexões chegam
//! por tasks nesse runtime e seguem para o engine via [`LinkEvents`].

use crate::platform::{
    DeviceInfo, DiscoveryFilter, Link, LinkEvents, PlatformError, WirelessPlatform,
};
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::StreamExt;
use std::future::Future;
use std::time::Duration;
use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vitals_core::config::PlatformConfig;

/// Intervalo entre consultas aos periféricos durante o scan.
const SCAN_POLL: Duration = Duration::from_millis(250);

impl From<btleplug::Error> for PlatformError {
    fn from(e: btleplug::Error) -> Self {
        PlatformError::Backend(e.to_string())
    }
}

async fn with_timeout<T>(
    limit: Duration,
    what: &str,
    fut: impl Future<Output = Result<T, btleplug::Error>>,
) -> Result<T, PlatformError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(PlatformError::Backend(format!(
            "{what}: sem resposta em {:.1}s",
            limit.as_secs_f64()
        ))),
    }
}

fn secs(value: f64) -> Duration {
    Duration::from_secs_f64(value.max(0.1))
}

// ──────────────────────────────────────────────
// Plataforma
// ──────────────────────────────────────────────

pub struct BlePlatform {
    runtime: Runtime,
    adapter: Option<Adapter>,
    scan_timeout: Duration,
    gatt_timeout: Duration,
}

impl BlePlatform {
    /// Cria o runtime e pega o primeiro adaptador do sistema. Sem adaptador a
    /// plataforma é criada mesmo assim, com `is_available() == false`.
    pub fn new(config: &PlatformConfig) -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("ble-runtime")
            .enable_all()
            .build()?;

        let adapter = match runtime.block_on(first_adapter()) {
            Ok(Some(adapter)) => {
                info!("Adaptador Bluetooth encontrado");
                Some(adapter)
            }
            Ok(None) => {
                warn!("Nenhum adaptador Bluetooth encontrado");
                None
            }
            Err(e) => {
                warn!("Pilha Bluetooth indisponível: {e}");
                None
            }
        };

        Ok(Self {
            runtime,
            adapter,
            scan_timeout: secs(config.scan_timeout_secs),
            gatt_timeout: secs(config.gatt_timeout_secs),
        })
    }

    fn adapter(&self) -> Result<&Adapter, PlatformError> {
        self.adapter
            .as_ref()
            .ok_or_else(|| PlatformError::Backend("sem adaptador Bluetooth".into()))
    }
}

impl WirelessPlatform for BlePlatform {
    fn is_available(&self) -> bool {
        self.adapter.is_some()
    }

    fn discover(&self, filter: &DiscoveryFilter) -> Result<DeviceInfo, PlatformError> {
        let adapter = self.adapter()?;
        let (peripheral, name) = self
            .runtime
            .block_on(scan(adapter, filter, self.scan_timeout))?;
        info!("Sensor encontrado: {name}");
        Ok(DeviceInfo {
            id: peripheral.id().to_string(),
            name,
        })
    }

    fn open_link(
        &self,
        device: &DeviceInfo,
        events: LinkEvents,
    ) -> Result<Box<dyn Link>, PlatformError> {
        let adapter = self.adapter()?;
        let peripheral = self
            .runtime
            .block_on(connect(adapter, &device.id, self.gatt_timeout))?;

        let watcher = self
            .runtime
            .spawn(watch_disconnect(adapter.clone(), peripheral.id(), events));
        info!("Link BLE aberto com {}", device.name);

        Ok(Box::new(BleLink {
            device: device.clone(),
            runtime: self.runtime.handle().clone(),
            peripheral,
            gatt_timeout: self.gatt_timeout,
            service: None,
            characteristic: None,
            subscribed: false,
            notifications: None,
            watcher: Some(watcher),
        }))
    }
}

async fn first_adapter() -> Result<Option<Adapter>, btleplug::Error> {
    let manager = Manager::new().await?;
    Ok(manager.adapters().await?.into_iter().next())
}

/// Procura, até `limit`, um periférico cujo nome case com o filtro.
async fn scan(
    adapter: &Adapter,
    filter: &DiscoveryFilter,
    limit: Duration,
) -> Result<(Peripheral, String), PlatformError> {
    adapter.start_scan(ScanFilter::default()).await?;
    let deadline = tokio::time::Instant::now() + limit;

    let found = loop {
        match matching_peripheral(adapter, filter).await {
            Ok(Some(hit)) => break Ok(hit),
            Ok(None) if tokio::time::Instant::now() >= deadline => {
                break Err(PlatformError::NoDevice);
            }
            Ok(None) => tokio::time::sleep(SCAN_POLL).await,
            Err(e) => break Err(e),
        }
    };

    if let Err(e) = adapter.stop_scan().await {
        debug!("stop_scan: {e}");
    }
    found
}

async fn matching_peripheral(
    adapter: &Adapter,
    filter: &DiscoveryFilter,
) -> Result<Option<(Peripheral, String)>, PlatformError> {
    for p in adapter.peripherals().await? {
        if let Ok(Some(props)) = p.properties().await {
            if let Some(name) = props.local_name.filter(|n| filter.matches(n)) {
                return Ok(Some((p, name)));
            }
        }
    }
    Ok(None)
}

async fn connect(
    adapter: &Adapter,
    id: &str,
    limit: Duration,
) -> Result<Peripheral, PlatformError> {
    let peripheral = adapter
        .peripherals()
        .await?
        .into_iter()
        .find(|p| p.id().to_string() == id)
        .ok_or(PlatformError::NoDevice)?;
    with_timeout(limit, "connect", peripheral.connect()).await?;
    Ok(peripheral)
}

/// Converte `DeviceDisconnected` do adaptador em perda de link.
async fn watch_disconnect(adapter: Adapter, id: PeripheralId, events: LinkEvents) {
    let mut stream = match adapter.events().await {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Sem eventos do adaptador, perda de link não será detectada: {e}");
            return;
        }
    };
    while let Some(event) = stream.next().await {
        if let CentralEvent::DeviceDisconnected(lost) = event {
            if lost == id {
                info!("Sensor desconectado pelo adaptador");
                events.link_lost();
                break;
            }
        }
    }
}

// ──────────────────────────────────────────────
// Link
// ──────────────────────────────────────────────

struct BleLink {
    device: DeviceInfo,
    runtime: Handle,
    peripheral: Peripheral,
    gatt_timeout: Duration,
    service: Option<Uuid>,
    characteristic: Option<Characteristic>,
    subscribed: bool,
    /// Task que repassa as notificações ao engine
    notifications: Option<JoinHandle<()>>,
    /// Task que observa a desconexão; `None` depois de `close`
    watcher: Option<JoinHandle<()>>,
}

impl Link for BleLink {
    fn device(&self) -> &DeviceInfo {
        &self.device
    }

    fn resolve_service(&mut self, service: Uuid) -> Result<(), PlatformError> {
        self.runtime.block_on(with_timeout(
            self.gatt_timeout,
            "discover_services",
            self.peripheral.discover_services(),
        ))?;
        if !self.peripheral.services().iter().any(|s| s.uuid == service) {
            return Err(PlatformError::NotFound);
        }
        self.service = Some(service);
        Ok(())
    }

    fn resolve_characteristic(&mut self, characteristic: Uuid) -> Result<(), PlatformError> {
        let service = self.service.ok_or(PlatformError::NotFound)?;
        let found = self
            .peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == characteristic && c.service_uuid == service)
            .ok_or(PlatformError::NotFound)?;
        self.characteristic = Some(found);
        Ok(())
    }

    fn subscribe(&mut self, events: LinkEvents) -> Result<(), PlatformError> {
        let characteristic = self
            .characteristic
            .clone()
            .ok_or_else(|| PlatformError::Backend("característica não resolvida".into()))?;

        let peripheral = &self.peripheral;
        let stream = self.runtime.block_on(async {
            let stream = peripheral.notifications().await?;
            with_timeout(self.gatt_timeout, "subscribe", peripheral.subscribe(&characteristic))
                .await?;
            Ok::<_, PlatformError>(stream)
        })?;
        self.subscribed = true;

        let uuid = characteristic.uuid;
        self.notifications = Some(self.runtime.spawn(async move {
            let mut stream = stream;
            while let Some(notification) = stream.next().await {
                if notification.uuid != uuid {
                    continue;
                }
                // Notificação vazia conta como valor ausente
                let value = notification.value;
                let payload = (!value.is_empty()).then_some(value);
                if !events.notify(payload) {
                    break;
                }
            }
            debug!("Fluxo de notificações encerrado");
        }));
        Ok(())
    }

    fn unsubscribe(&mut self) {
        if let Some(task) = self.notifications.take() {
            task.abort();
        }
        if !std::mem::take(&mut self.subscribed) {
            return;
        }
        if let Some(characteristic) = &self.characteristic {
            let result = self.runtime.block_on(with_timeout(
                self.gatt_timeout,
                "unsubscribe",
                self.peripheral.unsubscribe(characteristic),
            ));
            if let Err(e) = result {
                debug!("Falha ao cancelar assinatura: {e}");
            }
        }
    }

    fn close(&mut self) {
        let Some(watcher) = self.watcher.take() else {
            return;
        };
        watcher.abort();
        let result = self.runtime.block_on(with_timeout(
            self.gatt_timeout,
            "disconnect",
            self.peripheral.disconnect(),
        ));
        match result {
            Ok(()) => debug!("Link BLE fechado ({})", self.device.name),
            Err(e) => debug!("Falha ao desconectar {}: {e}", self.device.name),
        }
    }
}

impl Drop for BleLink {
    fn drop(&mut self) {
        if let Some(task) = self.notifications.take() {
            task.abort();
        }
        if let Some(task) = self.watcher.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime() -> Runtime {
        tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap()
    }

    #[test]
    fn slow_operation_times_out_as_backend_error() {
        let rt = runtime();
        let result = rt.block_on(with_timeout(
            Duration::from_millis(20),
            "connect",
            std::future::pending::<Result<(), btleplug::Error>>(),
        ));
        match result {
            Err(PlatformError::Backend(msg)) => assert!(msg.starts_with("connect")),
            other => panic!("resultado inesperado: {other:?}"),
        }
    }

    #[test]
    fn platform_errors_pass_through() {
        let rt = runtime();
        let result = rt.block_on(with_timeout(Duration::from_secs(1), "subscribe", async {
            Err::<(), _>(btleplug::Error::NotConnected)
        }));
        assert!(matches!(result, Err(PlatformError::Backend(_))));
    }

    #[test]
    fn timeouts_have_a_floor() {
        assert_eq!(secs(0.0), Duration::from_millis(100));
        assert_eq!(secs(2.5), Duration::from_millis(2500));
    }
}
