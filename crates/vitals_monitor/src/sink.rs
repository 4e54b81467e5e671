//! Encaminhamento das leituras ao armazenamento remoto.
//!
//! Fire-and-forget: o engine entrega cada leitura ao [`SinkWorker`] com
//! `try_send`. Se a fila estiver cheia a leitura é descartada, e falhas do
//! sink ficam apenas no log. Nada disso volta para o estado da sessão.

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use std::net::UdpSocket;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};
use vitals_core::config::SinkConfig;
use vitals_core::protocol::{FrameError, encode_frame};
use vitals_core::Reading;

/// Erros ao encaminhar uma leitura.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Erro de I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("Erro de frame: {0}")]
    Frame(#[from] FrameError),

    #[error("Sink indisponível")]
    Closed,
}

/// Consumidor remoto de leituras.
pub trait ReadingSink: Send {
    fn forward(&mut self, reading: &Reading) -> Result<(), SinkError>;
}

// ──────────────────────────────────────────────
// UDP
// ──────────────────────────────────────────────

/// Envia cada leitura como frame `[MAGIC][VERSION][bincode]` via UDP.
pub struct UdpSink {
    sock: UdpSocket,
    dest_addr: String,
}

impl UdpSink {
    pub fn new(dest_ip: &str, port: u16) -> Result<Self, SinkError> {
        let sock = UdpSocket::bind("0.0.0.0:0")?;
        let dest_addr = format!("{dest_ip}:{port}");
        info!("Sink UDP → {dest_addr}");
        Ok(Self { sock, dest_addr })
    }
}

impl ReadingSink for UdpSink {
    fn forward(&mut self, reading: &Reading) -> Result<(), SinkError> {
        let frame = encode_frame(reading)?;
        let sent = self.sock.send_to(&frame, &self.dest_addr)?;
        debug!("→ {sent} bytes para {}", self.dest_addr);
        Ok(())
    }
}

// ──────────────────────────────────────────────
// Channel (embutido em outro processo / testes)
// ──────────────────────────────────────────────

/// Repassa as leituras para um channel local.
pub struct ChannelSink {
    tx: Sender<Reading>,
}

impl ChannelSink {
    pub fn new(tx: Sender<Reading>) -> Self {
        Self { tx }
    }
}

impl ReadingSink for ChannelSink {
    fn forward(&mut self, reading: &Reading) -> Result<(), SinkError> {
        self.tx.send(*reading).map_err(|_| SinkError::Closed)
    }
}

// ──────────────────────────────────────────────
// Worker
// ──────────────────────────────────────────────

/// Thread dedicada que drena a fila e chama o sink.
pub struct SinkWorker {
    tx: Option<Sender<Reading>>,
    thread: Option<JoinHandle<()>>,
}

impl SinkWorker {
    pub fn spawn(sink: Box<dyn ReadingSink>, queue_depth: usize) -> std::io::Result<Self> {
        let (tx, rx) = bounded::<Reading>(queue_depth.max(1));

        let thread = std::thread::Builder::new()
            .name("vitals-sink".into())
            .spawn(move || sink_loop(sink, &rx))?;

        Ok(Self {
            tx: Some(tx),
            thread: Some(thread),
        })
    }

    /// Cria o worker a partir da configuração. `None` se desabilitado ou se o
    /// socket não puder ser criado.
    pub fn from_config(config: &SinkConfig) -> Option<Self> {
        if !config.enabled {
            info!("Sink remoto desabilitado");
            return None;
        }

        let sink = match UdpSink::new(&config.dest_ip, config.port) {
            Ok(sink) => sink,
            Err(e) => {
                warn!("Sink remoto indisponível: {e}");
                return None;
            }
        };

        match Self::spawn(Box::new(sink), config.queue_depth) {
            Ok(worker) => Some(worker),
            Err(e) => {
                warn!("Falha ao criar thread do sink: {e}");
                None
            }
        }
    }

    /// Enfileira uma leitura sem bloquear. No máximo uma entrega por chamada.
    pub fn submit(&self, reading: Reading) {
        let Some(tx) = &self.tx else { return };
        match tx.try_send(reading) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => debug!("Fila do sink cheia, descartando leitura"),
            Err(TrySendError::Disconnected(_)) => debug!("Thread do sink encerrada"),
        }
    }
}

impl Drop for SinkWorker {
    fn drop(&mut self) {
        // Fechar o channel encerra o loop
        self.tx.take();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn sink_loop(mut sink: Box<dyn ReadingSink>, rx: &Receiver<Reading>) {
    for reading in rx.iter() {
        if let Err(e) = sink.forward(&reading) {
            warn!("Falha ao encaminhar leitura: {e}");
        }
    }
    debug!("Sink encerrado");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;
    use std::time::Duration;
    use vitals_core::protocol::decode_frame;

    struct FailingSink;

    impl ReadingSink for FailingSink {
        fn forward(&mut self, _reading: &Reading) -> Result<(), SinkError> {
            Err(SinkError::Closed)
        }
    }

    #[test]
    fn worker_forwards_in_order() {
        let (tx, rx) = unbounded();
        let worker = SinkWorker::spawn(Box::new(ChannelSink::new(tx)), 8).unwrap();
        for n in 0..3 {
            worker.submit(Reading::new(70, 98, 36.5, n));
        }
        for n in 0..3 {
            let r = rx.recv_timeout(Duration::from_secs(2)).unwrap();
            assert_eq!(r.timestamp_ms(), n);
        }
    }

    #[test]
    fn failing_sink_is_swallowed() {
        let worker = SinkWorker::spawn(Box::new(FailingSink), 1).unwrap();
        for n in 0..10 {
            worker.submit(Reading::new(70, 98, 36.5, n));
        }
        drop(worker);
    }

    #[test]
    fn disabled_config_has_no_worker() {
        let config = SinkConfig {
            enabled: false,
            ..SinkConfig::default()
        };
        assert!(SinkWorker::from_config(&config).is_none());
    }

    #[test]
    fn udp_sink_sends_frames() {
        let listener = UdpSocket::bind("127.0.0.1:0").unwrap();
        listener
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut sink = UdpSink::new("127.0.0.1", port).unwrap();
        let reading = Reading::new(81, 96, 36.9, 42);
        sink.forward(&reading).unwrap();

        let mut buf = [0u8; 256];
        let (size, _) = listener.recv_from(&mut buf).unwrap();
        assert_eq!(decode_frame(&buf[..size]).unwrap(), reading);
    }
}
