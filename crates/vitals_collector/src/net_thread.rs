//! Thread de rede que escuta UDP e envia leituras para o loop principal.

use crossbeam_channel::{Receiver, Sender, bounded};
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;
use vitals_core::protocol::{MAX_UDP_PAYLOAD, decode_frame};
use vitals_core::Reading;
use tracing::{debug, error, info, warn};

/// Erros seguidos de `recv_from` antes de recriar o socket.
const MAX_CONSECUTIVE_ERRORS: u32 = 5;
const ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Mensagem enviada da thread de rede para o loop principal.
#[derive(Debug, Clone)]
pub struct NetMessage {
    pub reading: Reading,
    pub source_addr: String,
    pub raw_size: usize,
}

/// Inicia a thread de rede. Retorna o receiver do channel.
pub fn spawn_receiver_thread(port: u16) -> std::io::Result<Receiver<NetMessage>> {
    let (tx, rx) = bounded::<NetMessage>(256);

    std::thread::Builder::new()
        .name("udp-collector".into())
        .spawn(move || receiver_loop(&tx, port))?;

    Ok(rx)
}

fn receiver_loop(tx: &Sender<NetMessage>, port: u16) {
    loop {
        match UdpSocket::bind(format!("0.0.0.0:{port}")) {
            Ok(sock) => {
                info!("Coletor escutando em 0.0.0.0:{port}");
                if !serve(|buf| sock.recv_from(buf), tx) {
                    return;
                }
                warn!("Recriando socket UDP na porta {port}");
            }
            Err(e) => {
                error!("Falha ao bind porta {port}: {e}. Tentando novamente em 2s...");
                std::thread::sleep(std::time::Duration::from_secs(2));
            }
        }
    }
}

/// Recebe até o loop principal encerrar (`false`) ou até o socket falhar
/// [`MAX_CONSECUTIVE_ERRORS`] vezes seguidas (`true`, pedindo novo bind).
fn serve(
    mut recv_from: impl FnMut(&mut [u8]) -> std::io::Result<(usize, SocketAddr)>,
    tx: &Sender<NetMessage>,
) -> bool {
    let mut buf = vec![0u8; MAX_UDP_PAYLOAD];
    let mut errors = 0;
    loop {
        match recv_from(&mut buf) {
            Ok((size, addr)) => {
                errors = 0;
                let source = addr.to_string();
                match decode_frame(&buf[..size]) {
                    Ok(reading) => {
                        let msg = NetMessage {
                            reading,
                            source_addr: source,
                            raw_size: size,
                        };
                        if tx.send(msg).is_err() {
                            debug!("Loop principal encerrado");
                            return false;
                        }
                    }
                    Err(e) => {
                        debug!("Pacote inválido de {source}: {e}");
                    }
                }
            }
            Err(e) => {
                errors += 1;
                warn!("Erro ao receber UDP ({errors}/{MAX_CONSECUTIVE_ERRORS}): {e}");
                if errors >= MAX_CONSECUTIVE_ERRORS {
                    return true;
                }
                std::thread::sleep(ERROR_BACKOFF);
            }
        }
    }
}
