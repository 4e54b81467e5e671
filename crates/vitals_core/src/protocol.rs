//! Protocolos binários.
//!
//! ## Payload de notificação do sensor
//!
//! ```text
//! ┌──────────┬───────────┬──────────────────────┐
//! │ Heart(1) │ Oxygen(1) │ Temp×10 (2, LE u16)  │
//! └──────────┴───────────┴──────────────────────┘
//! ```
//!
//! Bytes além do índice 3 são ignorados. Nenhum valor é limitado: faixas
//! fora do fisiológico passam direto e cabem ao classificador.
//!
//! ## Frame enviado ao armazenamento remoto
//!
//! ```text
//! ┌──────────┬─────────┬──────────────┐
//! │ Magic(1) │ Ver.(1) │ Payload (N)  │
//! └──────────┴─────────┴──────────────┘
//! ```
//!
//! - Magic byte `0x56` ('V') identifica pacotes VitalLink
//! - Payload é a [`Reading`] serializada com bincode

use crate::types::Reading;

/// Tamanho mínimo do payload de notificação.
pub const SENSOR_PAYLOAD_LEN: usize = 4;

/// Magic byte dos frames encaminhados ao coletor.
pub const MAGIC_BYTE: u8 = 0x56; // 'V'

/// Versão atual do frame.
pub const PROTOCOL_VERSION: u8 = 1;

/// Tamanho do header (magic + version).
const HEADER_SIZE: usize = 2;

/// Tamanho máximo de pacote UDP seguro (sem fragmentação).
pub const MAX_UDP_PAYLOAD: usize = 65507;

/// Erros ao decodificar uma notificação do sensor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Notificação sem valor")]
    Missing,

    #[error("Payload muito curto ({0} bytes, mínimo {SENSOR_PAYLOAD_LEN})")]
    TooShort(usize),
}

/// Erros do frame de encaminhamento.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("Pacote muito curto ({0} bytes, mínimo {HEADER_SIZE})")]
    TooShort(usize),

    #[error("Magic byte inválido: 0x{0:02X} (esperado 0x{MAGIC_BYTE:02X})")]
    InvalidMagic(u8),

    #[error("Versão incompatível: {0} (suportada: {PROTOCOL_VERSION})")]
    VersionMismatch(u8),

    #[error("Erro de serialização: {0}")]
    Serialize(String),

    #[error("Erro de deserialização: {0}")]
    Deserialize(String),
}

// ──────────────────────────────────────────────
// Notificação do sensor
// ──────────────────────────────────────────────

/// Decodifica o payload bruto de uma notificação em [`Reading`].
///
/// `captured_at_ms` é a leitura do relógio no momento da decodificação; o
/// sensor não envia timestamp.
pub fn decode_reading(data: &[u8], captured_at_ms: u64) -> Result<Reading, DecodeError> {
    if data.len() < SENSOR_PAYLOAD_LEN {
        return Err(DecodeError::TooShort(data.len()));
    }

    let heart = data[0];
    let oxygen = data[1];
    let temp_raw = u16::from_le_bytes([data[2], data[3]]);
    let temperature = round_one_decimal(f32::from(temp_raw) / 10.0);

    Ok(Reading::new(heart, oxygen, temperature, captured_at_ms))
}

/// Variante para notificações que podem chegar sem valor.
pub fn decode_notification(
    data: Option<&[u8]>,
    captured_at_ms: u64,
) -> Result<Reading, DecodeError> {
    match data {
        Some(bytes) => decode_reading(bytes, captured_at_ms),
        None => Err(DecodeError::Missing),
    }
}

/// Codifica uma leitura no layout do sensor. Usado pelo sensor simulado.
pub fn encode_sensor_payload(heart: u8, oxygen: u8, temperature: f32) -> [u8; SENSOR_PAYLOAD_LEN] {
    let raw = (temperature * 10.0).round().clamp(0.0, f32::from(u16::MAX)) as u16;
    let [lo, hi] = raw.to_le_bytes();
    [heart, oxygen, lo, hi]
}

fn round_one_decimal(value: f32) -> f32 {
    (value * 10.0).round() / 10.0
}

// ──────────────────────────────────────────────
// Frame de encaminhamento
// ──────────────────────────────────────────────

/// Codifica uma [`Reading`] para envio ao armazenamento remoto.
///
/// Retorna bytes no formato: `[MAGIC][VERSION][bincode_payload...]`
pub fn encode_frame(reading: &Reading) -> Result<Vec<u8>, FrameError> {
    let body = bincode::serialize(reading).map_err(|e| FrameError::Serialize(e.to_string()))?;

    let mut frame = Vec::with_capacity(HEADER_SIZE + body.len());
    frame.push(MAGIC_BYTE);
    frame.push(PROTOCOL_VERSION);
    frame.extend_from_slice(&body);

    Ok(frame)
}

/// Decodifica um frame recebido via UDP.
///
/// Valida magic byte e versão antes de deserializar.
pub fn decode_frame(data: &[u8]) -> Result<Reading, FrameError> {
    if data.len() < HEADER_SIZE {
        return Err(FrameError::TooShort(data.len()));
    }

    let magic = data[0];
    if magic != MAGIC_BYTE {
        return Err(FrameError::InvalidMagic(magic));
    }

    let version = data[1];
    if version != PROTOCOL_VERSION {
        return Err(FrameError::VersionMismatch(version));
    }

    bincode::deserialize(&data[HEADER_SIZE..]).map_err(|e| FrameError::Deserialize(e.to_string()))
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_reference_payload() {
        let r = decode_reading(&[72, 98, 0x68, 0x01], 1_000).unwrap();
        assert_eq!(r.heart(), 72);
        assert_eq!(r.oxygen(), 98);
        assert_eq!(r.temperature(), 36.0);
        assert_eq!(r.timestamp_ms(), 1_000);
    }

    #[test]
    fn temperature_is_little_endian_tenths() {
        for (lo, hi) in [(0x00, 0x00), (0x6F, 0x01), (0xFF, 0xFF), (0x01, 0x00), (0x7A, 0x01)] {
            let r = decode_reading(&[0, 0, lo, hi], 0).unwrap();
            let raw = u16::from(hi) * 256 + u16::from(lo);
            let expected = (f32::from(raw) / 10.0 * 10.0).round() / 10.0;
            assert_eq!(r.temperature(), expected, "raw={raw}");
        }
        assert_eq!(decode_reading(&[0, 0, 0x6F, 0x01], 0).unwrap().temperature(), 36.7);
    }

    #[test]
    fn rejects_short_payloads() {
        for len in 0..SENSOR_PAYLOAD_LEN {
            let data = vec![1u8; len];
            assert_eq!(decode_reading(&data, 0), Err(DecodeError::TooShort(len)));
        }
    }

    #[test]
    fn rejects_missing_value() {
        assert_eq!(decode_notification(None, 0), Err(DecodeError::Missing));
    }

    #[test]
    fn ignores_trailing_bytes() {
        let r = decode_reading(&[60, 95, 0x6E, 0x01, 0xAA, 0xBB, 0xCC], 0).unwrap();
        assert_eq!(r.heart(), 60);
        assert_eq!(r.oxygen(), 95);
        assert_eq!(r.temperature(), 36.6);
    }

    #[test]
    fn does_not_clamp_values() {
        let r = decode_reading(&[255, 255, 0x00, 0x00], 0).unwrap();
        assert_eq!(r.heart(), 255);
        assert_eq!(r.oxygen(), 255);
        assert_eq!(r.temperature(), 0.0);
    }

    #[test]
    fn sensor_payload_matches_wire_layout() {
        assert_eq!(encode_sensor_payload(72, 98, 36.0), [72, 98, 0x68, 0x01]);
    }

    #[test]
    fn frame_header_is_correct() {
        let encoded = encode_frame(&Reading::default()).unwrap();
        assert_eq!(encoded[0], MAGIC_BYTE);
        assert_eq!(encoded[1], PROTOCOL_VERSION);
    }

    #[test]
    fn frame_carries_reading() {
        let original = Reading::new(88, 97, 37.1, 1_700_000_000_000);
        let decoded = decode_frame(&encode_frame(&original).unwrap()).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn frame_rejects_invalid_magic() {
        let mut encoded = encode_frame(&Reading::default()).unwrap();
        encoded[0] = 0xFF;
        assert!(matches!(decode_frame(&encoded), Err(FrameError::InvalidMagic(0xFF))));
    }

    #[test]
    fn frame_rejects_wrong_version() {
        let mut encoded = encode_frame(&Reading::default()).unwrap();
        encoded[1] = 99;
        assert!(matches!(decode_frame(&encoded), Err(FrameError::VersionMismatch(99))));
    }

    #[test]
    fn frame_rejects_short_packet() {
        assert!(matches!(decode_frame(&[MAGIC_BYTE]), Err(FrameError::TooShort(1))));
    }
}
