//! Protocolo binário dos indicadores de pesagem.
//!
//! Formato do frame M4222 (11 bytes):
//!
//! ```text
//! ┌────────┬──────────┬──────────────────┬───────────┬────────┐
//! │ STX(1) │ Sinal(1) │ Peso ASCII (7)   │ Status(1) │ ETX(1) │
//! └────────┴──────────┴──────────────────┴───────────┴────────┘
//! ```
//!
//! - `STX` = `0x02`, `ETX` = `0x03`
//! - Sinal: semáforo ligado à balança (`0x20` nenhum, `0x30` vermelho,
//!   `0x60` verde…), ignorado
//! - Peso: texto com espaços à esquerda e sinal opcional
//! - Status: `G N U O M E` ou espaço
//!
//! Um único `recv` pode trazer vários frames concatenados e lixo entre eles;
//! vale o último frame válido do buffer.

use crate::types::{Frame, WeighStatus};
use serde::{Deserialize, Serialize};

/// Início do frame (STX).
pub const START_MARKER: u8 = 0x02;

/// Fim do frame (ETX).
pub const END_MARKER: u8 = 0x03;

/// Tamanho fixo de um frame M4222.
pub const FRAME_LEN: usize = 11;

/// Tamanho do buffer de recepção de cada leitura.
pub const RECV_BUFFER_SIZE: usize = 256;

const WEIGHT_OFFSET: usize = 2;
const WEIGHT_LEN: usize = 7;
const STATUS_OFFSET: usize = 9;

/// Erros de um frame candidato. Nunca sobem além do decoder.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum DecodeError {
    #[error("Frame muito curto ({0} bytes, mínimo {FRAME_LEN})")]
    TooShort(usize),

    #[error("Marcadores inválidos: início 0x{0:02X}, fim 0x{1:02X}")]
    BadMarkers(u8, u8),

    #[error("Campo de peso não é texto: {0:02X?}")]
    NotText(Vec<u8>),

    #[error("Peso inválido: {0:?}")]
    BadWeight(String),
}

/// Decodifica o buffer bruto de um indicador.
///
/// Implementações são puras: sem I/O, sem relógio, sem estado.
pub trait FrameDecoder: Send + Sync {
    /// Nome do modelo de indicador, usado nos logs.
    fn model(&self) -> &'static str;

    /// Retorna o último frame válido do buffer, se houver.
    fn decode(&self, buffer: &[u8]) -> Option<Frame>;
}

/// Modelos de indicador suportados, selecionados por dispositivo no TOML.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecoderKind {
    #[default]
    M4222,
}

impl DecoderKind {
    /// Cria o decoder correspondente.
    pub fn build(self) -> Box<dyn FrameDecoder> {
        match self {
            DecoderKind::M4222 => Box::new(M4222Decoder),
        }
    }
}

/// Decoder do indicador M4222.
#[derive(Debug, Clone, Copy, Default)]
pub struct M4222Decoder;

impl FrameDecoder for M4222Decoder {
    fn model(&self) -> &'static str {
        "M4222"
    }

    fn decode(&self, buffer: &[u8]) -> Option<Frame> {
        if buffer.len() < FRAME_LEN {
            return None;
        }

        let mut last = None;
        let mut i = 0;
        while i + FRAME_LEN <= buffer.len() {
            match parse_frame(&buffer[i..i + FRAME_LEN]) {
                Ok(frame) => {
                    last = Some(frame);
                    i += FRAME_LEN;
                }
                // Candidato descartado: segue varrendo a partir do próximo byte
                Err(_) => i += 1,
            }
        }
        last
    }
}

/// Valida e decodifica exatamente um frame de [`FRAME_LEN`] bytes.
pub fn parse_frame(bytes: &[u8]) -> Result<Frame, DecodeError> {
    if bytes.len() < FRAME_LEN {
        return Err(DecodeError::TooShort(bytes.len()));
    }

    let (start, end) = (bytes[0], bytes[FRAME_LEN - 1]);
    if start != START_MARKER || end != END_MARKER {
        return Err(DecodeError::BadMarkers(start, end));
    }

    let field = &bytes[WEIGHT_OFFSET..WEIGHT_OFFSET + WEIGHT_LEN];
    let text = std::str::from_utf8(field).map_err(|_| DecodeError::NotText(field.to_vec()))?;
    let weight: f32 = text
        .trim()
        .parse()
        .map_err(|_| DecodeError::BadWeight(text.to_string()))?;
    if !weight.is_finite() {
        return Err(DecodeError::BadWeight(text.to_string()));
    }

    Ok(Frame {
        weight,
        status: WeighStatus::from_byte(bytes[STATUS_OFFSET]),
    })
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
