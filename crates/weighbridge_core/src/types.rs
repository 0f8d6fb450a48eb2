//! Tipos de leitura da balança rodoviária.
//!
//! Um [`Frame`] é o que sai do decoder (peso + status, sem horário);
//! uma [`WeightReading`] é o frame aceito pelo leitor, já carimbado com o
//! instante da captura.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ──────────────────────────────────────────────
// Status
// ──────────────────────────────────────────────

/// Status reportado pelo indicador no byte 9 do frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WeighStatus {
    /// `G` – modo bruto
    Gross,
    /// `N` – modo líquido
    Net,
    /// `U` – abaixo da faixa
    Under,
    /// `O` – acima da faixa
    Over,
    /// `M` – balança em movimento
    Motion,
    /// `E` – erro no indicador
    Error,
    /// Espaço (`0x20`) – não especificado
    Blank,
    /// Qualquer outro byte, preservado como veio
    Other(char),
}

impl WeighStatus {
    /// Converte o byte de status do frame.
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            b'G' => Self::Gross,
            b'N' => Self::Net,
            b'U' => Self::Under,
            b'O' => Self::Over,
            b'M' => Self::Motion,
            b'E' => Self::Error,
            b' ' => Self::Blank,
            other => Self::Other(other as char),
        }
    }

    /// Código de um caractere, como enviado pelo indicador.
    pub fn code(&self) -> char {
        match self {
            Self::Gross => 'G',
            Self::Net => 'N',
            Self::Under => 'U',
            Self::Over => 'O',
            Self::Motion => 'M',
            Self::Error => 'E',
            Self::Blank => ' ',
            Self::Other(c) => *c,
        }
    }
}

impl fmt::Display for WeighStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ──────────────────────────────────────────────
// Frame / Leitura
// ──────────────────────────────────────────────

/// Conteúdo útil de um frame válido.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Frame {
    /// Peso (unidade configurada no indicador)
    pub weight: f32,
    pub status: WeighStatus,
}

/// Leitura aceita por um leitor e entregue ao dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightReading {
    pub weight: f32,
    pub status: WeighStatus,
    pub captured_at: DateTime<Utc>,
}

impl WeightReading {
    /// Carimba um frame com o instante da captura.
    pub fn from_frame(frame: Frame, captured_at: DateTime<Utc>) -> Self {
        Self {
            weight: frame.weight,
            status: frame.status,
            captured_at,
        }
    }

    /// Par `(peso, status)` usado na detecção de mudança.
    pub fn key(&self) -> (f32, WeighStatus) {
        (self.weight, self.status)
    }
}
