//! # Weighbridge Core
//!
//! Crate compartilhada que define os tipos de leitura, o protocolo binário
//! dos indicadores de pesagem, os payloads de envio e a configuração TOML
//! do leitor de balanças.
//!
//! ## Módulos
//! - [`types`] – Leituras de peso e status
//! - [`protocol`] – Decoders de frame (STX … ETX)
//! - [`payload`] – Corpo JSON enviado ao endpoint remoto
//! - [`config`] – Configuração unificada via TOML

pub mod types;
pub mod protocol;
pub mod payload;
pub mod config;

// Re-exports convenientes
pub use types::{Frame, WeighStatus, WeightReading};
pub use protocol::{DecoderKind, FrameDecoder, M4222Decoder, RECV_BUFFER_SIZE};
pub use config::{AppConfig, ConfigError, DeviceConfig};
