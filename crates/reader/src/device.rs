//! Leitor de uma balança via TCP.
//!
//! Cada leitura abre uma conexão nova, faz um único `recv` e fecha o socket
//! ao sair (inclusive em erro). O indicador costuma derrubar o link entre
//! frames, então não há conexão persistente.

use std::io::{self, Read};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info};
use weighbridge_core::config::{ConfigError, DeviceConfig, PollerConfig};
use weighbridge_core::protocol::{FRAME_LEN, FrameDecoder, RECV_BUFFER_SIZE};
use weighbridge_core::{Frame, WeighStatus, WeightReading};

/// Falha de comunicação com o indicador. O estado do leitor não muda.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Falha ao conectar em {addr}: {source}")]
    Connect { addr: SocketAddr, source: io::Error },

    #[error("Falha ao ler de {addr}: {source}")]
    Receive { addr: SocketAddr, source: io::Error },
}

/// Leitor de uma balança, com detecção de mudança.
pub struct DeviceReader {
    name: String,
    addr: SocketAddr,
    decoder: Box<dyn FrameDecoder>,
    connect_timeout: Duration,
    read_timeout: Duration,
    /// Último `(peso, status)` aceito; `None` = nunca leu
    last: Option<(f32, WeighStatus)>,
}

impl DeviceReader {
    pub fn new(device: &DeviceConfig, poller: &PollerConfig) -> Result<Self, ConfigError> {
        let addr = device.socket_addr()?;
        let decoder = device.decoder.build();
        info!(
            "Balança '{}' → {addr} (indicador {})",
            device.name,
            decoder.model()
        );
        Ok(Self {
            name: device.name.clone(),
            addr,
            decoder,
            connect_timeout: poller.connect_timeout(),
            read_timeout: poller.read_timeout(),
            last: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Último par aceito, se houver.
    #[cfg(test)]
    pub fn last_accepted(&self) -> Option<(f32, WeighStatus)> {
        self.last
    }

    /// Uma ida e volta TCP: conecta, lê, fecha e decodifica.
    ///
    /// Retorna `Ok(None)` quando não há frame válido ou quando o frame é
    /// igual ao último aceito.
    pub fn read_once(&mut self) -> Result<Option<WeightReading>, ConnectionError> {
        let bytes = self.receive()?;

        if bytes.len() < FRAME_LEN {
            debug!("{}: leitura curta ({} bytes), ignorada", self.name, bytes.len());
            return Ok(None);
        }

        match self.decoder.decode(&bytes) {
            Some(frame) => Ok(self.accept(frame)),
            None => {
                debug!("{}: nenhum frame válido em {} bytes", self.name, bytes.len());
                Ok(None)
            }
        }
    }

    /// Conecta, faz exatamente um `recv` e devolve os bytes lidos.
    /// O socket é fechado no drop, em qualquer caminho de saída.
    fn receive(&self) -> Result<Vec<u8>, ConnectionError> {
        let addr = self.addr;
        let mut stream = TcpStream::connect_timeout(&addr, self.connect_timeout)
            .map_err(|source| ConnectionError::Connect { addr, source })?;
        stream
            .set_read_timeout(Some(self.read_timeout))
            .map_err(|source| ConnectionError::Receive { addr, source })?;

        let mut buf = [0u8; RECV_BUFFER_SIZE];
        let n = stream
            .read(&mut buf)
            .map_err(|source| ConnectionError::Receive { addr, source })?;
        Ok(buf[..n].to_vec())
    }

    /// Aceita o frame se `(peso, status)` mudou desde a última leitura.
    fn accept(&mut self, frame: Frame) -> Option<WeightReading> {
        let key = (frame.weight, frame.status);
        if self.last == Some(key) {
            return None;
        }
        self.last = Some(key);
        Some(WeightReading::from_frame(frame, Utc::now()))
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
