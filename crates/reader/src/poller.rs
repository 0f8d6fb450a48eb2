//! Laço principal: lê cada balança em ordem, uma vez por ciclo, e entrega
//! as leituras novas para envio sem esperar o resultado.

use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, info, warn};
use weighbridge_core::WeightReading;

use crate::device::{ConnectionError, DeviceReader};

/// Algo que produz leituras de uma balança.
pub trait WeightSource {
    fn device_name(&self) -> &str;
    fn read_once(&mut self) -> Result<Option<WeightReading>, ConnectionError>;
}

impl WeightSource for DeviceReader {
    fn device_name(&self) -> &str {
        self.name()
    }

    fn read_once(&mut self) -> Result<Option<WeightReading>, ConnectionError> {
        DeviceReader::read_once(self)
    }
}

/// Destino das leituras novas. `submit` não pode bloquear.
pub trait ReadingSink {
    fn submit(&self, reading: WeightReading, device_name: &str);
}

/// Resumo de um ciclo.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub submitted: usize,
    pub unchanged: usize,
    pub failed: usize,
}

pub struct Poller {
    sources: Vec<Box<dyn WeightSource + Send>>,
    interval: Duration,
}

impl Poller {
    /// `sources` na ordem da configuração; a ordem não muda depois.
    pub fn new(sources: Vec<Box<dyn WeightSource + Send>>, interval: Duration) -> Self {
        Self { sources, interval }
    }

    /// Lê todas as balanças uma vez.
    pub fn tick(&mut self, sink: &dyn ReadingSink) -> TickSummary {
        let mut summary = TickSummary::default();

        for source in self.sources.iter_mut() {
            match source.read_once() {
                Ok(Some(reading)) => {
                    debug!(
                        "{}: nova leitura {:.1} [{}]",
                        source.device_name(),
                        reading.weight,
                        reading.status
                    );
                    sink.submit(reading, source.device_name());
                    summary.submitted += 1;
                }
                Ok(None) => summary.unchanged += 1,
                Err(e) => {
                    warn!("{}: {e}", source.device_name());
                    summary.failed += 1;
                }
            }
        }

        summary
    }

    /// Roda até `stop` receber um sinal. Sem nenhum emissor vivo o laço
    /// segue até o processo ser encerrado. Retorna o número de ciclos executados.
    pub fn run(&mut self, sink: &dyn ReadingSink, stop: &Receiver<()>) -> u64 {
        info!(
            "Laço de leitura iniciado: {} balança(s), ciclo de {} ms",
            self.sources.len(),
            self.interval.as_millis()
        );

        let mut ticks = 0u64;
        loop {
            if stop.try_recv().is_ok() {
                break;
            }

            let cycle_start = Instant::now();
            let summary = self.tick(sink);
            ticks += 1;
            debug!(
                "Ciclo {ticks}: {} nova(s), {} sem mudança, {} falha(s)",
                summary.submitted, summary.unchanged, summary.failed
            );

            // Dormir pelo tempo restante do intervalo, acordando na parada
            let remaining = self.interval.saturating_sub(cycle_start.elapsed());
            match stop.recv_timeout(remaining) {
                Ok(()) => break,
                Err(RecvTimeoutError::Timeout) => {}
                // Canal fechado retorna na hora; ainda é preciso esperar o ciclo
                Err(RecvTimeoutError::Disconnected) => std::thread::sleep(remaining),
            }
        }

        info!("Laço de leitura encerrado após {ticks} ciclo(s)");
        ticks
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
