//! # Weighbridge Reader
//!
//! Lê indicadores de balança rodoviária via TCP e envia cada leitura nova
//! para um endpoint HTTP autenticado (OAuth2 client-credentials ou
//! cabeçalhos fixos).
//!
//! ## Uso
//! ```bash
//! weighbridge_reader                      # config.toml ao lado do executável
//! weighbridge_reader --config outro.toml  # caminho explícito
//! ```

mod auth;
mod device;
mod dispatcher;
mod poller;
#[cfg(test)]
mod test_http;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use auth::{CredentialManager, HttpTokenSource, TokenSource};
use device::DeviceReader;
use dispatcher::{Dispatcher, SubmitScheme, Submitter};
use poller::{Poller, WeightSource};
use tracing::{error, info, warn};
use weighbridge_core::config::{AppConfig, ConfigError, SubmitAuth};

fn main() -> ExitCode {
    // ── Logging ──
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), ConfigError> {
    // ── Carregar config ──
    let config_path = config_path_from_args(std::env::args().skip(1));
    let config = match AppConfig::load_validated(&config_path) {
        Err(ConfigError::NotFound(path)) => {
            // Grava um modelo para o operador preencher
            if let Err(e) = AppConfig::template().save(&path) {
                warn!("Não foi possível salvar config modelo: {e}");
            }
            return Err(ConfigError::NotFound(path));
        }
        other => other?,
    };

    // ── Balanças ──
    let mut sources: Vec<Box<dyn WeightSource + Send>> = Vec::with_capacity(config.devices.len());
    for device in &config.devices {
        sources.push(Box::new(DeviceReader::new(device, &config.poller)?));
    }

    // ── Envio ──
    let scheme = match config.post.auth {
        SubmitAuth::Bearer => {
            let source: Box<dyn TokenSource> =
                Box::new(HttpTokenSource::new(config.authentication.clone()));
            SubmitScheme::Bearer(Arc::new(CredentialManager::new(source)))
        }
        SubmitAuth::StaticHeaders => SubmitScheme::StaticHeaders(config.static_headers.clone()),
    };
    let submitter = Arc::new(Submitter::new(&config, scheme));
    let dispatcher = Dispatcher::start(
        submitter,
        config.poller.workers,
        config.poller.queue_capacity,
    );

    // ── Parada via Ctrl-C ──
    let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
    let handler_tx = stop_tx.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = handler_tx.try_send(());
    }) {
        warn!("Não foi possível instalar handler de Ctrl-C, parada só encerrando o processo: {e}");
    }

    // ── Banner ──
    println!();
    println!("══════════════════════════════════════════════");
    println!("   ⚖  WEIGHBRIDGE READER – ATIVO");
    println!("══════════════════════════════════════════════");
    for device in &config.devices {
        println!("  Balança:   {} → {}:{}", device.name, device.ip, device.port);
    }
    println!("  Destino:   {}", config.post.url);
    println!("  Formato:   {:?} ({:?})", config.post.format, config.post.auth);
    println!("  Intervalo: {} ms", config.poller.interval_ms);
    println!("══════════════════════════════════════════════");
    println!();

    // ── Loop principal ──
    let mut poller = Poller::new(sources, config.poller.interval());
    poller.run(&dispatcher, &stop_rx);
    drop(stop_tx);

    let dropped = dispatcher.dropped();
    if dropped > 0 {
        warn!("{dropped} leitura(s) descartada(s) por fila de envio cheia");
    }
    dispatcher.shutdown();
    info!("Encerrado");
    Ok(())
}

/// `--config <caminho>`; sem a flag, usa o padrão ao lado do executável.
fn config_path_from_args(mut args: impl Iterator<Item = String>) -> PathBuf {
    while let Some(arg) = args.next() {
        if arg == "--config" {
            if let Some(path) = args.next() {
                return PathBuf::from(path);
            }
        } else if let Some(path) = arg.strip_prefix("--config=") {
            return PathBuf::from(path);
        }
    }
    AppConfig::default_path()
}
