//! Envio das leituras ao endpoint remoto.
//!
//! O [`Dispatcher`] é um pool fixo de threads lendo uma fila limitada.
//! `submit` nunca bloqueia o laço de leitura: com a fila cheia a leitura
//! nova é descartada. Cada envio é tentado uma única vez; falhas são
//! logadas e a leitura se perde.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Sender, TrySendError, bounded};
use serde_json::Value;
use tracing::{debug, error, info, warn};
use weighbridge_core::WeightReading;
use weighbridge_core::config::{AppConfig, StaticHeadersConfig};
use weighbridge_core::payload::{self, DataverseTarget, PayloadFormat};

use crate::auth::{AuthError, CredentialManager};
use crate::poller::ReadingSink;

#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error("Sem token: {0}")]
    Auth(#[from] AuthError),

    #[error("Endpoint recusou a leitura (HTTP {0})")]
    Rejected(u16),

    #[error("Falha de transporte: {0}")]
    Transport(String),
}

/// Como o envio se autentica.
pub enum SubmitScheme {
    /// Token OAuth2 no cabeçalho `Authorization`
    Bearer(Arc<CredentialManager>),
    /// `SiteId`, `ClientId` e `Secret` fixos
    StaticHeaders(StaticHeadersConfig),
}

/// Destino de uma leitura já retirada da fila.
pub trait Delivery: Send + Sync + 'static {
    fn deliver(&self, reading: &WeightReading, device_name: &str);
}

// ──────────────────────────────────────────────
// Submitter (um POST por leitura)
// ──────────────────────────────────────────────

/// Monta o corpo, autentica e faz o POST.
pub struct Submitter {
    agent: ureq::Agent,
    url: String,
    timeout: Duration,
    success_codes: Vec<u16>,
    format: PayloadFormat,
    environment: String,
    table: String,
    /// Nome da balança → GUID no Dataverse
    guids: HashMap<String, String>,
    odata_headers: bool,
    scheme: SubmitScheme,
}

impl Submitter {
    pub fn new(config: &AppConfig, scheme: SubmitScheme) -> Self {
        let post = &config.post;
        Self {
            agent: ureq::AgentBuilder::new().timeout(post.timeout()).build(),
            url: post.url.clone(),
            timeout: post.timeout(),
            success_codes: post.success_codes.clone(),
            format: post.format,
            environment: post.environment.clone(),
            table: post.table.clone(),
            guids: config
                .devices
                .iter()
                .map(|d| (d.name.clone(), d.guid.clone()))
                .collect(),
            odata_headers: post.odata_headers,
            scheme,
        }
    }

    fn body(&self, reading: &WeightReading, device_name: &str) -> Value {
        match self.format {
            PayloadFormat::Simple => payload::simple_payload(reading, device_name),
            PayloadFormat::Dataverse => {
                let target = DataverseTarget {
                    environment: &self.environment,
                    table: &self.table,
                    guid: self.guids.get(device_name).map_or("", String::as_str),
                };
                payload::dataverse_payload(reading, target)
            }
        }
    }

    /// Um POST. Retorna o status HTTP quando está em `success_codes`.
    pub fn send(&self, reading: &WeightReading, device_name: &str) -> Result<u16, SubmissionError> {
        let mut request = self.agent.post(&self.url).timeout(self.timeout);

        match &self.scheme {
            SubmitScheme::Bearer(credentials) => {
                let token = credentials.get_token()?;
                request = request.set("Authorization", &token.header_value());
            }
            SubmitScheme::StaticHeaders(headers) => {
                request = request
                    .set("SiteId", &headers.site_id)
                    .set("ClientId", &headers.client_id)
                    .set("Secret", &headers.secret);
            }
        }

        if self.odata_headers {
            request = request
                .set("OData-MaxVersion", "4.0")
                .set("OData-Version", "4.0")
                .set("If-None-Match", "null");
        }

        let status = match request.send_json(self.body(reading, device_name)) {
            Ok(response) => response.status(),
            Err(ureq::Error::Status(code, _)) => code,
            Err(ureq::Error::Transport(t)) => return Err(SubmissionError::Transport(t.to_string())),
        };

        if self.success_codes.contains(&status) {
            Ok(status)
        } else {
            Err(SubmissionError::Rejected(status))
        }
    }
}

impl Delivery for Submitter {
    fn deliver(&self, reading: &WeightReading, device_name: &str) {
        match self.send(reading, device_name) {
            Ok(status) => info!(
                "{device_name}: {:.1} [{}] entregue (HTTP {status})",
                reading.weight, reading.status
            ),
            Err(SubmissionError::Auth(e)) => {
                error!("{device_name}: envio abandonado, {e}");
            }
            Err(e) => error!(
                "{device_name}: leitura {:.1} [{}] perdida: {e}",
                reading.weight, reading.status
            ),
        }
    }
}

// ──────────────────────────────────────────────
// Dispatcher (fila limitada + pool)
// ──────────────────────────────────────────────

struct Job {
    reading: WeightReading,
    device_name: String,
}

/// Pool de envio com fila de capacidade fixa.
pub struct Dispatcher {
    queue: Sender<Job>,
    workers: Vec<JoinHandle<()>>,
    dropped: AtomicUsize,
}

impl Dispatcher {
    pub fn start(delivery: Arc<dyn Delivery>, workers: usize, capacity: usize) -> Self {
        let (tx, rx) = bounded::<Job>(capacity);

        let count = workers.max(1);
        let workers = (0..count)
            .map(|i| {
                let rx = rx.clone();
                let delivery = Arc::clone(&delivery);
                std::thread::Builder::new()
                    .name(format!("submit-{i}"))
                    .spawn(move || {
                        for job in rx.iter() {
                            delivery.deliver(&job.reading, &job.device_name);
                        }
                        debug!("Worker de envio {i} encerrado");
                    })
                    .expect("Falha ao criar thread de envio")
            })
            .collect();

        info!("Pool de envio: {count} threads, fila de {capacity}");
        Self {
            queue: tx,
            workers,
            dropped: AtomicUsize::new(0),
        }
    }

    /// Leituras descartadas por fila cheia.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Fecha a fila e espera os workers esvaziarem o que restou.
    pub fn shutdown(self) {
        let Self { queue, workers, .. } = self;
        drop(queue);
        for handle in workers {
            if handle.join().is_err() {
                warn!("Worker de envio terminou em pânico");
            }
        }
        info!("Pool de envio encerrado");
    }
}

impl ReadingSink for Dispatcher {
    fn submit(&self, reading: WeightReading, device_name: &str) {
        let job = Job {
            reading,
            device_name: device_name.to_string(),
        };
        match self.queue.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "{}: fila de envio cheia, leitura {:.1} [{}] descartada",
                    job.device_name, job.reading.weight, job.reading.status
                );
            }
            Err(TrySendError::Disconnected(job)) => {
                warn!("{}: pool de envio encerrado, leitura descartada", job.device_name);
            }
        }
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{TokenResponse, TokenSource};
    use crate::test_http;
    use chrono::{TimeZone, Utc};
    use crossbeam_channel::Receiver;
    use parking_lot::Mutex;
    use weighbridge_core::config::{DeviceConfig, SubmitAuth};
    use weighbridge_core::WeighStatus;

    fn reading() -> WeightReading {
        WeightReading {
            weight: 120.0,
            status: WeighStatus::Gross,
            captured_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap(),
        }
    }

    fn config(url: &str) -> AppConfig {
        let mut config = AppConfig::default();
        config.post.url = url.to_string();
        config.post.auth = SubmitAuth::StaticHeaders;
        config.devices.push(DeviceConfig {
            name: "Entrada".into(),
            ip: "10.0.0.20".into(),
            guid: "guid-1".into(),
            ..Default::default()
        });
        config
    }

    fn static_scheme() -> SubmitScheme {
        SubmitScheme::StaticHeaders(StaticHeadersConfig {
            site_id: "site-7".into(),
            client_id: "client".into(),
            secret: "hush".into(),
        })
    }

    struct FixedToken(bool);

    impl TokenSource for FixedToken {
        fn request_token(&self) -> Result<TokenResponse, AuthError> {
            if !self.0 {
                return Err(AuthError::Status(500));
            }
            Ok(TokenResponse {
                token_type: "Bearer".into(),
                expires_in: 3600,
                ext_expires_in: 3600,
                access_token: "tok".into(),
            })
        }
    }

    fn bearer_scheme(works: bool) -> SubmitScheme {
        let source: Box<dyn TokenSource> = Box::new(FixedToken(works));
        SubmitScheme::Bearer(Arc::new(CredentialManager::new(source)))
    }

    #[test]
    fn accepted_202_is_success() {
        let (url, server) = test_http::serve(vec![(202, String::new())]);
        let submitter = Submitter::new(&config(&url), static_scheme());

        assert_eq!(submitter.send(&reading(), "Entrada").unwrap(), 202);

        let request = &server.join().unwrap()[0];
        let body: Value = serde_json::from_str(&request.body).unwrap();
        assert_eq!(body["weighbridge"], "Entrada");
        assert_eq!(body["weight"], 120.0);
        assert_eq!(body["status"], "G");
        assert_eq!(body["time"], "2024-05-01T12:30:00Z");
        assert_eq!(request.header("SiteId"), Some("site-7"));
        assert_eq!(request.header("ClientId"), Some("client"));
        assert_eq!(request.header("Secret"), Some("hush"));
        assert_eq!(request.header("Authorization"), None);
    }

    #[test]
    fn not_found_is_rejected() {
        let (url, server) = test_http::serve(vec![(404, String::new())]);
        let submitter = Submitter::new(&config(&url), static_scheme());

        assert!(matches!(
            submitter.send(&reading(), "Entrada"),
            Err(SubmissionError::Rejected(404))
        ));
        server.join().unwrap();
    }

    #[test]
    fn success_outside_configured_codes_is_rejected() {
        let (url, server) = test_http::serve(vec![(200, String::new())]);
        let submitter = Submitter::new(&config(&url), static_scheme());

        assert!(matches!(
            submitter.send(&reading(), "Entrada"),
            Err(SubmissionError::Rejected(200))
        ));
        server.join().unwrap();
    }

    #[test]
    fn bearer_and_odata_headers() {
        let (url, server) = test_http::serve(vec![(204, String::new())]);
        let mut cfg = config(&url);
        cfg.post.odata_headers = true;
        cfg.post.format = PayloadFormat::Dataverse;
        cfg.post.environment = "cr4a1".into();
        cfg.post.table = "weighbridges".into();
        let submitter = Submitter::new(&cfg, bearer_scheme(true));

        assert_eq!(submitter.send(&reading(), "Entrada").unwrap(), 204);

        let request = &server.join().unwrap()[0];
        assert_eq!(request.header("Authorization"), Some("Bearer tok"));
        assert_eq!(request.header("OData-MaxVersion"), Some("4.0"));
        assert_eq!(request.header("OData-Version"), Some("4.0"));
        assert_eq!(request.header("If-None-Match"), Some("null"));

        let body: Value = serde_json::from_str(&request.body).unwrap();
        assert_eq!(body["cr4a1_Weighbridge@odata.bind"], "cr4a1_weighbridges(guid-1)");
        assert_eq!(body["cr4a1_weighbridgestatus"], 198_320_001);
    }

    #[test]
    fn auth_failure_abandons_before_posting() {
        // Porta sem listener: se chegasse a postar seria erro de transporte
        let (url, server) = test_http::serve(vec![]);
        server.join().unwrap();
        let submitter = Submitter::new(&config(&url), bearer_scheme(false));

        assert!(matches!(
            submitter.send(&reading(), "Entrada"),
            Err(SubmissionError::Auth(AuthError::Unavailable(3)))
        ));
    }

    #[test]
    fn unreachable_endpoint_is_transport_error() {
        let (url, server) = test_http::serve(vec![]);
        server.join().unwrap();
        let submitter = Submitter::new(&config(&url), static_scheme());

        assert!(matches!(
            submitter.send(&reading(), "Entrada"),
            Err(SubmissionError::Transport(_))
        ));
    }

    /// Camada de tracing que guarda o nível dos eventos deste módulo.
    #[derive(Clone, Default)]
    struct LevelLog(Arc<Mutex<Vec<tracing::Level>>>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for LevelLog {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            if event.metadata().target() == "weighbridge_reader::dispatcher" {
                self.0.lock().push(*event.metadata().level());
            }
        }
    }

    #[test]
    fn deliver_logs_success_as_info_and_rejection_as_error() {
        use tracing_subscriber::layer::SubscriberExt;

        let (url, server) = test_http::serve(vec![(202, String::new()), (404, String::new())]);
        let submitter = Submitter::new(&config(&url), static_scheme());
        let log = LevelLog::default();
        let subscriber = tracing_subscriber::registry().with(log.clone());

        tracing::subscriber::with_default(subscriber, || {
            submitter.deliver(&reading(), "Entrada");
            submitter.deliver(&reading(), "Entrada");
        });

        assert_eq!(server.join().unwrap().len(), 2);
        assert_eq!(*log.0.lock(), vec![tracing::Level::INFO, tracing::Level::ERROR]);
    }

    /// Entrega que avisa quando começa e espera liberação.
    struct GatedDelivery {
        started: Sender<()>,
        release: Receiver<()>,
        delivered: Mutex<Vec<f32>>,
    }

    impl Delivery for GatedDelivery {
        fn deliver(&self, reading: &WeightReading, _device_name: &str) {
            let _ = self.started.send(());
            let _ = self.release.recv();
            self.delivered.lock().push(reading.weight);
        }
    }

    #[test]
    fn full_queue_drops_newest() {
        let (started_tx, started_rx) = bounded(8);
        let (release_tx, release_rx) = bounded(8);
        let delivery = Arc::new(GatedDelivery {
            started: started_tx,
            release: release_rx,
            delivered: Mutex::new(Vec::new()),
        });
        let dispatcher = Dispatcher::start(delivery.clone(), 1, 1);

        let at = |w: f32| WeightReading { weight: w, ..reading() };
        dispatcher.submit(at(1.0), "Entrada");
        started_rx.recv().unwrap(); // worker ocupado com a primeira
        dispatcher.submit(at(2.0), "Entrada"); // fica na fila
        dispatcher.submit(at(3.0), "Entrada"); // fila cheia → descartada
        assert_eq!(dispatcher.dropped(), 1);

        for _ in 0..2 {
            release_tx.send(()).unwrap();
        }
        dispatcher.shutdown();
        assert_eq!(*delivery.delivered.lock(), vec![1.0, 2.0]);
    }
}
