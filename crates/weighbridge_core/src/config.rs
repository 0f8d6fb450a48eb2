//! Configuração unificada via TOML.
//!
//! Um único `config.toml` ao lado do executável descreve as balanças,
//! o endpoint de envio e as credenciais. Qualquer campo obrigatório
//! ausente impede a inicialização.

use crate::payload::PayloadFormat;
use crate::protocol::DecoderKind;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Erros fatais de configuração.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Arquivo de configuração não encontrado: {} (modelo criado, preencha e reinicie)", .0.display())]
    NotFound(PathBuf),

    #[error("Erro ao ler {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Erro ao parsear {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Configuração inválida:\n  - {}", .0.join("\n  - "))]
    Invalid(Vec<String>),

    #[error("Erro ao salvar configuração: {0}")]
    Save(String),
}

/// Laço de leitura e pool de envio.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Intervalo entre ciclos de leitura (ms)
    pub interval_ms: u64,
    /// Threads de envio
    pub workers: usize,
    /// Leituras aguardando envio antes de começar a descartar
    pub queue_capacity: usize,
    /// Timeout de conexão TCP com o indicador (ms)
    pub connect_timeout_ms: u64,
    /// Timeout do `recv` no indicador (ms)
    pub read_timeout_ms: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            workers: 4,
            queue_capacity: 64,
            connect_timeout_ms: 3000,
            read_timeout_ms: 3000,
        }
    }
}

impl PollerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

/// Uma balança (indicador acessível via TCP).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Nome enviado junto com cada leitura
    pub name: String,
    pub ip: String,
    pub port: u16,
    /// Modelo do indicador
    pub decoder: DecoderKind,
    /// GUID da balança no Dataverse (só no formato `dataverse`)
    pub guid: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            ip: String::new(),
            port: 4001,
            decoder: DecoderKind::default(),
            guid: String::new(),
        }
    }
}

impl DeviceConfig {
    /// Endereço do indicador. Só falha se a config não foi validada.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self.ip.parse().map_err(|_| {
            ConfigError::Invalid(vec![format!("IP inválido em '{}': {:?}", self.name, self.ip)])
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Esquema de autenticação do envio.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitAuth {
    /// `Authorization: <type> <token>` via OAuth2 client-credentials
    #[default]
    Bearer,
    /// Cabeçalhos fixos `SiteId`, `ClientId`, `Secret`
    StaticHeaders,
}

/// Endpoint que recebe as leituras.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostConfig {
    pub url: String,
    pub timeout_secs: u64,
    /// Status HTTP considerados sucesso
    pub success_codes: Vec<u16>,
    pub format: PayloadFormat,
    /// Prefixo do ambiente Dataverse
    pub environment: String,
    /// Tabela de balanças no Dataverse
    pub table: String,
    /// Envia `OData-MaxVersion`, `OData-Version` e `If-None-Match`
    pub odata_headers: bool,
    pub auth: SubmitAuth,
}

impl Default for PostConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout_secs: 5,
            success_codes: vec![202, 204],
            format: PayloadFormat::default(),
            environment: String::new(),
            table: String::new(),
            odata_headers: false,
            auth: SubmitAuth::default(),
        }
    }
}

impl PostConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Client-credentials para o servidor de autenticação.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub url: String,
    pub client_id: String,
    pub client_secret: String,
    pub scope: String,
}

/// Segredos fixos para o esquema `static_headers`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticHeadersConfig {
    pub site_id: String,
    pub client_id: String,
    pub secret: String,
}

/// Configuração raiz do aplicativo.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub poller: PollerConfig,
    pub devices: Vec<DeviceConfig>,
    pub post: PostConfig,
    pub authentication: AuthConfig,
    pub static_headers: StaticHeadersConfig,
}

impl AppConfig {
    /// Carrega configuração de um arquivo TOML (sem validar).
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str::<AppConfig>(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!("Configuração carregada de {}", path.display());
        Ok(config)
    }

    /// Carrega e valida; qualquer problema vira [`ConfigError::Invalid`].
    pub fn load_validated(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        let errors = config.validate();
        if !errors.is_empty() {
            return Err(ConfigError::Invalid(errors));
        }
        Ok(config)
    }

    /// Salva configuração em arquivo TOML.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Save(e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::Save(e.to_string()))?;
        info!("Configuração salva em {}", path.display());
        Ok(())
    }

    /// Retorna o caminho padrão do config.toml.
    pub fn default_path() -> PathBuf {
        let exe_dir = std::env::current_exe()
            .map(|p| p.parent().unwrap_or(Path::new(".")).to_path_buf())
            .unwrap_or_else(|_| PathBuf::from("."));
        exe_dir.join("config.toml")
    }

    /// Modelo gravado quando não há `config.toml`.
    pub fn template() -> Self {
        Self {
            devices: vec![DeviceConfig {
                name: "Weighbridge 1".into(),
                ip: "192.168.1.50".into(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    /// Valida a configuração e retorna lista de erros.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        // ── Laço ──
        let poller = &self.poller;
        if poller.interval_ms < 100 || poller.interval_ms > 60_000 {
            errors.push(format!(
                "Intervalo de leitura inválido: {} ms (100–60000)",
                poller.interval_ms
            ));
        }
        if poller.workers == 0 {
            errors.push("poller.workers deve ser ao menos 1".into());
        }
        if poller.queue_capacity == 0 {
            errors.push("poller.queue_capacity deve ser ao menos 1".into());
        }

        // ── Balanças ──
        if self.devices.is_empty() {
            errors.push("Nenhuma balança configurada ([[devices]])".into());
        }
        let mut names = HashSet::new();
        for (i, dev) in self.devices.iter().enumerate() {
            if dev.name.trim().is_empty() {
                errors.push(format!("devices[{i}]: nome vazio"));
            } else if !names.insert(dev.name.as_str()) {
                errors.push(format!("devices[{i}]: nome duplicado '{}'", dev.name));
            }
            if dev.ip.parse::<IpAddr>().is_err() {
                errors.push(format!("devices[{i}]: IP inválido {:?}", dev.ip));
            }
            if dev.port == 0 {
                errors.push(format!("devices[{i}]: porta não pode ser 0"));
            }
            if self.post.format == PayloadFormat::Dataverse && dev.guid.trim().is_empty() {
                errors.push(format!("devices[{i}]: guid obrigatório no formato dataverse"));
            }
        }

        // ── Envio ──
        let post = &self.post;
        if post.url.trim().is_empty() {
            errors.push("post.url vazio".into());
        }
        if post.timeout_secs == 0 || post.timeout_secs > 120 {
            errors.push(format!(
                "post.timeout_secs inválido: {} (1–120)",
                post.timeout_secs
            ));
        }
        if post.success_codes.is_empty() {
            errors.push("post.success_codes vazio".into());
        }
        if post.format == PayloadFormat::Dataverse {
            if post.environment.trim().is_empty() {
                errors.push("post.environment obrigatório no formato dataverse".into());
            }
            if post.table.trim().is_empty() {
                errors.push("post.table obrigatório no formato dataverse".into());
            }
        }

        // ── Credenciais do esquema ativo ──
        match post.auth {
            SubmitAuth::Bearer => {
                let auth = &self.authentication;
                for (field, value) in [
                    ("url", &auth.url),
                    ("client_id", &auth.client_id),
                    ("client_secret", &auth.client_secret),
                    ("scope", &auth.scope),
                ] {
                    if value.trim().is_empty() {
                        errors.push(format!("authentication.{field} vazio"));
                    }
                }
            }
            SubmitAuth::StaticHeaders => {
                let hdr = &self.static_headers;
                for (field, value) in [
                    ("site_id", &hdr.site_id),
                    ("client_id", &hdr.client_id),
                    ("secret", &hdr.secret),
                ] {
                    if value.trim().is_empty() {
                        errors.push(format!("static_headers.{field} vazio"));
                    }
                }
            }
        }

        errors
    }
}
