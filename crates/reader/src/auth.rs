//! Token OAuth2 (client-credentials) com cache e renovação.
//!
//! Leituras concorrentes do cache passam por um `RwLock`; a renovação é
//! serializada por um `Mutex` à parte (single-flight). Quem chega enquanto
//! outra thread renova espera o gate e reaproveita o token novo.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use tracing::{debug, error, info, warn};
use weighbridge_core::config::AuthConfig;

/// Tentativas de renovação antes de desistir.
pub const MAX_REFRESH_ATTEMPTS: usize = 3;

/// Margem (s) antes da expiração real em que o token já é tratado como vencido.
pub const EXPIRY_MARGIN_SECS: i64 = 5 * 60;

/// Timeout de cada requisição ao servidor de autenticação.
const AUTH_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Servidor de autenticação indisponível após {0} tentativas")]
    Unavailable(usize),

    #[error("Erro HTTP {0} do servidor de autenticação")]
    Status(u16),

    #[error("Falha de transporte na autenticação: {0}")]
    Transport(String),

    #[error("Resposta de token inválida: {0}")]
    BadResponse(String),
}

/// Corpo JSON devolvido pelo endpoint de token.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub token_type: String,
    pub expires_in: i64,
    #[serde(default)]
    pub ext_expires_in: i64,
    pub access_token: String,
}

/// Par enviado no cabeçalho `Authorization`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerToken {
    pub token_type: String,
    pub access_token: String,
}

impl BearerToken {
    /// Valor do cabeçalho: `<tipo> <token>`.
    pub fn header_value(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }
}

/// Token em cache com o instante a partir do qual deixa de valer.
#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    pub token_type: String,
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// `expires_at = issued_at + expires_in − 5 min`.
    ///
    /// Um `expires_in` fora do intervalo de datas representável é
    /// [`AuthError::BadResponse`].
    pub fn from_response(
        response: TokenResponse,
        issued_at: DateTime<Utc>,
    ) -> Result<Self, AuthError> {
        let expires_in = response.expires_in;
        let expires_at = TimeDelta::try_seconds(expires_in)
            .and_then(|lifetime| issued_at.checked_add_signed(lifetime))
            .and_then(|at| at.checked_sub_signed(TimeDelta::seconds(EXPIRY_MARGIN_SECS)))
            .ok_or_else(|| {
                AuthError::BadResponse(format!("expires_in fora do intervalo: {expires_in}"))
            })?;

        Ok(Self {
            token_type: response.token_type,
            access_token: response.access_token,
            expires_at,
        })
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        !self.token_type.is_empty() && !self.access_token.is_empty() && now < self.expires_at
    }

    pub fn bearer(&self) -> BearerToken {
        BearerToken {
            token_type: self.token_type.clone(),
            access_token: self.access_token.clone(),
        }
    }
}

/// Origem dos tokens. Uma chamada = uma tentativa na rede.
pub trait TokenSource: Send + Sync {
    fn request_token(&self) -> Result<TokenResponse, AuthError>;
}

impl<T: TokenSource + ?Sized> TokenSource for Box<T> {
    fn request_token(&self) -> Result<TokenResponse, AuthError> {
        (**self).request_token()
    }
}

impl<T: TokenSource + ?Sized> TokenSource for std::sync::Arc<T> {
    fn request_token(&self) -> Result<TokenResponse, AuthError> {
        (**self).request_token()
    }
}

/// [`TokenSource`] que faz o POST form-encoded no endpoint configurado.
pub struct HttpTokenSource {
    agent: ureq::Agent,
    config: AuthConfig,
}

impl HttpTokenSource {
    pub fn new(config: AuthConfig) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(AUTH_TIMEOUT).build();
        Self { agent, config }
    }
}

impl TokenSource for HttpTokenSource {
    fn request_token(&self) -> Result<TokenResponse, AuthError> {
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("scope", self.config.scope.as_str()),
        ];
        let response = self
            .agent
            .post(&self.config.url)
            .send_form(&form)
            .map_err(|e| match e {
                ureq::Error::Status(code, _) => AuthError::Status(code),
                ureq::Error::Transport(t) => AuthError::Transport(t.to_string()),
            })?;
        response
            .into_json::<TokenResponse>()
            .map_err(|e| AuthError::BadResponse(e.to_string()))
    }
}

/// Dono do token em cache. Compartilhado entre as threads de envio.
pub struct CredentialManager<S = Box<dyn TokenSource>> {
    source: S,
    cached: RwLock<Option<Credential>>,
    refresh_gate: Mutex<()>,
}

impl<S: TokenSource> CredentialManager<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            cached: RwLock::new(None),
            refresh_gate: Mutex::new(()),
        }
    }

    /// Token válido, renovando se preciso.
    pub fn get_token(&self) -> Result<BearerToken, AuthError> {
        if let Some(token) = self.valid_cached(Utc::now()) {
            return Ok(token);
        }

        let _gate = self.refresh_gate.lock();
        // Outra thread pode ter renovado enquanto esperávamos o gate
        if let Some(token) = self.valid_cached(Utc::now()) {
            debug!("Token renovado por outra thread, reaproveitando");
            return Ok(token);
        }
        self.refresh()
    }

    /// Cópia do credential em cache, válido ou não.
    #[cfg(test)]
    pub fn cached(&self) -> Option<Credential> {
        self.cached.read().clone()
    }

    fn valid_cached(&self, now: DateTime<Utc>) -> Option<BearerToken> {
        self.cached
            .read()
            .as_ref()
            .filter(|c| c.is_valid_at(now))
            .map(Credential::bearer)
    }

    /// Para no primeiro sucesso; cache anterior fica intacto se tudo falhar.
    fn refresh(&self) -> Result<BearerToken, AuthError> {
        for attempt in 1..=MAX_REFRESH_ATTEMPTS {
            let issued_at = Utc::now();
            let result = self.source.request_token().and_then(|response| {
                if response.token_type.is_empty() || response.access_token.is_empty() {
                    return Err(AuthError::BadResponse("token_type/access_token vazio".into()));
                }
                debug!(
                    "Token recebido: expires_in={}s ext_expires_in={}s",
                    response.expires_in, response.ext_expires_in
                );
                Credential::from_response(response, issued_at)
            });

            match result {
                Ok(credential) => {
                    let token = credential.bearer();
                    info!("Token renovado, válido até {}", credential.expires_at);
                    *self.cached.write() = Some(credential);
                    return Ok(token);
                }
                Err(e) => {
                    warn!("Tentativa {attempt}/{MAX_REFRESH_ATTEMPTS} de obter token falhou: {e}");
                }
            }
        }

        error!("Não foi possível obter token após {MAX_REFRESH_ATTEMPTS} tentativas");
        Err(AuthError::Unavailable(MAX_REFRESH_ATTEMPTS))
    }
}

// ──────────────────────────────────────────────
// Testes
// ──────────────────────────────────────────────
