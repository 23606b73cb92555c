//! Matching providers for duplicate searches.
//!
//! Provides the `MatchingProvider` trait, its HTTP implementation against
//! the RUNNA `buscar-duplicados` endpoint, and an in-memory implementation
//! that scores a fixed candidate list locally.

use runna_model::{CandidateRecord, Genero, MatchField, MatchResult, PartialIdentity};
use runna_query::{DuplicateSearchBody, QueryDialect, QueryError, RunnaDialect};
use runna_rerank::{rank_with, ScoringStrategy, WeightedScorer};
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Errors from matching provider operations.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(#[from] QueryError),

    #[error("Backend not available")]
    Unavailable,

    #[error("Search cancelled")]
    Cancelled,
}

impl BackendError {
    /// Message suitable for showing to an operator.
    pub fn user_message(&self) -> String {
        match self {
            Self::Connection(_) | Self::Unavailable => {
                "No se pudo conectar con el servidor para buscar duplicados.".to_string()
            }
            Self::QueryFailed(_) | Self::ParseError(_) => {
                "Error al buscar duplicados. Intente nuevamente.".to_string()
            }
            Self::InvalidQuery(e) => e.to_string(),
            Self::Cancelled => "Búsqueda cancelada.".to_string(),
        }
    }
}

/// Trait for duplicate matching providers (REST API, in-memory, etc.)
///
/// Implementations should stop work promptly once `cancel` fires, but
/// callers must not rely on it.
pub trait MatchingProvider: Send + Sync + 'static {
    /// Find scored candidates that may duplicate the query.
    fn find_candidates(
        &self,
        query: &PartialIdentity,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<Vec<MatchResult>, BackendError>> + Send;

    /// Check if the provider is healthy.
    fn health_check(&self) -> impl Future<Output = Result<(), BackendError>> + Send;

    /// Get the provider name for logging.
    fn name(&self) -> &'static str;
}

/// RUNNA REST API configuration.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Base URL for the RUNNA API
    pub base_url: String,
    /// Duplicate-search endpoint path
    pub endpoint: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// Bearer token for the `Authorization` header
    pub bearer_token: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000/api".to_string(),
            endpoint: "/legajos/buscar-duplicados/".to_string(),
            timeout_secs: 30,
            bearer_token: None,
        }
    }
}

impl HttpConfig {
    /// Load overrides from `RUNNA_API_URL`, `RUNNA_API_TOKEN` and
    /// `RUNNA_API_TIMEOUT_SECS`, keeping defaults for anything unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("RUNNA_API_URL").unwrap_or(defaults.base_url),
            endpoint: defaults.endpoint,
            timeout_secs: std::env::var("RUNNA_API_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.timeout_secs),
            bearer_token: std::env::var("RUNNA_API_TOKEN").ok().filter(|t| !t.is_empty()),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

/// Provider backed by the RUNNA REST API.
pub struct HttpBackend {
    config: HttpConfig,
    client: reqwest::Client,
}

impl HttpBackend {
    /// Create a new HTTP backend.
    pub fn new(config: HttpConfig) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BackendError::Connection(e.to_string()))?;

        Ok(Self { config, client })
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn post_search(&self, body: &DuplicateSearchBody) -> Result<Vec<MatchResult>, BackendError> {
        let url = self.config.url(&self.config.endpoint);

        tracing::debug!(url = %url, "Posting duplicate search");

        let response = self
            .authorized(self.client.post(&url))
            .json(body)
            .send()
            .await
            .map_err(|e| BackendError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::QueryFailed(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| BackendError::ParseError(e.to_string()))?;

        parse_response(json)
    }
}

/// Parse a `buscar-duplicados` response into match results.
///
/// Expected shape:
/// `{"duplicados_encontrados": bool, "matches": [{"legajo_id", "score",
/// "campos_coincidentes", "numero_legajo", "nnya": {...}, ...}]}`.
/// Unrecognized keys of each match are kept as display data.
pub fn parse_response(response: serde_json::Value) -> Result<Vec<MatchResult>, BackendError> {
    if response.get("duplicados_encontrados").and_then(|v| v.as_bool()) == Some(false) {
        return Ok(Vec::new());
    }

    let matches = response
        .get("matches")
        .and_then(|m| m.as_array())
        .ok_or_else(|| BackendError::ParseError("Missing matches array".to_string()))?;

    let mut results = Vec::with_capacity(matches.len());

    for entry in matches {
        let object = entry
            .as_object()
            .ok_or_else(|| BackendError::ParseError("Match is not an object".to_string()))?;

        let id = object
            .get("legajo_id")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| BackendError::ParseError("Missing legajo_id".to_string()))?;

        let score = object
            .get("score")
            .and_then(|s| s.as_f64())
            .unwrap_or(0.0)
            .clamp(0.0, 1.0);

        let matched_fields: BTreeSet<MatchField> = object
            .get("campos_coincidentes")
            .and_then(|v| v.as_array())
            .map(|fields| {
                fields
                    .iter()
                    .filter_map(|f| f.as_str())
                    .filter_map(MatchField::parse)
                    .collect()
            })
            .unwrap_or_default();

        let person = object.get("nnya");
        let text = |key: &str| {
            person
                .and_then(|p| p.get(key))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
        };

        let identity = PartialIdentity {
            nombre: text("nombre").unwrap_or_default(),
            apellido: text("apellido").unwrap_or_default(),
            dni: person.and_then(|p| p.get("dni")).and_then(parse_dni_value),
            fecha_nacimiento: text("fecha_nacimiento").and_then(|s| s.parse().ok()),
            genero: text("genero").map(|g| Genero::from(g.as_str())),
            nombre_autopercibido: text("nombre_autopercibido"),
        };

        let display: BTreeMap<String, serde_json::Value> = object
            .iter()
            .filter(|(key, _)| {
                !matches!(
                    key.as_str(),
                    "legajo_id" | "score" | "campos_coincidentes" | "numero_legajo" | "nnya"
                )
            })
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let candidate = CandidateRecord {
            id,
            identity,
            numero_legajo: object
                .get("numero_legajo")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string()),
            display,
        };

        results.push(MatchResult {
            candidate_id: id,
            score,
            matched_fields,
            candidate: Some(candidate),
        });
    }

    Ok(results)
}

/// DNIs arrive as numbers or numeric strings.
fn parse_dni_value(value: &serde_json::Value) -> Option<u64> {
    match value {
        serde_json::Value::Number(n) => n.as_u64(),
        serde_json::Value::String(s) => runna_model::parse_dni(s),
        _ => None,
    }
}

impl MatchingProvider for HttpBackend {
    async fn find_candidates(
        &self,
        query: &PartialIdentity,
        cancel: CancellationToken,
    ) -> Result<Vec<MatchResult>, BackendError> {
        let body = RunnaDialect.translate(query)?;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(BackendError::Cancelled),
            result = self.post_search(&body) => result,
        }
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        let response = self
            .authorized(self.client.get(self.config.url("/")))
            .send()
            .await
            .map_err(|e| BackendError::Connection(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(BackendError::Unavailable)
        }
    }

    fn name(&self) -> &'static str {
        "runna-api"
    }
}

/// Provider that scores a fixed candidate list in process.
pub struct InMemoryBackend {
    candidates: Vec<CandidateRecord>,
    strategy: Box<dyn ScoringStrategy>,
}

impl InMemoryBackend {
    /// Create a provider using the default weighted scorer.
    pub fn new(candidates: Vec<CandidateRecord>) -> Self {
        Self {
            candidates,
            strategy: Box::new(WeightedScorer::default()),
        }
    }

    /// Replace the scoring strategy.
    pub fn with_strategy(mut self, strategy: impl ScoringStrategy + 'static) -> Self {
        self.strategy = Box::new(strategy);
        self
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

impl MatchingProvider for InMemoryBackend {
    async fn find_candidates(
        &self,
        query: &PartialIdentity,
        cancel: CancellationToken,
    ) -> Result<Vec<MatchResult>, BackendError> {
        if cancel.is_cancelled() {
            return Err(BackendError::Cancelled);
        }

        Ok(rank_with(self.strategy.as_ref(), query, &self.candidates))
    }

    async fn health_check(&self) -> Result<(), BackendError> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "in-memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_config_url_joins_base_and_endpoint() {
        let config = HttpConfig {
            base_url: "https://runna.example/api/".to_string(),
            ..Default::default()
        };
        assert_eq!(
            config.url(&config.endpoint),
            "https://runna.example/api/legajos/buscar-duplicados/"
        );
    }

    #[test]
    fn test_parse_response() {
        let response = json!({
            "duplicados_encontrados": true,
            "matches": [{
                "legajo_id": 42,
                "score": 0.87,
                "campos_coincidentes": ["nombre", "apellido", "telefono"],
                "numero_legajo": "L-2023-0042",
                "medidas_activas": ["MPI"],
                "nnya": {
                    "nombre": "Juan",
                    "apellido": "Pérez",
                    "dni": "30.111.222",
                    "fecha_nacimiento": "2012-06-01",
                    "genero": "MASCULINO"
                }
            }]
        });

        let results = parse_response(response).unwrap();
        assert_eq!(results.len(), 1);

        let result = &results[0];
        assert_eq!(result.candidate_id, 42);
        assert_eq!(result.score, 0.87);
        assert_eq!(
            result.matched_fields,
            BTreeSet::from([MatchField::Nombre, MatchField::Apellido])
        );

        let candidate = result.candidate.as_ref().unwrap();
        assert_eq!(candidate.identity.dni, Some(30111222));
        assert_eq!(candidate.identity.genero, Some(Genero::Masculino));
        assert_eq!(candidate.numero_legajo.as_deref(), Some("L-2023-0042"));
        assert_eq!(candidate.display.get("medidas_activas"), Some(&json!(["MPI"])));
        assert!(!candidate.display.contains_key("nnya"));
    }

    #[test]
    fn test_parse_response_without_duplicates() {
        let results = parse_response(json!({"duplicados_encontrados": false})).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_parse_response_missing_matches() {
        assert!(matches!(
            parse_response(json!({"detail": "error"})),
            Err(BackendError::ParseError(_))
        ));
    }

    #[test]
    fn test_cancelled_is_not_a_user_error() {
        assert_eq!(BackendError::Cancelled.user_message(), "Búsqueda cancelada.");
        assert!(BackendError::Unavailable.user_message().contains("conectar"));
    }

    #[tokio::test]
    async fn test_in_memory_ranks_candidates() {
        let backend = InMemoryBackend::new(vec![
            CandidateRecord::new(1, PartialIdentity::new("Maria", "Lopez")),
            CandidateRecord::new(2, PartialIdentity::new("Juan", "Perez").with_dni(30111222)),
        ]);

        let query = PartialIdentity::default().with_dni(30111222);
        let results = backend
            .find_candidates(&query, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(results[0].candidate_id, 2);
        assert_eq!(results[0].score, 1.0);
    }

    #[tokio::test]
    async fn test_in_memory_honors_cancellation() {
        let backend = InMemoryBackend::new(Vec::new());
        let token = CancellationToken::new();
        token.cancel();

        let result = backend
            .find_candidates(&PartialIdentity::new("Juan", "Perez"), token)
            .await;
        assert!(matches!(result, Err(BackendError::Cancelled)));
    }

    #[tokio::test]
    async fn test_http_search_stops_on_cancelled_token() {
        let backend = HttpBackend::new(HttpConfig {
            base_url: "http://127.0.0.1:9".to_string(),
            ..Default::default()
        })
        .unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let result = backend
            .find_candidates(&PartialIdentity::new("Juan", "Perez"), token)
            .await;
        assert!(matches!(result, Err(BackendError::Cancelled)));
    }

    #[tokio::test]
    async fn test_http_rejects_insufficient_query() {
        let backend = HttpBackend::new(HttpConfig::default()).unwrap();
        let result = backend
            .find_candidates(&PartialIdentity::new("J", ""), CancellationToken::new())
            .await;
        assert!(matches!(result, Err(BackendError::InvalidQuery(_))));
    }
}
