//! The call-site handle tying every component together.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::ClientConfig;
use crate::correlation::{CorrelationContext, CorrelationSnapshot};
use crate::dedup::DedupRegistry;
use crate::envelope::Payload;
use crate::error::{ClassifiedError, ConfigError, StoreError};
use crate::executor::RequestExecutor;
use crate::http_client::{HttpTransport, ReqwestTransport};
use crate::request::RequestDescriptor;
use crate::session::{
    AuthSession, Credential, CredentialStore, FileCredentialStore, SessionExpired, Subscription,
};

/// Shared handle to one client instance.
///
/// Cloning is cheap and every clone talks to the same session, correlation
/// context, and dedup registry. Build one per process (or per test) and pass
/// it to call sites.
#[derive(Clone)]
pub struct ClientContext {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    executor: Arc<RequestExecutor>,
    registry: DedupRegistry,
    session: Arc<AuthSession>,
    correlation: Arc<CorrelationContext>,
}

impl std::fmt::Debug for ClientContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientContext")
            .field("base_url", &self.config().base_url)
            .field("session", &self.inner.session)
            .field("registry", &self.inner.registry)
            .finish()
    }
}

/// Builder for [`ClientContext`].
///
/// Without an explicit transport the client talks HTTP through reqwest.
/// Without an explicit session or store, a `credentials_path` in the config
/// selects a [`FileCredentialStore`]; otherwise the session lives in memory.
#[derive(Default)]
pub struct ClientBuilder {
    config: ClientConfig,
    transport: Option<Arc<dyn HttpTransport>>,
    session: Option<Arc<AuthSession>>,
    store: Option<Arc<dyn CredentialStore>>,
}

impl ClientBuilder {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn HttpTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Share an existing session, e.g. between two clients for different hosts.
    pub fn with_session(mut self, session: Arc<AuthSession>) -> Self {
        self.session = Some(session);
        self
    }

    /// Restore the session from `store` at build time.
    pub fn with_credential_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> Result<ClientContext, ConfigError> {
        self.config.validate()?;

        let transport: Arc<dyn HttpTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new(&self.config.user_agent)),
        };

        let session = match (self.session, self.store) {
            (Some(session), _) => session,
            (None, Some(store)) => Arc::new(AuthSession::with_store(store)?),
            (None, None) => match &self.config.credentials_path {
                Some(path) => Arc::new(AuthSession::with_store(Arc::new(
                    FileCredentialStore::new(path),
                ))?),
                None => Arc::new(AuthSession::new()),
            },
        };

        let correlation = Arc::new(CorrelationContext::new());
        let executor = Arc::new(RequestExecutor::new(
            self.config,
            transport,
            Arc::clone(&session),
            Arc::clone(&correlation),
        ));

        Ok(ClientContext {
            inner: Arc::new(ClientInner {
                executor,
                registry: DedupRegistry::new(),
                session,
                correlation,
            }),
        })
    }
}

impl ClientContext {
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    /// Client over the given transport with an in-memory (or configured file) session.
    pub fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, ConfigError> {
        ClientBuilder::new(config).with_transport(transport).build()
    }

    /// Issues one logical call.
    ///
    /// Reads with `dedupe` set join an identical call already in flight
    /// instead of starting a new one. Everything else goes straight to the
    /// executor.
    pub async fn send(&self, request: RequestDescriptor) -> Result<Payload, ClassifiedError> {
        if !request.dedupe() {
            return self.inner.executor.execute(&request).await;
        }

        let fingerprint = request.fingerprint(&self.config().base_url);
        let executor = Arc::clone(&self.inner.executor);
        // The shared call outlives any single waiter, so it must not observe
        // one waiter's cancellation.
        let shared = request.without_cancel();

        self.inner
            .registry
            .run(&fingerprint, request.cancel(), move || async move {
                executor.execute(&shared).await
            })
            .await
    }

    pub async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestDescriptor,
    ) -> Result<T, ClassifiedError> {
        self.send(request).await?.into_json()
    }

    pub async fn get(&self, path: &str) -> Result<Payload, ClassifiedError> {
        self.send(RequestDescriptor::get(path)).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClassifiedError> {
        self.send_json(RequestDescriptor::get(path)).await
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ClassifiedError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send_json(RequestDescriptor::post(path).with_json(body)?)
            .await
    }

    pub async fn put_json<B, T>(&self, path: &str, body: &B) -> Result<T, ClassifiedError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send_json(RequestDescriptor::put(path).with_json(body)?)
            .await
    }

    pub async fn patch_json<B, T>(&self, path: &str, body: &B) -> Result<T, ClassifiedError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send_json(RequestDescriptor::patch(path).with_json(body)?)
            .await
    }

    pub async fn delete(&self, path: &str) -> Result<Payload, ClassifiedError> {
        self.send(RequestDescriptor::delete(path)).await
    }

    pub fn login(&self, credential: Credential) -> Result<(), StoreError> {
        self.inner.session.login(credential)
    }

    pub fn logout(&self) -> Result<(), StoreError> {
        self.inner.session.logout()
    }

    pub fn on_session_expired<F>(&self, callback: F) -> Subscription
    where
        F: Fn(SessionExpired) + Send + Sync + 'static,
    {
        self.inner.session.on_session_expired(callback)
    }

    pub fn session(&self) -> &Arc<AuthSession> {
        &self.inner.session
    }

    /// Latest correlation identifiers and rate-limit counters seen from the server.
    pub fn correlation(&self) -> CorrelationSnapshot {
        self.inner.correlation.snapshot()
    }

    pub fn config(&self) -> &ClientConfig {
        self.inner.executor.config()
    }

    /// Distinct deduplicated calls currently outstanding.
    pub fn in_flight(&self) -> usize {
        self.inner.registry.in_flight()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tempfile::tempdir;

    use super::*;
    use crate::http_client::{HttpResponse, ScriptedTransport};
    use crate::session::MemoryCredentialStore;

    fn client(transport: Arc<ScriptedTransport>) -> ClientContext {
        ClientContext::with_transport(ClientConfig::new("https://api.example.test/api"), transport)
            .expect("valid config")
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let error = ClientContext::with_transport(
            ClientConfig::new("ftp://files.example.test"),
            Arc::new(ScriptedTransport::with_statuses(&[200])),
        )
        .expect_err("bad scheme");

        assert!(matches!(error, ConfigError::InvalidBaseUrl { .. }));
    }

    #[tokio::test]
    async fn typed_round_trip_through_envelope() {
        #[derive(Debug, serde::Deserialize, PartialEq)]
        struct Order {
            id: String,
            status: String,
        }

        let transport = Arc::new(ScriptedTransport::new([Ok(HttpResponse::json(
            201,
            r#"{"data":{"id":"ord-1","status":"open"},"meta":{"version":"v2"}}"#,
        ))]));
        let client = client(Arc::clone(&transport));

        let order: Order = client
            .post_json("/orders", &json!({"symbol": "BTC/USDT", "side": "buy"}))
            .await
            .expect("created");

        assert_eq!(
            order,
            Order {
                id: String::from("ord-1"),
                status: String::from("open"),
            }
        );
        assert_eq!(
            transport.requests()[0].body.as_deref(),
            Some(r#"{"side":"buy","symbol":"BTC/USDT"}"#)
        );
    }

    #[tokio::test]
    async fn sequential_reads_are_not_coalesced() {
        let transport = Arc::new(ScriptedTransport::with_statuses(&[200]));
        let client = client(Arc::clone(&transport));

        client.get("/bots").await.expect("first");
        client.get("/bots").await.expect("second");

        assert_eq!(transport.calls(), 2);
        assert_eq!(client.in_flight(), 0);
    }

    #[tokio::test]
    async fn builder_restores_session_from_store() {
        let store = Arc::new(MemoryCredentialStore::with_credential(Credential::new(
            "persisted",
        )));
        let transport = Arc::new(ScriptedTransport::with_statuses(&[200]));
        let client = ClientContext::builder(ClientConfig::default())
            .with_transport(transport.clone())
            .with_credential_store(store)
            .build()
            .expect("client");

        client.get("/me").await.expect("ok");

        assert_eq!(
            transport.requests()[0].header("authorization"),
            Some("Bearer persisted")
        );
    }

    #[tokio::test]
    async fn credentials_path_selects_file_store() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("credentials.json");
        let config = ClientConfig::default()
            .with_credentials_path(&path)
            .with_timeout(Duration::from_secs(1));

        let first = ClientContext::with_transport(
            config.clone(),
            Arc::new(ScriptedTransport::with_statuses(&[200])),
        )
        .expect("client");
        first.login(Credential::new("from-disk")).expect("login");

        let second = ClientContext::with_transport(
            config,
            Arc::new(ScriptedTransport::with_statuses(&[200])),
        )
        .expect("client");
        assert_eq!(second.session().token().as_deref(), Some("from-disk"));
    }
}
