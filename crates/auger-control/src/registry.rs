//! Relay session registry
//!
//! Sessions by id, the subdomain index, and pending requests all live behind
//! one mutex so that registration, teardown and response matching are atomic
//! with respect to each other. The lock is never held across an `.await`.

use auger_proto::{HttpResponse, Hello, TunnelType, Welcome, DEFAULT_HEARTBEAT_SECONDS};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::audit::{NoopAudit, SessionAudit, SessionRecord};
use crate::connection::SessionHandle;
use crate::pending::{PendingError, PendingOutcome, PendingResponse};
use crate::subdomain::{validate_subdomain, SubdomainAllocator, SubdomainError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Invalid token")]
    InvalidToken,

    #[error(transparent)]
    Subdomain(#[from] SubdomainError),
}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Lower-cased public base domain, e.g. `example.com`
    pub base_domain: String,
    /// Accepted agent tokens; empty means open access
    pub tokens: Vec<String>,
    /// Scheme used when building public URLs
    pub public_scheme: String,
    pub heartbeat_seconds: u64,
}

impl RegistryConfig {
    pub fn new(base_domain: impl Into<String>) -> Self {
        Self {
            base_domain: base_domain.into().to_ascii_lowercase(),
            tokens: Vec::new(),
            public_scheme: "http".to_string(),
            heartbeat_seconds: DEFAULT_HEARTBEAT_SECONDS,
        }
    }

    pub fn with_tokens(mut self, tokens: Vec<String>) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn with_public_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.public_scheme = scheme.into();
        self
    }

    pub fn with_heartbeat_seconds(mut self, seconds: u64) -> Self {
        self.heartbeat_seconds = seconds;
        self
    }

    fn token_allowed(&self, token: Option<&str>) -> bool {
        if self.tokens.is_empty() {
            return true;
        }
        token.is_some_and(|t| self.tokens.iter().any(|allowed| allowed == t))
    }
}

/// A registered agent connection
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub auth_token: Option<String>,
    pub tunnel_type: TunnelType,
    pub subdomain: Option<String>,
    pub local_port: u16,
    pub handle: SessionHandle,
    pub connected_at: DateTime<Utc>,
}

struct PendingEntry {
    owner: String,
    tx: oneshot::Sender<PendingOutcome>,
}

#[derive(Default)]
struct RegistryState {
    sessions: HashMap<String, Session>,
    subdomains: HashMap<String, String>,
    pending: HashMap<String, PendingEntry>,
}

struct RegistryInner {
    config: RegistryConfig,
    allocator: SubdomainAllocator,
    audit: Arc<dyn SessionAudit>,
    state: Mutex<RegistryState>,
}

/// Shared handle to the relay's in-memory state
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self::with_parts(config, SubdomainAllocator::new(), Arc::new(NoopAudit))
    }

    pub fn with_parts(
        config: RegistryConfig,
        allocator: SubdomainAllocator,
        audit: Arc<dyn SessionAudit>,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                allocator,
                audit,
                state: Mutex::new(RegistryState::default()),
            }),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    fn state(&self) -> MutexGuard<'_, RegistryState> {
        // State stays consistent even if a holder panicked: every mutation is a
        // single map operation.
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Authenticate a `hello` and create its session.
    ///
    /// HTTP sessions get a subdomain: the requested one if valid and free,
    /// otherwise a generated name. A requested name that is taken is an error.
    pub fn register(&self, hello: &Hello, handle: SessionHandle) -> Result<Session, RegistryError> {
        if !self.inner.config.token_allowed(hello.token.as_deref()) {
            return Err(RegistryError::InvalidToken);
        }

        let requested = hello
            .requested_subdomain
            .as_deref()
            .map(str::to_ascii_lowercase);
        if let Some(requested) = requested.as_deref() {
            validate_subdomain(requested)?;
        }

        let session = {
            let mut state = self.state();

            let subdomain = match hello.tunnel_type {
                TunnelType::Http => Some(
                    self.inner
                        .allocator
                        .allocate(requested.as_deref(), |name| {
                            state.subdomains.contains_key(name)
                        })?,
                ),
            };

            let session = Session {
                id: format!("client_{}", uuid::Uuid::new_v4().simple()),
                auth_token: hello.token.clone(),
                tunnel_type: hello.tunnel_type,
                subdomain,
                local_port: hello.local_port,
                handle,
                connected_at: Utc::now(),
            };

            if let Some(subdomain) = &session.subdomain {
                state.subdomains.insert(subdomain.clone(), session.id.clone());
            }
            state.sessions.insert(session.id.clone(), session.clone());
            session
        };

        self.inner.audit.session_opened(&SessionRecord {
            id: session.id.clone(),
            token: session.auth_token.clone(),
            tunnel_type: session.tunnel_type,
            subdomain: session.subdomain.clone(),
            public_port: None,
            local_port: session.local_port,
            connected_at: session.connected_at,
        });

        info!(
            session_id = %session.id,
            subdomain = session.subdomain.as_deref().unwrap_or("-"),
            local_port = session.local_port,
            "Client connected ({})",
            session.tunnel_type
        );

        Ok(session)
    }

    /// Build the `welcome` reply for a freshly registered session
    pub fn welcome(&self, session: &Session) -> Welcome {
        let config = &self.inner.config;
        Welcome {
            client_id: session.id.clone(),
            subdomain: session.subdomain.clone(),
            public_url: session.subdomain.as_ref().map(|sub| {
                format!("{}://{}.{}", config.public_scheme, sub, config.base_domain)
            }),
            base_domain: config.base_domain.clone(),
            heartbeat_seconds: config.heartbeat_seconds,
        }
    }

    /// Destroy a session, free its subdomain and fail its pending requests.
    ///
    /// Returns the removed session, or `None` if it was already gone.
    pub fn unregister(&self, session_id: &str) -> Option<Session> {
        let (session, orphaned) = {
            let mut state = self.state();
            let session = state.sessions.remove(session_id)?;

            if let Some(subdomain) = &session.subdomain {
                if state.subdomains.get(subdomain).map(String::as_str) == Some(session_id) {
                    state.subdomains.remove(subdomain);
                }
            }

            let owned: Vec<String> = state
                .pending
                .iter()
                .filter(|(_, entry)| entry.owner == session_id)
                .map(|(id, _)| id.clone())
                .collect();
            let orphaned: Vec<PendingEntry> = owned
                .iter()
                .filter_map(|id| state.pending.remove(id))
                .collect();

            (session, orphaned)
        };

        let failed = orphaned.len();
        for entry in orphaned {
            let _ = entry.tx.send(Err(PendingError::ClientDisconnected));
        }

        self.inner.audit.session_closed(session_id, Utc::now());
        info!(
            session_id = %session_id,
            failed_requests = failed,
            "Client disconnected"
        );

        Some(session)
    }

    pub fn resolve_by_subdomain(&self, subdomain: &str) -> Option<Session> {
        let state = self.state();
        state
            .subdomains
            .get(subdomain)
            .and_then(|id| state.sessions.get(id))
            .cloned()
    }

    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.state().sessions.get(session_id).cloned()
    }

    /// Park a request until its owner answers, `deadline` passes, or the
    /// owner disconnects. Fails immediately if the owner is already gone.
    pub fn create_pending(
        &self,
        session_id: &str,
        request_id: &str,
        deadline: Instant,
    ) -> Result<PendingResponse, PendingError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut state = self.state();
            if !state.sessions.contains_key(session_id) {
                return Err(PendingError::ClientDisconnected);
            }
            state.pending.insert(
                request_id.to_string(),
                PendingEntry {
                    owner: session_id.to_string(),
                    tx,
                },
            );
        }
        debug!(session_id = %session_id, request_id = %request_id, "Registered pending request");

        Ok(PendingResponse::new(
            self.clone(),
            request_id.to_string(),
            deadline,
            rx,
        ))
    }

    /// Deliver an agent's response.
    ///
    /// Only the session that owns the request can complete it; responses for
    /// unknown, already-settled or foreign requests are ignored.
    pub fn complete_pending(&self, session_id: &str, response: HttpResponse) -> bool {
        let entry = {
            let mut state = self.state();
            match state.pending.get(&response.id) {
                Some(entry) if entry.owner == session_id => state.pending.remove(&response.id),
                Some(_) => {
                    debug!(
                        session_id = %session_id,
                        request_id = %response.id,
                        "Ignoring response for a request owned by another session"
                    );
                    None
                }
                None => None,
            }
        };

        match entry {
            Some(entry) => entry.tx.send(Ok(response)).is_ok(),
            None => false,
        }
    }

    /// Fail a request with [`PendingError::Timeout`] if still outstanding
    pub fn expire_pending(&self, request_id: &str) -> bool {
        let entry = self.state().pending.remove(request_id);
        match entry {
            Some(entry) => {
                let _ = entry.tx.send(Err(PendingError::Timeout));
                true
            }
            None => false,
        }
    }

    /// Forget a request without notifying anyone
    pub fn cancel_pending(&self, request_id: &str) -> bool {
        self.state().pending.remove(request_id).is_some()
    }

    pub fn session_count(&self) -> usize {
        self.state().sessions.len()
    }

    pub fn pending_count(&self) -> usize {
        self.state().pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subdomain::RandomSource;
    use auger_proto::Headers;
    use std::time::Duration;

    struct FixedSource(f64);

    impl RandomSource for FixedSource {
        fn next_f64(&self) -> f64 {
            self.0
        }
    }

    fn registry(tokens: &[&str]) -> SessionRegistry {
        let config = RegistryConfig::new("Example.com")
            .with_tokens(tokens.iter().map(|t| t.to_string()).collect());
        SessionRegistry::new(config)
    }

    fn response(id: &str, status: u16) -> HttpResponse {
        HttpResponse {
            id: id.to_string(),
            status,
            headers: Headers::new(),
            body: b"ok".to_vec(),
        }
    }

    fn register(registry: &SessionRegistry, hello: Hello) -> Session {
        let (handle, _rx) = SessionHandle::channel();
        registry.register(&hello, handle).unwrap()
    }

    #[test]
    fn test_register_open_access_assigns_subdomain() {
        let registry = registry(&[]);
        let session = register(&registry, Hello::http(4000));

        assert!(session.id.starts_with("client_"));
        assert_eq!(session.local_port, 4000);
        let subdomain = session.subdomain.clone().unwrap();
        assert!(subdomain.contains('-'));

        let resolved = registry.resolve_by_subdomain(&subdomain).unwrap();
        assert_eq!(resolved.id, session.id);
        assert_eq!(registry.session_count(), 1);
    }

    #[test]
    fn test_register_checks_tokens() {
        let registry = registry(&["secret"]);
        let (handle, _rx) = SessionHandle::channel();

        assert_eq!(
            registry.register(&Hello::http(3000), handle.clone()).unwrap_err(),
            RegistryError::InvalidToken
        );
        assert_eq!(
            registry
                .register(
                    &Hello::http(3000).with_token(Some("wrong".to_string())),
                    handle.clone()
                )
                .unwrap_err(),
            RegistryError::InvalidToken
        );
        assert_eq!(registry.session_count(), 0);

        let session = registry
            .register(&Hello::http(3000).with_token(Some("secret".to_string())), handle)
            .unwrap();
        assert_eq!(session.auth_token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_requested_subdomain_conflict() {
        let registry = registry(&[]);
        let hello = Hello::http(3000).with_requested_subdomain(Some("Demo".to_string()));
        let first = register(&registry, hello.clone());
        assert_eq!(first.subdomain.as_deref(), Some("demo"));

        let (handle, _rx) = SessionHandle::channel();
        assert_eq!(
            registry.register(&hello, handle).unwrap_err(),
            RegistryError::Subdomain(SubdomainError::Conflict("demo".to_string()))
        );
    }

    #[test]
    fn test_requested_subdomain_invalid() {
        let registry = registry(&[]);
        let (handle, _rx) = SessionHandle::channel();
        let hello = Hello::http(3000).with_requested_subdomain(Some("-bad".to_string()));

        assert!(matches!(
            registry.register(&hello, handle),
            Err(RegistryError::Subdomain(SubdomainError::Invalid(_)))
        ));
    }

    #[test]
    fn test_generated_names_never_collide() {
        let config = RegistryConfig::new("example.com");
        let registry = SessionRegistry::with_parts(
            config,
            SubdomainAllocator::with_random_source(Arc::new(FixedSource(0.0))),
            Arc::new(NoopAudit),
        );

        let first = register(&registry, Hello::http(1000));
        let second = register(&registry, Hello::http(1001));

        assert_eq!(first.subdomain.as_deref(), Some("brave-pickle"));
        assert_eq!(second.subdomain.as_deref(), Some("brave-pickle-0"));
    }

    #[test]
    fn test_welcome_message() {
        let registry = SessionRegistry::new(RegistryConfig::new("example.com"));
        let hello = Hello::http(4000).with_requested_subdomain(Some("myapp".to_string()));
        let session = register(&registry, hello);

        let welcome = registry.welcome(&session);
        assert_eq!(welcome.client_id, session.id);
        assert_eq!(welcome.subdomain.as_deref(), Some("myapp"));
        assert_eq!(
            welcome.public_url.as_deref(),
            Some("http://myapp.example.com")
        );
        assert_eq!(welcome.base_domain, "example.com");
        assert_eq!(welcome.heartbeat_seconds, 30);
    }

    #[test]
    fn test_unregister_frees_subdomain_and_is_idempotent() {
        let registry = registry(&[]);
        let session = register(
            &registry,
            Hello::http(3000).with_requested_subdomain(Some("myapp".to_string())),
        );

        assert!(registry.unregister(&session.id).is_some());
        assert!(registry.resolve_by_subdomain("myapp").is_none());
        assert!(registry.unregister(&session.id).is_none());
        assert_eq!(registry.session_count(), 0);

        // The name can be claimed again
        let again = register(
            &registry,
            Hello::http(3001).with_requested_subdomain(Some("myapp".to_string())),
        );
        assert_eq!(again.subdomain.as_deref(), Some("myapp"));
    }

    #[tokio::test]
    async fn test_complete_pending_delivers_response() {
        let registry = registry(&[]);
        let session = register(&registry, Hello::http(3000));

        let pending = registry
            .create_pending(&session.id, "req_1", Instant::now() + Duration::from_secs(30))
            .unwrap();
        assert_eq!(registry.pending_count(), 1);

        assert!(registry.complete_pending(&session.id, response("req_1", 201)));
        assert_eq!(pending.wait().await.unwrap().status, 201);
        assert_eq!(registry.pending_count(), 0);

        // Second delivery is a no-op
        assert!(!registry.complete_pending(&session.id, response("req_1", 500)));
    }

    #[tokio::test]
    async fn test_complete_pending_ignores_foreign_session() {
        let registry = registry(&[]);
        let owner = register(&registry, Hello::http(3000));
        let intruder = register(&registry, Hello::http(3001));

        let pending = registry
            .create_pending(&owner.id, "req_1", Instant::now() + Duration::from_secs(30))
            .unwrap();

        assert!(!registry.complete_pending(&intruder.id, response("req_1", 418)));
        assert_eq!(registry.pending_count(), 1);

        assert!(registry.complete_pending(&owner.id, response("req_1", 200)));
        assert_eq!(pending.wait().await.unwrap().status, 200);
    }

    #[tokio::test]
    async fn test_unregister_fails_owned_pending_exactly_once() {
        let registry = registry(&[]);
        let session = register(&registry, Hello::http(3000));
        let other = register(&registry, Hello::http(3001));
        let deadline = Instant::now() + Duration::from_secs(30);

        let first = registry.create_pending(&session.id, "req_a", deadline).unwrap();
        let second = registry.create_pending(&session.id, "req_b", deadline).unwrap();
        let unrelated = registry.create_pending(&other.id, "req_c", deadline).unwrap();

        registry.unregister(&session.id);

        assert_eq!(first.wait().await, Err(PendingError::ClientDisconnected));
        assert_eq!(second.wait().await, Err(PendingError::ClientDisconnected));
        assert_eq!(registry.pending_count(), 1);

        // Late responses for the torn-down session are ignored
        assert!(!registry.complete_pending(&session.id, response("req_a", 200)));

        assert!(registry.complete_pending(&other.id, response("req_c", 200)));
        assert!(unrelated.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_create_pending_for_missing_session() {
        let registry = registry(&[]);
        let result = registry.create_pending("client_gone", "req_1", Instant::now());
        assert!(matches!(result, Err(PendingError::ClientDisconnected)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_times_out_at_deadline() {
        let registry = registry(&[]);
        let session = register(&registry, Hello::http(3000));
        let start = Instant::now();

        let pending = registry
            .create_pending(&session.id, "req_1", start + Duration::from_secs(30))
            .unwrap();

        assert_eq!(pending.wait().await, Err(PendingError::Timeout));
        assert!(start.elapsed() >= Duration::from_secs(30));
        assert_eq!(registry.pending_count(), 0);

        // A response after the timeout is discarded
        assert!(!registry.complete_pending(&session.id, response("req_1", 200)));
    }

    #[tokio::test]
    async fn test_expire_pending() {
        let registry = registry(&[]);
        let session = register(&registry, Hello::http(3000));
        let pending = registry
            .create_pending(&session.id, "req_1", Instant::now() + Duration::from_secs(30))
            .unwrap();

        assert!(registry.expire_pending("req_1"));
        assert!(!registry.expire_pending("req_1"));
        assert_eq!(pending.wait().await, Err(PendingError::Timeout));
    }

    #[tokio::test]
    async fn test_dropping_waiter_cancels_pending() {
        let registry = registry(&[]);
        let session = register(&registry, Hello::http(3000));
        let pending = registry
            .create_pending(&session.id, "req_1", Instant::now() + Duration::from_secs(30))
            .unwrap();
        assert_eq!(pending.request_id(), "req_1");

        drop(pending);
        assert_eq!(registry.pending_count(), 0);
        assert!(!registry.complete_pending(&session.id, response("req_1", 200)));
    }

    #[tokio::test]
    async fn test_out_of_order_completion() {
        let registry = registry(&[]);
        let session = register(&registry, Hello::http(3000));
        let deadline = Instant::now() + Duration::from_secs(30);

        let slow = registry.create_pending(&session.id, "req_slow", deadline).unwrap();
        let fast = registry.create_pending(&session.id, "req_fast", deadline).unwrap();

        assert!(registry.complete_pending(&session.id, response("req_fast", 200)));
        assert_eq!(fast.wait().await.unwrap().id, "req_fast");

        assert!(registry.complete_pending(&session.id, response("req_slow", 202)));
        assert_eq!(slow.wait().await.unwrap().status, 202);
    }

    #[test]
    fn test_base_domain_is_lowercased() {
        assert_eq!(RegistryConfig::new("Example.COM").base_domain, "example.com");
    }
}
