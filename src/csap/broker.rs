//! Server side of the open-handshake.
//!
//! A [`Broker`] reads the client's open request, checks credentials and the
//! service mode, resolves the service and answers with a handshake reply.
//! On success the channel is bound to a fresh [`CsapSession`] and handed to
//! the service handler.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channel::{ServerOpen, WebSocketChannel};
use crate::config::Config;
use crate::csap::handshake::{HandshakeCode, HandshakeReply, OpenRequest, WireFormat};
use crate::csap::session::CsapSession;
use crate::error::{Error, Result};
use crate::protocol::OpCode;
use crate::protocol::handshake::BAD_REQUEST_RESPONSE;
use crate::repo::ConfigRepository;
use crate::transcode::TextTranscoder;

/// Future returned by a service handler.
pub type ServiceFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Runs one service on an admitted session.
///
/// Implemented for any `Fn(CsapSession<T>, Option<String>) -> impl Future`,
/// where the second argument is the authenticated user.
pub trait ServiceHandler<T>: Send + Sync {
    fn call(&self, session: CsapSession<T>, user: Option<String>) -> ServiceFuture;
}

impl<T, F, Fut> ServiceHandler<T> for F
where
    F: Fn(CsapSession<T>, Option<String>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn call(&self, session: CsapSession<T>, user: Option<String>) -> ServiceFuture {
        Box::pin(self(session, user))
    }
}

/// Maps a service name to its handler.
pub trait ServiceResolver<T>: Send + Sync {
    fn resolve(&self, name: &str) -> Option<Arc<dyn ServiceHandler<T>>>;
}

/// Handlers compiled into the broker, keyed by service name.
pub struct ServiceRegistry<T> {
    handlers: HashMap<String, Arc<dyn ServiceHandler<T>>>,
}

impl<T> Default for ServiceRegistry<T> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<T> ServiceRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`, replacing any previous one.
    #[must_use]
    pub fn register(mut self, name: impl Into<String>, handler: impl ServiceHandler<T> + 'static) -> Self {
        self.handlers.insert(name.into(), Arc::new(handler));
        self
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl<T> ServiceResolver<T> for ServiceRegistry<T> {
    fn resolve(&self, name: &str) -> Option<Arc<dyn ServiceHandler<T>>> {
        self.handlers.get(name).cloned()
    }
}

/// Validates user credentials.
pub trait Authenticator: Send + Sync {
    /// # Errors
    ///
    /// `Error::Auth` if the credentials are rejected.
    fn validate(&self, user: &str, secret: &str) -> Result<()>;
}

/// In-memory user table.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    users: HashMap<String, String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>, secret: impl Into<String>) -> Self {
        self.users.insert(user.into(), secret.into());
        self
    }
}

impl Authenticator for StaticCredentials {
    fn validate(&self, user: &str, secret: &str) -> Result<()> {
        match self.users.get(user) {
            Some(expected) if expected == secret => Ok(()),
            Some(_) => Err(Error::Auth(format!("wrong secret for {user}"))),
            None => Err(Error::Auth(format!("unknown user {user}"))),
        }
    }
}

/// Which service names a broker accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServiceMode {
    /// Only the first configured service.
    Single,
    /// Any configured service.
    Enum,
    /// Anything the resolver knows.
    #[default]
    Any,
}

impl ServiceMode {
    /// Parse `*SINGLE`, `*ENUM` or `*ANY`.
    ///
    /// # Errors
    ///
    /// `Error::Config` for any other value.
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim() {
            "*SINGLE" => Ok(ServiceMode::Single),
            "*ENUM" => Ok(ServiceMode::Enum),
            "*ANY" => Ok(ServiceMode::Any),
            other => Err(Error::Config(format!("unknown service mode {other:?}"))),
        }
    }
}

/// Broker settings.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub login_required: bool,
    pub mode: ServiceMode,
    pub services: Vec<String>,
    /// Settings for accepted channels.
    pub channel: Config,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            login_required: false,
            mode: ServiceMode::Any,
            services: Vec::new(),
            channel: Config::server(),
        }
    }
}

impl BrokerConfig {
    /// Read `USER_LOGIN`, `SERVICE_MODE` and `SERVICES` from a section.
    ///
    /// Login is required unless `USER_LOGIN` is `*NO`.
    ///
    /// # Errors
    ///
    /// `Error::Config` if `SERVICE_MODE` is missing or unknown, or if
    /// `*SINGLE` is selected with no service listed.
    pub fn from_repository(repo: &dyn ConfigRepository, section: &str) -> Result<Self> {
        let login_required = repo
            .lookup_optional(section, "USER_LOGIN")
            .is_none_or(|v| v.trim() != "*NO");
        let mode = ServiceMode::parse(&repo.lookup_str(section, "SERVICE_MODE")?)?;
        let services = repo.lookup_list(section, "SERVICES");
        if mode == ServiceMode::Single && services.is_empty() {
            return Err(Error::Config(format!(
                "{section}/SERVICES: *SINGLE mode needs a service"
            )));
        }
        Ok(Self {
            login_required,
            mode,
            services,
            channel: Config::server(),
        })
    }

    #[must_use]
    pub fn with_channel(mut self, channel: Config) -> Self {
        self.channel = channel;
        self
    }

    /// Whether the service mode allows `name`.
    pub fn permits(&self, name: &str) -> bool {
        match self.mode {
            ServiceMode::Single => self.services.first().is_some_and(|s| s == name),
            ServiceMode::Enum => self.services.iter().any(|s| s == name),
            ServiceMode::Any => true,
        }
    }
}

/// Outcome of [`Broker::admit`].
pub enum Admission<T> {
    /// The success reply went out and the session is bound.
    Admitted {
        session: CsapSession<T>,
        service: String,
        user: Option<String>,
        handler: Arc<dyn ServiceHandler<T>>,
    },
    /// The failure reply went out and the channel is closed.
    Refused(HandshakeCode),
}

/// Accepts channels, runs the open-handshake and dispatches to services.
pub struct Broker<T> {
    config: BrokerConfig,
    resolver: Arc<dyn ServiceResolver<T>>,
    authenticator: Option<Arc<dyn Authenticator>>,
    transcoder: Option<Arc<dyn TextTranscoder>>,
}

impl<T> Broker<T> {
    pub fn new(config: BrokerConfig, resolver: impl ServiceResolver<T> + 'static) -> Self {
        Self {
            config,
            resolver: Arc::new(resolver),
            authenticator: None,
            transcoder: None,
        }
    }

    #[must_use]
    pub fn with_authenticator(mut self, authenticator: impl Authenticator + 'static) -> Self {
        self.authenticator = Some(Arc::new(authenticator));
        self
    }

    /// Transcoder installed on every accepted channel.
    #[must_use]
    pub fn with_transcoder(mut self, transcoder: Arc<dyn TextTranscoder>) -> Self {
        self.transcoder = Some(transcoder);
        self
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Check credentials, returning the user on success.
    fn authenticate(&self, request: &OpenRequest) -> std::result::Result<Option<String>, HandshakeCode> {
        if !self.config.login_required {
            return Ok(None);
        }
        let user = request
            .user
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or(HandshakeCode::MISSING_USER)?;
        let secret = request
            .password
            .as_deref()
            .ok_or(HandshakeCode::MISSING_PASSWORD)?;
        let Some(authenticator) = &self.authenticator else {
            warn!(user, "login required but no authenticator configured");
            return Err(HandshakeCode::REJECTED);
        };
        authenticator.validate(user, secret).map_err(|err| {
            warn!(user, error = %err, "credentials rejected");
            HandshakeCode::REJECTED
        })?;
        Ok(Some(user.to_string()))
    }
}

impl<T: AsyncRead + AsyncWrite + Unpin> Broker<T> {
    async fn refuse(
        &self,
        mut channel: WebSocketChannel<T>,
        code: HandshakeCode,
        format: WireFormat,
    ) -> Result<Admission<T>> {
        let reply = HandshakeReply::failure(code).encode(format)?;
        if channel.is_open() {
            if let Err(err) = channel.send(OpCode::Text, &reply, true).await {
                debug!(error = %err, "failure reply not delivered");
            }
        }
        if let Err(err) = channel.close(None).await {
            debug!(error = %err, "close after refusal failed");
        }
        Ok(Admission::Refused(code))
    }

    /// Run the open-handshake on an upgraded channel.
    ///
    /// Failures the client can be told about are answered and returned as
    /// [`Admission::Refused`].
    ///
    /// # Errors
    ///
    /// Transport errors writing the success reply.
    pub async fn admit(&self, mut channel: WebSocketChannel<T>) -> Result<Admission<T>> {
        let timeout = self.config.channel.timeouts.handshake;
        if let Err(err) = channel.receive_all(timeout).await {
            warn!(error = %err, "open request not received");
            return self
                .refuse(channel, HandshakeCode::READ_FAILED, WireFormat::Json)
                .await;
        }

        let (request, format) = match OpenRequest::decode(channel.data()) {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!(error = %err, "malformed open request");
                return self
                    .refuse(channel, HandshakeCode::MALFORMED, WireFormat::Json)
                    .await;
            }
        };

        let user = match self.authenticate(&request) {
            Ok(user) => user,
            Err(code) => return self.refuse(channel, code, format).await,
        };

        let Some(service) = request.service() else {
            warn!("no service in open request");
            return self.refuse(channel, HandshakeCode::NO_SERVICE, format).await;
        };

        let handler = self
            .config
            .permits(service)
            .then(|| self.resolver.resolve(service))
            .flatten();
        let Some(handler) = handler else {
            warn!(service, mode = ?self.config.mode, "service not available");
            return self
                .refuse(channel, HandshakeCode::UNKNOWN_SERVICE, format)
                .await;
        };

        let sid = Uuid::new_v4().hyphenated().to_string();
        let reply = HandshakeReply::success(sid.as_str()).encode(format)?;
        channel.send(OpCode::Text, &reply, true).await?;

        let mut session = CsapSession::new(self.config.channel.clone());
        session.open_channel(channel, sid.as_str());
        session.clear().await?;
        info!(service, sid = %sid, user = user.as_deref().unwrap_or(""), "session opened");

        Ok(Admission::Admitted {
            session,
            service: service.to_string(),
            user,
            handler,
        })
    }

    /// Admit a channel and run its service to completion.
    ///
    /// # Errors
    ///
    /// Errors from admission or from the service handler.
    pub async fn serve(&self, channel: WebSocketChannel<T>) -> Result<()> {
        match self.admit(channel).await? {
            Admission::Admitted {
                session,
                service,
                user,
                handler,
            } => {
                let result = handler.call(session, user).await;
                match &result {
                    Ok(()) => debug!(service, "service finished"),
                    Err(err) => warn!(service, error = %err, "service failed"),
                }
                result
            }
            Admission::Refused(code) => {
                debug!(status = code.status, reason = code.reason, "session refused");
                Ok(())
            }
        }
    }

    /// Upgrade a raw stream and serve it. Plain HTTP gets `400 Bad Request`.
    ///
    /// # Errors
    ///
    /// Handshake errors, transport errors, or errors from the service.
    pub async fn serve_stream(&self, io: T) -> Result<()> {
        match WebSocketChannel::open_as_server(io, self.config.channel.clone()).await? {
            ServerOpen::Established(channel) => {
                let channel = match &self.transcoder {
                    Some(t) => channel.with_transcoder(Arc::clone(t)),
                    None => channel,
                };
                self.serve(channel).await
            }
            ServerOpen::PlainHttp { mut io, request } => {
                debug!(method = %request.method, path = %request.path, "rejecting plain HTTP");
                io.write_all(BAD_REQUEST_RESPONSE).await?;
                io.shutdown().await?;
                Ok(())
            }
        }
    }
}

impl Broker<TcpStream> {
    /// Accept connections forever, one task per connection.
    ///
    /// # Errors
    ///
    /// Returns only if `accept` fails.
    pub async fn listen(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, mode = ?self.config.mode, "broker listening");
        }
        loop {
            let (stream, peer) = listener.accept().await?;
            if let Err(err) = stream.set_nodelay(true) {
                debug!(error = %err, %peer, "set_nodelay failed");
            }
            let broker = Arc::clone(&self);
            tokio::spawn(async move {
                debug!(%peer, "connection accepted");
                if let Err(err) = broker.serve_stream(stream).await {
                    warn!(%peer, error = %err, "connection ended with error");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::{JsonRepository, ParamValue};
    use crate::testing::MockStream;

    fn config(mode: ServiceMode, services: &[&str]) -> BrokerConfig {
        BrokerConfig {
            mode,
            services: services.iter().map(|s| s.to_string()).collect(),
            ..BrokerConfig::default()
        }
    }

    #[test]
    fn test_service_mode_parse() {
        assert_eq!(ServiceMode::parse("*SINGLE").unwrap(), ServiceMode::Single);
        assert_eq!(ServiceMode::parse(" *ENUM ").unwrap(), ServiceMode::Enum);
        assert_eq!(ServiceMode::parse("*ANY").unwrap(), ServiceMode::Any);
        assert!(matches!(ServiceMode::parse("*ALL"), Err(Error::Config(_))));
    }

    #[test]
    fn test_permits_by_mode() {
        let single = config(ServiceMode::Single, &["A", "B"]);
        assert!(single.permits("A"));
        assert!(!single.permits("B"));

        let listed = config(ServiceMode::Enum, &["A", "B"]);
        assert!(listed.permits("B"));
        assert!(!listed.permits("C"));

        assert!(config(ServiceMode::Any, &[]).permits("C"));
    }

    #[test]
    fn test_config_from_repository() {
        let repo = JsonRepository::parse(
            r#"{"b": {"USER_LOGIN": "*NO", "SERVICE_MODE": "*ENUM", "SERVICES": ["ECHO"]}}"#,
        )
        .unwrap();
        let cfg = BrokerConfig::from_repository(&repo, "b").unwrap();
        assert!(!cfg.login_required);
        assert_eq!(cfg.mode, ServiceMode::Enum);
        assert_eq!(cfg.services, vec!["ECHO"]);
    }

    #[test]
    fn test_config_login_defaults_on() {
        let repo = JsonRepository::new()
            .with_param("b", "SERVICE_MODE", ParamValue::Text("*ANY".into()));
        assert!(BrokerConfig::from_repository(&repo, "b").unwrap().login_required);
    }

    #[test]
    fn test_config_requires_mode_and_single_service() {
        let repo = JsonRepository::new();
        assert!(matches!(
            BrokerConfig::from_repository(&repo, "b"),
            Err(Error::Config(_))
        ));

        let repo = repo.with_param("b", "SERVICE_MODE", ParamValue::Text("*SINGLE".into()));
        assert!(matches!(
            BrokerConfig::from_repository(&repo, "b"),
            Err(Error::Config(msg)) if msg.contains("*SINGLE")
        ));
    }

    #[test]
    fn test_static_credentials() {
        let creds = StaticCredentials::new().with_user("alice", "pw");
        assert!(creds.validate("alice", "pw").is_ok());
        assert!(matches!(creds.validate("alice", "x"), Err(Error::Auth(_))));
        assert!(matches!(creds.validate("bob", "pw"), Err(Error::Auth(_))));
    }

    #[test]
    fn test_registry_resolves_registered() {
        let registry: ServiceRegistry<MockStream> = ServiceRegistry::new()
            .register("ECHO", |_s: CsapSession<MockStream>, _u: Option<String>| async {
                Ok::<(), Error>(())
            })
            .register("TIME", |_s: CsapSession<MockStream>, _u: Option<String>| async {
                Ok::<(), Error>(())
            });
        assert_eq!(registry.names(), vec!["ECHO", "TIME"]);
        assert!(registry.resolve("ECHO").is_some());
        assert!(registry.resolve("NOPE").is_none());
    }

    fn login_broker() -> Broker<MockStream> {
        let cfg = BrokerConfig {
            login_required: true,
            ..BrokerConfig::default()
        };
        Broker::new(cfg, ServiceRegistry::new())
            .with_authenticator(StaticCredentials::new().with_user("alice", "pw"))
    }

    #[test]
    fn test_authenticate_codes() {
        let broker = login_broker();
        let request = OpenRequest::new("S");
        assert_eq!(broker.authenticate(&request), Err(HandshakeCode::MISSING_USER));

        let request = OpenRequest {
            user: Some("alice".into()),
            ..OpenRequest::new("S")
        };
        assert_eq!(broker.authenticate(&request), Err(HandshakeCode::MISSING_PASSWORD));

        let request = OpenRequest::new("S").with_credentials("alice", "bad");
        assert_eq!(broker.authenticate(&request), Err(HandshakeCode::REJECTED));

        let request = OpenRequest::new("S").with_credentials("alice", "pw");
        assert_eq!(broker.authenticate(&request), Ok(Some("alice".into())));
    }

    #[test]
    fn test_login_without_authenticator_rejects() {
        let cfg = BrokerConfig {
            login_required: true,
            ..BrokerConfig::default()
        };
        let broker: Broker<MockStream> = Broker::new(cfg, ServiceRegistry::new());
        let request = OpenRequest::new("S").with_credentials("alice", "pw");
        assert_eq!(broker.authenticate(&request), Err(HandshakeCode::REJECTED));
    }
}
