//! # csap - Service sessions over RFC 6455 WebSocket
//!
//! `csap` layers the CSAP session protocol on an async WebSocket channel.
//!
//! ## Layers
//!
//! - **`protocol`** - frame headers, masking, opcodes and the HTTP upgrade
//! - **`codec`** - buffered frame I/O over any `AsyncRead + AsyncWrite`
//! - **`channel`** - one upgraded connection: send, receive, reassembly,
//!   ping/pong and close handling, text transcoding
//! - **`csap`** - control frames, scatter-gather send, fragment-wise
//!   receive, the open-handshake and the broker that dispatches services
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use csap::{Broker, BrokerConfig, CsapSession, ServiceRegistry};
//! use tokio::net::{TcpListener, TcpStream};
//!
//! let registry = ServiceRegistry::new().register(
//!     "ECHO",
//!     |mut session: CsapSession<TcpStream>, _user: Option<String>| async move {
//!         session.receive().await?;
//!         Ok(())
//!     },
//! );
//! let broker = Arc::new(Broker::new(BrokerConfig::default(), registry));
//! broker.listen(TcpListener::bind("0.0.0.0:8080").await?).await?;
//! ```

pub mod channel;
pub mod codec;
pub mod config;
pub mod csap;
pub mod error;
pub mod protocol;
pub mod repo;
pub mod transcode;

#[cfg(test)]
mod testing;

pub use channel::{ChannelState, CopyOut, FrameInfo, Role, ServerOpen, WebSocketChannel};
pub use config::{Config, Limits, Timeouts};
pub use csap::{
    Admission, Authenticator, Broker, BrokerConfig, ControlFrame, CsapSession, Format,
    HandshakeCode, HandshakeReply, NULL_SESSION_ID, OpenRequest, ServiceHandler, ServiceMode,
    ServiceRegistry, ServiceResolver, ServiceTarget, StaticCredentials, WireFormat,
};
pub use error::{Error, ErrorKind, Result};
pub use protocol::{OpCode, WS_GUID, compute_accept_key};
pub use repo::{ConfigRepository, JsonRepository, ParamValue};
pub use transcode::{Latin1Transcoder, TextTranscoder, Utf8Passthrough};

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpStream;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn test_public_types_are_send() {
        assert_send::<Error>();
        assert_send::<Config>();
        assert_send::<Limits>();
        assert_send::<ControlFrame>();
        assert_send::<ChannelState>();
        assert_send::<Role>();
        assert_send::<WebSocketChannel<TcpStream>>();
        assert_send::<CsapSession<TcpStream>>();
        assert_send::<Broker<TcpStream>>();
    }

    #[test]
    fn test_public_types_are_sync() {
        assert_sync::<Error>();
        assert_sync::<Config>();
        assert_sync::<Limits>();
        assert_sync::<ControlFrame>();
        assert_sync::<ChannelState>();
        assert_sync::<Role>();
        assert_sync::<Broker<TcpStream>>();
        assert_sync::<JsonRepository>();
    }
}
