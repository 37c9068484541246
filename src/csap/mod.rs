//! CSAP: service sessions over a WebSocket channel.
//!
//! A CSAP message is a control frame, an optional user-control block and
//! zero or more payload fragments, each carried in its own WebSocket frame.
//! Before the first message the client names a service in an open request
//! and receives a session id from the broker.
//!
//! ## Client
//!
//! ```rust,ignore
//! use csap::{Config, CsapSession, Format, ServiceTarget};
//!
//! let mut session = CsapSession::new(Config::client());
//! session.open_service(&ServiceTarget::new("ECHO", "localhost", 8080)).await?;
//! session.put(&b"hello"[..])?;
//! session.send(None, Format::Text, true).await?;
//!
//! let control = session.receive().await?;
//! for _ in 0..control.num_fragments {
//!     println!("{:?}", session.get_data_ref().await?);
//! }
//! session.close_service().await?;
//! ```

mod broker;
mod control;
mod handshake;
mod session;
mod target;

pub use broker::{
    Admission, Authenticator, Broker, BrokerConfig, ServiceFuture, ServiceHandler, ServiceMode,
    ServiceRegistry, ServiceResolver, StaticCredentials,
};
pub use control::{CONTROL_FRAME_LEN, ControlFrame, Format};
pub use handshake::{
    FIXED_REPLY_LEN, FIXED_REQUEST_LEN, HANDSHAKE_VERSION, HandshakeCode, HandshakeReply,
    MAX_PASSWORD_LEN, NULL_SESSION_ID, OpenRequest, WireFormat,
};
pub use session::CsapSession;
pub use target::ServiceTarget;
