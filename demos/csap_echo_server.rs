//! CSAP broker serving an `ECHO` and a `TIME` service.
//!
//! Run with: cargo run --example csap_echo_server [repository.json]
//!
//! Without a repository file the broker accepts any registered service and
//! requires no login. With one, the `broker` section is read:
//!
//! ```json
//! { "broker": { "USER_LOGIN": "*NO", "SERVICE_MODE": "*ENUM", "SERVICES": ["ECHO"] } }
//! ```

use std::error::Error;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use csap::{Broker, BrokerConfig, CsapSession, Format, JsonRepository, ServiceRegistry, StaticCredentials};
use tokio::net::{TcpListener, TcpStream};
use tracing::info;

const ADDR: &str = "127.0.0.1:9001";

async fn echo(mut session: CsapSession<TcpStream>, user: Option<String>) -> csap::Result<()> {
    info!(sid = session.session_id(), ?user, "echo service started");
    loop {
        let control = match session.receive().await {
            Ok(control) => control,
            Err(csap::Error::ConnectionClosed(_)) => return Ok(()),
            Err(err) => return Err(err),
        };
        for _ in 0..control.num_fragments {
            let part = session.get_data_ref().await?.to_vec();
            session.put(part)?;
        }
        let ctl = session.user_ctl().to_vec();
        session.send(Some(&ctl), control.format, true).await?;
    }
}

async fn time(mut session: CsapSession<TcpStream>, _user: Option<String>) -> csap::Result<()> {
    loop {
        match session.receive().await {
            Ok(_) => {}
            Err(csap::Error::ConnectionClosed(_)) => return Ok(()),
            Err(err) => return Err(err),
        }
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        session.put(now.to_string().into_bytes())?;
        session.send(None, Format::Text, true).await?;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => BrokerConfig::from_repository(&JsonRepository::from_path(path)?, "broker")?,
        None => BrokerConfig::default(),
    };

    let registry = ServiceRegistry::new()
        .register("ECHO", |s: CsapSession<TcpStream>, u: Option<String>| echo(s, u))
        .register("TIME", |s: CsapSession<TcpStream>, u: Option<String>| time(s, u));

    let broker = Broker::new(config, registry)
        .with_authenticator(StaticCredentials::new().with_user("demo", "demo"));

    println!("CSAP broker listening on ws://{ADDR}");
    let listener = TcpListener::bind(ADDR).await?;
    Arc::new(broker).listen(listener).await?;
    Ok(())
}
