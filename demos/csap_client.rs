//! CSAP client for the echo broker.
//!
//! Run the broker first: cargo run --example csap_echo_server
//! Then run: cargo run --example csap_client [message]

use std::error::Error;

use csap::{Config, CsapSession, Format, ServiceTarget};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let message = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "Hello, CSAP!".to_string());

    let target = ServiceTarget::new("ECHO", "127.0.0.1", 9001).with_credentials("demo", "demo");
    let mut session = CsapSession::new(Config::client());
    session.open_service(&target).await?;
    println!("Session {}", session.session_id());

    // split the message in two parts to show fragment-wise delivery
    let bytes = message.into_bytes();
    let (head, tail) = bytes.split_at(bytes.len() / 2);
    for part in [head, tail].into_iter().filter(|p| !p.is_empty()) {
        session.put(part.to_vec())?;
    }
    session.send(Some(b"{\"op\":\"echo\"}"), Format::Text, true).await?;

    let control = session.receive().await?;
    println!(
        "Received {} bytes in {} fragments, user control {:?}",
        control.data_size,
        control.num_fragments,
        String::from_utf8_lossy(session.user_ctl())
    );
    for i in 0..control.num_fragments {
        let part = session.get_data_ref().await?;
        println!("  fragment {i}: {}", String::from_utf8_lossy(part));
    }

    session.close_service().await?;
    Ok(())
}
