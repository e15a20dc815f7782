use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use hearst_auth::{mint_token, Keypair, Session, MAX_SESSION_SECS};
use hearst_store::Store;
use hearst_stream::EventStream;

const SERVER_KEY_FILE: &str = "server.key";

/// Shared server state reachable from every connection and request handler.
pub struct AppState {
    pub store: Store,
    pub stream: EventStream,
    /// Process-wide token-signing identity, immutable after init.
    pub server_key: Keypair,
    /// Domain stamped on threads created by this server.
    pub domain: String,
}

impl AppState {
    pub fn new(
        store: Store,
        stream: EventStream,
        server_key: Keypair,
        domain: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            stream,
            server_key,
            domain: domain.into(),
        })
    }

    /// Build a 24-hour session envelope for a client key the server holds
    /// (the `new`/`temp` handshake modes and first-run registration).
    pub fn mint_session(&self, client: &Keypair) -> String {
        let mut session = Session::new(mint_token(&self.server_key), MAX_SESSION_SECS);
        session.sign(client);
        session.encode()
    }
}

/// Load the server's signing key from `state_dir`, or create and persist a
/// fresh one on first run.
pub fn load_or_create_server_key(state_dir: &Path) -> anyhow::Result<Keypair> {
    let key_path = state_dir.join(SERVER_KEY_FILE);
    if key_path.exists() {
        let armored = std::fs::read_to_string(&key_path)
            .with_context(|| format!("failed to read {}", key_path.display()))?;
        return Keypair::from_private_armored(&armored)
            .map_err(|err| anyhow::anyhow!("invalid server key file: {err}"));
    }

    let keypair = Keypair::generate();
    std::fs::write(&key_path, keypair.private_armored())
        .with_context(|| format!("failed to write {}", key_path.display()))?;
    tracing::info!(path = %key_path.display(), "generated server session key");
    Ok(keypair)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_key_persists_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let first = load_or_create_server_key(dir.path()).unwrap();
        let second = load_or_create_server_key(dir.path()).unwrap();
        assert_eq!(first.public_armored(), second.public_armored());
    }

    #[tokio::test]
    async fn minted_session_validates() {
        let server = Keypair::generate();
        let client = Keypair::generate();
        let state = AppState::new(
            Store::open_in_memory().unwrap(),
            EventStream::new(hearst_stream::Bus::new()),
            server.clone(),
            "example.com",
        );

        let encoded = state.mint_session(&client);
        let session = Session::parse(&encoded).unwrap();
        session
            .validate(&client.public_key(), &server.public_key())
            .unwrap();
    }
}
