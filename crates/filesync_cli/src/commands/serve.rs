//! Serve command implementation.

use crate::http;
use filesync_server::{spawn_reaper, CredentialStore, Dispatcher, ServerConfig};
use std::net::SocketAddr;
use std::sync::Arc;

const DEFAULT_USERNAME: &str = "admin";
const DEFAULT_PASSWORD: &str = "password";

/// Runs the serve command until interrupted.
pub async fn run(config: ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    ensure_users_file(&config)?;

    let dispatcher = Arc::new(Dispatcher::from_config(&config)?);
    let reaper = spawn_reaper(Arc::clone(&dispatcher), config.reap_interval);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);

    let app = http::build_router(dispatcher);
    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    reaper.abort();
    served?;
    tracing::info!("Server stopped");
    Ok(())
}

/// Creates a users file with the default account if none exists.
fn ensure_users_file(config: &ServerConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.users_file.exists() {
        return Ok(());
    }

    let mut store = CredentialStore::new();
    store.insert(DEFAULT_USERNAME, DEFAULT_PASSWORD)?;
    store.save(&config.users_file)?;
    tracing::warn!(
        "Created {} with default user '{}'; change its password with `filesync add-user`",
        config.users_file.display(),
        DEFAULT_USERNAME
    );
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

#[cfg(test)]
mod tests {
    use super::*;
    use filesync_server::AuthenticationGate;
    use tempfile::TempDir;

    #[test]
    fn bootstraps_default_user() {
        let dir = TempDir::new().unwrap();
        let config = ServerConfig::new(dir.path());

        ensure_users_file(&config).unwrap();
        let gate = AuthenticationGate::new(CredentialStore::load(&config.users_file).unwrap());
        assert!(gate.authenticate(DEFAULT_USERNAME, DEFAULT_PASSWORD));
    }

    #[test]
    fn keeps_existing_users_file() {
        let dir = TempDir::new().unwrap();
        let config = ServerConfig::new(dir.path());
        CredentialStore::from_pairs([("alice", "secret")])
            .save(&config.users_file)
            .unwrap();

        ensure_users_file(&config).unwrap();
        let store = CredentialStore::load(&config.users_file).unwrap();
        assert_eq!(store.usernames().collect::<Vec<_>>(), ["alice"]);
    }
}
