use std::sync::Arc;

use crate::AppState;
use crate::config::{AuthConfig, RelayConfig};
use crate::db::Database;
use crate::metrics::RelayMetrics;
use crate::repository::MarketRepository;
use crate::ws::RelayServer;

fn test_auth_config(require_token: bool) -> Arc<AuthConfig> {
    Arc::new(AuthConfig {
        require_token,
        session_ttl_secs: 3600,
    })
}

fn relay_for(repository: &Arc<MarketRepository>, auth: Arc<AuthConfig>) -> RelayServer {
    RelayServer::new(
        repository.clone(),
        repository.clone(),
        RelayConfig::default(),
        auth,
        Arc::new(RelayMetrics::new()),
    )
}

/// A relay wired to a fresh in-memory repository. The returned repository
/// shares the relay's database, for seeding and inspecting history.
pub async fn test_relay(require_token: bool) -> (RelayServer, MarketRepository) {
    let repository = Arc::new(crate::repository::test_helpers::test_repository().await);
    let relay = relay_for(&repository, test_auth_config(require_token));
    (relay, repository.as_ref().clone())
}

/// Build a fully-wired `AppState` backed by an in-memory SQLite database.
pub async fn test_app_state(require_token: bool) -> AppState {
    let repository = Arc::new(crate::repository::test_helpers::test_repository().await);
    let db = Arc::new(Database {
        pool: repository.pool.clone(),
    });
    let auth_config = test_auth_config(require_token);
    let relay = relay_for(&repository, auth_config.clone());

    AppState {
        db,
        metrics: relay.metrics().clone(),
        repository,
        relay,
        auth_config,
    }
}
