//! Request pipeline and supporting state machines: executor, proxy pool,
//! quota tracker, token manager, stats writer and the background loops that
//! keep them honest.

pub mod bootstrap;
pub mod error;
pub mod executor;
pub mod proxy_health;
pub mod proxy_pool;
pub mod quota;
pub mod reconcile;
pub mod resolve;
pub mod stats;
pub mod tokens;

pub use bootstrap::{CliArgs, Gateway, bootstrap, bootstrap_from_env, hash_admin_key};
pub use error::GatewayError;
pub use executor::{Executor, ExecutorConfig};
pub use proxy_pool::{ProxyPool, ProxyPoolConfig};
pub use quota::{QuotaConfig, QuotaTracker};
pub use resolve::{KvAliasResolver, KvRotation};
pub use stats::{RequestRecord, StatsTracker};
pub use tokens::TokenManager;
