pub mod accounts;
pub mod client_keys;
pub mod gateway_config;
pub mod model_mappings;
pub mod providers;
pub mod proxies;
pub mod proxy_daily_stats;
pub mod quota_patterns;
pub mod request_logs;

pub use accounts::Entity as Accounts;
pub use client_keys::Entity as ClientKeys;
pub use gateway_config::Entity as GatewayConfigRow;
pub use model_mappings::Entity as ModelMappings;
pub use providers::Entity as Providers;
pub use proxies::Entity as Proxies;
pub use proxy_daily_stats::Entity as ProxyDailyStats;
pub use quota_patterns::Entity as QuotaPatterns;
pub use request_logs::Entity as RequestLogs;
