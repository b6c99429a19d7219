use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum GatewayConfigError {
    #[error("missing required gateway config field: {0}")]
    MissingField(&'static str),
}

/// Final, merged gateway configuration used by the running process.
///
/// Merge order (after DB connection): CLI > ENV > DB, then persist back to DB.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Stored as a hash (not plaintext).
    pub admin_key_hash: String,
    /// Database DSN used by this process.
    pub dsn: String,
    /// Redis-style KV endpoint; counters, token caches and quota windows
    /// live there so several processes can share them.
    pub kv_url: String,
    /// External URL the proxy health checker HEADs through each proxy.
    pub probe_url: String,
    /// Request logs older than this many days are purged daily.
    pub log_retention_days: u32,
}

/// Optional layer used when merging gateway config sources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewayConfigPatch {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub admin_key_hash: Option<String>,
    pub dsn: Option<String>,
    pub kv_url: Option<String>,
    pub probe_url: Option<String>,
    pub log_retention_days: Option<u32>,
}

impl GatewayConfigPatch {
    pub fn overlay(&mut self, other: GatewayConfigPatch) {
        if other.host.is_some() {
            self.host = other.host;
        }
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.admin_key_hash.is_some() {
            self.admin_key_hash = other.admin_key_hash;
        }
        if other.dsn.is_some() {
            self.dsn = other.dsn;
        }
        if other.kv_url.is_some() {
            self.kv_url = other.kv_url;
        }
        if other.probe_url.is_some() {
            self.probe_url = other.probe_url;
        }
        if other.log_retention_days.is_some() {
            self.log_retention_days = other.log_retention_days;
        }
    }

    pub fn into_config(self) -> Result<GatewayConfig, GatewayConfigError> {
        Ok(GatewayConfig {
            host: self.host.unwrap_or_else(|| "0.0.0.0".to_string()),
            port: self.port.unwrap_or(8790),
            admin_key_hash: self
                .admin_key_hash
                .ok_or(GatewayConfigError::MissingField("admin_key_hash"))?,
            dsn: self.dsn.ok_or(GatewayConfigError::MissingField("dsn"))?,
            kv_url: self
                .kv_url
                .unwrap_or_else(|| "redis://127.0.0.1:6379/0".to_string()),
            probe_url: self
                .probe_url
                .unwrap_or_else(|| "https://www.gstatic.com/generate_204".to_string()),
            log_retention_days: self.log_retention_days.unwrap_or(30),
        })
    }
}

impl From<GatewayConfig> for GatewayConfigPatch {
    fn from(value: GatewayConfig) -> Self {
        Self {
            host: Some(value.host),
            port: Some(value.port),
            admin_key_hash: Some(value.admin_key_hash),
            dsn: Some(value.dsn),
            kv_url: Some(value.kv_url),
            probe_url: Some(value.probe_url),
            log_retention_days: Some(value.log_retention_days),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_prefers_incoming_values() {
        let mut base = GatewayConfigPatch {
            host: Some("127.0.0.1".to_string()),
            port: Some(1000),
            ..GatewayConfigPatch::default()
        };
        base.overlay(GatewayConfigPatch {
            port: Some(2000),
            ..GatewayConfigPatch::default()
        });
        assert_eq!(base.host.as_deref(), Some("127.0.0.1"));
        assert_eq!(base.port, Some(2000));
    }

    #[test]
    fn into_config_requires_dsn() {
        let patch = GatewayConfigPatch {
            admin_key_hash: Some("hash".to_string()),
            ..GatewayConfigPatch::default()
        };
        assert!(patch.into_config().is_err());
    }
}
