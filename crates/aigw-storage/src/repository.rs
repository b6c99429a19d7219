#![allow(clippy::needless_update)]

use sea_orm::ExprTrait;
use sea_orm::entity::prelude::*;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveValue, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Schema,
};
use time::{Date, OffsetDateTime};

use aigw_provider_core::{Account, AuthKind, ProviderDescriptor, WireFormat};

use crate::db::connect_shared;
use crate::entities;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("db error: {0}")]
    Db(#[from] sea_orm::DbErr),
    #[error("serde json error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("row not found: {0}")]
    NotFound(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyHealth {
    Healthy,
    Degraded,
    Down,
}

impl ProxyHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyHealth::Healthy => "healthy",
            ProxyHealth::Degraded => "degraded",
            ProxyHealth::Down => "down",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "degraded" => ProxyHealth::Degraded,
            "down" => ProxyHealth::Down,
            _ => ProxyHealth::Healthy,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestLogInsert {
    pub provider_id: String,
    pub account_id: String,
    pub proxy_id: Option<i64>,
    pub model: String,
    pub status_code: i32,
    pub latency_ms: i64,
    pub retry_count: i32,
    pub switched_from_account_id: Option<String>,
    pub error: Option<String>,
    pub trace_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuotaPattern {
    pub request_limit: Option<i64>,
    pub token_limit: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct DailyStatRow {
    pub proxy_id: i64,
    pub provider_id: String,
    pub day: Date,
    pub request_count: i64,
    pub success_count: i64,
    pub error_count: i64,
    pub total_latency_ms: i64,
}

#[derive(Debug, Clone)]
pub struct ProxyStatsQuery {
    pub proxy_id: Option<i64>,
    pub from: Date,
    pub to: Date,
}

/// Typed CRUD over the relational store. Request-path reads go through the
/// in-memory state manager; the repository serves bootstrap, reconciliation,
/// admin mutations and the stats writer.
#[derive(Clone)]
pub struct Repository {
    db: DatabaseConnection,
}

impl Repository {
    pub async fn connect(dsn: &str) -> Result<Self, DbErr> {
        let db = connect_shared(dsn).await?;
        Ok(Self { db })
    }

    /// Open a dedicated connection, bypassing the process-wide cache. Tests
    /// use this to give every case its own database.
    pub async fn connect_isolated(dsn: &str) -> Result<Self, DbErr> {
        let db = sea_orm::Database::connect(dsn).await?;
        Ok(Self { db })
    }

    pub fn from_connection(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Entity-first schema sync; run once at bootstrap.
    pub async fn sync(&self) -> StorageResult<()> {
        Schema::new(self.db.get_database_backend())
            .builder()
            .register(entities::Providers)
            .register(entities::Accounts)
            .register(entities::Proxies)
            .register(entities::RequestLogs)
            .register(entities::ProxyDailyStats)
            .register(entities::ModelMappings)
            .register(entities::QuotaPatterns)
            .register(entities::ClientKeys)
            .register(entities::GatewayConfigRow)
            .sync(&self.db)
            .await?;
        Ok(())
    }

    pub async fn health(&self) -> StorageResult<()> {
        entities::GatewayConfigRow::find()
            .order_by_asc(entities::gateway_config::Column::Id)
            .one(&self.db)
            .await?;
        Ok(())
    }

    // ---- gateway config ----

    pub async fn get_gateway_config(&self) -> StorageResult<Option<Json>> {
        let row = entities::GatewayConfigRow::find()
            .order_by_asc(entities::gateway_config::Column::Id)
            .one(&self.db)
            .await?;
        Ok(row.map(|row| row.config_json))
    }

    pub async fn upsert_gateway_config(&self, config_json: Json) -> StorageResult<()> {
        use entities::gateway_config::Column;
        let active = entities::gateway_config::ActiveModel {
            id: ActiveValue::Set(1),
            config_json: ActiveValue::Set(config_json),
            updated_at: ActiveValue::Set(OffsetDateTime::now_utc()),
            ..Default::default()
        };
        entities::GatewayConfigRow::insert(active)
            .on_conflict(
                OnConflict::column(Column::Id)
                    .update_columns([Column::ConfigJson, Column::UpdatedAt])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(())
    }

    // ---- providers ----

    pub async fn list_providers(&self) -> StorageResult<Vec<entities::providers::Model>> {
        Ok(entities::Providers::find().all(&self.db).await?)
    }

    pub async fn upsert_provider(
        &self,
        descriptor: &ProviderDescriptor,
        enabled: bool,
    ) -> StorageResult<()> {
        use entities::providers::Column;
        let now = OffsetDateTime::now_utc();
        let active = entities::providers::ActiveModel {
            id: ActiveValue::Set(descriptor.id.clone()),
            name: ActiveValue::Set(descriptor.name.clone()),
            base_urls: ActiveValue::Set(serde_json::to_value(&descriptor.base_urls)?),
            auth_kind: ActiveValue::Set(serde_json::to_value(descriptor.auth_kind)?
                .as_str()
                .unwrap_or("api_key")
                .to_string()),
            models: ActiveValue::Set(serde_json::to_value(&descriptor.models)?),
            wire: ActiveValue::Set(serde_json::to_value(descriptor.wire)?
                .as_str()
                .unwrap_or("openai")
                .to_string()),
            enabled: ActiveValue::Set(enabled),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
            ..Default::default()
        };
        entities::Providers::insert(active)
            .on_conflict(
                OnConflict::column(Column::Id)
                    .update_columns([
                        Column::Name,
                        Column::BaseUrls,
                        Column::AuthKind,
                        Column::Models,
                        Column::Wire,
                        Column::Enabled,
                        Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(())
    }

    /// Insert seed providers that are not present yet; existing rows are
    /// left untouched so admin edits survive restarts.
    pub async fn ensure_providers(&self, seeds: &[ProviderDescriptor]) -> StorageResult<()> {
        let existing: std::collections::HashSet<String> = self
            .list_providers()
            .await?
            .into_iter()
            .map(|row| row.id)
            .collect();
        for seed in seeds {
            if existing.contains(&seed.id) {
                continue;
            }
            self.upsert_provider(seed, true).await?;
        }
        Ok(())
    }

    pub async fn delete_provider(&self, id: &str) -> StorageResult<()> {
        entities::Providers::delete_by_id(id).exec(&self.db).await?;
        Ok(())
    }

    // ---- accounts ----

    pub async fn get_account(&self, id: &str) -> StorageResult<Option<Account>> {
        let row = entities::Accounts::find_by_id(id).one(&self.db).await?;
        Ok(row.map(row_to_account))
    }

    pub async fn list_accounts(
        &self,
        limit: u64,
        offset: u64,
    ) -> StorageResult<Vec<entities::accounts::Model>> {
        Ok(entities::Accounts::find()
            .order_by_asc(entities::accounts::Column::Id)
            .limit(limit)
            .offset(offset)
            .all(&self.db)
            .await?)
    }

    pub async fn list_active_accounts_by_provider(
        &self,
        provider_id: &str,
    ) -> StorageResult<Vec<Account>> {
        use entities::accounts::Column;
        let rows = entities::Accounts::find()
            .filter(Column::ProviderId.eq(provider_id))
            .filter(Column::IsActive.eq(true))
            .order_by_asc(Column::Id)
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(row_to_account).collect())
    }

    pub async fn upsert_account(&self, account: &Account) -> StorageResult<()> {
        use entities::accounts::Column;
        let now = OffsetDateTime::now_utc();
        let active = entities::accounts::ActiveModel {
            id: ActiveValue::Set(account.id.clone()),
            provider_id: ActiveValue::Set(account.provider_id.clone()),
            name: ActiveValue::Set(account.name.clone()),
            auth_data: ActiveValue::Set(account.auth_data.clone()),
            proxy_id: ActiveValue::Set(account.proxy_id),
            proxy_url: ActiveValue::Set(account.proxy_url.clone()),
            is_active: ActiveValue::Set(account.is_active),
            created_by: ActiveValue::Set(account.created_by.clone()),
            success_count: ActiveValue::Set(0),
            failure_count: ActiveValue::Set(0),
            last_used_at: ActiveValue::Set(None),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
            ..Default::default()
        };
        entities::Accounts::insert(active)
            .on_conflict(
                OnConflict::column(Column::Id)
                    .update_columns([
                        Column::ProviderId,
                        Column::Name,
                        Column::AuthData,
                        Column::ProxyId,
                        Column::ProxyUrl,
                        Column::IsActive,
                        Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn delete_account(&self, id: &str) -> StorageResult<()> {
        entities::Accounts::delete_by_id(id).exec(&self.db).await?;
        Ok(())
    }

    pub async fn set_account_active(&self, id: &str, is_active: bool) -> StorageResult<()> {
        use entities::accounts::Column;
        entities::Accounts::update_many()
            .col_expr(Column::IsActive, Expr::value(is_active))
            .col_expr(Column::UpdatedAt, Expr::value(OffsetDateTime::now_utc()))
            .filter(Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn update_auth_data(&self, id: &str, auth_data: &Json) -> StorageResult<()> {
        use entities::accounts::Column;
        entities::Accounts::update_many()
            .col_expr(Column::AuthData, Expr::value(auth_data.clone()))
            .col_expr(Column::UpdatedAt, Expr::value(OffsetDateTime::now_utc()))
            .filter(Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn update_last_used(&self, id: &str) -> StorageResult<()> {
        use entities::accounts::Column;
        entities::Accounts::update_many()
            .col_expr(Column::LastUsedAt, Expr::value(OffsetDateTime::now_utc()))
            .filter(Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn update_health_success(&self, id: &str) -> StorageResult<()> {
        use entities::accounts::Column;
        entities::Accounts::update_many()
            .col_expr(
                Column::SuccessCount,
                Expr::col(Column::SuccessCount).add(1),
            )
            .col_expr(Column::LastUsedAt, Expr::value(OffsetDateTime::now_utc()))
            .filter(Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn update_health_failure(&self, id: &str) -> StorageResult<()> {
        use entities::accounts::Column;
        entities::Accounts::update_many()
            .col_expr(
                Column::FailureCount,
                Expr::col(Column::FailureCount).add(1),
            )
            .filter(Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn update_account_proxy(
        &self,
        id: &str,
        proxy_id: i64,
        proxy_url: &str,
    ) -> StorageResult<()> {
        use entities::accounts::Column;
        entities::Accounts::update_many()
            .col_expr(Column::ProxyId, Expr::value(proxy_id))
            .col_expr(Column::ProxyUrl, Expr::value(proxy_url))
            .col_expr(Column::UpdatedAt, Expr::value(OffsetDateTime::now_utc()))
            .filter(Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn clear_account_proxy(&self, id: &str) -> StorageResult<()> {
        use entities::accounts::Column;
        entities::Accounts::update_many()
            .col_expr(Column::ProxyId, Expr::value(Option::<i64>::None))
            .col_expr(Column::ProxyUrl, Expr::value(Option::<String>::None))
            .col_expr(Column::UpdatedAt, Expr::value(OffsetDateTime::now_utc()))
            .filter(Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    // ---- proxies ----

    pub async fn list_proxies(&self) -> StorageResult<Vec<entities::proxies::Model>> {
        use entities::proxies::Column;
        Ok(entities::Proxies::find()
            .order_by_asc(Column::Priority)
            .order_by_asc(Column::Id)
            .all(&self.db)
            .await?)
    }

    pub async fn list_active_proxies(&self) -> StorageResult<Vec<entities::proxies::Model>> {
        use entities::proxies::Column;
        Ok(entities::Proxies::find()
            .filter(Column::IsActive.eq(true))
            .order_by_asc(Column::Priority)
            .order_by_asc(Column::Id)
            .all(&self.db)
            .await?)
    }

    pub async fn get_proxy(&self, id: i64) -> StorageResult<Option<entities::proxies::Model>> {
        Ok(entities::Proxies::find_by_id(id).one(&self.db).await?)
    }

    pub async fn create_proxy(
        &self,
        url: &str,
        protocol: &str,
        max_accounts: i32,
        priority: i32,
    ) -> StorageResult<i64> {
        let now = OffsetDateTime::now_utc();
        let active = entities::proxies::ActiveModel {
            id: ActiveValue::NotSet,
            url: ActiveValue::Set(url.to_string()),
            protocol: ActiveValue::Set(protocol.to_string()),
            is_active: ActiveValue::Set(true),
            health_status: ActiveValue::Set(ProxyHealth::Healthy.as_str().to_string()),
            max_accounts: ActiveValue::Set(max_accounts),
            current_accounts: ActiveValue::Set(0),
            priority: ActiveValue::Set(priority),
            marked_down_at: ActiveValue::Set(None),
            latency_ms: ActiveValue::Set(None),
            failure_count: ActiveValue::Set(0),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
            ..Default::default()
        };
        let result = entities::Proxies::insert(active).exec(&self.db).await?;
        Ok(result.last_insert_id)
    }

    pub async fn set_proxy_active(&self, id: i64, is_active: bool) -> StorageResult<()> {
        use entities::proxies::Column;
        entities::Proxies::update_many()
            .col_expr(Column::IsActive, Expr::value(is_active))
            .col_expr(Column::UpdatedAt, Expr::value(OffsetDateTime::now_utc()))
            .filter(Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn delete_proxy(&self, id: i64) -> StorageResult<()> {
        entities::Proxies::delete_by_id(id).exec(&self.db).await?;
        Ok(())
    }

    pub async fn adjust_proxy_accounts(&self, id: i64, delta: i32) -> StorageResult<()> {
        use entities::proxies::Column;
        entities::Proxies::update_many()
            .col_expr(
                Column::CurrentAccounts,
                Expr::col(Column::CurrentAccounts).add(delta),
            )
            .col_expr(Column::UpdatedAt, Expr::value(OffsetDateTime::now_utc()))
            .filter(Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn set_proxy_health(
        &self,
        id: i64,
        health: ProxyHealth,
        marked_down_at: Option<OffsetDateTime>,
        latency_ms: Option<i32>,
    ) -> StorageResult<()> {
        use entities::proxies::Column;
        let mut update = entities::Proxies::update_many()
            .col_expr(Column::HealthStatus, Expr::value(health.as_str()))
            .col_expr(Column::MarkedDownAt, Expr::value(marked_down_at))
            .col_expr(Column::UpdatedAt, Expr::value(OffsetDateTime::now_utc()));
        if let Some(latency_ms) = latency_ms {
            update = update.col_expr(Column::LatencyMs, Expr::value(latency_ms));
        }
        if health == ProxyHealth::Down {
            update = update.col_expr(
                Column::FailureCount,
                Expr::col(Column::FailureCount).add(1),
            );
        }
        update.filter(Column::Id.eq(id)).exec(&self.db).await?;
        Ok(())
    }

    /// Recompute `current_accounts` from the accounts table; run after
    /// manual edits bypassed the pool bookkeeping.
    pub async fn recalculate_account_counts(&self) -> StorageResult<()> {
        use entities::accounts::Column as AccountColumn;
        let rows = entities::Accounts::find()
            .filter(AccountColumn::IsActive.eq(true))
            .filter(AccountColumn::ProxyId.is_not_null())
            .all(&self.db)
            .await?;

        let mut counts: std::collections::HashMap<i64, i32> = std::collections::HashMap::new();
        for row in rows {
            if let Some(proxy_id) = row.proxy_id {
                *counts.entry(proxy_id).or_default() += 1;
            }
        }

        use entities::proxies::Column;
        for proxy in self.list_proxies().await? {
            let count = counts.get(&proxy.id).copied().unwrap_or(0);
            if count != proxy.current_accounts {
                entities::Proxies::update_many()
                    .col_expr(Column::CurrentAccounts, Expr::value(count))
                    .filter(Column::Id.eq(proxy.id))
                    .exec(&self.db)
                    .await?;
            }
        }
        Ok(())
    }

    // ---- request logs & stats ----

    pub async fn create_request_log(&self, log: RequestLogInsert) -> StorageResult<()> {
        let active = entities::request_logs::ActiveModel {
            id: ActiveValue::NotSet,
            created_at: ActiveValue::Set(OffsetDateTime::now_utc()),
            provider_id: ActiveValue::Set(log.provider_id),
            account_id: ActiveValue::Set(log.account_id),
            proxy_id: ActiveValue::Set(log.proxy_id),
            model: ActiveValue::Set(log.model),
            status_code: ActiveValue::Set(log.status_code),
            latency_ms: ActiveValue::Set(log.latency_ms),
            retry_count: ActiveValue::Set(log.retry_count),
            switched_from_account_id: ActiveValue::Set(log.switched_from_account_id),
            error: ActiveValue::Set(log.error),
            trace_id: ActiveValue::Set(log.trace_id),
            ..Default::default()
        };
        entities::RequestLogs::insert(active).exec(&self.db).await?;
        Ok(())
    }

    pub async fn get_recent_request_logs(
        &self,
        limit: u64,
    ) -> StorageResult<Vec<entities::request_logs::Model>> {
        use entities::request_logs::Column;
        Ok(entities::RequestLogs::find()
            .order_by_desc(Column::CreatedAt)
            .order_by_desc(Column::Id)
            .limit(limit)
            .all(&self.db)
            .await?)
    }

    pub async fn delete_old_logs(&self, before: OffsetDateTime) -> StorageResult<u64> {
        use entities::request_logs::Column;
        let result = entities::RequestLogs::delete_many()
            .filter(Column::CreatedAt.lt(before))
            .exec(&self.db)
            .await?;
        Ok(result.rows_affected)
    }

    pub async fn increment_proxy_stats(
        &self,
        proxy_id: i64,
        provider_id: &str,
        day: Date,
        success: bool,
        latency_ms: i64,
    ) -> StorageResult<()> {
        use entities::proxy_daily_stats::Column;
        let (success_inc, error_inc) = if success { (1, 0) } else { (0, 1) };

        let updated = entities::ProxyDailyStats::update_many()
            .col_expr(Column::RequestCount, Expr::col(Column::RequestCount).add(1))
            .col_expr(
                Column::SuccessCount,
                Expr::col(Column::SuccessCount).add(success_inc),
            )
            .col_expr(
                Column::ErrorCount,
                Expr::col(Column::ErrorCount).add(error_inc),
            )
            .col_expr(
                Column::TotalLatencyMs,
                Expr::col(Column::TotalLatencyMs).add(latency_ms),
            )
            .filter(Column::ProxyId.eq(proxy_id))
            .filter(Column::ProviderId.eq(provider_id))
            .filter(Column::Day.eq(day))
            .exec(&self.db)
            .await?;
        if updated.rows_affected > 0 {
            return Ok(());
        }

        let active = entities::proxy_daily_stats::ActiveModel {
            id: ActiveValue::NotSet,
            proxy_id: ActiveValue::Set(proxy_id),
            provider_id: ActiveValue::Set(provider_id.to_string()),
            day: ActiveValue::Set(day),
            request_count: ActiveValue::Set(1),
            success_count: ActiveValue::Set(success_inc),
            error_count: ActiveValue::Set(error_inc),
            total_latency_ms: ActiveValue::Set(latency_ms),
            ..Default::default()
        };
        entities::ProxyDailyStats::insert(active)
            .on_conflict(
                OnConflict::columns([Column::ProxyId, Column::ProviderId, Column::Day])
                    .update_columns([
                        Column::RequestCount,
                        Column::SuccessCount,
                        Column::ErrorCount,
                        Column::TotalLatencyMs,
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn get_proxy_stats_range(
        &self,
        query: ProxyStatsQuery,
    ) -> StorageResult<Vec<DailyStatRow>> {
        use entities::proxy_daily_stats::Column;
        let mut find = entities::ProxyDailyStats::find()
            .filter(Column::Day.gte(query.from))
            .filter(Column::Day.lte(query.to))
            .order_by_asc(Column::Day);
        if let Some(proxy_id) = query.proxy_id {
            find = find.filter(Column::ProxyId.eq(proxy_id));
        }
        let rows = find.all(&self.db).await?;
        Ok(rows
            .into_iter()
            .map(|row| DailyStatRow {
                proxy_id: row.proxy_id,
                provider_id: row.provider_id,
                day: row.day,
                request_count: row.request_count,
                success_count: row.success_count,
                error_count: row.error_count,
                total_latency_ms: row.total_latency_ms,
            })
            .collect())
    }

    // ---- model mappings ----

    pub async fn list_model_mappings(
        &self,
    ) -> StorageResult<Vec<entities::model_mappings::Model>> {
        Ok(entities::ModelMappings::find().all(&self.db).await?)
    }

    pub async fn get_model_mapping(
        &self,
        alias: &str,
    ) -> StorageResult<Option<entities::model_mappings::Model>> {
        use entities::model_mappings::Column;
        Ok(entities::ModelMappings::find()
            .filter(Column::Alias.eq(alias))
            .one(&self.db)
            .await?)
    }

    pub async fn upsert_model_mapping(
        &self,
        alias: &str,
        provider_id: &str,
        upstream_model: &str,
    ) -> StorageResult<()> {
        use entities::model_mappings::Column;
        let active = entities::model_mappings::ActiveModel {
            id: ActiveValue::NotSet,
            alias: ActiveValue::Set(alias.to_string()),
            provider_id: ActiveValue::Set(provider_id.to_string()),
            upstream_model: ActiveValue::Set(upstream_model.to_string()),
            updated_at: ActiveValue::Set(OffsetDateTime::now_utc()),
            ..Default::default()
        };
        entities::ModelMappings::insert(active)
            .on_conflict(
                OnConflict::column(Column::Alias)
                    .update_columns([Column::ProviderId, Column::UpstreamModel, Column::UpdatedAt])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn delete_model_mapping(&self, alias: &str) -> StorageResult<()> {
        use entities::model_mappings::Column;
        entities::ModelMappings::delete_many()
            .filter(Column::Alias.eq(alias))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    // ---- quota patterns ----

    pub async fn get_quota_pattern(
        &self,
        account_id: &str,
        model: &str,
    ) -> StorageResult<Option<QuotaPattern>> {
        use entities::quota_patterns::Column;
        let row = entities::QuotaPatterns::find()
            .filter(Column::AccountId.eq(account_id))
            .filter(Column::Model.eq(model))
            .one(&self.db)
            .await?;
        Ok(row.map(|row| QuotaPattern {
            request_limit: row.request_limit,
            token_limit: row.token_limit,
        }))
    }

    pub async fn list_quota_patterns(
        &self,
    ) -> StorageResult<Vec<entities::quota_patterns::Model>> {
        Ok(entities::QuotaPatterns::find().all(&self.db).await?)
    }

    pub async fn upsert_quota_pattern(
        &self,
        account_id: &str,
        model: &str,
        pattern: QuotaPattern,
    ) -> StorageResult<()> {
        use entities::quota_patterns::Column;
        let active = entities::quota_patterns::ActiveModel {
            id: ActiveValue::NotSet,
            account_id: ActiveValue::Set(account_id.to_string()),
            model: ActiveValue::Set(model.to_string()),
            request_limit: ActiveValue::Set(pattern.request_limit),
            token_limit: ActiveValue::Set(pattern.token_limit),
            updated_at: ActiveValue::Set(OffsetDateTime::now_utc()),
            ..Default::default()
        };
        entities::QuotaPatterns::insert(active)
            .on_conflict(
                OnConflict::columns([Column::AccountId, Column::Model])
                    .update_columns([Column::RequestLimit, Column::TokenLimit, Column::UpdatedAt])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn delete_quota_pattern(&self, account_id: &str, model: &str) -> StorageResult<()> {
        use entities::quota_patterns::Column;
        entities::QuotaPatterns::delete_many()
            .filter(Column::AccountId.eq(account_id))
            .filter(Column::Model.eq(model))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    // ---- client keys ----

    pub async fn list_client_keys(&self) -> StorageResult<Vec<entities::client_keys::Model>> {
        Ok(entities::ClientKeys::find().all(&self.db).await?)
    }

    pub async fn find_enabled_client_key(
        &self,
        key_value: &str,
    ) -> StorageResult<Option<entities::client_keys::Model>> {
        use entities::client_keys::Column;
        Ok(entities::ClientKeys::find()
            .filter(Column::KeyValue.eq(key_value))
            .filter(Column::Enabled.eq(true))
            .one(&self.db)
            .await?)
    }

    pub async fn insert_client_key(
        &self,
        key_value: &str,
        label: Option<&str>,
    ) -> StorageResult<i64> {
        let active = entities::client_keys::ActiveModel {
            id: ActiveValue::NotSet,
            key_value: ActiveValue::Set(key_value.to_string()),
            label: ActiveValue::Set(label.map(|label| label.to_string())),
            enabled: ActiveValue::Set(true),
            created_at: ActiveValue::Set(OffsetDateTime::now_utc()),
            last_used_at: ActiveValue::Set(None),
            ..Default::default()
        };
        let result = entities::ClientKeys::insert(active).exec(&self.db).await?;
        Ok(result.last_insert_id)
    }

    pub async fn set_client_key_enabled(&self, id: i64, enabled: bool) -> StorageResult<()> {
        use entities::client_keys::Column;
        entities::ClientKeys::update_many()
            .col_expr(Column::Enabled, Expr::value(enabled))
            .filter(Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn delete_client_key(&self, id: i64) -> StorageResult<()> {
        entities::ClientKeys::delete_by_id(id).exec(&self.db).await?;
        Ok(())
    }
}

pub fn row_to_account(row: entities::accounts::Model) -> Account {
    Account {
        id: row.id,
        provider_id: row.provider_id,
        name: row.name,
        auth_data: row.auth_data,
        proxy_id: row.proxy_id,
        proxy_url: row.proxy_url,
        is_active: row.is_active,
        created_by: row.created_by,
    }
}

pub fn row_to_descriptor(
    row: &entities::providers::Model,
) -> Result<ProviderDescriptor, serde_json::Error> {
    Ok(ProviderDescriptor {
        id: row.id.clone(),
        name: row.name.clone(),
        base_urls: serde_json::from_value(row.base_urls.clone())?,
        auth_kind: serde_json::from_value(serde_json::Value::String(row.auth_kind.clone()))
            .unwrap_or(AuthKind::ApiKey),
        models: serde_json::from_value(row.models.clone()).unwrap_or_default(),
        wire: serde_json::from_value(serde_json::Value::String(row.wire.clone()))
            .unwrap_or(WireFormat::Openai),
    })
}
