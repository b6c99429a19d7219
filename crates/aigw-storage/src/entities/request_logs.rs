use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "request_logs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub created_at: OffsetDateTime,
    pub provider_id: String,
    pub account_id: String,
    pub proxy_id: Option<i64>,
    pub model: String,
    /// 0 when the attempt never produced an HTTP response.
    pub status_code: i32,
    pub latency_ms: i64,
    pub retry_count: i32,
    pub switched_from_account_id: Option<String>,
    pub error: Option<String>,
    pub trace_id: Option<String>,
}

impl ActiveModelBehavior for ActiveModel {}
