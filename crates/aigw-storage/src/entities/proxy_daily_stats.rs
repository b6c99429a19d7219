use sea_orm::entity::prelude::*;
use time::Date;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "proxy_daily_stats")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique_key = "proxy_provider_day")]
    pub proxy_id: i64,
    #[sea_orm(unique_key = "proxy_provider_day")]
    pub provider_id: String,
    #[sea_orm(unique_key = "proxy_provider_day")]
    pub day: Date,
    pub request_count: i64,
    pub success_count: i64,
    pub error_count: i64,
    pub total_latency_ms: i64,
}

impl ActiveModelBehavior for ActiveModel {}
