use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "proxies")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub url: String,
    /// http | https | socks5
    pub protocol: String,
    pub is_active: bool,
    /// healthy | degraded | down
    pub health_status: String,
    /// 0 = unlimited.
    pub max_accounts: i32,
    pub current_accounts: i32,
    /// Lower sorts first when assigning new accounts.
    pub priority: i32,
    pub marked_down_at: Option<OffsetDateTime>,
    pub latency_ms: Option<i32>,
    pub failure_count: i32,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    #[sea_orm(has_many)]
    pub accounts: HasMany<super::accounts::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
