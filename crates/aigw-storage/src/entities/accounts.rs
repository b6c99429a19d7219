use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "accounts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub provider_id: String,
    pub name: Option<String>,
    /// Opaque provider-specific credential blob.
    pub auth_data: Json,
    pub proxy_id: Option<i64>,
    /// Materialised URL of the permanently assigned outbound proxy.
    pub proxy_url: Option<String>,
    pub is_active: bool,
    pub created_by: Option<String>,
    pub success_count: i64,
    pub failure_count: i64,
    pub last_used_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    #[sea_orm(belongs_to, from = "provider_id", to = "id", on_delete = "Cascade")]
    pub provider: HasOne<super::providers::Entity>,
    #[sea_orm(belongs_to, from = "proxy_id", to = "id", on_delete = "SetNull")]
    pub proxy: HasOne<super::proxies::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
