use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "providers")]
pub struct Model {
    /// Stable string id (e.g. "gemini"); referenced by accounts and logs.
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub name: String,
    /// JSON array of base URLs in fallback priority order.
    pub base_urls: Json,
    pub auth_kind: String,
    /// JSON array of canonical model names served natively.
    pub models: Json,
    pub wire: String,
    pub enabled: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
    #[sea_orm(has_many)]
    pub accounts: HasMany<super::accounts::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
