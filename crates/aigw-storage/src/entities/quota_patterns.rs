use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "quota_patterns")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique_key = "account_model")]
    pub account_id: String,
    #[sea_orm(unique_key = "account_model")]
    pub model: String,
    /// Learned request ceiling per usage window; NULL = unknown.
    pub request_limit: Option<i64>,
    /// Learned token ceiling per usage window; NULL = unknown.
    pub token_limit: Option<i64>,
    pub updated_at: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}
