use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "model_mappings")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique_key = "mapping_alias")]
    pub alias: String,
    pub provider_id: String,
    pub upstream_model: String,
    pub updated_at: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}
