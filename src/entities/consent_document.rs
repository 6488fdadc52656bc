use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "consent_documents")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub file_name: String,
    pub file_path: String,
    pub uploaded_by: String,
    pub version: i32,
    pub is_active: bool,
    pub recipient_type: String, // "client" | "jobseeker_profile"
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::consent_record::Entity")]
    ConsentRecord,
}

impl Related<super::consent_record::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ConsentRecord.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
