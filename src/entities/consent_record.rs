use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "consent_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub document_id: String,
    pub consentable_id: String,
    pub consentable_type: String,
    pub status: String, // "pending" | "completed" | "expired"
    #[sea_orm(unique)]
    pub consent_token: String,
    pub sent_at: i64,
    pub completed_at: Option<i64>,
    pub consented_name: Option<String>,
    pub ip_address: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::consent_document::Entity",
        from = "Column::DocumentId",
        to = "super::consent_document::Column::Id"
    )]
    ConsentDocument,
}

impl Related<super::consent_document::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ConsentDocument.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
