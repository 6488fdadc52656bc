use crate::entities;
use crate::errors::CountersignError;
use crate::recipients::RecipientType;
use crate::settings::Database as DbCfg;
use crate::tokens;
use chrono::Utc;
use migration::MigratorTrait;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, Database, DatabaseConnection,
    DatabaseTransaction, DbErr, EntityTrait, QueryFilter, Set, SqlErr, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Regenerations allowed when a fresh token collides with an existing one.
const MAX_TOKEN_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentStatus {
    Pending,
    Completed,
    Expired,
}

impl ConsentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsentStatus::Pending => "pending",
            ConsentStatus::Completed => "completed",
            ConsentStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ConsentStatus::Pending)
    }
}

impl fmt::Display for ConsentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConsentStatus {
    type Err = CountersignError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ConsentStatus::Pending),
            "completed" => Ok(ConsentStatus::Completed),
            "expired" => Ok(ConsentStatus::Expired),
            other => Err(CountersignError::Validation(format!(
                "unknown consent status \"{other}\""
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentDocument {
    pub id: String,
    pub file_name: String,
    pub file_path: String,
    pub uploaded_by: String,
    pub version: i32,
    pub is_active: bool,
    pub recipient_type: RecipientType,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TryFrom<entities::consent_document::Model> for ConsentDocument {
    type Error = CountersignError;

    fn try_from(model: entities::consent_document::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            recipient_type: model.recipient_type.parse()?,
            id: model.id,
            file_name: model.file_name,
            file_path: model.file_path,
            uploaded_by: model.uploaded_by,
            version: model.version,
            is_active: model.is_active,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentRecord {
    pub id: String,
    pub document_id: String,
    pub consentable_id: String,
    pub consentable_type: RecipientType,
    pub status: ConsentStatus,
    #[serde(skip_serializing)]
    pub consent_token: String,
    pub sent_at: i64,
    pub completed_at: Option<i64>,
    pub consented_name: Option<String>,
    pub ip_address: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TryFrom<entities::consent_record::Model> for ConsentRecord {
    type Error = CountersignError;

    fn try_from(model: entities::consent_record::Model) -> Result<Self, Self::Error> {
        Ok(Self {
            consentable_type: model.consentable_type.parse()?,
            status: model.status.parse()?,
            id: model.id,
            document_id: model.document_id,
            consentable_id: model.consentable_id,
            consent_token: model.consent_token,
            sent_at: model.sent_at,
            completed_at: model.completed_at,
            consented_name: model.consented_name,
            ip_address: model.ip_address,
            created_at: model.created_at,
            updated_at: model.updated_at,
        })
    }
}

#[derive(Debug, Clone)]
pub struct NewConsentDocument {
    pub file_name: String,
    pub file_path: String,
    pub uploaded_by: String,
    pub recipient_type: RecipientType,
}

pub async fn init(cfg: &DbCfg) -> Result<DatabaseConnection, CountersignError> {
    let db = Database::connect(&cfg.url).await?;
    migration::Migrator::up(&db, None).await?;
    Ok(db)
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// Consent document functions

/// Creates the document and one pending record per recipient in a single
/// transaction. Any failure rolls back every row written so far.
pub async fn create_consent_request(
    db: &DatabaseConnection,
    input: NewConsentDocument,
    recipient_ids: &[String],
) -> Result<(ConsentDocument, Vec<ConsentRecord>), CountersignError> {
    create_consent_request_with(db, input, recipient_ids, &mut tokens::issue_token).await
}

async fn create_consent_request_with(
    db: &DatabaseConnection,
    input: NewConsentDocument,
    recipient_ids: &[String],
    next_token: &mut impl FnMut() -> String,
) -> Result<(ConsentDocument, Vec<ConsentRecord>), CountersignError> {
    let txn = db.begin().await?;
    let now = Utc::now().timestamp();

    let document = entities::consent_document::ActiveModel {
        id: Set(new_id()),
        file_name: Set(input.file_name),
        file_path: Set(input.file_path),
        uploaded_by: Set(input.uploaded_by),
        version: Set(1),
        is_active: Set(true),
        recipient_type: Set(input.recipient_type.as_str().to_string()),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(&txn)
    .await?;
    let document = ConsentDocument::try_from(document)?;

    let mut records = Vec::with_capacity(recipient_ids.len());
    for recipient_id in recipient_ids {
        let record = insert_pending_record(&txn, &document, recipient_id, now, next_token).await?;
        records.push(record);
    }

    txn.commit().await?;
    Ok((document, records))
}

async fn insert_pending_record(
    txn: &DatabaseTransaction,
    document: &ConsentDocument,
    consentable_id: &str,
    now: i64,
    next_token: &mut impl FnMut() -> String,
) -> Result<ConsentRecord, CountersignError> {
    for attempt in 1..=MAX_TOKEN_ATTEMPTS {
        // Savepoint, so a failed insert does not poison the outer transaction
        let savepoint = txn.begin().await?;
        let record = entities::consent_record::ActiveModel {
            id: Set(new_id()),
            document_id: Set(document.id.clone()),
            consentable_id: Set(consentable_id.to_string()),
            consentable_type: Set(document.recipient_type.as_str().to_string()),
            status: Set(ConsentStatus::Pending.as_str().to_string()),
            consent_token: Set(next_token()),
            sent_at: Set(now),
            completed_at: Set(None),
            consented_name: Set(None),
            ip_address: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };

        match record.insert(&savepoint).await {
            Ok(model) => {
                savepoint.commit().await?;
                return ConsentRecord::try_from(model);
            }
            Err(err) => {
                savepoint.rollback().await?;
                match unique_violation(&err) {
                    Some(UniqueViolation::Token) => {
                        tracing::warn!(attempt, document_id = %document.id, "consent token collision, regenerating");
                    }
                    Some(UniqueViolation::Recipient) => {
                        return Err(CountersignError::Conflict(format!(
                            "Recipient {consentable_id} already has a consent record for this document"
                        )));
                    }
                    None => return Err(err.into()),
                }
            }
        }
    }

    Err(CountersignError::Other(format!(
        "could not issue a unique consent token after {MAX_TOKEN_ATTEMPTS} attempts"
    )))
}

#[derive(Debug, PartialEq, Eq)]
enum UniqueViolation {
    Token,
    Recipient,
}

fn unique_violation(err: &DbErr) -> Option<UniqueViolation> {
    match err.sql_err() {
        // SQLite names the columns, PostgreSQL names the index
        Some(SqlErr::UniqueConstraintViolation(message)) => {
            if message.contains("consent_token") || message.contains("idx_consent_records_token")
            {
                Some(UniqueViolation::Token)
            } else {
                Some(UniqueViolation::Recipient)
            }
        }
        _ => None,
    }
}

pub async fn get_document<C: ConnectionTrait>(
    db: &C,
    document_id: &str,
) -> Result<Option<ConsentDocument>, CountersignError> {
    entities::ConsentDocument::find_by_id(document_id.to_string())
        .one(db)
        .await?
        .map(ConsentDocument::try_from)
        .transpose()
}

/// Shows or hides a document in reporting. Records are not touched.
pub async fn set_document_active(
    db: &DatabaseConnection,
    document_id: &str,
    is_active: bool,
) -> Result<Option<ConsentDocument>, CountersignError> {
    let Some(model) = entities::ConsentDocument::find_by_id(document_id.to_string())
        .one(db)
        .await?
    else {
        return Ok(None);
    };

    let mut active: entities::consent_document::ActiveModel = model.into();
    active.is_active = Set(is_active);
    active.updated_at = Set(Utc::now().timestamp());
    let updated = active.update(db).await?;
    Ok(Some(ConsentDocument::try_from(updated)?))
}

// Consent record functions

pub async fn get_record<C: ConnectionTrait>(
    db: &C,
    record_id: &str,
) -> Result<Option<ConsentRecord>, CountersignError> {
    entities::ConsentRecord::find_by_id(record_id.to_string())
        .one(db)
        .await?
        .map(ConsentRecord::try_from)
        .transpose()
}

pub async fn get_record_by_token<C: ConnectionTrait>(
    db: &C,
    token: &str,
) -> Result<Option<ConsentRecord>, CountersignError> {
    use entities::consent_record::{Column, Entity};

    Entity::find()
        .filter(Column::ConsentToken.eq(token))
        .one(db)
        .await?
        .map(ConsentRecord::try_from)
        .transpose()
}

pub async fn get_records_for_document<C: ConnectionTrait>(
    db: &C,
    document_id: &str,
) -> Result<Vec<ConsentRecord>, CountersignError> {
    use entities::consent_record::{Column, Entity};

    Entity::find()
        .filter(Column::DocumentId.eq(document_id))
        .all(db)
        .await?
        .into_iter()
        .map(ConsentRecord::try_from)
        .collect()
}

/// Completes the record holding `token` if, and only if, it is still pending.
///
/// This is one conditional UPDATE, so concurrent submissions for the same
/// token race inside the database and exactly one of them sees a changed row.
/// Returns whether this call performed the transition.
pub async fn complete_record(
    db: &DatabaseConnection,
    token: &str,
    consented_name: &str,
    ip_address: Option<&str>,
    now: i64,
) -> Result<bool, CountersignError> {
    use entities::consent_record::{Column, Entity};

    let result = Entity::update_many()
        .col_expr(Column::Status, Expr::value(ConsentStatus::Completed.as_str()))
        .col_expr(Column::CompletedAt, Expr::value(now))
        .col_expr(Column::ConsentedName, Expr::value(consented_name))
        .col_expr(
            Column::IpAddress,
            Expr::value(ip_address.map(str::to_string)),
        )
        .col_expr(Column::UpdatedAt, Expr::value(now))
        .filter(Column::ConsentToken.eq(token))
        .filter(Column::Status.eq(ConsentStatus::Pending.as_str()))
        .exec(db)
        .await?;

    Ok(result.rows_affected == 1)
}

/// Moves a pending record to `expired`. Returns false when the record is
/// missing or already terminal.
pub async fn expire_record(
    db: &DatabaseConnection,
    record_id: &str,
    now: i64,
) -> Result<bool, CountersignError> {
    use entities::consent_record::{Column, Entity};

    let result = Entity::update_many()
        .col_expr(Column::Status, Expr::value(ConsentStatus::Expired.as_str()))
        .col_expr(Column::UpdatedAt, Expr::value(now))
        .filter(Column::Id.eq(record_id))
        .filter(Column::Status.eq(ConsentStatus::Pending.as_str()))
        .exec(db)
        .await?;

    Ok(result.rows_affected == 1)
}

/// Expires every pending record whose link was last sent before `cutoff`.
pub async fn expire_pending_sent_before(
    db: &DatabaseConnection,
    cutoff: i64,
) -> Result<u64, CountersignError> {
    use entities::consent_record::{Column, Entity};

    let now = Utc::now().timestamp();
    let result = Entity::update_many()
        .col_expr(Column::Status, Expr::value(ConsentStatus::Expired.as_str()))
        .col_expr(Column::UpdatedAt, Expr::value(now))
        .filter(Column::Status.eq(ConsentStatus::Pending.as_str()))
        .filter(Column::SentAt.lt(cutoff))
        .exec(db)
        .await?;

    Ok(result.rows_affected)
}

/// Bumps `sent_at` for a resend. Only pending records are touched; the token
/// is never rewritten here.
pub async fn mark_resent(
    db: &DatabaseConnection,
    record_id: &str,
    now: i64,
) -> Result<bool, CountersignError> {
    use entities::consent_record::{Column, Entity};

    let result = Entity::update_many()
        .col_expr(Column::SentAt, Expr::value(now))
        .col_expr(Column::UpdatedAt, Expr::value(now))
        .filter(Column::Id.eq(record_id))
        .filter(Column::Status.eq(ConsentStatus::Pending.as_str()))
        .exec(db)
        .await?;

    Ok(result.rows_affected == 1)
}
