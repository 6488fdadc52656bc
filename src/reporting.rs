//! Staff-facing listings of consent documents and their records.

use crate::entities;
use crate::errors::CountersignError;
use crate::recipients::{self, RecipientType};
use crate::storage::{ConsentDocument, ConsentRecord, ConsentStatus};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, EntityTrait, FromQueryResult, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DEFAULT_PAGE_SIZE: u64 = 20;
pub const MAX_PAGE_SIZE: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u64,
    pub limit: u64,
    pub total: u64,
    pub total_filtered: u64,
    pub total_pages: u64,
    pub has_next_page: bool,
    pub has_prev_page: bool,
}

impl Pagination {
    pub fn new(page: u64, limit: u64, total: u64, total_filtered: u64) -> Self {
        let total_pages = total_filtered.div_ceil(limit);
        Self {
            page,
            limit,
            total,
            total_filtered,
            total_pages,
            has_next_page: page < total_pages,
            has_prev_page: page > 1,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub pagination: Pagination,
}

/// Clamps `page` to at least 1 and `limit` into `1..=MAX_PAGE_SIZE`. A page
/// whose row offset does not fit a SQL `BIGINT` is rejected.
fn page_window(page: Option<u64>, limit: Option<u64>) -> Result<(u64, u64), CountersignError> {
    let page = page.unwrap_or(1).max(1);
    let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
    (page - 1)
        .checked_mul(limit)
        .filter(|offset| i64::try_from(*offset).is_ok())
        .ok_or_else(|| CountersignError::Validation(format!("page {page} is out of range")))?;
    Ok((page, limit))
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentFilter {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub is_active: Option<bool>,
    pub recipient_type: Option<RecipientType>,
    /// Substring of the file name
    pub search: Option<String>,
    /// Inclusive bounds on `createdAt`, unix seconds
    pub from: Option<i64>,
    pub to: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSummary {
    #[serde(flatten)]
    pub document: ConsentDocument,
    pub total_recipients: u64,
    pub completed_recipients: u64,
}

#[derive(Debug, FromQueryResult)]
struct RecipientCounts {
    document_id: String,
    total: i64,
    completed: i64,
}

pub async fn list_documents(
    db: &DatabaseConnection,
    filter: &DocumentFilter,
) -> Result<Page<DocumentSummary>, CountersignError> {
    use entities::consent_document::{Column, Entity};

    let (page, limit) = page_window(filter.page, filter.limit)?;

    let mut condition = Condition::all();
    if let Some(is_active) = filter.is_active {
        condition = condition.add(Column::IsActive.eq(is_active));
    }
    if let Some(recipient_type) = filter.recipient_type {
        condition = condition.add(Column::RecipientType.eq(recipient_type.as_str()));
    }
    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        condition = condition.add(Column::FileName.contains(search));
    }
    if let Some(from) = filter.from {
        condition = condition.add(Column::CreatedAt.gte(from));
    }
    if let Some(to) = filter.to {
        condition = condition.add(Column::CreatedAt.lte(to));
    }

    let total = Entity::find().count(db).await?;
    let paginator = Entity::find()
        .filter(condition)
        .order_by_desc(Column::CreatedAt)
        .order_by_asc(Column::Id)
        .paginate(db, limit);
    let total_filtered = paginator.num_items().await?;
    let models = paginator.fetch_page(page - 1).await?;

    let ids: Vec<String> = models.iter().map(|m| m.id.clone()).collect();
    let counts = recipient_counts(db, &ids).await?;

    let data = models
        .into_iter()
        .map(|model| {
            let (total_recipients, completed_recipients) =
                counts.get(&model.id).copied().unwrap_or((0, 0));
            Ok(DocumentSummary {
                document: ConsentDocument::try_from(model)?,
                total_recipients,
                completed_recipients,
            })
        })
        .collect::<Result<Vec<_>, CountersignError>>()?;

    Ok(Page {
        data,
        pagination: Pagination::new(page, limit, total, total_filtered),
    })
}

/// `(total, completed)` record counts per document id.
pub async fn recipient_counts(
    db: &DatabaseConnection,
    document_ids: &[String],
) -> Result<HashMap<String, (u64, u64)>, CountersignError> {
    use entities::consent_record::{Column, Entity};

    if document_ids.is_empty() {
        return Ok(HashMap::new());
    }

    let rows = Entity::find()
        .select_only()
        .column(Column::DocumentId)
        .column_as(Column::Id.count(), "total")
        .column_as(
            Expr::cust("COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0)"),
            "completed",
        )
        .filter(Column::DocumentId.is_in(document_ids.iter().cloned()))
        .group_by(Column::DocumentId)
        .into_model::<RecipientCounts>()
        .all(db)
        .await?;

    Ok(rows
        .into_iter()
        .map(|row| {
            (
                row.document_id,
                (row.total.max(0) as u64, row.completed.max(0) as u64),
            )
        })
        .collect())
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordFilter {
    pub page: Option<u64>,
    pub limit: Option<u64>,
    pub status: Option<ConsentStatus>,
    /// Substring of the recipient's name
    pub search: Option<String>,
    /// Inclusive bounds on `sentAt`, unix seconds
    pub from: Option<i64>,
    pub to: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSummary {
    #[serde(flatten)]
    pub record: ConsentRecord,
    pub recipient_name: Option<String>,
    pub recipient_email: Option<String>,
}

pub async fn list_records(
    db: &DatabaseConnection,
    document: &ConsentDocument,
    filter: &RecordFilter,
) -> Result<Page<RecordSummary>, CountersignError> {
    use entities::consent_record::{Column, Entity};

    let (page, limit) = page_window(filter.page, filter.limit)?;

    let mut condition = Condition::all().add(Column::DocumentId.eq(document.id.as_str()));
    if let Some(status) = filter.status {
        condition = condition.add(Column::Status.eq(status.as_str()));
    }
    if let Some(search) = filter.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        let ids = recipients::search_ids(db, document.recipient_type, search).await?;
        condition = condition.add(Column::ConsentableId.is_in(ids));
    }
    if let Some(from) = filter.from {
        condition = condition.add(Column::SentAt.gte(from));
    }
    if let Some(to) = filter.to {
        condition = condition.add(Column::SentAt.lte(to));
    }

    let total = Entity::find()
        .filter(Column::DocumentId.eq(document.id.as_str()))
        .count(db)
        .await?;
    let paginator = Entity::find()
        .filter(condition)
        .order_by_desc(Column::SentAt)
        .order_by_asc(Column::Id)
        .paginate(db, limit);
    let total_filtered = paginator.num_items().await?;
    let records = paginator
        .fetch_page(page - 1)
        .await?
        .into_iter()
        .map(ConsentRecord::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    let recipient_ids: Vec<String> = records.iter().map(|r| r.consentable_id.clone()).collect();
    let directory = recipients::find_many(db, document.recipient_type, &recipient_ids).await?;

    let data = records
        .into_iter()
        .map(|record| {
            let recipient = directory.get(&record.consentable_id);
            RecordSummary {
                recipient_name: recipient.map(|r| r.name.clone()),
                recipient_email: recipient.and_then(|r| r.email.clone()),
                record,
            }
        })
        .collect();

    Ok(Page {
        data,
        pagination: Pagination::new(page, limit, total, total_filtered),
    })
}
