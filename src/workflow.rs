//! Consent request lifecycle: fan-out, token resolution, submission, resend.

use crate::document_store::{DocumentStore, SignedUrlCache};
use crate::errors::CountersignError;
use crate::mailer::{self, Mailer};
use crate::recipients::{self, Recipient, RecipientType};
use crate::settings::Settings;
use crate::storage::{self, ConsentDocument, ConsentRecord, ConsentStatus, NewConsentDocument};
use crate::tokens;
use crate::validation;
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

pub const ALREADY_PROVIDED: &str = "Consent has already been provided for this document";
pub const EXPIRED: &str = "This consent request has expired";
pub const INVALID_LINK: &str = "This consent link is invalid";

#[derive(Debug, Clone)]
pub struct NewConsentRequest {
    pub file_name: String,
    pub file_path: String,
    pub recipient_ids: Vec<String>,
    pub recipient_type: RecipientType,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentRequestCreated {
    pub document: ConsentDocument,
    pub record_count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentView {
    pub id: String,
    pub file_name: String,
    pub file_path: String,
    pub version: i32,
    pub created_at: i64,
    /// Time-limited download URL; absent when signing failed
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityView {
    pub name: String,
    pub email: Option<String>,
    #[serde(rename = "type")]
    pub entity_type: RecipientType,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentView {
    pub record_id: String,
    pub status: ConsentStatus,
    pub completed_at: Option<i64>,
    pub consented_name: Option<String>,
    pub document: DocumentView,
    pub entity: EntityView,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentSubmitted {
    pub completed_at: i64,
    pub consented_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResendOutcome {
    pub resent_count: usize,
    pub skipped_count: usize,
}

/// Everything the consent operations need, cheap to clone into handlers.
#[derive(Clone)]
pub struct ConsentService {
    db: DatabaseConnection,
    settings: Arc<Settings>,
    store: Arc<dyn DocumentStore>,
    urls: SignedUrlCache,
    mailer: Mailer,
}

impl ConsentService {
    pub fn new(
        db: DatabaseConnection,
        settings: Arc<Settings>,
        store: Arc<dyn DocumentStore>,
        mailer: Mailer,
    ) -> Self {
        let urls = SignedUrlCache::new(settings.storage.signed_url_ttl_secs);
        Self {
            db,
            settings,
            store,
            urls,
            mailer,
        }
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    /// Registers a document and sends every recipient a personal link.
    ///
    /// The document and all records are written in one transaction; emails are
    /// queued only after it commits and their outcome does not affect the result.
    pub async fn create_request(
        &self,
        input: NewConsentRequest,
        uploaded_by: &str,
    ) -> Result<ConsentRequestCreated, CountersignError> {
        let uploaded_by = validation::required("uploadedBy", uploaded_by)?;
        let file_name = validation::required("fileName", &input.file_name)?;
        validation::max_len("fileName", file_name, validation::MAX_FILE_NAME_LEN)?;
        let file_path = validation::storage_path("filePath", &input.file_path)?;
        let recipient_ids = validation::distinct_ids("recipientIds", &input.recipient_ids)?;

        if !self.store.exists(file_path).await? {
            return Err(CountersignError::Validation(
                "filePath does not reference an uploaded document".to_string(),
            ));
        }

        let directory =
            recipients::find_many(&self.db, input.recipient_type, &recipient_ids).await?;
        let missing: Vec<&str> = recipient_ids
            .iter()
            .filter(|id| !directory.contains_key(*id))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(CountersignError::Validation(format!(
                "Unknown {} recipients: {}",
                input.recipient_type,
                missing.join(", ")
            )));
        }
        let without_email: Vec<&str> = recipient_ids
            .iter()
            .filter(|id| directory.get(*id).and_then(|r| r.email.as_deref()).is_none())
            .map(String::as_str)
            .collect();
        if !without_email.is_empty() {
            return Err(CountersignError::Validation(format!(
                "Recipients without an email address: {}",
                without_email.join(", ")
            )));
        }

        let (document, records) = storage::create_consent_request(
            &self.db,
            NewConsentDocument {
                file_name: file_name.to_string(),
                file_path: file_path.to_string(),
                uploaded_by: uploaded_by.to_string(),
                recipient_type: input.recipient_type,
            },
            &recipient_ids,
        )
        .await?;

        info!(
            document_id = %document.id,
            recipients = records.len(),
            uploaded_by = %document.uploaded_by,
            "consent request created"
        );

        for record in &records {
            if let Some(recipient) = directory.get(&record.consentable_id) {
                self.send_link(&document, record, recipient);
            }
        }

        Ok(ConsentRequestCreated {
            record_count: records.len(),
            document,
        })
    }

    /// Resolves a token to what the recipient needs to see. Never writes.
    pub async fn view_by_token(&self, token: &str) -> Result<ConsentView, CountersignError> {
        if !tokens::is_well_formed(token) {
            return Err(CountersignError::NotFound(INVALID_LINK.to_string()));
        }
        let record = storage::get_record_by_token(&self.db, token)
            .await?
            .ok_or_else(|| CountersignError::NotFound(INVALID_LINK.to_string()))?;

        let document = storage::get_document(&self.db, &record.document_id)
            .await?
            .ok_or_else(|| CountersignError::NotFound("Consent document not found".to_string()))?;

        let recipient =
            recipients::get_recipient(&self.db, record.consentable_type, &record.consentable_id)
                .await?
                .ok_or_else(|| CountersignError::NotFound("Recipient not found".to_string()))?;

        let url = match self.urls.get(self.store.as_ref(), &document.file_path).await {
            Ok(signed) => Some(signed.url),
            Err(e) => {
                warn!(document_id = %document.id, error = %e, "could not sign document URL");
                None
            }
        };

        Ok(ConsentView {
            record_id: record.id,
            status: record.status,
            completed_at: record.completed_at,
            consented_name: record.consented_name,
            document: DocumentView {
                id: document.id,
                file_name: document.file_name,
                file_path: document.file_path,
                version: document.version,
                created_at: document.created_at,
                url,
            },
            entity: EntityView {
                name: recipient.name,
                email: recipient.email,
                entity_type: recipient.recipient_type,
            },
        })
    }

    /// Records consent for the holder of `token`.
    ///
    /// At most one submission per record succeeds; every later or concurrent
    /// one gets a conflict naming the terminal state it lost to.
    pub async fn submit(
        &self,
        token: &str,
        consented_name: &str,
        ip_address: Option<&str>,
    ) -> Result<ConsentSubmitted, CountersignError> {
        let consented_name = validation::required("consentedName", consented_name)?;
        validation::max_len(
            "consentedName",
            consented_name,
            validation::MAX_CONSENTED_NAME_LEN,
        )?;
        if !tokens::is_well_formed(token) {
            return Err(CountersignError::NotFound(INVALID_LINK.to_string()));
        }

        let now = Utc::now().timestamp();
        if storage::complete_record(&self.db, token, consented_name, ip_address, now).await? {
            info!(token = %tokens::redact(token), "consent recorded");
            return Ok(ConsentSubmitted {
                completed_at: now,
                consented_name: consented_name.to_string(),
            });
        }

        let record = storage::get_record_by_token(&self.db, token)
            .await?
            .ok_or_else(|| CountersignError::NotFound(INVALID_LINK.to_string()))?;
        match record.status {
            ConsentStatus::Completed => {
                Err(CountersignError::Conflict(ALREADY_PROVIDED.to_string()))
            }
            ConsentStatus::Expired => Err(CountersignError::Conflict(EXPIRED.to_string())),
            ConsentStatus::Pending => Err(CountersignError::Other(format!(
                "consent record {} stayed pending after a conditional update",
                record.id
            ))),
        }
    }

    /// Re-sends the existing link for every pending record in `record_ids`.
    /// Missing and terminal records are counted as skipped.
    pub async fn resend(&self, record_ids: &[String]) -> Result<ResendOutcome, CountersignError> {
        let record_ids = validation::distinct_ids("recordIds", record_ids)?;
        let mut outcome = ResendOutcome {
            resent_count: 0,
            skipped_count: 0,
        };
        let mut documents: HashMap<String, ConsentDocument> = HashMap::new();

        for record_id in &record_ids {
            let Some(record) = storage::get_record(&self.db, record_id).await? else {
                warn!(%record_id, "resend requested for unknown record");
                outcome.skipped_count += 1;
                continue;
            };
            if record.status.is_terminal() {
                outcome.skipped_count += 1;
                continue;
            }

            if !documents.contains_key(&record.document_id) {
                match storage::get_document(&self.db, &record.document_id).await? {
                    Some(document) => {
                        documents.insert(document.id.clone(), document);
                    }
                    None => {
                        warn!(%record_id, "consent record has no document");
                        outcome.skipped_count += 1;
                        continue;
                    }
                }
            }
            let Some(document) = documents.get(&record.document_id) else {
                outcome.skipped_count += 1;
                continue;
            };

            let recipient = recipients::get_recipient(
                &self.db,
                record.consentable_type,
                &record.consentable_id,
            )
            .await?;
            let Some(recipient) = recipient.filter(|r| r.email.is_some()) else {
                warn!(%record_id, recipient = %record.consentable_id, "recipient has no email address, skipping resend");
                outcome.skipped_count += 1;
                continue;
            };

            // Lost a race with a submission or expiry
            if !storage::mark_resent(&self.db, record_id, Utc::now().timestamp()).await? {
                outcome.skipped_count += 1;
                continue;
            }

            self.send_link(document, &record, &recipient);
            outcome.resent_count += 1;
        }

        info!(
            resent = outcome.resent_count,
            skipped = outcome.skipped_count,
            "consent resend finished"
        );
        Ok(outcome)
    }

    /// Externally triggered `pending -> expired` transition.
    pub async fn expire(&self, record_id: &str) -> Result<ConsentRecord, CountersignError> {
        let expired = storage::expire_record(&self.db, record_id, Utc::now().timestamp()).await?;
        let record = storage::get_record(&self.db, record_id)
            .await?
            .ok_or_else(|| CountersignError::NotFound("Consent record not found".to_string()))?;
        if !expired {
            return Err(CountersignError::Conflict(format!(
                "Consent record is already {}",
                record.status
            )));
        }
        info!(%record_id, "consent record expired");
        Ok(record)
    }

    pub async fn set_document_active(
        &self,
        document_id: &str,
        is_active: bool,
    ) -> Result<ConsentDocument, CountersignError> {
        storage::set_document_active(&self.db, document_id, is_active)
            .await?
            .ok_or_else(|| CountersignError::NotFound("Consent document not found".to_string()))
    }

    pub async fn get_document(&self, document_id: &str) -> Result<ConsentDocument, CountersignError> {
        storage::get_document(&self.db, document_id)
            .await?
            .ok_or_else(|| CountersignError::NotFound("Consent document not found".to_string()))
    }

    fn send_link(&self, document: &ConsentDocument, record: &ConsentRecord, recipient: &Recipient) {
        let Some(email) = recipient.email.as_deref() else {
            return;
        };
        let message = mailer::consent_request_email(
            email,
            &recipient.name,
            &document.file_name,
            &self.settings.consent_link(&record.consent_token),
        );
        if !self.mailer.enqueue(message) {
            warn!(record_id = %record.id, document_id = %document.id, "consent email not queued");
        }
    }
}
