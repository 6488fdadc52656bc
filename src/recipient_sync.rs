use crate::entities;
use crate::recipients;
use miette::{IntoDiagnostic, Result};
use sea_orm::{DatabaseConnection, EntityTrait};
use serde::{Deserialize, Serialize};
use std::fs;

/// Client definition from JSON file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Jobseeker profile definition from JSON file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobseekerProfileDefinition {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Root structure of the recipients JSON file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientsFile {
    #[serde(default)]
    pub clients: Vec<ClientDefinition>,
    #[serde(default)]
    pub jobseeker_profiles: Vec<JobseekerProfileDefinition>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncSummary {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
}

impl SyncSummary {
    fn count(&mut self, result: SyncResult) {
        match result {
            SyncResult::Created => self.created += 1,
            SyncResult::Updated => self.updated += 1,
            SyncResult::Unchanged => self.unchanged += 1,
        }
    }
}

const EXPECTED_FORMAT: &str = r#"{
  "clients": [
    { "id": "c-1", "name": "Acme Ltd", "email": "ops@acme.example" }
  ],
  "jobseekerProfiles": [
    { "id": "js-1", "firstName": "Jane", "lastName": "Doe", "email": "jane@example.com" }
  ]
}"#;

/// Sync recipients from a JSON file to the database (idempotent)
pub async fn sync_recipients_from_file(
    db: &DatabaseConnection,
    file_path: &str,
) -> Result<SyncSummary> {
    tracing::info!("Loading recipients from {}", file_path);

    let content = fs::read_to_string(file_path).map_err(|e| {
        miette::miette!("Failed to read recipients file at '{}': {}", file_path, e)
    })?;

    let file: RecipientsFile = serde_json::from_str(&content).map_err(|e| {
        miette::miette!(
            "Failed to parse recipients JSON file: {}\n\nExpected format:\n{}",
            e,
            EXPECTED_FORMAT
        )
    })?;

    sync_recipients(db, &file).await
}

pub async fn sync_recipients(db: &DatabaseConnection, file: &RecipientsFile) -> Result<SyncSummary> {
    tracing::info!(
        "Found {} client(s) and {} jobseeker profile(s) in file",
        file.clients.len(),
        file.jobseeker_profiles.len()
    );

    let mut summary = SyncSummary::default();
    for def in &file.clients {
        summary.count(sync_client(db, def).await?);
    }
    for def in &file.jobseeker_profiles {
        summary.count(sync_jobseeker_profile(db, def).await?);
    }

    tracing::info!(
        "Recipient sync complete: {} created, {} updated, {} unchanged",
        summary.created,
        summary.updated,
        summary.unchanged
    );

    Ok(summary)
}

#[derive(Debug, Clone, Copy)]
enum SyncResult {
    Created,
    Updated,
    Unchanged,
}

async fn sync_client(db: &DatabaseConnection, def: &ClientDefinition) -> Result<SyncResult> {
    let existing = entities::Client::find_by_id(def.id.clone())
        .one(db)
        .await
        .into_diagnostic()?;

    match existing {
        None => {
            tracing::info!("Creating client: {}", def.id);
            recipients::create_client(db, &def.id, &def.name, def.email.clone())
                .await
                .into_diagnostic()?;
            Ok(SyncResult::Created)
        }
        Some(current) if current.name == def.name && current.email == def.email => {
            Ok(SyncResult::Unchanged)
        }
        Some(_) => {
            tracing::info!("Updating client: {}", def.id);
            recipients::update_client(db, &def.id, &def.name, def.email.clone())
                .await
                .into_diagnostic()?;
            Ok(SyncResult::Updated)
        }
    }
}

async fn sync_jobseeker_profile(
    db: &DatabaseConnection,
    def: &JobseekerProfileDefinition,
) -> Result<SyncResult> {
    let existing = entities::JobseekerProfile::find_by_id(def.id.clone())
        .one(db)
        .await
        .into_diagnostic()?;

    match existing {
        None => {
            tracing::info!("Creating jobseeker profile: {}", def.id);
            recipients::create_jobseeker_profile(
                db,
                &def.id,
                &def.first_name,
                &def.last_name,
                def.email.clone(),
            )
            .await
            .into_diagnostic()?;
            Ok(SyncResult::Created)
        }
        Some(current)
            if current.first_name == def.first_name
                && current.last_name == def.last_name
                && current.email == def.email =>
        {
            Ok(SyncResult::Unchanged)
        }
        Some(_) => {
            tracing::info!("Updating jobseeker profile: {}", def.id);
            recipients::update_jobseeker_profile(
                db,
                &def.id,
                &def.first_name,
                &def.last_name,
                def.email.clone(),
            )
            .await
            .into_diagnostic()?;
            Ok(SyncResult::Updated)
        }
    }
}
