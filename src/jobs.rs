use crate::entities;
use crate::errors::CountersignError;
use crate::settings::Settings;
use crate::storage;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, NotSet,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::Serialize;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

pub const EXPIRE_PENDING_CONSENTS: &str = "expire_pending_consents";

const SECS_PER_DAY: i64 = 24 * 60 * 60;

/// Start the scheduler if any background job is configured.
///
/// The only job today is the pending-consent expiry sweep, which runs hourly
/// when `consent.expire_pending_after_days` is set.
pub async fn init_scheduler(
    db: DatabaseConnection,
    settings: &Settings,
) -> Result<Option<JobScheduler>, CountersignError> {
    let Some(days) = settings.consent.expire_pending_after_days else {
        info!("consent.expire_pending_after_days not set; pending consents never expire on their own");
        return Ok(None);
    };

    let sched = JobScheduler::new()
        .await
        .map_err(|e| CountersignError::Other(format!("Failed to create job scheduler: {}", e)))?;

    let db_clone = db.clone();

    // Expire stale pending consents - runs every hour on the hour
    let expire_job = Job::new_async("0 0 * * * *", move |_uuid, _l| {
        let db = db_clone.clone();
        Box::pin(async move {
            if let Err(e) = run_recorded(&db, EXPIRE_PENDING_CONSENTS, Some(days)).await {
                error!("Failed to record {} run: {}", EXPIRE_PENDING_CONSENTS, e);
            }
        })
    })
    .map_err(|e| CountersignError::Other(format!("Failed to create expiry job: {}", e)))?;

    sched
        .add(expire_job)
        .await
        .map_err(|e| CountersignError::Other(format!("Failed to add expiry job: {}", e)))?;

    sched
        .start()
        .await
        .map_err(|e| CountersignError::Other(format!("Failed to start job scheduler: {}", e)))?;

    info!(expire_after_days = days, "Job scheduler started");

    Ok(Some(sched))
}

/// Expires pending records whose link was last sent more than `days` ago.
pub async fn expire_pending_consents(
    db: &DatabaseConnection,
    days: u64,
) -> Result<u64, CountersignError> {
    let age = i64::try_from(days)
        .ok()
        .and_then(|d| d.checked_mul(SECS_PER_DAY))
        .ok_or_else(|| {
            CountersignError::Validation(format!("expire_pending_after_days is too large: {days}"))
        })?;
    let cutoff = Utc::now().timestamp() - age;
    storage::expire_pending_sent_before(db, cutoff).await
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRun {
    pub execution_id: i64,
    pub success: bool,
    pub records_processed: Option<u64>,
}

async fn run_recorded(
    db: &DatabaseConnection,
    job_name: &str,
    expire_after_days: Option<u64>,
) -> Result<JobRun, CountersignError> {
    info!("Running {} job", job_name);
    let execution_id = start_job_execution(db, job_name).await?;

    let result = match (job_name, expire_after_days) {
        (EXPIRE_PENDING_CONSENTS, Some(days)) => expire_pending_consents(db, days).await,
        (EXPIRE_PENDING_CONSENTS, None) => Err(CountersignError::Validation(
            "consent.expire_pending_after_days is not configured".to_string(),
        )),
        _ => Err(CountersignError::NotFound(format!("Unknown job name: {}", job_name))),
    };

    match result {
        Ok(count) => {
            info!("Job {} completed: {} records", job_name, count);
            complete_job_execution(db, execution_id, true, None, Some(count as i64)).await?;
            Ok(JobRun {
                execution_id,
                success: true,
                records_processed: Some(count),
            })
        }
        Err(e) => {
            error!("Job {} failed: {}", job_name, e);
            complete_job_execution(db, execution_id, false, Some(e.to_string()), None).await?;
            Ok(JobRun {
                execution_id,
                success: false,
                records_processed: None,
            })
        }
    }
}

/// Record the start of a job execution
pub async fn start_job_execution(
    db: &DatabaseConnection,
    job_name: &str,
) -> Result<i64, CountersignError> {
    let execution = entities::job_execution::ActiveModel {
        id: NotSet,
        job_name: Set(job_name.to_string()),
        started_at: Set(Utc::now().timestamp()),
        completed_at: Set(None),
        success: Set(None),
        error_message: Set(None),
        records_processed: Set(None),
    };

    let result = execution.insert(db).await?;
    Ok(result.id)
}

/// Record the completion of a job execution
pub async fn complete_job_execution(
    db: &DatabaseConnection,
    execution_id: i64,
    success: bool,
    error_message: Option<String>,
    records_processed: Option<i64>,
) -> Result<(), CountersignError> {
    use entities::job_execution::{Column, Entity};

    if let Some(execution) = Entity::find()
        .filter(Column::Id.eq(execution_id))
        .one(db)
        .await?
    {
        let mut active = execution.into_active_model();
        active.completed_at = Set(Some(Utc::now().timestamp()));
        active.success = Set(Some(if success { 1 } else { 0 }));
        active.error_message = Set(error_message);
        active.records_processed = Set(records_processed);
        active.update(db).await?;
    }

    Ok(())
}

/// Most recent executions, newest first.
pub async fn recent_executions(
    db: &DatabaseConnection,
    limit: u64,
) -> Result<Vec<entities::job_execution::Model>, CountersignError> {
    use entities::job_execution::{Column, Entity};

    Ok(Entity::find()
        .order_by_desc(Column::StartedAt)
        .order_by_desc(Column::Id)
        .limit(limit)
        .all(db)
        .await?)
}

/// Manually trigger a job by name (admin API)
pub async fn trigger_job_manually(
    db: &DatabaseConnection,
    settings: &Settings,
    job_name: &str,
) -> Result<JobRun, CountersignError> {
    info!("Manually triggering job: {}", job_name);
    if job_name != EXPIRE_PENDING_CONSENTS {
        return Err(CountersignError::NotFound(format!("Unknown job name: {}", job_name)));
    }
    let Some(days) = settings.consent.expire_pending_after_days else {
        return Err(CountersignError::Validation(
            "consent.expire_pending_after_days is not configured".to_string(),
        ));
    };
    run_recorded(db, job_name, Some(days)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::Database;
    use sea_orm_migration::MigratorTrait;
    use tempfile::NamedTempFile;

    async fn test_db() -> (DatabaseConnection, NamedTempFile) {
        let temp = NamedTempFile::new().expect("Failed to create temp file");
        let url = format!("sqlite://{}?mode=rwc", temp.path().display());
        let db = Database::connect(&url).await.expect("Failed to connect");
        migration::Migrator::up(&db, None)
            .await
            .expect("Failed to run migrations");
        (db, temp)
    }

    fn settings_with_expiry(days: Option<u64>) -> Settings {
        let mut settings = Settings::default();
        settings.consent.expire_pending_after_days = days;
        settings
    }

    #[tokio::test]
    async fn test_start_and_complete_job_execution() {
        let (db, _temp) = test_db().await;

        let id = start_job_execution(&db, "test_job").await.unwrap();
        complete_job_execution(&db, id, true, None, Some(7)).await.unwrap();

        let runs = recent_executions(&db, 10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].id, id);
        assert_eq!(runs[0].success, Some(1));
        assert_eq!(runs[0].records_processed, Some(7));
        assert!(runs[0].completed_at.is_some());
    }

    #[tokio::test]
    async fn test_trigger_unknown_job_is_not_found() {
        let (db, _temp) = test_db().await;
        let err = trigger_job_manually(&db, &settings_with_expiry(Some(30)), "nope")
            .await
            .unwrap_err();
        assert!(matches!(err, CountersignError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_trigger_without_expiry_configured_is_rejected() {
        let (db, _temp) = test_db().await;
        let err = trigger_job_manually(&db, &settings_with_expiry(None), EXPIRE_PENDING_CONSENTS)
            .await
            .unwrap_err();
        assert!(matches!(err, CountersignError::Validation(_)));
        assert!(recent_executions(&db, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_trigger_records_execution() {
        let (db, _temp) = test_db().await;
        let run = trigger_job_manually(&db, &settings_with_expiry(Some(30)), EXPIRE_PENDING_CONSENTS)
            .await
            .unwrap();
        assert!(run.success);
        assert_eq!(run.records_processed, Some(0));

        let runs = recent_executions(&db, 10).await.unwrap();
        assert_eq!(runs[0].job_name, EXPIRE_PENDING_CONSENTS);
    }

    #[tokio::test]
    async fn test_scheduler_not_started_without_expiry() {
        let (db, _temp) = test_db().await;
        let sched = init_scheduler(db, &settings_with_expiry(None)).await.unwrap();
        assert!(sched.is_none());
    }
}
