use super::mail::RecordingTransport;
use countersign::document_store::{DocumentStore, LocalDocumentStore};
use countersign::mailer::{Mailer, RetryPolicy};
use countersign::settings::Settings;
use countersign::workflow::ConsentService;
use sea_orm::{Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use std::sync::Arc;
use std::time::Duration;
use tempfile::{NamedTempFile, TempDir};

pub const BASE_URL: &str = "https://consent.test";
pub const SIGNING_SECRET: &str = "integration-test-secret";

/// Test database with automatic cleanup
pub struct TestDb {
    connection: DatabaseConnection,
    _temp_file: NamedTempFile,
}

impl TestDb {
    /// Create a new test database with migrations applied
    pub async fn new() -> Self {
        // Create temporary SQLite database file
        let temp_file = NamedTempFile::new().expect("Failed to create temp file");
        let db_path = temp_file.path().to_str().expect("Invalid temp file path");
        let db_url = format!("sqlite://{}?mode=rwc", db_path);

        // Connect to database
        let connection = Database::connect(&db_url)
            .await
            .expect("Failed to connect to test database");

        // Run migrations
        migration::Migrator::up(&connection, None)
            .await
            .expect("Failed to run migrations");

        Self {
            connection,
            _temp_file: temp_file,
        }
    }

    /// Get database connection
    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }
}

/// A fully wired service over a temp database and temp document root, with
/// outgoing mail captured in memory.
pub struct TestApp {
    pub db: TestDb,
    pub settings: Arc<Settings>,
    pub store: Arc<LocalDocumentStore>,
    pub outbox: Arc<RecordingTransport>,
    pub service: ConsentService,
    _documents: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_settings(|_| {}).await
    }

    pub async fn with_settings(customize: impl FnOnce(&mut Settings)) -> Self {
        let db = TestDb::new().await;
        let documents = TempDir::new().expect("Failed to create document root");

        let mut settings = Settings::default();
        settings.server.public_base_url = Some(BASE_URL.to_string());
        settings.storage.root = documents.path().to_path_buf();
        settings.storage.signing_secret = Some(SIGNING_SECRET.to_string());
        settings.email.retry_backoff_ms = 1;
        customize(&mut settings);
        let settings = Arc::new(settings);

        let store = Arc::new(
            LocalDocumentStore::new(&settings.storage, settings.public_base_url())
                .expect("Failed to create document store"),
        );
        let outbox = Arc::new(RecordingTransport::default());
        let (mailer, _worker) = Mailer::start(
            outbox.clone(),
            settings.email.queue_capacity,
            settings.email.max_in_flight,
            RetryPolicy {
                max_attempts: 1,
                backoff: Duration::from_millis(1),
            },
        );

        let service = ConsentService::new(
            db.connection().clone(),
            settings.clone(),
            store.clone() as Arc<dyn DocumentStore>,
            mailer,
        );

        Self {
            db,
            settings,
            store,
            outbox,
            service,
            _documents: documents,
        }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        self.db.connection()
    }

    /// Writes `bytes` to the document store and returns the stored path.
    pub async fn upload(&self, file_name: &str, bytes: &[u8]) -> String {
        self.store
            .put(file_name, bytes)
            .await
            .expect("Failed to store document")
    }
}
