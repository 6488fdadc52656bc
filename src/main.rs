use clap::Parser;
use countersign::document_store::{DocumentStore, LocalDocumentStore};
use countersign::mailer::{self, Mailer, RetryPolicy};
use countersign::{jobs, recipient_sync, settings, storage, web, workflow};
use miette::Result;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "countersign",
    version,
    about = "Token-based consent collection service"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Sync recipients from this JSON file before starting (overrides
    /// recipients.sync_file)
    #[arg(long)]
    sync_recipients: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    // load settings
    let settings = settings::Settings::load(&cli.config)?;
    tracing::info!(
        database = %settings.database.url,
        storage_root = %settings.storage.root.display(),
        email_transport = ?settings.email.transport,
        "Loaded configuration"
    );

    // init storage (database + migrations)
    let db = storage::init(&settings.database).await?;

    if let Some(path) = cli
        .sync_recipients
        .as_deref()
        .or(settings.recipients.sync_file.as_deref())
    {
        recipient_sync::sync_recipients_from_file(&db, path).await?;
    }

    let store: Arc<dyn DocumentStore> = Arc::new(
        LocalDocumentStore::new(&settings.storage, settings.public_base_url())?,
    );

    let transport = mailer::transport_from_settings(&settings.email)?;
    let (mailer, _mail_worker) = Mailer::start(
        transport,
        settings.email.queue_capacity,
        settings.email.max_in_flight,
        RetryPolicy::from(&settings.email),
    );

    // Kept alive for the life of the process
    let _scheduler = jobs::init_scheduler(db.clone(), &settings).await?;

    let settings = Arc::new(settings);
    let service = workflow::ConsentService::new(db, settings.clone(), store, mailer);

    web::serve(web::AppState { settings, service }).await
}
