use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Enable foreign keys for SQLite
        if manager.get_database_backend() == sea_orm::DatabaseBackend::Sqlite {
            manager
                .get_connection()
                .execute_unprepared("PRAGMA foreign_keys = ON")
                .await?;
        }

        // Recipient directory: clients
        manager
            .create_table(
                Table::create()
                    .table(Clients::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Clients::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(string(Clients::Name))
                    .col(string_null(Clients::Email))
                    .col(big_integer(Clients::CreatedAt))
                    .to_owned(),
            )
            .await?;

        // Recipient directory: jobseeker profiles
        manager
            .create_table(
                Table::create()
                    .table(JobseekerProfiles::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(JobseekerProfiles::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(string(JobseekerProfiles::FirstName))
                    .col(string(JobseekerProfiles::LastName))
                    .col(string_null(JobseekerProfiles::Email))
                    .col(big_integer(JobseekerProfiles::CreatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ConsentDocuments::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ConsentDocuments::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(string(ConsentDocuments::FileName))
                    .col(string(ConsentDocuments::FilePath))
                    .col(string(ConsentDocuments::UploadedBy))
                    .col(
                        ColumnDef::new(ConsentDocuments::Version)
                            .integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(ConsentDocuments::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(string(ConsentDocuments::RecipientType))
                    .col(big_integer(ConsentDocuments::CreatedAt))
                    .col(big_integer(ConsentDocuments::UpdatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_consent_documents_created_at")
                    .table(ConsentDocuments::Table)
                    .col(ConsentDocuments::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ConsentRecords::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ConsentRecords::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(string(ConsentRecords::DocumentId))
                    .col(string(ConsentRecords::ConsentableId))
                    .col(string(ConsentRecords::ConsentableType))
                    .col(
                        ColumnDef::new(ConsentRecords::Status)
                            .string()
                            .not_null()
                            .default("pending"),
                    )
                    .col(string(ConsentRecords::ConsentToken))
                    .col(big_integer(ConsentRecords::SentAt))
                    .col(big_integer_null(ConsentRecords::CompletedAt))
                    .col(string_null(ConsentRecords::ConsentedName))
                    .col(string_null(ConsentRecords::IpAddress))
                    .col(big_integer(ConsentRecords::CreatedAt))
                    .col(big_integer(ConsentRecords::UpdatedAt))
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_consent_records_document")
                            .from(ConsentRecords::Table, ConsentRecords::DocumentId)
                            .to(ConsentDocuments::Table, ConsentDocuments::Id)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        // The token is a bearer credential and must resolve to exactly one record
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_consent_records_token")
                    .table(ConsentRecords::Table)
                    .col(ConsentRecords::ConsentToken)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_consent_records_document_recipient")
                    .table(ConsentRecords::Table)
                    .col(ConsentRecords::DocumentId)
                    .col(ConsentRecords::ConsentableId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_consent_records_status_sent_at")
                    .table(ConsentRecords::Table)
                    .col(ConsentRecords::Status)
                    .col(ConsentRecords::SentAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ConsentRecords::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ConsentDocuments::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(JobseekerProfiles::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Clients::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Clients {
    Table,
    Id,
    Name,
    Email,
    CreatedAt,
}

#[derive(DeriveIden)]
enum JobseekerProfiles {
    Table,
    Id,
    FirstName,
    LastName,
    Email,
    CreatedAt,
}

#[derive(DeriveIden)]
enum ConsentDocuments {
    Table,
    Id,
    FileName,
    FilePath,
    UploadedBy,
    Version,
    IsActive,
    RecipientType,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum ConsentRecords {
    Table,
    Id,
    DocumentId,
    ConsentableId,
    ConsentableType,
    Status,
    ConsentToken,
    SentAt,
    CompletedAt,
    ConsentedName,
    IpAddress,
    CreatedAt,
    UpdatedAt,
}
