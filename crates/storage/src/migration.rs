use sea_orm::sea_query::{ColumnDef, Index, IndexCreateStatement, Table, TableCreateStatement};
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection};

use crate::entity::{alerts, transactions};
use ledger_watch_domain::storage::{StorageError, StorageResult};

pub async fn run_migrations(db: &DatabaseConnection) -> StorageResult<()> {
    let backend = db.get_database_backend();

    let transactions_table = Table::create()
        .table(transactions::Entity)
        .col(
            ColumnDef::new(transactions::Column::Id)
                .big_integer()
                .not_null()
                .auto_increment()
                .primary_key(),
        )
        .col(
            ColumnDef::new(transactions::Column::Hash)
                .string_len(66)
                .not_null()
                .unique_key(),
        )
        .col(
            ColumnDef::new(transactions::Column::FromAddress)
                .string_len(42)
                .not_null(),
        )
        .col(
            ColumnDef::new(transactions::Column::ToAddress)
                .string_len(42)
                .null(),
        )
        .col(
            ColumnDef::new(transactions::Column::Value)
                .double()
                .not_null(),
        )
        .col(
            ColumnDef::new(transactions::Column::IsHighValue)
                .boolean()
                .not_null(),
        )
        .col(
            ColumnDef::new(transactions::Column::IsSuspicious)
                .boolean()
                .not_null(),
        )
        .col(
            ColumnDef::new(transactions::Column::AlertType)
                .string_len(32)
                .null(),
        )
        .col(
            ColumnDef::new(transactions::Column::DetectedAt)
                .timestamp_with_time_zone()
                .not_null(),
        )
        .to_owned();
    create_table(db, backend, transactions_table).await?;

    let alerts_table = Table::create()
        .table(alerts::Entity)
        .col(
            ColumnDef::new(alerts::Column::Id)
                .big_integer()
                .not_null()
                .auto_increment()
                .primary_key(),
        )
        .col(
            ColumnDef::new(alerts::Column::AlertType)
                .string_len(32)
                .not_null(),
        )
        .col(
            ColumnDef::new(alerts::Column::Description)
                .string()
                .not_null(),
        )
        .col(
            ColumnDef::new(alerts::Column::TxHash)
                .string_len(66)
                .not_null(),
        )
        .col(
            ColumnDef::new(alerts::Column::CreatedAt)
                .timestamp_with_time_zone()
                .not_null(),
        )
        .to_owned();
    create_table(db, backend, alerts_table).await?;

    create_index(
        db,
        backend,
        Index::create()
            .name("idx_transactions_detected_at")
            .table(transactions::Entity)
            .col(transactions::Column::DetectedAt)
            .to_owned(),
    )
    .await?;
    create_index(
        db,
        backend,
        Index::create()
            .name("idx_alerts_created_at")
            .table(alerts::Entity)
            .col(alerts::Column::CreatedAt)
            .to_owned(),
    )
    .await?;

    Ok(())
}

async fn create_table(
    db: &DatabaseConnection,
    backend: DatabaseBackend,
    mut statement: TableCreateStatement,
) -> StorageResult<()> {
    statement.if_not_exists();
    db.execute(backend.build(&statement))
        .await
        .map_err(StorageError::from_source)?;
    Ok(())
}

async fn create_index(
    db: &DatabaseConnection,
    backend: DatabaseBackend,
    mut statement: IndexCreateStatement,
) -> StorageResult<()> {
    statement.if_not_exists();
    db.execute(backend.build(&statement))
        .await
        .map_err(StorageError::from_source)?;
    Ok(())
}
