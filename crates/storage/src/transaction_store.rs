use std::str::FromStr;

use ledger_watch_domain::model::{AlertType, NewTransaction, TransactionQuery, TransactionRecord};
use ledger_watch_domain::storage::{StorageError, StorageResult, TransactionStore};
use sea_orm::sea_query::OnConflict;
use sea_orm::{EntityTrait, QueryOrder, QuerySelect, Set};

use crate::entity::transactions;
use crate::SeaOrmStorage;

#[async_trait::async_trait]
impl TransactionStore for SeaOrmStorage {
    async fn insert_transaction(&self, transaction: NewTransaction) -> StorageResult<()> {
        let model = transactions::ActiveModel {
            hash: Set(transaction.hash),
            from_address: Set(transaction.from),
            to_address: Set(transaction.to),
            value: Set(transaction.value),
            is_high_value: Set(transaction.is_high_value),
            is_suspicious: Set(transaction.is_suspicious),
            alert_type: Set(transaction.alert_type.map(|tag| tag.as_ref().to_string())),
            detected_at: Set(transaction.detected_at),
            ..Default::default()
        };
        transactions::Entity::insert(model)
            .on_conflict(
                OnConflict::column(transactions::Column::Hash)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(())
    }

    async fn list_transactions(
        &self,
        query: TransactionQuery,
    ) -> StorageResult<Vec<TransactionRecord>> {
        let models = transactions::Entity::find()
            .order_by_desc(transactions::Column::DetectedAt)
            .order_by_desc(transactions::Column::Id)
            .offset(query.skip)
            .limit(query.limit)
            .all(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        models.into_iter().map(transaction_to_record).collect()
    }
}

fn transaction_to_record(model: transactions::Model) -> StorageResult<TransactionRecord> {
    let alert_type = model
        .alert_type
        .as_deref()
        .map(AlertType::from_str)
        .transpose()
        .map_err(StorageError::from_source)?;

    Ok(TransactionRecord {
        id: model.id,
        hash: model.hash,
        from: model.from_address,
        to: model.to_address,
        value: model.value,
        is_high_value: model.is_high_value,
        is_suspicious: model.is_suspicious,
        alert_type,
        detected_at: model.detected_at,
    })
}
