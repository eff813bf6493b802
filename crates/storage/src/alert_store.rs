use std::str::FromStr;

use chrono::{DateTime, Utc};
use ledger_watch_domain::model::{AlertRecord, AlertType, NewAlert};
use ledger_watch_domain::storage::{AlertStore, StorageError, StorageResult};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set};

use crate::entity::alerts;
use crate::SeaOrmStorage;

#[async_trait::async_trait]
impl AlertStore for SeaOrmStorage {
    async fn insert_alert(&self, alert: NewAlert) -> StorageResult<()> {
        let model = alerts::ActiveModel {
            alert_type: Set(alert.alert_type.as_ref().to_string()),
            description: Set(alert.description),
            tx_hash: Set(alert.tx_hash),
            created_at: Set(alert.created_at),
            ..Default::default()
        };
        alerts::Entity::insert(model)
            .exec_without_returning(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        Ok(())
    }

    async fn list_alerts_since(&self, since: DateTime<Utc>) -> StorageResult<Vec<AlertRecord>> {
        let models = alerts::Entity::find()
            .filter(alerts::Column::CreatedAt.gte(since))
            .order_by_desc(alerts::Column::CreatedAt)
            .order_by_desc(alerts::Column::Id)
            .all(self.connection())
            .await
            .map_err(StorageError::from_source)?;
        models.into_iter().map(alert_to_record).collect()
    }
}

fn alert_to_record(model: alerts::Model) -> StorageResult<AlertRecord> {
    let alert_type = AlertType::from_str(&model.alert_type).map_err(StorageError::from_source)?;

    Ok(AlertRecord {
        id: model.id,
        alert_type,
        description: model.description,
        tx_hash: model.tx_hash,
        created_at: model.created_at,
    })
}
