use crate::{
    config::AdminCredential,
    db::DbPool,
    entities::{settings, Settings},
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use sea_orm::{ActiveModelTrait, EntityTrait, QueryOrder, Set};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Global settings service.
///
/// There is a single settings row, provisioned out of band; its absence is a
/// deployment fault, not runtime state. Mutations are gated by the shared
/// admin secret and a wrong code is a structured refusal, not an error.
#[derive(Clone)]
pub struct SettingsService {
    db: Arc<DbPool>,
    event_sender: Arc<EventSender>,
    admin: AdminCredential,
}

impl SettingsService {
    pub fn new(db: Arc<DbPool>, event_sender: Arc<EventSender>, admin: AdminCredential) -> Self {
        Self {
            db,
            event_sender,
            admin,
        }
    }

    /// Returns the current settings row (newest wins).
    #[instrument(skip(self))]
    pub async fn get_settings(&self) -> Result<settings::Model, ServiceError> {
        Settings::find()
            .order_by_desc(settings::Column::CreatedAt)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Settings not found".to_string()))
    }

    /// Merges the present patch fields into the settings row.
    ///
    /// A mismatched security code returns `success = false` without touching
    /// the row.
    #[instrument(skip(self, input))]
    pub async fn update_settings(
        &self,
        input: UpdateSettingsInput,
    ) -> Result<SettingsUpdate, ServiceError> {
        if !self.admin.verify(&input.security_code) {
            warn!("Settings update rejected: invalid security code");
            return Ok(SettingsUpdate {
                success: false,
                message: "Invalid security code".to_string(),
                settings: None,
            });
        }

        let current = self.get_settings().await?;
        let mut active: settings::ActiveModel = current.into();
        if let Some(v) = input.enable_individual_products {
            active.enable_individual_products = Set(v);
        }
        if let Some(v) = input.enable_bulk_products {
            active.enable_bulk_products = Set(v);
        }
        if let Some(v) = input.enable_purchasing {
            active.enable_purchasing = Set(v);
        }
        active.updated_at = Set(Utc::now());

        let updated = active.update(&*self.db).await?;

        self.event_sender.send_or_log(Event::SettingsUpdated).await;
        info!("Settings updated");

        Ok(SettingsUpdate {
            success: true,
            message: "Settings updated successfully".to_string(),
            settings: Some(updated),
        })
    }
}

/// Patch for the settings row; absent fields are left untouched.
#[derive(Debug, Deserialize)]
pub struct UpdateSettingsInput {
    pub enable_individual_products: Option<bool>,
    pub enable_bulk_products: Option<bool>,
    pub enable_purchasing: Option<bool>,
    pub security_code: String,
}

#[derive(Debug, Serialize)]
pub struct SettingsUpdate {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<settings::Model>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_input_deserializes_partial_patch() {
        let json = r#"{
            "enable_purchasing": false,
            "security_code": "1234"
        }"#;

        let input: UpdateSettingsInput =
            serde_json::from_str(json).expect("deserialization should succeed");
        assert_eq!(input.enable_purchasing, Some(false));
        assert!(input.enable_individual_products.is_none());
        assert!(input.enable_bulk_products.is_none());
        assert_eq!(input.security_code, "1234");
    }

    #[test]
    fn failed_update_serializes_without_settings() {
        let update = SettingsUpdate {
            success: false,
            message: "Invalid security code".to_string(),
            settings: None,
        };

        let value = serde_json::to_value(&update).unwrap();
        assert_eq!(value["success"], false);
        assert!(value.get("settings").is_none());
    }
}
