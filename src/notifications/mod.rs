use crate::{
    config::SmsConfig,
    db::DbPool,
    entities::{parent, Parent},
    errors::ServiceError,
};
use sea_orm::sea_query::Expr;
use sea_orm::{ConnectionTrait, DbBackend, EntityTrait, QueryFilter};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Notification errors. These never propagate into a committed workflow; the
/// dispatcher logs them and moves on.
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Gateway error: {0}")]
    Gateway(String),
    #[error("Lookup error: {0}")]
    Lookup(String),
}

/// Outbound SMS gateway client (HTTP GET with templated text).
#[derive(Clone)]
pub struct SmsClient {
    http: reqwest::Client,
    config: SmsConfig,
}

impl SmsClient {
    pub fn new(config: SmsConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
        }
    }

    /// An empty API key disables dispatch entirely.
    pub fn is_configured(&self) -> bool {
        !self.config.api_key.is_empty()
    }

    pub fn store_name(&self) -> &str {
        &self.config.store_name
    }

    /// Fires one message at the gateway. The response body is ignored beyond
    /// the status line.
    pub async fn send(&self, phone_number: &str, lines: &[String]) -> Result<(), NotificationError> {
        let text = lines.join("\n");
        let number = format!("{}{}", self.config.country_prefix, phone_number);

        let response = self
            .http
            .get(&self.config.base_url)
            .query(&[
                ("APIKey", self.config.api_key.as_str()),
                ("senderid", self.config.sender_id.as_str()),
                ("channel", "Trans"),
                ("DCS", "0"),
                ("flashsms", "0"),
                ("number", number.as_str()),
                ("text", text.as_str()),
                ("route", self.config.route.as_str()),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(NotificationError::Gateway(format!(
                "sms gateway returned {}",
                response.status()
            )));
        }

        debug!(number = %number, "SMS dispatched");
        Ok(())
    }
}

/// One student affected by a payment outcome.
#[derive(Debug, Clone)]
pub struct OrderOutcomeNotice {
    pub usid: String,
    pub student_name: String,
}

/// Post-commit SMS dispatcher for payment outcomes. Spawned as a detached
/// task so a slow or failing gateway cannot touch the committed transaction.
#[derive(Clone)]
pub struct PaymentNotifier {
    db: Arc<DbPool>,
    sms: SmsClient,
}

impl PaymentNotifier {
    pub fn new(db: Arc<DbPool>, sms: SmsClient) -> Self {
        Self { db, sms }
    }

    /// Fire-and-forget: one message per affected student, failures logged.
    pub fn dispatch_order_outcome(&self, notices: Vec<OrderOutcomeNotice>, success: bool) {
        if notices.is_empty() {
            return;
        }
        let notifier = self.clone();
        tokio::spawn(async move {
            for notice in notices {
                if let Err(e) = notifier.notify_parent(&notice, success).await {
                    warn!(usid = %notice.usid, "Failed to send order outcome SMS: {}", e);
                }
            }
        });
    }

    async fn notify_parent(
        &self,
        notice: &OrderOutcomeNotice,
        success: bool,
    ) -> Result<(), NotificationError> {
        if !self.sms.is_configured() {
            debug!("SMS gateway not configured; skipping notification");
            return Ok(());
        }

        let parent = parent_for_student(&self.db, &notice.usid)
            .await
            .map_err(|e| NotificationError::Lookup(e.to_string()))?;

        let Some(parent) = parent else {
            warn!("Parent not found for student USID: {}", notice.usid);
            return Ok(());
        };

        let lines = order_outcome_lines(
            success,
            &notice.student_name,
            &notice.usid,
            self.sms.store_name(),
        );
        self.sms.send(&parent.phone_number, &lines).await
    }
}

/// Finds the parent whose roster contains the given student USID.
///
/// On Postgres this is a parameterized jsonb containment filter; other
/// backends (dev/test SQLite) fall back to scanning and matching in memory.
pub async fn parent_for_student(
    db: &DbPool,
    usid: &str,
) -> Result<Option<parent::Model>, ServiceError> {
    if db.get_database_backend() == DbBackend::Postgres {
        let roster_filter =
            Expr::cust_with_values("students @> $1::jsonb", [serde_json::json!([usid])]);
        Ok(Parent::find().filter(roster_filter).one(db).await?)
    } else {
        let parents = Parent::find().all(db).await?;
        Ok(parents
            .into_iter()
            .find(|p| roster_contains(&p.students, usid)))
    }
}

/// True when the JSON roster array contains exactly this USID.
pub fn roster_contains(roster: &serde_json::Value, usid: &str) -> bool {
    roster
        .as_array()
        .map(|arr| arr.iter().any(|v| v.as_str() == Some(usid)))
        .unwrap_or(false)
}

/// Message body for a payment outcome, one line per element. Joined with
/// newlines at send time; the gateway expects them URL-encoded, which the
/// HTTP client's query encoding provides.
pub fn order_outcome_lines(
    success: bool,
    student_name: &str,
    usid: &str,
    store_name: &str,
) -> Vec<String> {
    vec![
        "Dear Parent,".to_string(),
        String::new(),
        if success {
            "Your order has been placed successfully!".to_string()
        } else {
            "Your order was unsuccessful/cancelled.".to_string()
        },
        String::new(),
        format!("Student Name: {}", student_name),
        format!("USID: {}", usid),
        format!("Company: {}", store_name),
        String::new(),
        if success {
            "Thank you for the purchase. Your product will be delivered soon.".to_string()
        } else {
            "Please check your payment details or try again.".to_string()
        },
        String::new(),
        "Regards,".to_string(),
        format!("Team {}", store_name),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(base_url: String) -> SmsConfig {
        SmsConfig {
            base_url,
            api_key: "test-key".to_string(),
            sender_id: "UNIFRM".to_string(),
            country_prefix: "91".to_string(),
            route: "2".to_string(),
            store_name: "The Uniform Store".to_string(),
        }
    }

    #[test]
    fn roster_contains_matches_exact_usid() {
        let roster = serde_json::json!(["USID-001", "USID-002"]);
        assert!(roster_contains(&roster, "USID-001"));
        assert!(!roster_contains(&roster, "USID-00"));
        assert!(!roster_contains(&roster, "USID-003"));
    }

    #[test]
    fn roster_contains_rejects_non_array_roster() {
        let roster = serde_json::json!({"usid": "USID-001"});
        assert!(!roster_contains(&roster, "USID-001"));
    }

    #[test]
    fn outcome_lines_mention_student_and_result() {
        let lines = order_outcome_lines(true, "Asha", "USID-001", "The Uniform Store");
        assert!(lines.contains(&"Your order has been placed successfully!".to_string()));
        assert!(lines.contains(&"Student Name: Asha".to_string()));
        assert!(lines.contains(&"USID: USID-001".to_string()));

        let lines = order_outcome_lines(false, "Asha", "USID-001", "The Uniform Store");
        assert!(lines.contains(&"Your order was unsuccessful/cancelled.".to_string()));
        assert!(lines.contains(&"Please check your payment details or try again.".to_string()));
    }

    #[tokio::test]
    async fn sms_client_sends_prefixed_number_and_api_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("APIKey", "test-key"))
            .and(query_param("number", "919876543210"))
            .and(query_param("channel", "Trans"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = SmsClient::new(test_config(server.uri()));
        client
            .send("9876543210", &["Dear Parent,".to_string()])
            .await
            .expect("send should succeed");
    }

    #[tokio::test]
    async fn sms_client_surfaces_gateway_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = SmsClient::new(test_config(server.uri()));
        let err = client
            .send("9876543210", &["Dear Parent,".to_string()])
            .await
            .expect_err("gateway failure should surface");
        assert!(matches!(err, NotificationError::Gateway(_)));
    }

    #[test]
    fn unconfigured_client_reports_not_configured() {
        let client = SmsClient::new(SmsConfig::default());
        assert!(!client.is_configured());
    }
}
