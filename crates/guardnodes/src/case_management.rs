use crate::classifier::{ClassifierClient, ClassifierError};
use crate::support::text;
use async_trait::async_trait;
use guardruntime::{CaseManagement, CaseManagementError, IncidentRecord};
use std::time::Duration;

pub const CASE_TIMEOUT: Duration = Duration::from_secs(10);

/// Creates incidents in an external case-management service over HTTP
pub struct HttpCaseManagement {
    client: ClassifierClient,
}

impl HttpCaseManagement {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_timeout(url, CASE_TIMEOUT)
    }

    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: ClassifierClient::new(Some(url.into()), timeout),
        }
    }
}

#[async_trait]
impl CaseManagement for HttpCaseManagement {
    async fn create_incident(&self, record: &IncidentRecord) -> Result<String, CaseManagementError> {
        let response = self
            .client
            .classify(record, self.client.timeout())
            .await
            .map_err(|e| match e {
                ClassifierError::Status(code) if (400..500).contains(&code) => {
                    CaseManagementError::Rejected(format!("status {code}"))
                }
                other => CaseManagementError::Unavailable(other.to_string()),
            })?;

        let case_id = text(&response, "case_id")
            .or_else(|| text(&response, "id"))
            .map(String::from)
            .unwrap_or_else(|| record.id.to_string());

        tracing::info!(
            incident_id = %record.id,
            case_id = %case_id,
            severity = %record.severity,
            "Incident forwarded to case management"
        );
        Ok(case_id)
    }
}
