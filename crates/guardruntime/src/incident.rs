use async_trait::async_trait;
use chrono::{DateTime, Utc};
use guardcore::ExecutionId;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Incident emitted when a run crosses the risk thresholds
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IncidentRecord {
    pub id: Uuid,
    pub workflow_id: String,
    pub execution_id: ExecutionId,
    pub title: String,
    pub severity: String,
    /// Risk on the 1–10 scale
    pub risk_score: f64,
    pub threat_type: String,
    pub event_id: String,
    pub ml_confidence: Option<f64>,
    pub ai_threat_level: Option<String>,
    pub recommendations: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Error, Debug)]
pub enum CaseManagementError {
    #[error("Case management unavailable: {0}")]
    Unavailable(String),

    #[error("Case management rejected incident: {0}")]
    Rejected(String),
}

/// External case-management collaborator
#[async_trait]
pub trait CaseManagement: Send + Sync {
    /// Create an incident and return the case id assigned by the service
    async fn create_incident(&self, record: &IncidentRecord) -> Result<String, CaseManagementError>;
}

/// Default sink: writes the incident to the log only
pub struct LoggingCaseManagement;

#[async_trait]
impl CaseManagement for LoggingCaseManagement {
    async fn create_incident(&self, record: &IncidentRecord) -> Result<String, CaseManagementError> {
        tracing::warn!(
            incident_id = %record.id,
            workflow_id = %record.workflow_id,
            severity = %record.severity,
            risk_score = record.risk_score,
            "Incident raised: {}",
            record.title
        );
        Ok(record.id.to_string())
    }
}
