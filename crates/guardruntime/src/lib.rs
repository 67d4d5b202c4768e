//! Security workflow execution runtime
//!
//! This crate provides the node registry and factory, the workflow executor
//! with its ordering and short-circuit rules, the per-workflow rate limiter
//! and the shared threat-intel verdict aggregator.

pub mod aggregator;
mod config;
mod executor;
mod factory;
mod incident;
mod rate_limiter;
mod registry;
mod runtime;

pub use aggregator::{
    aggregate, AggregatedVerdict, Geolocation, Reputation, ThreatIntelQueryResult,
};
pub use config::{IncidentPolicy, OrderingStrategy, RateLimitConfig, RuntimeConfig};
pub use executor::{
    execution_order, RunSummary, WorkflowExecutor, WorkflowRunResult, AI_ANALYSIS_TYPE,
    ML_SCORING_TYPE,
};
pub use factory::{NodeFactory, NodeInvocation, SequenceResult, WorkflowValidation, STOP_ON_ERROR};
pub use incident::{CaseManagement, CaseManagementError, IncidentRecord, LoggingCaseManagement};
pub use rate_limiter::RateLimiter;
pub use registry::NodeRegistry;
pub use runtime::{GuardRuntime, AD_HOC_WORKFLOW_ID};
