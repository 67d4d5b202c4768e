use thiserror::Error;

#[derive(Error, Debug)]
pub enum GuardError {
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NodeError {
    #[error("Node not found: {0}")]
    NotFound(String),

    #[error("Invalid configuration: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),

    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Node panicked: {0}")]
    Panicked(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("Duplicate node id in workflow: {0}")]
    DuplicateNode(String),

    #[error("Edge references unknown node: {0}")]
    DanglingEdge(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_joins_messages() {
        let err = NodeError::InvalidConfig(vec![
            "Missing required field: url".to_string(),
            "Field 'timeout' must be a number".to_string(),
        ]);
        assert_eq!(
            err.to_string(),
            "Invalid configuration: Missing required field: url; Field 'timeout' must be a number"
        );
    }

    #[test]
    fn test_structural_errors_name_the_node() {
        let err: GuardError = WorkflowError::DanglingEdge("ghost".to_string()).into();
        assert_eq!(
            err.to_string(),
            "Workflow error: Edge references unknown node: ghost"
        );
        let err: GuardError = NodeError::Panicked("boom".to_string()).into();
        assert_eq!(err.to_string(), "Node error: Node panicked: boom");
    }
}
