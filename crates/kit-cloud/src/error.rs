// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Failure reported by a cloud provider call.
///
/// Variants classify the provider's error codes into the handful of
/// outcomes controllers act on.
#[derive(Error, Debug, Clone, PartialEq, Diagnostic)]
pub enum CloudError {
    /// Object does not exist
    #[error("{operation}: {resource} not found")]
    #[diagnostic(
        code(kit::cloud::not_found),
        help("The object was deleted outside of kit or never existed")
    )]
    NotFound {
        #[allow(unused)]
        operation: String,
        #[allow(unused)]
        resource: String,
    },

    /// Another object still references the target
    #[error("{operation}: {resource} has dependent objects: {message}")]
    #[diagnostic(
        code(kit::cloud::dependency_violation),
        help("Delete the dependent objects first; the request is retried automatically")
    )]
    DependencyViolation {
        #[allow(unused)]
        operation: String,
        #[allow(unused)]
        resource: String,
        #[allow(unused)]
        message: String,
    },

    /// Request rate exceeded
    #[error("{operation}: request throttled")]
    #[diagnostic(
        code(kit::cloud::throttled),
        help("The request is retried with backoff")
    )]
    Throttled {
        #[allow(unused)]
        operation: String,
    },

    /// Provider is temporarily unavailable
    #[error("{operation}: service unavailable: {message}")]
    #[diagnostic(
        code(kit::cloud::unavailable),
        help("The request is retried with backoff")
    )]
    Unavailable {
        #[allow(unused)]
        operation: String,
        #[allow(unused)]
        message: String,
    },

    /// Request parameters were rejected
    #[error("{operation}: invalid parameter: {message}")]
    #[diagnostic(
        code(kit::cloud::invalid_parameter),
        help("Check the ControlPlane spec for values the provider does not accept")
    )]
    InvalidParameter {
        #[allow(unused)]
        operation: String,
        #[allow(unused)]
        message: String,
    },

    /// Any other provider failure
    #[error("{operation}: {message}")]
    #[diagnostic(code(kit::cloud::internal), help("Inspect the provider error message"))]
    Internal {
        #[allow(unused)]
        operation: String,
        #[allow(unused)]
        message: String,
    },
}

/// Result type for cloud calls
pub type Result<T> = std::result::Result<T, CloudError>;

impl CloudError {
    pub fn not_found(operation: impl Into<String>, resource: impl Into<String>) -> Self {
        Self::NotFound {
            operation: operation.into(),
            resource: resource.into(),
        }
    }

    pub fn dependency_violation(
        operation: impl Into<String>,
        resource: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::DependencyViolation {
            operation: operation.into(),
            resource: resource.into(),
            message: message.into(),
        }
    }

    pub fn throttled(operation: impl Into<String>) -> Self {
        Self::Throttled {
            operation: operation.into(),
        }
    }

    pub fn unavailable(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unavailable {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn invalid_parameter(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn internal(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Internal {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_dependency_violation(&self) -> bool {
        matches!(self, Self::DependencyViolation { .. })
    }

    /// Throttling and availability failures that clear on their own
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Throttled { .. } | Self::Unavailable { .. })
    }
}

/// Map "absent" to success for delete-style calls
pub fn ignore_not_found(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(CloudError::not_found("DeleteVpc", "vpc-1").is_not_found());
        assert!(CloudError::dependency_violation("DeleteVpc", "vpc-1", "subnets").is_dependency_violation());
        assert!(CloudError::throttled("DescribeVpcs").is_transient());
        assert!(!CloudError::internal("DescribeVpcs", "boom").is_transient());
    }

    #[test]
    fn test_ignore_not_found() {
        assert!(ignore_not_found(Err(CloudError::not_found("DeleteVpc", "vpc-1"))).is_ok());
        assert!(ignore_not_found(Err(CloudError::throttled("DeleteVpc"))).is_err());
    }
}
