// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Core error type for kit records and naming
#[derive(Error, Debug, Diagnostic)]
pub enum KitError {
    /// Record not found
    #[error("Resource not found: {resource_key}")]
    #[diagnostic(
        code(kit::core::resource_not_found),
        help("Verify the record name, namespace and kind are correct")
    )]
    ResourceNotFound {
        #[allow(unused)]
        resource_key: String,
    },

    /// Record already exists
    #[error("Resource already exists: {resource_key}")]
    #[diagnostic(
        code(kit::core::resource_already_exists),
        help("Delete the existing record first or pick another name")
    )]
    ResourceAlreadyExists {
        #[allow(unused)]
        resource_key: String,
    },

    /// Validation failed
    #[error("Validation failed for {resource_type}: {details}")]
    #[diagnostic(code(kit::core::validation_failed), help("{help_text}"))]
    ValidationFailed {
        #[allow(unused)]
        resource_type: String,
        #[allow(unused)]
        details: String,
        #[allow(unused)]
        help_text: String,
    },

    /// CIDR block could not be parsed or split
    #[error("Invalid CIDR block '{cidr}': {reason}")]
    #[diagnostic(
        code(kit::core::invalid_cidr),
        help("Use an IPv4 block such as 10.0.0.0/16 with a prefix of /24 or shorter")
    )]
    InvalidCidr {
        #[allow(unused)]
        cidr: String,
        #[allow(unused)]
        reason: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(
        code(kit::core::serialization_error),
        help("Ensure the record format is valid JSON or YAML")
    )]
    SerializationError {
        #[allow(unused)]
        message: String,
        #[source]
        #[allow(unused)]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Internal error
    #[error("Internal error: {message}")]
    #[diagnostic(
        code(kit::core::internal_error),
        help("This is likely a bug. Please report it with the full error details")
    )]
    InternalError {
        #[allow(unused)]
        message: String,
    },
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, KitError>;

impl KitError {
    /// Create a ResourceNotFound error
    pub fn resource_not_found(resource_key: impl Into<String>) -> Self {
        Self::ResourceNotFound {
            resource_key: resource_key.into(),
        }
    }

    /// Create a ResourceAlreadyExists error
    pub fn resource_already_exists(resource_key: impl Into<String>) -> Self {
        Self::ResourceAlreadyExists {
            resource_key: resource_key.into(),
        }
    }

    /// Create a ValidationFailed error
    pub fn validation_failed(
        resource_type: impl Into<String>,
        details: impl Into<String>,
        help_text: impl Into<String>,
    ) -> Self {
        Self::ValidationFailed {
            resource_type: resource_type.into(),
            details: details.into(),
            help_text: help_text.into(),
        }
    }

    /// Create an InvalidCidr error
    pub fn invalid_cidr(cidr: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidCidr {
            cidr: cidr.into(),
            reason: reason.into(),
        }
    }

    /// Create a SerializationError
    pub fn serialization_error(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::SerializationError {
            message: message.into(),
            source,
        }
    }

    /// Create an InternalError
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = KitError::resource_not_found("Vpc/default/demo");
        assert!(matches!(err, KitError::ResourceNotFound { .. }));
        assert_eq!(err.to_string(), "Resource not found: Vpc/default/demo");

        let err = KitError::invalid_cidr("10.0.0.0/30", "prefix too long");
        assert!(err.to_string().contains("10.0.0.0/30"));
    }
}
