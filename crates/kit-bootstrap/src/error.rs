// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use kit_cloud::CloudError;
use miette::Diagnostic;
use thiserror::Error;

/// Bootstrap error type
#[derive(Error, Debug, Diagnostic)]
pub enum BootstrapError {
    /// Certificate or key generation failed
    #[error("Certificate error for {name}: {message}")]
    #[diagnostic(
        code(kit::bootstrap::certificate_error),
        help("Check the subject alternative names; every entry must be a DNS name or an IP address")
    )]
    CertificateError {
        #[allow(unused)]
        name: String,
        #[allow(unused)]
        message: String,
    },

    /// Previously staged material could not be read back
    #[error("Invalid staged material at {path}: {message}")]
    #[diagnostic(
        code(kit::bootstrap::invalid_material),
        help("Delete the object from the distribution bucket so it is regenerated")
    )]
    InvalidMaterial {
        #[allow(unused)]
        path: String,
        #[allow(unused)]
        message: String,
    },

    /// Material an earlier phase should have staged is missing
    #[error("Missing staged material at {path}")]
    #[diagnostic(
        code(kit::bootstrap::missing_material),
        help("The earlier bootstrap phase has not completed; clear the progress flags to re-run it")
    )]
    MissingMaterial {
        #[allow(unused)]
        path: String,
    },

    /// A required infrastructure handle is absent
    #[error("Missing infrastructure handle: {handle}")]
    #[diagnostic(
        code(kit::bootstrap::missing_handle),
        help("The provisioning pipeline must publish this handle before bootstrap runs")
    )]
    MissingHandle {
        #[allow(unused)]
        handle: String,
    },

    /// More nodes carry a role tag than the cluster expects
    #[error("Found {found} {role} nodes for cluster {cluster}, expected {expected}")]
    #[diagnostic(
        code(kit::bootstrap::node_cardinality),
        help("Terminate the extra instances; membership is fixed when certificates are generated")
    )]
    NodeCardinality {
        #[allow(unused)]
        cluster: String,
        #[allow(unused)]
        role: String,
        #[allow(unused)]
        expected: usize,
        #[allow(unused)]
        found: usize,
    },

    /// Rendering a manifest or config file failed
    #[error("Failed to render {file}: {message}")]
    #[diagnostic(code(kit::bootstrap::render_error), help("This is a bug in the renderer"))]
    RenderError {
        #[allow(unused)]
        file: String,
        #[allow(unused)]
        message: String,
    },

    /// The cluster API rejected a request or could not be reached
    #[error("Cluster API error: {message}")]
    #[diagnostic(
        code(kit::bootstrap::cluster_api_error),
        help("Check that the API server behind the master load balancer is reachable")
    )]
    ClusterApiError {
        #[allow(unused)]
        message: String,
    },

    /// Cloud call failed
    #[error(transparent)]
    #[diagnostic(transparent)]
    Cloud(#[from] CloudError),
}

/// Result type for bootstrap operations
pub type Result<T> = std::result::Result<T, BootstrapError>;

impl BootstrapError {
    pub fn certificate_error(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CertificateError {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn invalid_material(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidMaterial {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn missing_material(path: impl Into<String>) -> Self {
        Self::MissingMaterial { path: path.into() }
    }

    pub fn missing_handle(handle: impl Into<String>) -> Self {
        Self::MissingHandle {
            handle: handle.into(),
        }
    }

    pub fn node_cardinality(
        cluster: impl Into<String>,
        role: impl Into<String>,
        expected: usize,
        found: usize,
    ) -> Self {
        Self::NodeCardinality {
            cluster: cluster.into(),
            role: role.into(),
            expected,
            found,
        }
    }

    pub fn render_error(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RenderError {
            file: file.into(),
            message: message.into(),
        }
    }

    pub fn cluster_api_error(message: impl Into<String>) -> Self {
        Self::ClusterApiError {
            message: message.into(),
        }
    }
}
