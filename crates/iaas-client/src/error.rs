//! IaaS client errors

use crate::models::ResourceId;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when interacting with the SAKURA Cloud API
#[derive(Debug, Error)]
pub enum IaasError {
    /// HTTP request/response error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The API returned an error
    #[error("IaaS API error: {0}")]
    Api(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Authentication failed (invalid token, missing permission, etc.)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid request (e.g., missing required fields)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The API answered with something the client cannot interpret
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// A wait-for-state call ran out of time
    #[error("timed out after {timeout:?} waiting for {resource} {id} to become {state}")]
    WaitTimeout {
        resource: &'static str,
        id: ResourceId,
        state: &'static str,
        timeout: Duration,
    },

    /// The appliance reported the `failed` availability while being waited on
    #[error("load balancer {id} failed while waiting for it to become {state}")]
    ApplianceFailed { id: ResourceId, state: &'static str },
}

impl IaasError {
    /// Returns true for errors raised by a wait-for-state call running out of time
    pub fn is_timeout(&self) -> bool {
        matches!(self, IaasError::WaitTimeout { .. })
    }

    /// Returns true when the API reported the resource as missing
    pub fn is_not_found(&self) -> bool {
        matches!(self, IaasError::NotFound(_))
    }
}
