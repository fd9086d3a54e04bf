use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum ProcuraError {
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("Invalid transition for {entity_type} {entity_id}: {action} is not valid from stage {stage}")]
    InvalidTransition {
        entity_type: String,
        entity_id: String,
        stage: String,
        action: String,
    },

    #[error("Role {role} is not permitted to act at stage {stage}")]
    UnauthorizedRole { stage: String, role: String },

    #[error("Entity {entity_id} is already in terminal status {status}")]
    EntityAlreadyTerminal { entity_id: String, status: String },

    #[error("No shipping provider enabled for company {company_id}: {message}")]
    ProviderNotEnabled { company_id: String, message: String },

    #[error("Provider resolution failed for company {company_id}, vendor {vendor_id}: {message}")]
    ProviderResolutionFailed {
        company_id: String,
        vendor_id: String,
        message: String,
    },

    #[error("Carrier API shipment failed via {provider}: {message}")]
    ApiShipmentFailed { provider: String, message: String },

    #[error("Notification delivery failure: {message}")]
    DeliveryFailure { message: String },

    #[error("Not found: {resource}")]
    NotFound { resource: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Database error: {message}")]
    Database { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal server error: {message}")]
    Internal { message: String },
}

impl ProcuraError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn invalid_transition(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        stage: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self::InvalidTransition {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            stage: stage.into(),
            action: action.into(),
        }
    }

    pub fn unauthorized_role(stage: impl Into<String>, role: impl Into<String>) -> Self {
        Self::UnauthorizedRole {
            stage: stage.into(),
            role: role.into(),
        }
    }

    pub fn provider_not_enabled(company_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProviderNotEnabled {
            company_id: company_id.into(),
            message: message.into(),
        }
    }

    pub fn provider_resolution_failed(
        company_id: impl Into<String>,
        vendor_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::ProviderResolutionFailed {
            company_id: company_id.into(),
            vendor_id: vendor_id.into(),
            message: message.into(),
        }
    }

    pub fn api_shipment_failed(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ApiShipmentFailed {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn delivery_failure(message: impl Into<String>) -> Self {
        Self::DeliveryFailure {
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Wire discriminator carried in the `type` field of error responses.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::UnauthorizedRole { .. } => "unauthorized_role",
            Self::EntityAlreadyTerminal { .. } => "entity_already_terminal",
            Self::ProviderNotEnabled { .. } => "provider_not_enabled",
            Self::ProviderResolutionFailed { .. } => "provider_resolution_failed",
            Self::ApiShipmentFailed { .. } => "api_shipment_failed",
            Self::DeliveryFailure { .. } => "delivery_failure",
            Self::NotFound { .. } => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::Database { .. } => "database_error",
            Self::Configuration { .. } => "configuration_error",
            Self::Internal { .. } => "internal_error",
        }
    }

    pub fn http_status_code(&self) -> u16 {
        match self {
            Self::Validation { .. } => 400,
            Self::InvalidTransition { .. } => 409,
            Self::UnauthorizedRole { .. } => 403,
            Self::EntityAlreadyTerminal { .. } => 409,
            Self::ProviderNotEnabled { .. } => 400,
            Self::ProviderResolutionFailed { .. } => 400,
            Self::ApiShipmentFailed { .. } => 502,
            Self::DeliveryFailure { .. } => 502,
            Self::NotFound { .. } => 404,
            Self::Conflict { .. } => 409,
            Self::Database { .. } => 500,
            Self::Configuration { .. } => 500,
            Self::Internal { .. } => 500,
        }
    }
}

pub type ProcuraResult<T> = Result<T, ProcuraError>;

/// Error body: `{ "type": ..., "message": ..., "details": ... }`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&ProcuraError> for ErrorResponse {
    fn from(error: &ProcuraError) -> Self {
        let details = match error {
            ProcuraError::ProviderNotEnabled { company_id, .. } => {
                Some(serde_json::json!({ "company_id": company_id }))
            }
            ProcuraError::ProviderResolutionFailed {
                company_id,
                vendor_id,
                ..
            } => Some(serde_json::json!({ "company_id": company_id, "vendor_id": vendor_id })),
            ProcuraError::InvalidTransition {
                entity_type,
                entity_id,
                stage,
                ..
            } => Some(
                serde_json::json!({ "entity_type": entity_type, "entity_id": entity_id, "stage": stage }),
            ),
            ProcuraError::EntityAlreadyTerminal { entity_id, status } => {
                Some(serde_json::json!({ "entity_id": entity_id, "status": status }))
            }
            _ => None,
        };
        Self {
            error_type: error.error_code().to_string(),
            message: error.to_string(),
            details,
        }
    }
}

impl IntoResponse for ProcuraError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.http_status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body: ErrorResponse = (&self).into();
        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for ProcuraError {
    fn from(error: anyhow::Error) -> Self {
        match error.downcast::<ProcuraError>() {
            Ok(e) => e,
            Err(other) => Self::internal(other.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for ProcuraError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::validation("request", crate::validation::format_validation_errors(&errors))
    }
}
