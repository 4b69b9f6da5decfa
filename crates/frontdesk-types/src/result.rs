//! The uniform result shape returned by every tool dispatch.
//!
//! Callers (the media relay forwarding a function call, or the HTTP API)
//! always receive this shape: success carries the resulting stage and
//! tool-specific data, failure carries a structured error. Raw errors never
//! cross the dispatch boundary.

use crate::CallStage;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stable error codes surfaced to dispatch callers.
///
/// The workflow-misuse codes (`IllegalState`, `MissingPrerequisites`, ...)
/// are never retried automatically; the side-effect codes
/// (`CrmSyncFailed`, `CalendarBookingFailed`, `SmsSendFailed`,
/// `StorageError`) are safe to retry because side effects are
/// idempotency-keyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    SessionNotFound,
    InvalidTool,
    NotImplemented,
    InvalidPayload,
    IllegalState,
    IllegalTransition,
    MissingPrerequisites,
    MissingRequiredFields,
    SmsConsentRequired,
    SmsBookingRequired,
    StorageError,
    CrmSyncFailed,
    CalendarBookingFailed,
    SmsSendFailed,
    Internal,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SessionNotFound => "session_not_found",
            Self::InvalidTool => "invalid_tool",
            Self::NotImplemented => "not_implemented",
            Self::InvalidPayload => "invalid_payload",
            Self::IllegalState => "illegal_state",
            Self::IllegalTransition => "illegal_transition",
            Self::MissingPrerequisites => "missing_prerequisites",
            Self::MissingRequiredFields => "missing_required_fields",
            Self::SmsConsentRequired => "sms_consent_required",
            Self::SmsBookingRequired => "sms_booking_required",
            Self::StorageError => "storage_error",
            Self::CrmSyncFailed => "crm_sync_failed",
            Self::CalendarBookingFailed => "calendar_booking_failed",
            Self::SmsSendFailed => "sms_send_failed",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured failure payload for a tool dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolFailure {
    pub code: ErrorCode,
    pub message: String,
    /// Optional machine-readable detail (offending field, missing paths).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ToolFailure {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// The uniform tool dispatch result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub ok: bool,
    pub tool: String,
    /// The session stage after dispatch, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<CallStage>,
    /// Tool-specific success data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolFailure>,
}

impl ToolResult {
    /// Builds a success result.
    pub fn success(tool: impl Into<String>, stage: CallStage, data: Value) -> Self {
        Self {
            ok: true,
            tool: tool.into(),
            stage: Some(stage),
            data: Some(data),
            error: None,
        }
    }

    /// Builds a failure result.
    pub fn failure(tool: impl Into<String>, failure: ToolFailure) -> Self {
        Self {
            ok: false,
            tool: tool.into(),
            stage: None,
            data: None,
            error: Some(failure),
        }
    }

    /// The error code of a failure result, if any.
    pub fn error_code(&self) -> Option<ErrorCode> {
        self.error.as_ref().map(|e| e.code)
    }
}
