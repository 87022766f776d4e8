use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Submission origin; partitions the storage tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Web,
    Whatsapp,
    Ussd,
    MobileApp,
    Admin,
    Api,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::Whatsapp => "whatsapp",
            Self::Ussd => "ussd",
            Self::MobileApp => "mobile_app",
            Self::Admin => "admin",
            Self::Api => "api",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Step the application workflow has reached.
///
/// Steps this service does not care about are kept verbatim in `Step` so
/// error messages can name them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LifecycleState {
    Completed,
    InReview,
    Approved,
    Step(String),
}

impl LifecycleState {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Completed => "completed",
            Self::InReview => "in_review",
            Self::Approved => "approved",
            Self::Step(step) => step,
        }
    }

    /// Whether a document may be generated in this state.
    pub fn allows_generation(&self) -> bool {
        matches!(self, Self::Completed | Self::InReview | Self::Approved)
    }
}

impl From<String> for LifecycleState {
    fn from(value: String) -> Self {
        match value.as_str() {
            "completed" => Self::Completed,
            "in_review" => Self::InReview,
            "approved" => Self::Approved,
            _ => Self::Step(value),
        }
    }
}

impl From<LifecycleState> for String {
    fn from(value: LifecycleState) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Semi-structured form payload: `formId`, `formResponses`, optional
/// `documents`, plus loan terms and product selections at the top level.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormData(pub Map<String, Value>);

impl FormData {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// The form identifier, or `""` when absent.
    pub fn form_id(&self) -> &str {
        self.0.get("formId").and_then(Value::as_str).unwrap_or("")
    }

    /// Explicit type tag, when the client sent one.
    pub fn form_type(&self) -> Option<&str> {
        self.0
            .get("formType")
            .and_then(Value::as_str)
            .filter(|tag| !tag.trim().is_empty())
    }

    pub fn form_responses(&self) -> Option<&Map<String, Value>> {
        self.0.get("formResponses").and_then(Value::as_object)
    }
}

/// A submission as handed to the pipeline. The pipeline never mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub session_id: String,
    #[serde(default)]
    pub reference_code: Option<String>,
    pub channel: Channel,
    pub current_step: LifecycleState,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub form_data: FormData,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl ApplicationRecord {
    /// Reference code, or `DRAFT` until one has been assigned.
    pub fn reference_or_draft(&self) -> &str {
        self.reference_code
            .as_deref()
            .filter(|code| !code.trim().is_empty())
            .unwrap_or("DRAFT")
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| expires < now)
    }
}
