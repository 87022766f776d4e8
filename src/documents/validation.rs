//! Readiness checks run before a document is generated.
//!
//! All checks are advisory: they return a [`ValidationErrors`] list and never
//! fail. The caller decides whether to abort.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};

use crate::application::{ApplicationRecord, FormData};
use crate::config::PipelineConfig;
use crate::render::Renderer;

use super::fields::{as_number, is_present, loan_field, MONEY_FIELDS};
use super::templates::{form_spec, required_fields_for_form};

lazy_static! {
    static ref EMAIL_RE: Regex = Regex::new(
        r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)+$"
    )
    .unwrap();
    static ref PHONE_RE: Regex = Regex::new(r"^\+?[1-9]\d{1,14}$").unwrap();
    static ref NATIONAL_ID_RE: Regex = Regex::new(r"^[A-Za-z0-9-]{5,20}$").unwrap();
    static ref REGISTRATION_RE: Regex = Regex::new(r"^[A-Za-z0-9/\-]{5,20}$").unwrap();
}

pub const MIN_LOAN_AMOUNT: f64 = 100.0;
pub const MAX_LOAN_AMOUNT: f64 = 1_000_000.0;
pub const MAX_CREDIT_TERM_MONTHS: i64 = 360;
pub const MAX_INTEREST_RATE: f64 = 50.0;
pub const MIN_APPLICANT_AGE: i32 = 18;
pub const MAX_APPLICANT_AGE: i32 = 120;

pub const MIN_MEMORY_BYTES: u64 = 256 * 1024 * 1024;
pub const MIN_EXECUTION_SECS: u64 = 60;

/// One failed check.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    /// The field that failed validation
    pub field: String,
    /// Human-readable error message
    pub message: String,
    /// Suggestion for how to fix the error
    pub suggestion: Option<String>,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Create error for empty required field
    pub fn missing_field(field: &str) -> Self {
        Self::new(field, format!("Required field '{}' is missing or empty", field))
    }

    pub fn invalid_email(field: &str) -> Self {
        Self::new(field, "Invalid email address format")
            .with_suggestion("Use a full address such as name@example.com")
    }

    pub fn invalid_mobile(field: &str) -> Self {
        Self::new(field, "Invalid mobile number format")
            .with_suggestion("Use international digits only, e.g. +263771234567")
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.field, self.message)?;
        if let Some(ref suggestion) = self.suggestion {
            write!(f, ". {}", suggestion)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

/// Ordered collection of validation errors. Empty means pass.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ValidationErrors {
    errors: Vec<ValidationError>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        Self { errors: Vec::new() }
    }

    pub fn add(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn push(&mut self, field: &str, message: impl Into<String>) {
        self.add(ValidationError::new(field, message));
    }

    pub fn extend(&mut self, other: ValidationErrors) {
        self.errors.extend(other.errors);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ValidationError> {
        self.errors.iter()
    }

    /// The messages in the order the checks ran.
    pub fn messages(&self) -> Vec<String> {
        self.errors.iter().map(|e| e.message.clone()).collect()
    }

    /// Numbered, multi-line summary for logs.
    pub fn to_report(&self) -> String {
        if self.errors.is_empty() {
            return String::new();
        }

        let mut parts = vec![format!(
            "Validation failed: {} problem(s) found",
            self.errors.len()
        )];
        for (i, error) in self.errors.iter().enumerate() {
            parts.push(format!("{}. {}", i + 1, error));
        }
        parts.join("\n")
    }
}

// ============================================================================
// Field rules
// ============================================================================

/// Validate email format when a value is present.
pub fn validate_email(data: &Map<String, Value>, field: &str, errors: &mut ValidationErrors) {
    if let Some(Value::String(value)) = data.get(field) {
        if !value.trim().is_empty() && !EMAIL_RE.is_match(value.trim()) {
            errors.add(ValidationError::invalid_email(field));
        }
    }
}

/// Validate E.164-style mobile numbers when a value is present.
pub fn validate_mobile(data: &Map<String, Value>, field: &str, errors: &mut ValidationErrors) {
    if let Some(value) = data.get(field).filter(|v| is_present(Some(v))) {
        let text = match value {
            Value::String(s) => s.trim().to_string(),
            other => other.to_string(),
        };
        if !PHONE_RE.is_match(&text) {
            errors.add(ValidationError::invalid_mobile(field));
        }
    }
}

fn validate_identifier(data: &Map<String, Value>, field: &str, errors: &mut ValidationErrors) {
    if let Some(Value::String(value)) = data.get(field) {
        if !value.trim().is_empty() && !NATIONAL_ID_RE.is_match(value.trim()) {
            errors.push(field, "Invalid national ID number format");
        }
    }
}

fn validate_money(data: &Map<String, Value>, field: &str, errors: &mut ValidationErrors) {
    let Some(value) = data.get(field).filter(|v| is_present(Some(v))) else {
        return;
    };
    match as_number(value) {
        Some(amount) if amount >= 0.0 => {}
        _ => errors.push(field, format!("Invalid {} amount", field)),
    }
}

/// Parse a date of birth in ISO form, `DD/MM/YYYY`, or RFC 3339.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%d/%m/%Y"))
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|dt| dt.date_naive())
        })
}

/// Whole years between `dob` and `today`.
pub fn age_on(dob: NaiveDate, today: NaiveDate) -> i32 {
    let mut age = today.year() - dob.year();
    if (today.month(), today.day()) < (dob.month(), dob.day()) {
        age -= 1;
    }
    age
}

fn validate_date_of_birth(
    data: &Map<String, Value>,
    today: NaiveDate,
    errors: &mut ValidationErrors,
) {
    let Some(Value::String(raw)) = data.get("dateOfBirth") else {
        return;
    };
    if raw.trim().is_empty() {
        return;
    }

    match parse_date(raw) {
        Some(dob) => {
            let age = age_on(dob, today);
            if age < MIN_APPLICANT_AGE {
                errors.push("dateOfBirth", "Applicant must be at least 18 years old");
            }
            if age > MAX_APPLICANT_AGE {
                errors.push(
                    "dateOfBirth",
                    "Invalid date of birth - age cannot exceed 120 years",
                );
            }
        }
        None => errors.push("dateOfBirth", "Invalid date of birth format"),
    }
}

fn validate_loan_terms(form_data: &FormData, errors: &mut ValidationErrors) {
    if let Some(raw) = loan_field(form_data, "amount") {
        match as_number(raw) {
            Some(amount) => {
                if amount <= 0.0 {
                    errors.push("amount", "Loan amount must be greater than zero");
                } else if amount < MIN_LOAN_AMOUNT {
                    errors.push("amount", "Loan amount must be at least $100");
                }
                if amount > MAX_LOAN_AMOUNT {
                    errors.push("amount", "Loan amount cannot exceed $1,000,000");
                }
            }
            None => errors.push("amount", "Loan amount must be a number"),
        }
    }

    if let Some(raw) = loan_field(form_data, "creditTerm") {
        match as_number(raw) {
            Some(term) => {
                let term = term.trunc() as i64;
                if term <= 0 {
                    errors.push("creditTerm", "Credit term must be greater than zero");
                }
                if term > MAX_CREDIT_TERM_MONTHS {
                    errors.push("creditTerm", "Credit term cannot exceed 360 months");
                }
            }
            None => errors.push("creditTerm", "Credit term must be a number of months"),
        }
    }

    if let Some(raw) = loan_field(form_data, "interestRate") {
        match as_number(raw) {
            Some(rate) => {
                if rate <= 0.0 {
                    errors.push("interestRate", "Interest rate must be greater than zero");
                }
                if rate > MAX_INTEREST_RATE {
                    errors.push("interestRate", "Interest rate cannot exceed 50%");
                }
            }
            None => errors.push("interestRate", "Interest rate must be a number"),
        }
    }
}

/// Rules specific to the SME business account form.
pub fn sme_business_rules(responses: &Map<String, Value>, errors: &mut ValidationErrors) {
    if let Some(Value::String(name)) = responses.get("businessName") {
        if name.trim().chars().count() < 2 {
            errors.push(
                "businessName",
                "Business name must be at least 2 characters long",
            );
        }
    }

    if let Some(Value::String(number)) = responses.get("businessRegistrationNumber") {
        if !number.trim().is_empty() && !REGISTRATION_RE.is_match(number.trim()) {
            errors.push(
                "businessRegistrationNumber",
                "Invalid business registration number format",
            );
        }
    }

    if let Some(turnover) = responses
        .get("annualTurnover")
        .filter(|v| is_present(Some(v)))
    {
        match as_number(turnover) {
            Some(amount) if amount < 0.0 => {
                errors.push("annualTurnover", "Annual turnover cannot be negative")
            }
            Some(_) => {}
            None => errors.push("annualTurnover", "Annual turnover must be a number"),
        }
    }
}

// ============================================================================
// Validator
// ============================================================================

/// Gatekeeper for generation requests and the generation environment.
pub struct ReadinessValidator {
    config: Arc<PipelineConfig>,
}

impl ReadinessValidator {
    pub fn new(config: Arc<PipelineConfig>) -> Self {
        Self { config }
    }

    pub fn validate_application_readiness(
        &self,
        record: Option<&ApplicationRecord>,
    ) -> ValidationErrors {
        self.validate_application_readiness_at(record, Utc::now())
    }

    /// Readiness as of `now`. Every applicable problem is reported.
    pub fn validate_application_readiness_at(
        &self,
        record: Option<&ApplicationRecord>,
        now: DateTime<Utc>,
    ) -> ValidationErrors {
        let mut errors = ValidationErrors::new();

        let Some(record) = record else {
            errors.push("record", "Application state not found");
            return errors;
        };

        if record.form_data.is_empty() {
            errors.push("form_data", "No form data found in application state");
        }

        if record.is_expired_at(now) {
            errors.push("expires_at", "Application session has expired");
        }

        if !record.current_step.allows_generation() {
            errors.push(
                "current_step",
                format!(
                    "Application is not in a valid state for PDF generation. Current state: {}",
                    record.current_step
                ),
            );
        }

        errors
    }

    pub fn validate_form_data(&self, form_data: &FormData, form_id: &str) -> ValidationErrors {
        self.validate_form_data_on(form_data, form_id, Utc::now().date_naive())
    }

    /// Form checks with ages computed as of `today`.
    ///
    /// Missing responses short-circuit: nothing else can be checked.
    pub fn validate_form_data_on(
        &self,
        form_data: &FormData,
        form_id: &str,
        today: NaiveDate,
    ) -> ValidationErrors {
        let mut errors = ValidationErrors::new();

        if form_id.trim().is_empty() {
            errors.push("formId", "Form ID is missing");
        }

        let responses = match form_data.form_responses() {
            Some(responses) if !responses.is_empty() => responses,
            _ => {
                errors.push("formResponses", "Form responses are missing");
                return errors;
            }
        };

        for field in required_fields_for_form(form_id) {
            if !is_present(responses.get(*field)) {
                errors.add(ValidationError::missing_field(field));
            }
        }

        validate_email(responses, "emailAddress", &mut errors);
        validate_mobile(responses, "mobile", &mut errors);
        validate_identifier(responses, "nationalIdNumber", &mut errors);
        validate_date_of_birth(responses, today, &mut errors);
        for field in MONEY_FIELDS {
            validate_money(responses, field, &mut errors);
        }

        validate_loan_terms(form_data, &mut errors);

        if let Some(rules) = form_spec(form_id).and_then(|form| form.extra_rules) {
            rules(responses, &mut errors);
        }

        errors
    }

    /// Deployment pre-flight: renderer, memory budget, time budget, storage.
    pub fn validate_environment(&self, renderer: &dyn Renderer) -> ValidationErrors {
        let mut errors = ValidationErrors::new();

        if !renderer.is_available() {
            errors.push(
                "renderer",
                format!("PDF renderer '{}' is not available", renderer.name()),
            );
        }

        if self.config.memory_limit_bytes < MIN_MEMORY_BYTES {
            errors.push(
                "memory_limit",
                format!(
                    "Memory limit ({} bytes) is below recommended 256MB for PDF generation",
                    self.config.memory_limit_bytes
                ),
            );
        }

        let timeout = self.config.generation_timeout.as_secs();
        if timeout > 0 && timeout < MIN_EXECUTION_SECS {
            errors.push(
                "generation_timeout",
                format!(
                    "Execution time limit ({}s) may be too low for PDF generation",
                    timeout
                ),
            );
        }

        if !self.storage_is_writable() {
            errors.push("storage_root", "Storage directory is not writable");
        }

        errors
    }

    fn storage_is_writable(&self) -> bool {
        let root = &self.config.storage_root;
        if let Err(e) = std::fs::create_dir_all(root) {
            log::warn!("Cannot create storage root {}: {}", root.display(), e);
            return false;
        }
        tempfile::NamedTempFile::new_in(root).is_ok()
    }
}
