//! Template data preparation.
//!
//! Builds the flat map a template is rendered from: identity fields, the
//! applicant's raw responses, and derived display values (loan schedule,
//! formatted money and dates, flattened product selections).

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::application::{ApplicationRecord, FormData};

use super::fields::{
    applicant_name, as_number, as_text, is_present, loan_field, DATE_FIELDS, MONEY_FIELDS,
};
use super::templates::{application_type_label, required_fields_for, TemplateId};
use super::validation::{parse_date, validate_email, validate_mobile, ValidationErrors};

const DEFAULT_CREDIT_TERM_MONTHS: f64 = 12.0;
const DEFAULT_INTEREST_RATE: f64 = 15.0;

/// Data handed to the renderer. Built per request and never stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct PreparedDocumentData(Map<String, Value>);

impl PreparedDocumentData {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

/// Fixed-payment loan schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Amortization {
    pub monthly_payment: f64,
    pub total_payment: f64,
    pub total_interest: f64,
}

/// `M = P·r·(1+r)^n / ((1+r)^n − 1)` with `r` the monthly rate.
///
/// Returns `None` unless principal, rate and term are all positive.
pub fn amortize(principal: f64, annual_rate_percent: f64, months: u32) -> Option<Amortization> {
    if principal <= 0.0 || annual_rate_percent <= 0.0 || months == 0 {
        return None;
    }

    let rate = annual_rate_percent / 100.0 / 12.0;
    let growth = (1.0 + rate).powi(months as i32);
    let monthly_payment = principal * (rate * growth) / (growth - 1.0);
    let total_payment = monthly_payment * months as f64;

    Some(Amortization {
        monthly_payment,
        total_payment,
        total_interest: total_payment - principal,
    })
}

/// Two decimals with comma thousands separators: `1234.5` → `"1,234.50"`.
pub fn format_currency(amount: f64) -> String {
    let fixed = format!("{:.2}", amount.abs());
    let (whole, cents) = fixed.split_once('.').unwrap_or((fixed.as_str(), "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    let sign = if amount < 0.0 && fixed != "0.00" { "-" } else { "" };
    format!("{sign}{grouped}.{cents}")
}

/// Assemble [`PreparedDocumentData`] for a record.
pub fn prepare_data(record: &ApplicationRecord) -> PreparedDocumentData {
    let form_data = &record.form_data;
    let mut data = Map::new();

    data.insert("sessionId".into(), Value::String(record.session_id.clone()));
    data.insert(
        "referenceCode".into(),
        Value::String(record.reference_or_draft().to_string()),
    );
    data.insert("formId".into(), Value::String(form_data.form_id().to_string()));
    data.insert(
        "submissionDate".into(),
        Value::String(record.created_at.format("%Y-%m-%d").to_string()),
    );
    data.insert(
        "submissionTime".into(),
        Value::String(record.created_at.format("%H:%M:%S").to_string()),
    );

    if let Some(responses) = form_data.form_responses() {
        for (key, value) in responses {
            data.insert(key.clone(), value.clone());
        }
    }

    add_loan_schedule(&mut data, form_data);
    format_money_fields(&mut data);
    format_date_fields(&mut data, &record.session_id);
    add_business_information(&mut data, form_data);

    data.insert("applicantName".into(), Value::String(applicant_name(&data)));
    data.insert(
        "applicationType".into(),
        Value::String(application_type_label(form_data.form_id()).to_string()),
    );
    data.insert("metadata".into(), Value::Object(record.metadata.clone()));

    PreparedDocumentData(data)
}

fn add_loan_schedule(data: &mut Map<String, Value>, form_data: &FormData) {
    let Some(amount) = loan_field(form_data, "amount") else {
        return;
    };
    let amount = as_number(amount).unwrap_or(0.0);
    let term = loan_field(form_data, "creditTerm")
        .and_then(as_number)
        .unwrap_or(DEFAULT_CREDIT_TERM_MONTHS)
        .trunc();
    let rate = loan_field(form_data, "interestRate")
        .and_then(as_number)
        .unwrap_or(DEFAULT_INTEREST_RATE);

    data.insert("loanAmount".into(), Value::String(format_currency(amount)));
    data.insert("loanTerm".into(), Value::from(term as i64));
    data.insert("interestRate".into(), Value::String(format!("{rate}%")));

    if term > 0.0 && term <= u32::MAX as f64 {
        if let Some(schedule) = amortize(amount, rate, term as u32) {
            data.insert(
                "monthlyPayment".into(),
                Value::String(format_currency(schedule.monthly_payment)),
            );
            data.insert(
                "totalPayment".into(),
                Value::String(format_currency(schedule.total_payment)),
            );
            data.insert(
                "totalInterest".into(),
                Value::String(format_currency(schedule.total_interest)),
            );
        }
    }
}

fn format_money_fields(data: &mut Map<String, Value>) {
    for field in MONEY_FIELDS {
        if let Some(amount) = data.get(*field).and_then(as_number) {
            data.insert((*field).into(), Value::String(format_currency(amount)));
        }
    }
}

fn format_date_fields(data: &mut Map<String, Value>, session_id: &str) {
    for field in DATE_FIELDS {
        let Some(Value::String(raw)) = data.get(*field).cloned() else {
            continue;
        };
        if raw.trim().is_empty() {
            continue;
        }
        match parse_date(&raw) {
            Some(date) => {
                let formatted = date.format("%d/%m/%Y").to_string();
                data.insert((*field).into(), Value::String(formatted));
            }
            None => log::warn!(
                "Invalid date format for field {} in session {}: {}",
                field,
                session_id,
                raw
            ),
        }
    }
}

fn add_business_information(data: &mut Map<String, Value>, form_data: &FormData) {
    let nested = |key: &str, inner: &str| -> Value {
        form_data
            .get(key)
            .and_then(|v| v.get(inner))
            .and_then(as_text)
            .map(Value::String)
            .unwrap_or_else(|| Value::String(String::new()))
    };

    if form_data.get("selectedBusiness").is_some() {
        data.insert("businessName".into(), nested("selectedBusiness", "name"));
        data.insert(
            "businessDescription".into(),
            nested("selectedBusiness", "description"),
        );
    }

    if form_data.get("selectedScale").is_some() {
        data.insert("scaleName".into(), nested("selectedScale", "name"));
        data.insert(
            "scaleDescription".into(),
            nested("selectedScale", "description"),
        );
    }

    for key in ["category", "subcategory", "business", "scale"] {
        let value = form_data
            .get(key)
            .filter(|v| !v.is_null())
            .cloned()
            .unwrap_or_else(|| Value::String(String::new()));
        data.insert(key.into(), value);
    }
}

/// Render-time checks on prepared data.
pub fn validate_template_data(
    data: &PreparedDocumentData,
    template: TemplateId,
) -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    let fields = data.as_map();

    for field in required_fields_for(template) {
        if !is_present(fields.get(*field)) {
            errors.push(field, format!("Missing required field: {}", field));
        }
    }

    validate_email(fields, "emailAddress", &mut errors);
    validate_mobile(fields, "mobile", &mut errors);

    errors
}

/// Stamp the generation time onto prepared data; templates print it in the footer.
pub fn stamp_generated_at(data: &mut PreparedDocumentData, generated_at: DateTime<Utc>) {
    data.insert(
        "generatedAt",
        Value::String(generated_at.format("%Y-%m-%d %H:%M:%S UTC").to_string()),
    );
}
