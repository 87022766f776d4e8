//! Template catalogue: which template renders which form, and what each needs.
//!
//! The tables are static. Adding a form means adding a [`FormSpec`] entry.

use serde::Serialize;
use serde_json::{Map, Value};
use utoipa::ToSchema;

use crate::application::FormData;

use super::validation::{sme_business_rules, ValidationErrors};

/// Render templates shipped under `static/templates/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum TemplateId {
    AccountHolders,
    SsbForm,
    ZbAccountOpening,
    SmeBusiness,
}

impl TemplateId {
    pub const DEFAULT: TemplateId = TemplateId::AccountHolders;

    /// Template file stem under the template directory.
    pub fn file_stem(&self) -> &'static str {
        match self {
            Self::AccountHolders => "account_holders",
            Self::SsbForm => "ssb_form",
            Self::ZbAccountOpening => "zb_account_opening",
            Self::SmeBusiness => "sme_business",
        }
    }

    /// Fields the template prints unconditionally; checked on the prepared data.
    pub fn required_fields(&self) -> &'static [&'static str] {
        match self {
            Self::AccountHolders => &["firstName", "lastName", "nationalIdNumber", "mobile"],
            Self::SsbForm | Self::ZbAccountOpening => {
                &["firstName", "surname", "nationalIdNumber", "mobile"]
            }
            Self::SmeBusiness => &[
                "firstName",
                "surname",
                "businessName",
                "nationalIdNumber",
                "mobile",
            ],
        }
    }

    /// Template for an explicit `formType` tag.
    pub fn from_form_type(tag: &str) -> TemplateId {
        match tag.trim() {
            "ssb" => Self::SsbForm,
            "sme_business" => Self::SmeBusiness,
            "zb_account_opening" => Self::ZbAccountOpening,
            _ => Self::DEFAULT,
        }
    }
}

/// Extra rules a form applies on top of the shared format checks.
pub type FormRules = fn(&Map<String, Value>, &mut ValidationErrors);

/// One row of the form catalogue.
pub struct FormSpec {
    pub form_id: &'static str,
    pub template: TemplateId,
    pub label: &'static str,
    /// Fields the applicant must have filled in before generation.
    pub required_fields: &'static [&'static str],
    pub extra_rules: Option<FormRules>,
}

pub const UNKNOWN_APPLICATION_TYPE: &str = "Unknown Application Type";
pub const DEFAULT_REQUIRED_FIELDS: &[&str] = &["firstName", "lastName", "nationalIdNumber"];

pub static FORMS: &[FormSpec] = &[
    FormSpec {
        form_id: "account_holder_loan_application.json",
        template: TemplateId::AccountHolders,
        label: "Account Holder Loan Application",
        required_fields: &[
            "firstName",
            "lastName",
            "nationalIdNumber",
            "mobile",
            "emailAddress",
            "residentialAddress",
            "dateOfBirth",
            "maritalStatus",
        ],
        extra_rules: None,
    },
    FormSpec {
        form_id: "ssb_account_opening_form.json",
        template: TemplateId::SsbForm,
        label: "SSB Account Opening",
        required_fields: &[
            "firstName",
            "surname",
            "nationalIdNumber",
            "mobile",
            "emailAddress",
            "residentialAddress",
            "dateOfBirth",
            "maritalStatus",
        ],
        extra_rules: None,
    },
    FormSpec {
        form_id: "individual_account_opening.json",
        template: TemplateId::ZbAccountOpening,
        label: "New ZB Account Opening",
        required_fields: &[
            "firstName",
            "surname",
            "nationalIdNumber",
            "mobile",
            "emailAddress",
            "residentialAddress",
            "dateOfBirth",
            "maritalStatus",
        ],
        extra_rules: None,
    },
    FormSpec {
        form_id: "smes_business_account_opening.json",
        template: TemplateId::SmeBusiness,
        label: "SME Business Account Opening",
        required_fields: &[
            "firstName",
            "surname",
            "businessName",
            "nationalIdNumber",
            "mobile",
            "emailAddress",
            "businessAddress",
            "dateOfBirth",
        ],
        extra_rules: Some(sme_business_rules),
    },
    FormSpec {
        form_id: "pensioners_loan_account.json",
        template: TemplateId::AccountHolders,
        label: "Pensioners Loan Account",
        required_fields: &[
            "firstName",
            "lastName",
            "nationalIdNumber",
            "mobile",
            "emailAddress",
            "residentialAddress",
            "dateOfBirth",
            "pensionNumber",
        ],
        extra_rules: None,
    },
];

/// Exact-match catalogue lookup.
pub fn form_spec(form_id: &str) -> Option<&'static FormSpec> {
    FORMS.iter().find(|form| form.form_id == form_id)
}

/// Template for a form id; unknown ids get the default template.
pub fn resolve_template(form_id: &str) -> TemplateId {
    form_spec(form_id)
        .map(|form| form.template)
        .unwrap_or(TemplateId::DEFAULT)
}

/// Infer the template from marker fields when no type tag was sent.
pub fn detect_template_from_content(responses: &Map<String, Value>) -> TemplateId {
    let has = |key: &str| responses.contains_key(key);

    if has("responsibleMinistry") {
        TemplateId::SsbForm
    } else if has("businessRegistration")
        || has("businessRegistrationNumber")
        || has("registeredName")
    {
        TemplateId::SmeBusiness
    } else if has("accountType") || has("accountCurrency") {
        TemplateId::ZbAccountOpening
    } else {
        TemplateId::DEFAULT
    }
}

/// Pick the template for a whole payload: known form id, then the type tag,
/// then the content heuristic.
pub fn resolve_for_form_data(form_data: &FormData) -> TemplateId {
    if let Some(form) = form_spec(form_data.form_id()) {
        return form.template;
    }
    if let Some(tag) = form_data.form_type() {
        return TemplateId::from_form_type(tag);
    }
    form_data
        .form_responses()
        .map(detect_template_from_content)
        .unwrap_or(TemplateId::DEFAULT)
}

/// Intake required fields for a form id.
pub fn required_fields_for_form(form_id: &str) -> &'static [&'static str] {
    form_spec(form_id)
        .map(|form| form.required_fields)
        .unwrap_or(DEFAULT_REQUIRED_FIELDS)
}

/// Render-time required fields for a template.
pub fn required_fields_for(template: TemplateId) -> &'static [&'static str] {
    template.required_fields()
}

/// Human-readable application type used in titles.
pub fn application_type_label(form_id: &str) -> &'static str {
    form_spec(form_id)
        .map(|form| form.label)
        .unwrap_or(UNKNOWN_APPLICATION_TYPE)
}

/// Catalogue entry as exposed over HTTP.
#[derive(Debug, Serialize, ToSchema)]
pub struct SupportedFormType {
    pub form_id: String,
    pub label: String,
    pub template: TemplateId,
}

pub fn supported_form_types() -> Vec<SupportedFormType> {
    FORMS
        .iter()
        .map(|form| SupportedFormType {
            form_id: form.form_id.to_string(),
            label: form.label.to_string(),
            template: form.template,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_resolve_template_exact_match_and_fallback() {
        assert_eq!(
            resolve_template("smes_business_account_opening.json"),
            TemplateId::SmeBusiness
        );
        assert_eq!(
            resolve_template("pensioners_loan_account.json"),
            TemplateId::AccountHolders
        );
        assert_eq!(resolve_template("no_such_form.json"), TemplateId::DEFAULT);
    }

    #[test]
    fn test_detect_template_from_content_markers() {
        assert_eq!(
            detect_template_from_content(&map(json!({ "responsibleMinistry": "Health" }))),
            TemplateId::SsbForm
        );
        assert_eq!(
            detect_template_from_content(&map(json!({ "businessRegistration": "REG-1" }))),
            TemplateId::SmeBusiness
        );
        assert_eq!(
            detect_template_from_content(&map(json!({ "accountType": "savings" }))),
            TemplateId::ZbAccountOpening
        );
        assert_eq!(
            detect_template_from_content(&map(json!({ "firstName": "A" }))),
            TemplateId::DEFAULT
        );
    }

    #[test]
    fn test_form_type_tag_beats_content_heuristic() {
        let form_data = FormData(map(json!({
            "formType": "sme_business",
            "formResponses": { "responsibleMinistry": "Health" }
        })));
        assert_eq!(resolve_for_form_data(&form_data), TemplateId::SmeBusiness);

        let untagged = FormData(map(json!({
            "formResponses": { "responsibleMinistry": "Health" }
        })));
        assert_eq!(resolve_for_form_data(&untagged), TemplateId::SsbForm);
    }

    #[test]
    fn test_labels_and_required_fields() {
        assert_eq!(
            application_type_label("ssb_account_opening_form.json"),
            "SSB Account Opening"
        );
        assert_eq!(application_type_label("x.json"), UNKNOWN_APPLICATION_TYPE);
        assert!(required_fields_for_form("pensioners_loan_account.json").contains(&"pensionNumber"));
        assert_eq!(required_fields_for_form("x.json"), DEFAULT_REQUIRED_FIELDS);
        assert!(required_fields_for(TemplateId::SmeBusiness).contains(&"businessName"));
        assert_eq!(supported_form_types().len(), FORMS.len());
    }
}
