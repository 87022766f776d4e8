//! Provenance embedded in each document, plus the operational record logged
//! for audit.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::application::{ApplicationRecord, Channel};
use crate::config::PipelineConfig;
use crate::render::DocumentCanvas;

use super::fields::applicant_name;
use super::preparer::PreparedDocumentData;
use super::validation::ValidationErrors;
use super::{Degraded, DegradedStage, GenerationOptions};

pub const GENERATOR_VERSION: &str = "1.0";
pub const SCHEMA_VERSION: &str = "1.0";

const SUBJECTS: &[&str] = &["Loan Application", "Banking", "Financial Services"];

/// Custom-namespace block of the XMP packet.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomProvenance {
    pub reference_code: String,
    pub form_id: String,
    pub session_id: String,
    pub channel: Channel,
    pub applicant_name: String,
    pub application_date: DateTime<Utc>,
    pub schema_version: &'static str,
}

/// Everything written into the document's info dictionary and XMP packet.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvenanceBlock {
    pub brand: String,
    pub title: String,
    pub creator: String,
    pub subjects: Vec<String>,
    pub description: String,
    pub summary: String,
    pub created_at: DateTime<Utc>,
    pub creator_tool: String,
    pub producer: String,
    pub keywords: Vec<String>,
    pub custom: CustomProvenance,
}

impl ProvenanceBlock {
    fn namespace_prefix(&self) -> String {
        let prefix: String = self
            .brand
            .chars()
            .filter(char::is_ascii_alphanumeric)
            .collect::<String>()
            .to_ascii_lowercase();
        if prefix.is_empty() {
            "provenance".to_string()
        } else {
            prefix
        }
    }

    /// Serialize as an XMP packet (Dublin Core, XMP basic, PDF and custom namespaces).
    pub fn to_xmp(&self) -> String {
        let ns = self.namespace_prefix();
        let created = iso8601(self.created_at);
        let esc = |s: &str| xml_escape(s);

        let subjects: String = self
            .subjects
            .iter()
            .map(|s| format!("                    <rdf:li>{}</rdf:li>\n", esc(s)))
            .collect();

        let c = &self.custom;
        format!(
            r##"<?xpacket begin="{bom}" id="W5M0MpCehiHzreSzNTczkc9d"?>
<x:xmpmeta xmlns:x="adobe:ns:meta/">
    <rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
        <rdf:Description rdf:about=""
            xmlns:dc="http://purl.org/dc/elements/1.1/"
            xmlns:xmp="http://ns.adobe.com/xap/1.0/"
            xmlns:pdf="http://ns.adobe.com/pdf/1.3/"
            xmlns:{ns}="http://{ns}.com/ns/1.0/">
            <dc:title>
                <rdf:Alt>
                    <rdf:li xml:lang="en">{title}</rdf:li>
                </rdf:Alt>
            </dc:title>
            <dc:creator>
                <rdf:Seq>
                    <rdf:li>{creator}</rdf:li>
                </rdf:Seq>
            </dc:creator>
            <dc:subject>
                <rdf:Bag>
{subjects}                </rdf:Bag>
            </dc:subject>
            <dc:description>
                <rdf:Alt>
                    <rdf:li xml:lang="en">{description}</rdf:li>
                </rdf:Alt>
            </dc:description>
            <xmp:CreateDate>{created}</xmp:CreateDate>
            <xmp:ModifyDate>{created}</xmp:ModifyDate>
            <xmp:CreatorTool>{tool}</xmp:CreatorTool>
            <pdf:Producer>{producer}</pdf:Producer>
            <pdf:Keywords>{keywords}</pdf:Keywords>
            <{ns}:ReferenceCode>{reference}</{ns}:ReferenceCode>
            <{ns}:FormId>{form_id}</{ns}:FormId>
            <{ns}:SessionId>{session}</{ns}:SessionId>
            <{ns}:Channel>{channel}</{ns}:Channel>
            <{ns}:ApplicantName>{applicant}</{ns}:ApplicantName>
            <{ns}:ApplicationDate>{application_date}</{ns}:ApplicationDate>
            <{ns}:Version>{version}</{ns}:Version>
        </rdf:Description>
    </rdf:RDF>
</x:xmpmeta>
<?xpacket end="w"?>"##,
            bom = '\u{feff}',
            ns = ns,
            title = esc(&self.title),
            creator = esc(&self.creator),
            subjects = subjects,
            description = esc(&self.description),
            created = created,
            tool = esc(&self.creator_tool),
            producer = esc(&self.producer),
            keywords = esc(&self.keywords.join(", ")),
            reference = esc(&c.reference_code),
            form_id = esc(&c.form_id),
            session = esc(&c.session_id),
            channel = c.channel,
            applicant = esc(&c.applicant_name),
            application_date = iso8601(c.application_date),
            version = c.schema_version,
        )
    }

    /// Document info dictionary entries.
    pub fn info_dictionary(&self) -> BTreeMap<String, String> {
        let date = pdf_date(self.created_at);
        BTreeMap::from([
            ("Title".to_string(), self.title.clone()),
            ("Author".to_string(), self.creator.clone()),
            ("Subject".to_string(), self.summary.clone()),
            ("Keywords".to_string(), self.keywords.join(", ")),
            ("Creator".to_string(), self.creator_tool.clone()),
            ("Producer".to_string(), self.producer.clone()),
            ("CreationDate".to_string(), date.clone()),
            ("ModDate".to_string(), date),
        ])
    }
}

/// Runtime facts captured with each generation.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EnvironmentSnapshot {
    pub service_version: String,
    pub renderer: String,
    pub memory_limit_bytes: u64,
    pub generation_timeout_secs: u64,
    pub os: String,
    pub arch: String,
}

/// Operational record of one generation; logged, never embedded.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct GenerationRecord {
    pub generation_id: Uuid,
    pub session_id: String,
    pub reference_code: Option<String>,
    pub channel: String,
    pub form_id: Option<String>,
    pub generated_at: DateTime<Utc>,
    pub generator_version: String,
    pub options: GenerationOptions,
    pub environment: EnvironmentSnapshot,
}

pub struct MetadataEmbedder {
    config: Arc<PipelineConfig>,
}

impl MetadataEmbedder {
    pub fn new(config: Arc<PipelineConfig>) -> Self {
        Self { config }
    }

    pub fn build_provenance_block(
        &self,
        record: &ApplicationRecord,
        data: &PreparedDocumentData,
        generated_at: DateTime<Utc>,
    ) -> ProvenanceBlock {
        let brand = self.config.brand.clone();
        let reference = record.reference_or_draft().to_string();
        let applicant = applicant_name(data.as_map());
        let form_id = match data.get_str("formId") {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => "unknown".to_string(),
        };

        ProvenanceBlock {
            title: format!("{} Application - {}", brand, reference),
            creator: format!("{} Loan System", brand),
            subjects: SUBJECTS.iter().map(|s| s.to_string()).collect(),
            description: format!(
                "Loan application form for {} - Reference: {}",
                applicant, reference
            ),
            summary: format!("Loan application for {}", applicant),
            created_at: generated_at,
            creator_tool: format!("{} PDF Generator v{}", brand, GENERATOR_VERSION),
            producer: format!("{} Loan System", brand),
            keywords: ["loan", "application", "banking", reference.as_str()]
                .iter()
                .map(|k| k.to_string())
                .collect(),
            custom: CustomProvenance {
                reference_code: reference.clone(),
                form_id,
                session_id: record.session_id.clone(),
                channel: record.channel,
                applicant_name: applicant,
                application_date: record.created_at,
                schema_version: SCHEMA_VERSION,
            },
            brand,
        }
    }

    /// Attach the info dictionary and XMP packet. Failures degrade, never abort.
    pub fn attach_metadata(
        &self,
        canvas: &mut dyn DocumentCanvas,
        block: &ProvenanceBlock,
    ) -> Result<(), Degraded> {
        let session = &block.custom.session_id;
        let result = canvas
            .attach_info_dictionary(&block.info_dictionary())
            .and_then(|_| canvas.attach_xmp_block(&block.to_xmp()));

        match result {
            Ok(()) => {
                log::info!(
                    "PDF metadata applied for session {} (reference {})",
                    session,
                    block.custom.reference_code
                );
                Ok(())
            }
            Err(e) => {
                log::warn!("Failed to apply PDF metadata for session {}: {}", session, e);
                Err(Degraded::new(DegradedStage::Metadata, e.to_string()))
            }
        }
    }

    pub fn build_generation_record(
        &self,
        record: &ApplicationRecord,
        options: &GenerationOptions,
        renderer: &str,
        generated_at: DateTime<Utc>,
    ) -> GenerationRecord {
        let form_id = record.form_data.form_id();
        GenerationRecord {
            generation_id: Uuid::new_v4(),
            session_id: record.session_id.clone(),
            reference_code: record.reference_code.clone(),
            channel: record.channel.to_string(),
            form_id: (!form_id.is_empty()).then(|| form_id.to_string()),
            generated_at,
            generator_version: GENERATOR_VERSION.to_string(),
            options: options.clone(),
            environment: EnvironmentSnapshot {
                service_version: env!("CARGO_PKG_VERSION").to_string(),
                renderer: renderer.to_string(),
                memory_limit_bytes: self.config.memory_limit_bytes,
                generation_timeout_secs: self.config.generation_timeout.as_secs(),
                os: std::env::consts::OS.to_string(),
                arch: std::env::consts::ARCH.to_string(),
            },
        }
    }
}

/// Completeness check for a generation record before it is logged.
pub fn validate_generation_record(record: &GenerationRecord) -> ValidationErrors {
    let mut errors = ValidationErrors::new();
    let missing = |value: Option<&str>| value.map_or(true, |v| v.trim().is_empty());

    if missing(Some(&record.session_id)) {
        errors.push("session_id", "Missing required metadata field: session_id");
    }
    if missing(record.reference_code.as_deref()) {
        errors.push(
            "reference_code",
            "Missing required metadata field: reference_code",
        );
    }
    if missing(Some(&record.channel)) {
        errors.push("channel", "Missing required metadata field: channel");
    }
    errors
}

pub fn xml_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(ch),
        }
    }
    out
}

fn iso8601(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// PDF date string, `D:YYYYMMDDHHmmSS+00'00'`.
pub fn pdf_date(at: DateTime<Utc>) -> String {
    format!("D:{}+00'00'", at.format("%Y%m%d%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::{FormData, LifecycleState};
    use crate::documents::preparer::prepare_data;
    use chrono::TimeZone;
    use serde_json::json;

    fn embedder() -> MetadataEmbedder {
        MetadataEmbedder::new(Arc::new(PipelineConfig::for_storage_root(
            "/tmp/unused",
            "secret",
        )))
    }

    fn record(reference: Option<&str>) -> ApplicationRecord {
        ApplicationRecord {
            session_id: "sess-7".to_string(),
            reference_code: reference.map(str::to_string),
            channel: Channel::Whatsapp,
            current_step: LifecycleState::Completed,
            expires_at: None,
            created_at: Utc.with_ymd_and_hms(2026, 2, 1, 8, 0, 0).unwrap(),
            form_data: FormData(
                json!({
                    "formId": "ssb_account_opening_form.json",
                    "formResponses": { "firstName": "Tatenda", "surname": "O'Brien & Sons" }
                })
                .as_object()
                .cloned()
                .unwrap(),
            ),
            metadata: Default::default(),
        }
    }

    #[test]
    fn test_provenance_block_fields() {
        let record = record(None);
        let data = prepare_data(&record);
        let at = Utc.with_ymd_and_hms(2026, 2, 2, 12, 30, 0).unwrap();
        let block = embedder().build_provenance_block(&record, &data, at);

        assert_eq!(block.title, "Bancozim Application - DRAFT");
        assert_eq!(block.custom.applicant_name, "Tatenda O'Brien & Sons");
        assert!(block.keywords.contains(&"DRAFT".to_string()));

        let info = block.info_dictionary();
        assert_eq!(info["CreationDate"], "D:20260202123000+00'00'");
        assert_eq!(info["Subject"], "Loan application for Tatenda O'Brien & Sons");

        let xmp = block.to_xmp();
        assert!(xmp.contains("<bancozim:SessionId>sess-7</bancozim:SessionId>"));
        assert!(xmp.contains("<bancozim:Channel>whatsapp</bancozim:Channel>"));
        assert!(xmp.contains("Tatenda O&apos;Brien &amp; Sons"));
        assert!(xmp.contains("<xmp:CreateDate>2026-02-02T12:30:00.000Z</xmp:CreateDate>"));
    }

    #[test]
    fn test_generation_record_validation() {
        let record = record(None);
        let generation = embedder().build_generation_record(
            &record,
            &GenerationOptions::default(),
            "memory",
            Utc::now(),
        );
        assert_eq!(generation.generator_version, GENERATOR_VERSION);
        assert_eq!(generation.form_id.as_deref(), Some("ssb_account_opening_form.json"));
        assert_eq!(
            validate_generation_record(&generation).messages(),
            vec!["Missing required metadata field: reference_code".to_string()]
        );
    }

    #[test]
    fn test_xml_escape() {
        assert_eq!(xml_escape("<a href=\"x\">"), "&lt;a href=&quot;x&quot;&gt;");
    }
}
