#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};

use loan_docs_server::application::ApplicationRecord;
use loan_docs_server::documents::{PreparedDocumentData, TemplateId};
use loan_docs_server::render::{DocumentCanvas, Permission, RenderError, Renderer, TextStamp};
use loan_docs_server::PipelineConfig;

pub const MEMORY_PDF: &[u8] = b"%PDF-1.4\n% in-memory test document\n%%EOF\n";

/// Everything the in-memory canvas was asked to do.
#[derive(Debug, Default)]
pub struct CanvasLog {
    pub renders: Vec<(TemplateId, PreparedDocumentData)>,
    pub info: Option<BTreeMap<String, String>>,
    pub xmp: Option<String>,
    pub stamps: Vec<(usize, TextStamp)>,
    pub encryption: Option<EncryptionCall>,
}

#[derive(Debug, Clone)]
pub struct EncryptionCall {
    pub open_password: Option<String>,
    pub owner_password: String,
    pub permissions: Vec<Permission>,
    pub strength: u32,
}

/// Failure switches for the in-memory renderer.
#[derive(Debug, Clone, Default)]
pub struct Failures {
    pub render: bool,
    pub metadata: bool,
    pub watermark_page: Option<usize>,
    pub encryption: bool,
}

/// Renderer double that records canvas calls instead of producing a real PDF.
pub struct MemoryRenderer {
    pub pages: usize,
    pub available: bool,
    pub delay: Option<Duration>,
    pub failures: Failures,
    pub log: Arc<Mutex<CanvasLog>>,
}

impl MemoryRenderer {
    pub fn new() -> Self {
        Self {
            pages: 2,
            available: true,
            delay: None,
            failures: Failures::default(),
            log: Arc::new(Mutex::new(CanvasLog::default())),
        }
    }

    pub fn with_failures(failures: Failures) -> Self {
        Self {
            failures,
            ..Self::new()
        }
    }
}

impl Renderer for MemoryRenderer {
    fn name(&self) -> &str {
        "memory"
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn render(
        &self,
        template: TemplateId,
        data: &PreparedDocumentData,
    ) -> Result<Box<dyn DocumentCanvas>, RenderError> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.failures.render {
            return Err(RenderError::TypstExit {
                code: 1,
                stderr: "error: unknown variable".to_string(),
            });
        }
        self.log.lock().renders.push((template, data.clone()));
        Ok(Box::new(MemoryCanvas {
            pages: self.pages,
            failures: self.failures.clone(),
            log: self.log.clone(),
        }))
    }
}

pub struct MemoryCanvas {
    pages: usize,
    failures: Failures,
    log: Arc<Mutex<CanvasLog>>,
}

impl DocumentCanvas for MemoryCanvas {
    fn attach_info_dictionary(&mut self, info: &BTreeMap<String, String>) -> Result<(), RenderError> {
        if self.failures.metadata {
            return Err(RenderError::Unsupported("info dictionary"));
        }
        self.log.lock().info = Some(info.clone());
        Ok(())
    }

    fn attach_xmp_block(&mut self, xml: &str) -> Result<(), RenderError> {
        self.log.lock().xmp = Some(xml.to_string());
        Ok(())
    }

    fn set_encryption(
        &mut self,
        open_password: Option<&str>,
        owner_password: &str,
        permissions: &[Permission],
        strength: u32,
    ) -> Result<(), RenderError> {
        if self.failures.encryption {
            return Err(RenderError::Unsupported("document encryption"));
        }
        self.log.lock().encryption = Some(EncryptionCall {
            open_password: open_password.map(str::to_string),
            owner_password: owner_password.to_string(),
            permissions: permissions.to_vec(),
            strength,
        });
        Ok(())
    }

    fn page_count(&self) -> usize {
        self.pages
    }

    fn draw_text(&mut self, page: usize, stamp: &TextStamp) -> Result<(), RenderError> {
        if page == 0 || page > self.pages {
            return Err(RenderError::PageOutOfRange {
                page,
                count: self.pages,
            });
        }
        if self.failures.watermark_page == Some(page) {
            return Err(RenderError::Unsupported("text stamping"));
        }
        self.log.lock().stamps.push((page, stamp.clone()));
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>, RenderError> {
        Ok(MEMORY_PDF.to_vec())
    }
}

pub fn test_config(root: &std::path::Path) -> PipelineConfig {
    PipelineConfig::for_storage_root(root, "integration-test-secret")
}

/// A complete account-holder application ready for generation.
pub fn account_holder_json() -> Value {
    json!({
        "session_id": "sess-it-001",
        "reference_code": "BZ-2026-0042",
        "channel": "web",
        "current_step": "completed",
        "created_at": "2026-03-01T09:30:00Z",
        "form_data": {
            "formId": "account_holder_loan_application.json",
            "amount": 5000,
            "creditTerm": 12,
            "interestRate": 15,
            "formResponses": {
                "firstName": "Tendai",
                "lastName": "Moyo",
                "nationalIdNumber": "63-123456-A-78",
                "mobile": "+263771234567",
                "emailAddress": "tendai.moyo@example.com",
                "residentialAddress": "12 Samora Machel Ave, Harare",
                "dateOfBirth": "1990-05-14",
                "maritalStatus": "single",
                "salary": 1200
            }
        },
        "metadata": { "agent": "branch-07" }
    })
}

pub fn account_holder_record() -> ApplicationRecord {
    serde_json::from_value(account_holder_json()).expect("valid test record")
}

pub fn record_with(mutate: impl FnOnce(&mut Value)) -> ApplicationRecord {
    let mut value = account_holder_json();
    mutate(&mut value);
    serde_json::from_value(value).expect("valid test record")
}

pub fn fixed_time() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 30, 0).unwrap()
}
