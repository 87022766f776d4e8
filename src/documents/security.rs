//! Document protection and input hygiene.
//!
//! Encryption and watermarking are optional, config-gated enhancements: when
//! they fail the document still ships and the caller gets a [`Degraded`].
//! Sanitization and the dangerous-content scan run on the prepared data
//! before it reaches the renderer.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use rand::{rngs::OsRng, RngCore};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::application::ApplicationRecord;
use crate::config::PipelineConfig;
use crate::render::{DocumentCanvas, Permission, RenderError, TextStamp};

use super::{Degraded, DegradedStage};

/// Rights granted without the owner password. Modify and forms are denied.
pub const PERMISSIONS: &[Permission] = &[Permission::Print, Permission::Copy];
pub const ENCRYPTION_STRENGTH: u32 = 128;

const SESSION_SUFFIX_LEN: usize = 4;

const WATERMARK_X: f32 = 300.0;
const WATERMARK_Y: f32 = 400.0;
const WATERMARK_SIZE: f32 = 12.0;
const WATERMARK_COLOR: [f32; 3] = [0.8, 0.8, 0.8];
const WATERMARK_ANGLE: f32 = -45.0;

const ALLOWED_TAGS: &[&str] = &["b", "i", "u", "br", "p", "div", "span"];
pub const MAX_SANITIZED_CHARS: usize = 5000;
pub const MAX_SCANNED_CHARS: usize = 10_000;
const ELLIPSIS: &str = "...";

const DANGEROUS_PATTERNS: &[&str] = &[
    "<script",
    "javascript:",
    "vbscript:",
    "onload=",
    "onerror=",
    "onclick=",
    "<?php",
    "<%",
];

/// Result of an optional protection stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Skipped,
    Applied,
}

pub struct SecurityApplicator {
    config: Arc<PipelineConfig>,
}

impl SecurityApplicator {
    pub fn new(config: Arc<PipelineConfig>) -> Self {
        Self { config }
    }

    pub fn generate_access_password(&self, length: usize, session_id: &str) -> String {
        self.generate_access_password_at(length, session_id, Utc::now().timestamp())
    }

    /// Random printable password of exactly `length` chars whose last four
    /// are bound to the session, the server secret and `timestamp`.
    pub fn generate_access_password_at(
        &self,
        length: usize,
        session_id: &str,
        timestamp: i64,
    ) -> String {
        let mut bytes = vec![0u8; length.max(1)];
        OsRng.fill_bytes(&mut bytes);

        let random: String = STANDARD
            .encode(&bytes)
            .chars()
            .map(|c| match c {
                '+' => 'A',
                '/' => 'B',
                '=' => 'C',
                other => other,
            })
            .take(length.saturating_sub(SESSION_SUFFIX_LEN))
            .collect();

        let mut hasher = Sha256::new();
        hasher.update(session_id.as_bytes());
        hasher.update(self.config.server_secret.as_bytes());
        hasher.update(timestamp.to_string().as_bytes());
        let digest = hex::encode(hasher.finalize());

        let suffix_len = length.min(SESSION_SUFFIX_LEN);
        let password = format!("{}{}", random, &digest[..suffix_len]);

        log::info!(
            "PDF password generated for session {} (length {})",
            session_id,
            password.len()
        );
        password
    }

    /// Lock modification behind a generated owner password.
    pub fn apply_encryption(
        &self,
        canvas: &mut dyn DocumentCanvas,
        record: &ApplicationRecord,
    ) -> Result<StageOutcome, Degraded> {
        if !self.config.encryption_enabled {
            return Ok(StageOutcome::Skipped);
        }

        let owner_password =
            self.generate_access_password(self.config.owner_password_length, &record.session_id);

        match canvas.set_encryption(None, &owner_password, PERMISSIONS, ENCRYPTION_STRENGTH) {
            Ok(()) => {
                let granted: Vec<&str> = PERMISSIONS.iter().map(Permission::as_str).collect();
                log::info!(
                    "PDF security applied for session {}: {}-bit, permissions {:?}",
                    record.session_id,
                    ENCRYPTION_STRENGTH,
                    granted
                );
                Ok(StageOutcome::Applied)
            }
            Err(e) => {
                log::warn!(
                    "Failed to apply PDF security for session {}: {}",
                    record.session_id,
                    e
                );
                Err(Degraded::new(DegradedStage::Encryption, e.to_string()))
            }
        }
    }

    pub fn default_watermark_text(&self, record: &ApplicationRecord) -> String {
        format!(
            "{} - {} - {}",
            self.config.brand.to_uppercase(),
            record.reference_or_draft(),
            record.created_at.format("%Y-%m-%d")
        )
    }

    /// Stamp every page. The first failing page aborts the loop and yields a
    /// single [`Degraded`].
    pub fn apply_watermark(
        &self,
        canvas: &mut dyn DocumentCanvas,
        record: &ApplicationRecord,
        text: Option<&str>,
    ) -> Result<StageOutcome, Degraded> {
        if !self.config.watermark_enabled {
            return Ok(StageOutcome::Skipped);
        }

        let stamp = TextStamp {
            x: WATERMARK_X,
            y: WATERMARK_Y,
            text: text
                .map(str::to_string)
                .unwrap_or_else(|| self.default_watermark_text(record)),
            font: None,
            size: WATERMARK_SIZE,
            color: WATERMARK_COLOR,
            angle: WATERMARK_ANGLE,
        };

        let pages = canvas.page_count();
        let stamped: Result<(), RenderError> =
            (1..=pages).try_for_each(|page| canvas.draw_text(page, &stamp));

        match stamped {
            Ok(()) => {
                log::info!(
                    "PDF watermark applied for session {} on {} page(s): {}",
                    record.session_id,
                    pages,
                    stamp.text
                );
                Ok(StageOutcome::Applied)
            }
            Err(e) => {
                log::warn!(
                    "Failed to apply PDF watermark for session {}: {}",
                    record.session_id,
                    e
                );
                Err(Degraded::new(DegradedStage::Watermark, e.to_string()))
            }
        }
    }
}

// ============================================================================
// Sanitization
// ============================================================================

/// Recursively clean every string in `data`.
pub fn sanitize_content(data: &Value) -> Value {
    match data {
        Value::String(s) => Value::String(sanitize_text(s)),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_content).collect()),
        Value::Object(map) => Value::Object(sanitize_map(map)),
        other => other.clone(),
    }
}

pub fn sanitize_map(map: &Map<String, Value>) -> Map<String, Value> {
    map.iter()
        .map(|(key, value)| (key.clone(), sanitize_content(value)))
        .collect()
}

/// Control characters removed, markup stripped to the allow-list, length capped.
pub fn sanitize_text(input: &str) -> String {
    let mut cleaned = strip_controls(input);
    // Stripping can splice fragments into a new tag, so repeat until stable.
    // Output never grows, and an equal-length output is already normalised.
    loop {
        let next = strip_markup(&cleaned);
        if next == cleaned {
            break;
        }
        cleaned = next;
    }

    if cleaned.chars().count() > MAX_SANITIZED_CHARS {
        let mut truncated: String = cleaned.chars().take(MAX_SANITIZED_CHARS).collect();
        truncated.push_str(ELLIPSIS);
        truncated
    } else {
        cleaned
    }
}

fn strip_controls(input: &str) -> String {
    input.chars().filter(|c| !is_stripped_control(*c)).collect()
}

fn is_stripped_control(c: char) -> bool {
    matches!(c, '\u{00}'..='\u{08}' | '\u{0B}' | '\u{0C}' | '\u{0E}'..='\u{1F}' | '\u{7F}')
}

fn strip_markup(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find('<') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];

        let opens_markup = tail[1..]
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || matches!(c, '/' | '!' | '?' | '%'));
        if !opens_markup {
            out.push('<');
            rest = &tail[1..];
            continue;
        }

        // Unterminated markup swallows the remainder.
        let Some(end) = markup_end(tail) else {
            return out;
        };
        if let Some(tag) = allowed_tag(&tail[1..end]) {
            out.push_str(&tag);
        }
        rest = &tail[end + 1..];
    }

    out.push_str(rest);
    out
}

/// Byte index of the `>` closing the markup at the start of `tail`.
fn markup_end(tail: &str) -> Option<usize> {
    if let Some(body) = tail.strip_prefix("<!--") {
        return body.find("-->").map(|i| 4 + i + 2);
    }
    for (open, close) in [("<?", "?>"), ("<%", "%>")] {
        if let Some(body) = tail.strip_prefix(open) {
            return body.find(close).map(|i| 2 + i + 1);
        }
    }

    let mut quote: Option<char> = None;
    for (i, ch) in tail.char_indices().skip(1) {
        match quote {
            Some(q) if ch == q => quote = None,
            Some(_) => {}
            None if ch == '"' || ch == '\'' => quote = Some(ch),
            None if ch == '>' => return Some(i),
            None => {}
        }
    }
    None
}

/// Allow-listed tags come back bare, attributes dropped.
fn allowed_tag(body: &str) -> Option<String> {
    let body = body.trim_start();
    let (closing, body) = match body.strip_prefix('/') {
        Some(rest) => (true, rest),
        None => (false, body),
    };
    let name: String = body
        .chars()
        .take_while(char::is_ascii_alphanumeric)
        .collect::<String>()
        .to_ascii_lowercase();

    ALLOWED_TAGS
        .contains(&name.as_str())
        .then(|| format!("<{}{}>", if closing { "/" } else { "" }, name))
}

/// Flag suspicious strings. Never blocks; one message per field and pattern.
pub fn scan_for_dangerous_content(data: &Map<String, Value>) -> Vec<String> {
    let mut findings = Vec::new();
    for (key, value) in data {
        scan_value(key, value, &mut findings);
    }
    findings
}

fn scan_value(path: &str, value: &Value, findings: &mut Vec<String>) {
    match value {
        Value::String(text) => {
            let lowered = strip_controls(text).to_lowercase();
            for pattern in DANGEROUS_PATTERNS {
                if lowered.contains(pattern) {
                    findings.push(format!(
                        "Potentially dangerous content found in field '{}': {}",
                        path, pattern
                    ));
                }
            }
            let length = text.chars().count();
            if length > MAX_SCANNED_CHARS {
                findings.push(format!(
                    "Field '{}' contains excessively long content ({} characters)",
                    path, length
                ));
            }
        }
        Value::Object(map) => {
            for (key, nested) in map {
                scan_value(&format!("{}.{}", path, key), nested, findings);
            }
        }
        Value::Array(items) => {
            for (i, nested) in items.iter().enumerate() {
                scan_value(&format!("{}.{}", path, i), nested, findings);
            }
        }
        _ => {}
    }
}
