//! Typst CLI renderer.
//!
//! Each render gets its own temporary directory holding the template and a
//! `data.json` the template reads with `json("data.json")`. The compiled PDF
//! is handed to [`PdfCanvas`] for post-processing.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tempfile::{tempdir, TempDir};

use crate::config::PipelineConfig;
use crate::documents::preparer::PreparedDocumentData;
use crate::documents::templates::TemplateId;

use super::{DocumentCanvas, PdfCanvas, RenderError, Renderer};

const DATA_FILE: &str = "data.json";
const OUTPUT_FILE: &str = "output.pdf";

#[derive(Debug, Clone)]
pub struct TypstRenderer {
    bin: String,
    template_dir: PathBuf,
}

impl TypstRenderer {
    pub fn new(bin: impl Into<String>, template_dir: impl Into<PathBuf>) -> Self {
        Self {
            bin: bin.into(),
            template_dir: template_dir.into(),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.typst_bin.clone(), config.template_dir.clone())
    }

    pub fn template_path(&self, template: TemplateId) -> PathBuf {
        self.template_dir.join(format!("{}.typ", template.file_stem()))
    }

    fn compile(&self, temp_dir: &TempDir, typ_filename: &str) -> Result<Vec<u8>, RenderError> {
        let typ_path = temp_dir.path().join(typ_filename);
        let output_path = temp_dir.path().join(OUTPUT_FILE);

        let output = Command::new(&self.bin)
            .arg("compile")
            .arg(&typ_path)
            .arg(&output_path)
            .current_dir(temp_dir.path())
            .output()
            .map_err(RenderError::TypstIo)?;

        if !output.status.success() {
            return Err(RenderError::TypstExit {
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        fs::read(&output_path).map_err(RenderError::ReadPdf)
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "template.typ".to_string())
}

impl Renderer for TypstRenderer {
    fn name(&self) -> &str {
        "typst"
    }

    fn is_available(&self) -> bool {
        Command::new(&self.bin)
            .arg("--version")
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    fn render(
        &self,
        template: TemplateId,
        data: &PreparedDocumentData,
    ) -> Result<Box<dyn DocumentCanvas>, RenderError> {
        let template_path = self.template_path(template);
        let source = fs::read_to_string(&template_path).map_err(|source| RenderError::TemplateIo {
            template: template_path.display().to_string(),
            source,
        })?;

        let temp_dir = tempdir().map_err(RenderError::TempDir)?;
        let typ_filename = file_name(&template_path);
        fs::write(temp_dir.path().join(&typ_filename), source).map_err(RenderError::WriteInput)?;
        fs::write(temp_dir.path().join(DATA_FILE), serde_json::to_vec(data)?)
            .map_err(RenderError::WriteInput)?;

        log::debug!(
            "Compiling {} with {} in {}",
            typ_filename,
            self.bin,
            temp_dir.path().display()
        );
        let pdf = self.compile(&temp_dir, &typ_filename)?;
        Ok(Box::new(PdfCanvas::from_bytes(&pdf)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[test]
    fn test_template_paths_follow_file_stems() {
        let renderer = TypstRenderer::new("typst", "/opt/templates");
        assert_eq!(
            renderer.template_path(TemplateId::SmeBusiness),
            PathBuf::from("/opt/templates/sme_business.typ")
        );
    }

    #[test]
    fn test_shipped_templates_exist() {
        let config = PipelineConfig::for_storage_root("/tmp", "secret");
        let renderer = TypstRenderer::from_config(&config);
        for template in [
            TemplateId::AccountHolders,
            TemplateId::SsbForm,
            TemplateId::ZbAccountOpening,
            TemplateId::SmeBusiness,
        ] {
            assert!(renderer.template_path(template).is_file(), "{template:?}");
        }
    }

    #[test]
    fn test_missing_binary_is_unavailable_and_fails_render() {
        let config = PipelineConfig::for_storage_root("/tmp", "secret");
        let renderer = TypstRenderer::new("definitely-not-typst-binary", config.template_dir);
        assert!(!renderer.is_available());

        let data = PreparedDocumentData::new(Map::new());
        let result = renderer.render(TemplateId::AccountHolders, &data);
        assert!(matches!(result, Err(RenderError::TypstIo(_))));
    }

    #[test]
    fn test_missing_template_dir() {
        let renderer = TypstRenderer::new("typst", "/nonexistent/templates");
        let data = PreparedDocumentData::new(Map::new());
        assert!(matches!(
            renderer.render(TemplateId::SsbForm, &data),
            Err(RenderError::TemplateIo { .. })
        ));
    }
}
