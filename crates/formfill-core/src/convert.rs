//! Export formats and conversion of filled PDFs
//!
//! PDF is always available. DOCX goes through LibreOffice in headless mode;
//! when the binary is missing or fails, callers get a
//! [`FormFillError::Conversion`] and can fall back to PDF.

use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::FormFillError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Pdf,
    Docx,
}

impl ExportFormat {
    pub const ALL: [ExportFormat; 2] = [ExportFormat::Pdf, ExportFormat::Docx];

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Pdf => "pdf",
            ExportFormat::Docx => "docx",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ExportFormat::Pdf => "application/pdf",
            ExportFormat::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ExportFormat::Pdf => "Filled PDF document",
            ExportFormat::Docx => "Word document converted from the filled PDF",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = FormFillError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pdf" => Ok(ExportFormat::Pdf),
            "docx" | "word" => Ok(ExportFormat::Docx),
            other => Err(FormFillError::Validation(format!(
                "unsupported export format '{}', expected pdf or docx",
                other
            ))),
        }
    }
}

/// Turns filled PDF bytes into another format
pub trait FormatConverter: Send + Sync {
    fn convert(&self, pdf: &[u8], target: ExportFormat) -> Result<Vec<u8>, FormFillError>;
}

/// LibreOffice (`soffice`) based converter
#[derive(Debug, Clone)]
pub struct SofficeConverter {
    binary: PathBuf,
}

impl Default for SofficeConverter {
    fn default() -> Self {
        Self::new("soffice")
    }
}

impl SofficeConverter {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn to_docx(&self, pdf: &[u8]) -> Result<Vec<u8>, FormFillError> {
        let workdir = tempfile::tempdir()
            .map_err(|e| FormFillError::Conversion(format!("Failed to create temp dir: {}", e)))?;
        let input = workdir.path().join("filled.pdf");
        fs::write(&input, pdf)
            .map_err(|e| FormFillError::Conversion(format!("Failed to write input: {}", e)))?;

        let mut cmd = Command::new(&self.binary);
        cmd.args([
            "--headless",
            "--infilter=writer_pdf_import",
            "--convert-to",
            "docx",
            "--outdir",
        ])
        .arg(workdir.path())
        .arg(&input);
        debug!("LibreOffice command: {:?}", cmd);

        let output = cmd.output().map_err(|e| {
            FormFillError::Conversion(format!(
                "Failed to execute {}: {}",
                self.binary.display(),
                e
            ))
        })?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FormFillError::Conversion(format!(
                "{} exited with {}: {}",
                self.binary.display(),
                output.status,
                stderr.trim()
            )));
        }

        let converted = workdir.path().join("filled.docx");
        let bytes = fs::read(&converted).map_err(|e| {
            FormFillError::Conversion(format!("Converter produced no output: {}", e))
        })?;
        debug!("Converted {} PDF bytes to {} DOCX bytes", pdf.len(), bytes.len());
        Ok(bytes)
    }
}

impl FormatConverter for SofficeConverter {
    fn convert(&self, pdf: &[u8], target: ExportFormat) -> Result<Vec<u8>, FormFillError> {
        match target {
            ExportFormat::Pdf => Ok(pdf.to_vec()),
            ExportFormat::Docx => self.to_docx(pdf),
        }
    }
}
