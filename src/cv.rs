use anyhow::{Context, Result, bail};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const EXTRACTED_CVS_DIR: &str = "extracted_cvs";

pub fn extract_pdf_text(pdf: &Path) -> Result<String> {
    pdf_extract::extract_text(pdf).with_context(|| format!("Failed to extract text from {}", pdf.display()))
}

/// Extract a PDF into `<output_dir>/<file stem>.txt`.
pub fn extract_to_file(pdf: &Path, output_dir: &Path) -> Result<PathBuf> {
    let text = extract_pdf_text(pdf)?;
    fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create directory: {}", output_dir.display()))?;
    let path = output_dir.join(format!("{}.txt", cv_stem(pdf)));
    fs::write(&path, &text).with_context(|| format!("Failed to write {}", path.display()))?;
    info!(chars = text.chars().count(), path = %path.display(), "Extracted CV text");
    Ok(path)
}

pub fn cv_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "cv".to_string())
}

/// CV text for `cv_name`, from the extraction cache when present.
///
/// Otherwise the CV file is read directly (`.txt`) or extracted (PDF) and cached.
pub fn load_cv_text(cv_name: &str, cv_path: Option<&Path>, cache_dir: &Path) -> Result<String> {
    let cached = cache_dir.join(format!("{cv_name}.txt"));
    if cached.exists() {
        debug!(path = %cached.display(), "Using extracted CV text");
        return fs::read_to_string(&cached).with_context(|| format!("Failed to read {}", cached.display()));
    }

    let Some(path) = cv_path else {
        bail!("No CV text for '{cv_name}': {} does not exist and cv.file_path is not set", cached.display());
    };

    let is_text = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("txt") || ext.eq_ignore_ascii_case("md"));
    if is_text {
        return fs::read_to_string(path).with_context(|| format!("Failed to read CV: {}", path.display()));
    }

    let text = extract_pdf_text(path)?;
    fs::create_dir_all(cache_dir).with_context(|| format!("Failed to create {}", cache_dir.display()))?;
    fs::write(&cached, &text).with_context(|| format!("Failed to write {}", cached.display()))?;
    info!(path = %cached.display(), "Cached extracted CV text");
    Ok(text)
}

/// PDFs directly inside `dir`, sorted by name.
pub fn list_pdfs(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))?;
    let mut pdfs: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("pdf")))
        .collect();
    pdfs.sort();
    Ok(pdfs)
}
