//! On-disk storage for uploaded documents.
//!
//! Uploads are written under `<data_dir>/documents/<uuid>.pdf`; the original
//! filename only survives in the database record.

use std::path::{Path, PathBuf};

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persist an uploaded PDF and return its storage path.
pub fn save_document(
    documents_dir: &Path,
    document_id: &Uuid,
    bytes: &[u8],
) -> Result<PathBuf, StorageError> {
    std::fs::create_dir_all(documents_dir)?;
    let path = documents_dir.join(format!("{document_id}.pdf"));
    std::fs::write(&path, bytes)?;
    Ok(path)
}

/// Strip path separators and NULs from a client-supplied filename.
pub fn sanitize_filename(original: &str) -> String {
    let name = Path::new(original)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("");

    let clean: String = name
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | '\0'))
        .take(255)
        .collect();

    if clean.is_empty() {
        "document.pdf".to_string()
    } else {
        clean
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_creates_directory_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let documents = dir.path().join("documents");
        let id = Uuid::new_v4();

        let path = save_document(&documents, &id, b"%PDF-1.4").unwrap();
        assert!(path.ends_with(format!("{id}.pdf")));
        assert_eq!(std::fs::read(&path).unwrap(), b"%PDF-1.4");
    }

    #[test]
    fn sanitize_strips_traversal() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("ta\\bela.pdf"), "tabela.pdf");
        assert_eq!(sanitize_filename(""), "document.pdf");
    }
}
