//! The `convertDocument` request/response contract.
//!
//! A request names a stored input file and the MIME types on both sides;
//! the converted file is uploaded back to the store. Failures come back as
//! an `error` response, never as an `Err`.

use crate::error::DocsconvError;
use crate::format;
use crate::service::ConversionService;
use crate::storage::{FileStore, StoredFile};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::error;

/// Input of `convertDocument`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertRequest {
    pub input_file_id: String,
    pub input_mime_type: String,
    pub output_mime_type: String,
}

/// Output of `convertDocument`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ConvertResponse {
    Ok { file: StoredFile },
    Error { error: String },
}

impl ConvertResponse {
    fn failed(cause: impl std::fmt::Display) -> Self {
        ConvertResponse::Error {
            error: format!("There was a problem converting the document: {cause}"),
        }
    }
}

/// Download the input, convert it, upload the result.
pub async fn convert_document(
    service: &ConversionService,
    store: &dyn FileStore,
    request: &ConvertRequest,
) -> ConvertResponse {
    let in_ext = format::extension_for(&request.input_mime_type);
    let out_ext = format::extension_for(&request.output_mime_type);

    let scratch = match tempfile::tempdir() {
        Ok(d) => d,
        Err(e) => {
            error!("Error creating scratch directory: {e}");
            return ConvertResponse::failed(e);
        }
    };

    let input = match scratch_file(scratch.path(), "upload-", in_ext) {
        Ok(p) => p,
        Err(e) => return ConvertResponse::failed(e),
    };
    if let Err(e) = store.download_to(&request.input_file_id, &input).await {
        error!("Error reading file: {e}");
        return ConvertResponse::failed(e);
    }

    // Random token shared by the scratch input and the uploaded result's name.
    let token = input
        .file_stem()
        .and_then(|s| s.to_str())
        .and_then(|s| s.strip_prefix("upload-"))
        .unwrap_or("converted")
        .to_string();
    let output = scratch.path().join(format!("converted-{token}.{out_ext}"));

    if let Err(e) = service.convert(&input, &output).await {
        error!("Error converting file: {e}");
        return ConvertResponse::failed(e);
    }

    match store
        .upload(
            &format!("{token}.{out_ext}"),
            &output,
            &request.output_mime_type,
        )
        .await
    {
        Ok(file) => ConvertResponse::Ok { file },
        Err(e) => {
            error!("Error uploading converted file: {e}");
            ConvertResponse::failed(e)
        }
    }
}

// Reserve a uniquely named empty file in `dir`.
fn scratch_file(dir: &Path, prefix: &str, ext: &str) -> Result<std::path::PathBuf, DocsconvError> {
    let file = tempfile::Builder::new()
        .prefix(prefix)
        .suffix(&format!(".{ext}"))
        .rand_bytes(10)
        .tempfile_in(dir)
        .map_err(|e| DocsconvError::Internal(format!("scratch file: {e}")))?;
    file.into_temp_path()
        .keep()
        .map_err(|e| DocsconvError::Internal(format!("scratch file: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_uses_camel_case_keys() {
        let req: ConvertRequest = serde_json::from_str(
            r#"{"inputFileId":"f1","inputMimeType":"application/msword","outputMimeType":"application/pdf"}"#,
        )
        .unwrap();
        assert_eq!(req.input_file_id, "f1");
        assert_eq!(req.output_mime_type, "application/pdf");
    }

    #[test]
    fn responses_are_tagged_by_status() {
        let err = serde_json::to_value(ConvertResponse::failed("boom")).unwrap();
        assert_eq!(err["status"], "error");
        assert_eq!(
            err["error"],
            "There was a problem converting the document: boom"
        );

        let ok = serde_json::to_value(ConvertResponse::Ok {
            file: StoredFile {
                id: "x".into(),
                name: "x.pdf".into(),
                content_type: "application/pdf".into(),
                size: 1,
            },
        })
        .unwrap();
        assert_eq!(ok["status"], "ok");
        assert_eq!(ok["file"]["name"], "x.pdf");
    }

    #[test]
    fn scratch_files_carry_the_extension() {
        let dir = tempfile::tempdir().unwrap();
        let p = scratch_file(dir.path(), "upload-", "docx").unwrap();
        let name = p.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("upload-") && name.ends_with(".docx"), "got: {name}");
        assert!(p.exists());
    }
}
