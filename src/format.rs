//! Document format registry and content sniffing.
//!
//! Maps MIME types to file extensions (the engine picks its export filter
//! from the output extension) and recognises what a produced file actually
//! contains by its leading bytes.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::path::Path;

/// Container family a document belongs to, judged from its bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Pdf,
    /// ZIP with a leading `mimetype` entry (odt, ods, odp).
    OpenDocument,
    /// ZIP with a leading `[Content_Types].xml` entry (docx, xlsx, pptx).
    OfficeOpenXml,
    /// Any other ZIP archive.
    Zip,
    /// Compound File Binary (legacy doc, xls, ppt).
    Ole2,
    Rtf,
    Png,
    Jpeg,
    Unknown,
}

/// One entry of the format registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentFormat {
    pub name: &'static str,
    pub extension: &'static str,
    pub media_type: &'static str,
    /// What a file of this format looks like on disk, or `None` for plain text formats.
    pub kind: Option<FileKind>,
}

const fn fmt(
    name: &'static str,
    extension: &'static str,
    media_type: &'static str,
    kind: Option<FileKind>,
) -> DocumentFormat {
    DocumentFormat {
        name,
        extension,
        media_type,
        kind,
    }
}

static FORMATS: Lazy<Vec<DocumentFormat>> = Lazy::new(|| {
    use FileKind::*;
    vec![
        fmt("PDF", "pdf", "application/pdf", Some(Pdf)),
        fmt(
            "Word 2007-365",
            "docx",
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
            Some(OfficeOpenXml),
        ),
        fmt("Word 97-2003", "doc", "application/msword", Some(Ole2)),
        fmt(
            "ODF Text Document",
            "odt",
            "application/vnd.oasis.opendocument.text",
            Some(OpenDocument),
        ),
        fmt("Rich Text", "rtf", "application/rtf", Some(Rtf)),
        fmt("Rich Text", "rtf", "text/rtf", Some(Rtf)),
        fmt("Plain Text", "txt", "text/plain", None),
        fmt("HTML", "html", "text/html", None),
        fmt(
            "Excel 2007-365",
            "xlsx",
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
            Some(OfficeOpenXml),
        ),
        fmt("Excel 97-2003", "xls", "application/vnd.ms-excel", Some(Ole2)),
        fmt(
            "ODF Spreadsheet",
            "ods",
            "application/vnd.oasis.opendocument.spreadsheet",
            Some(OpenDocument),
        ),
        fmt("CSV", "csv", "text/csv", None),
        fmt(
            "PowerPoint 2007-365",
            "pptx",
            "application/vnd.openxmlformats-officedocument.presentationml.presentation",
            Some(OfficeOpenXml),
        ),
        fmt(
            "PowerPoint 97-2003",
            "ppt",
            "application/vnd.ms-powerpoint",
            Some(Ole2),
        ),
        fmt(
            "ODF Presentation",
            "odp",
            "application/vnd.oasis.opendocument.presentation",
            Some(OpenDocument),
        ),
        fmt("PNG", "png", "image/png", Some(Png)),
        fmt("JPEG", "jpg", "image/jpeg", Some(Jpeg)),
        fmt("SVG", "svg", "image/svg+xml", None),
        fmt("EPUB", "epub", "application/epub+zip", Some(Zip)),
    ]
});

/// All registered formats.
pub fn formats() -> &'static [DocumentFormat] {
    &FORMATS
}

fn essence(media_type: &str) -> String {
    media_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

/// Look up a format by MIME type. Parameters such as `; charset=utf-8` are ignored.
pub fn format_for_media_type(media_type: &str) -> Option<&'static DocumentFormat> {
    let essence = essence(media_type);
    FORMATS.iter().find(|f| f.media_type == essence)
}

/// Look up a format by extension, with or without the leading dot.
pub fn format_for_extension(ext: &str) -> Option<&'static DocumentFormat> {
    let ext = ext.trim_start_matches('.').to_ascii_lowercase();
    let ext = match ext.as_str() {
        "jpeg" => "jpg",
        "htm" => "html",
        other => other,
    };
    FORMATS.iter().find(|f| f.extension == ext)
}

/// MIME type for an extension, `application/octet-stream` when unknown.
pub fn mime_for_extension(ext: &str) -> &'static str {
    format_for_extension(ext)
        .map(|f| f.media_type)
        .unwrap_or("application/octet-stream")
}

/// Look up a format by a path's extension.
pub fn format_for_path(path: &Path) -> Option<&'static DocumentFormat> {
    path.extension()
        .and_then(|e| e.to_str())
        .and_then(format_for_extension)
}

/// File extension for a MIME type, `"bin"` when unknown.
pub fn extension_for(media_type: &str) -> &'static str {
    format_for_media_type(media_type)
        .map(|f| f.extension)
        .unwrap_or("bin")
}

/// Classify a file by its leading bytes.
pub fn sniff(path: &Path) -> std::io::Result<FileKind> {
    let mut head = Vec::with_capacity(64);
    std::fs::File::open(path)?
        .take(64)
        .read_to_end(&mut head)?;
    Ok(sniff_bytes(&head))
}

/// Classify a byte prefix. At least 58 bytes are needed to tell ZIP flavours apart.
pub fn sniff_bytes(bytes: &[u8]) -> FileKind {
    const OLE2: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
    // Writers differ in which package part comes first.
    const OOXML_PARTS: &[&[u8]] = &[
        b"[Content_Types].xml",
        b"_rels/",
        b"docProps/",
        b"word/",
        b"xl/",
        b"ppt/",
    ];

    if bytes.starts_with(b"%PDF-") {
        FileKind::Pdf
    } else if bytes.starts_with(b"PK\x03\x04") {
        // First local file header: the entry name starts at offset 30.
        let name = bytes.get(30..).unwrap_or_default();
        if name.starts_with(b"mimetype") {
            FileKind::OpenDocument
        } else if OOXML_PARTS.iter().any(|p| name.starts_with(p)) {
            FileKind::OfficeOpenXml
        } else {
            FileKind::Zip
        }
    } else if bytes.starts_with(OLE2) {
        FileKind::Ole2
    } else if bytes.starts_with(b"{\\rtf") {
        FileKind::Rtf
    } else if bytes.starts_with(PNG) {
        FileKind::Png
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        FileKind::Jpeg
    } else {
        FileKind::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zip_with_first_entry(name: &str) -> Vec<u8> {
        let mut v = b"PK\x03\x04".to_vec();
        v.resize(30, 0);
        v.extend_from_slice(name.as_bytes());
        v
    }

    #[test]
    fn extension_lookup_ignores_case_and_parameters() {
        assert_eq!(extension_for("application/pdf"), "pdf");
        assert_eq!(extension_for("Text/HTML; charset=UTF-8"), "html");
        assert_eq!(
            extension_for("application/vnd.openxmlformats-officedocument.wordprocessingml.document"),
            "docx"
        );
        assert_eq!(extension_for("application/x-made-up"), "bin");
    }

    #[test]
    fn format_by_path_extension() {
        let f = format_for_path(Path::new("/tmp/Report.ODT")).unwrap();
        assert_eq!(f.media_type, "application/vnd.oasis.opendocument.text");
        assert_eq!(format_for_extension(".jpeg").unwrap().extension, "jpg");
        assert!(format_for_path(Path::new("/tmp/noext")).is_none());
        assert_eq!(mime_for_extension("PDF"), "application/pdf");
        assert_eq!(mime_for_extension("xyz"), "application/octet-stream");
    }

    #[test]
    fn sniffs_common_containers() {
        assert_eq!(sniff_bytes(b"%PDF-1.7\n%\xE2\xE3"), FileKind::Pdf);
        assert_eq!(sniff_bytes(&zip_with_first_entry("mimetype")), FileKind::OpenDocument);
        assert_eq!(
            sniff_bytes(&zip_with_first_entry("[Content_Types].xml")),
            FileKind::OfficeOpenXml
        );
        assert_eq!(
            sniff_bytes(&zip_with_first_entry("_rels/.rels")),
            FileKind::OfficeOpenXml
        );
        assert_eq!(sniff_bytes(&zip_with_first_entry("images/a.png")), FileKind::Zip);
        assert_eq!(
            sniff_bytes(&[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1, 0, 0]),
            FileKind::Ole2
        );
        assert_eq!(sniff_bytes(b"{\\rtf1\\ansi"), FileKind::Rtf);
        assert_eq!(sniff_bytes(b"hello"), FileKind::Unknown);
        assert_eq!(sniff_bytes(b""), FileKind::Unknown);
    }

    #[test]
    fn sniff_reads_file_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.pdf");
        std::fs::write(&path, b"%PDF-1.4\n1 0 obj\n").unwrap();
        assert_eq!(sniff(&path).unwrap(), FileKind::Pdf);
    }

    #[test]
    fn registry_kinds_match_extensions() {
        assert_eq!(format_for_extension("docx").unwrap().kind, Some(FileKind::OfficeOpenXml));
        assert_eq!(format_for_extension("odt").unwrap().kind, Some(FileKind::OpenDocument));
        assert_eq!(format_for_extension("txt").unwrap().kind, None);
    }
}
