//! MIME detection and filename helpers for downloaded files.

/// Map MIME type to file extension.
pub fn mime_to_extension(mime: &str) -> &'static str {
    let mime = mime.split(';').next().unwrap_or(mime).trim();
    match mime {
        "application/pdf" => "pdf",
        "text/html" => "html",
        "text/plain" => "txt",
        "application/json" => "json",
        "application/xml" | "text/xml" => "xml",
        "image/jpeg" => "jpg",
        "image/png" => "png",
        "image/gif" => "gif",
        "image/tiff" => "tif",
        "application/msword" => "doc",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => "docx",
        "application/vnd.ms-excel" => "xls",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => "xlsx",
        "application/zip" => "zip",
        _ => "bin",
    }
}

/// Best MIME type for downloaded bytes.
///
/// Magic bytes win over the server's header, since portals commonly serve
/// attachments as `application/octet-stream`.
pub fn detect_mime(data: &[u8], declared: Option<&str>) -> String {
    if let Some(kind) = infer::get(data) {
        return kind.mime_type().to_string();
    }
    declared
        .map(|d| d.split(';').next().unwrap_or(d).trim().to_lowercase())
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| "application/octet-stream".to_string())
}

/// Filename from a `Content-Disposition` header value.
pub fn filename_from_disposition(header: &str) -> Option<String> {
    for part in header.split(';').map(str::trim) {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        let key = key.trim().to_lowercase();
        if key == "filename" || key == "filename*" {
            let value = value.trim().trim_matches('"');
            // RFC 5987: UTF-8''name.pdf
            let value = value.rsplit("''").next().unwrap_or(value);
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

/// Last path segment of a URL, if it looks like a filename.
pub fn filename_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.filter(|s| !s.is_empty()).last()?;
    if last.contains('.') {
        Some(last.to_string())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mime_to_extension() {
        assert_eq!(mime_to_extension("application/pdf"), "pdf");
        assert_eq!(mime_to_extension("application/pdf; charset=binary"), "pdf");
        assert_eq!(mime_to_extension("image/png"), "png");
        assert_eq!(mime_to_extension("application/x-unknown"), "bin");
    }

    #[test]
    fn test_detect_mime_prefers_magic() {
        let pdf = b"%PDF-1.7\n...";
        assert_eq!(
            detect_mime(pdf, Some("application/octet-stream")),
            "application/pdf"
        );
        assert_eq!(detect_mime(b"hola", Some("Text/Plain; charset=utf-8")), "text/plain");
        assert_eq!(detect_mime(b"hola", None), "application/octet-stream");
    }

    #[test]
    fn test_filename_from_disposition() {
        assert_eq!(
            filename_from_disposition("attachment; filename=\"radicado 123.pdf\"").as_deref(),
            Some("radicado 123.pdf")
        );
        assert_eq!(
            filename_from_disposition("attachment; filename*=UTF-8''respuesta.pdf").as_deref(),
            Some("respuesta.pdf")
        );
        assert_eq!(filename_from_disposition("inline"), None);
    }

    #[test]
    fn test_filename_from_url() {
        assert_eq!(
            filename_from_url("https://portal.test/adjuntos/carta.pdf?x=1").as_deref(),
            Some("carta.pdf")
        );
        assert_eq!(filename_from_url("https://portal.test/descargar"), None);
    }
}
