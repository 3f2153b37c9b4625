use crate::api::errors::ApiError;

const SUPPORTED_CONTENT_TYPES: &[&str] =
    &["image/png", "image/jpeg", "image/jpg", "image/webp", "image/tiff", "application/pdf"];

/// Resolves the effective content type for an upload. A declared type wins if
/// supported; otherwise the file extension decides. Parameters such as
/// `; charset=utf-8` are ignored.
pub(crate) fn resolve_content_type(
    file_name: &str,
    declared: Option<&str>,
) -> Result<String, ApiError> {
    if let Some(declared) = declared {
        let normalized = normalize(declared);
        if SUPPORTED_CONTENT_TYPES.contains(&normalized.as_str()) {
            return Ok(normalized);
        }
    }

    content_type_from_file_name(file_name).ok_or_else(|| {
        ApiError::BadRequest(format!(
            "Unsupported file type. Supported types: {}",
            SUPPORTED_CONTENT_TYPES.join(", ")
        ))
    })
}

fn normalize(content_type: &str) -> String {
    content_type.split(';').next().unwrap_or("").trim().to_ascii_lowercase()
}

fn content_type_from_file_name(file_name: &str) -> Option<String> {
    let extension = file_name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase())?;
    let content_type = match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "tiff" | "tif" => "image/tiff",
        "pdf" => "application/pdf",
        _ => return None,
    };
    Some(content_type.to_string())
}
