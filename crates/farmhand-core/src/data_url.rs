//! `data:` URL encoding for embedded images.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;

/// A decoded base64 `data:` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUrl {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Decode `data:<mime>[;param]*;base64,<payload>`.
///
/// Returns `None` for anything that is not a base64 data URL or whose
/// payload does not decode.
pub fn parse_data_url(s: &str) -> Option<DataUrl> {
    let rest = s.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;

    let mut params = header.split(';');
    let mime_type = params.next().unwrap_or_default().trim().to_string();
    if !params.any(|p| p.trim().eq_ignore_ascii_case("base64")) {
        return None;
    }

    let payload: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = BASE64.decode(payload).ok()?;

    Some(DataUrl { mime_type, bytes })
}

/// Encode bytes as `data:<mime>;base64,<payload>`.
pub fn to_data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type, BASE64.encode(bytes))
}
