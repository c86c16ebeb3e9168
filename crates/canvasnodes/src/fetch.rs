//! Shared input plumbing: `data:` URL parsing and remote downloads.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use canvascore::NodeError;

pub(crate) struct DataUrl<'a> {
    pub mime: &'a str,
    pub base64: &'a str,
}

/// Split a `data:<mime>;base64,<payload>` URL without decoding it.
pub(crate) fn parse_data_url(url: &str) -> Result<DataUrl<'_>, NodeError> {
    let rest = url.strip_prefix("data:").ok_or(NodeError::InvalidDataUrl)?;
    let (mime, payload) = rest.split_once(";base64,").ok_or(NodeError::InvalidDataUrl)?;
    if mime.is_empty() || payload.is_empty() {
        return Err(NodeError::InvalidDataUrl);
    }
    Ok(DataUrl {
        mime,
        base64: payload,
    })
}

pub(crate) fn decode_data_url(url: &str) -> Result<Vec<u8>, NodeError> {
    let parsed = parse_data_url(url)?;
    BASE64
        .decode(parsed.base64)
        .map_err(|_| NodeError::InvalidDataUrl)
}

/// Download remote bytes. Non-2xx responses are hard errors carrying the
/// HTTP status; the content type is returned when the server sent one.
pub(crate) async fn fetch_bytes(
    client: &reqwest::Client,
    url: &str,
) -> Result<(Vec<u8>, Option<String>), NodeError> {
    let response = client.get(url).send().await.map_err(|e| NodeError::Network {
        url: url.to_string(),
        message: e.to_string(),
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(NodeError::Fetch {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());
    let bytes = response.bytes().await.map_err(|e| NodeError::Network {
        url: url.to_string(),
        message: e.to_string(),
    })?;

    Ok((bytes.to_vec(), content_type))
}
