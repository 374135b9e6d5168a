//! Page retrieval from the session server.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

/// A captured page snapshot as the session server hands it out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadedPage {
    pub id: Uuid,
    #[serde(rename = "DOMString")]
    pub dom_string: String,
}

#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("invalid page address {input:?}: {reason}")]
    Address { input: String, reason: &'static str },
    #[error("page request failed: {0}")]
    Request(#[from] reqwest::Error),
}

/// Normalizes operator input into a fetchable URL.
///
/// Scheme-less input gets an `https://` prefix. Anything that still fails
/// to parse, or parses to a non-http scheme, is rejected.
pub fn normalize_target_url(input: &str) -> Result<Url, RetrievalError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(RetrievalError::Address {
            input: input.to_owned(),
            reason: "empty address",
        });
    }
    let candidate = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_owned()
    } else {
        format!("https://{trimmed}")
    };
    let url = Url::parse(&candidate).map_err(|_| RetrievalError::Address {
        input: input.to_owned(),
        reason: "not a valid url",
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(RetrievalError::Address {
            input: input.to_owned(),
            reason: "unsupported scheme",
        });
    }
    Ok(url)
}

/// Asks the session server to load `target` and hand back the snapshot.
pub async fn fetch_page(
    client: &reqwest::Client,
    base: &str,
    target: &Url,
    viewport: Option<(u32, u32)>,
) -> Result<LoadedPage, RetrievalError> {
    let mut request = client
        .get(format!("{base}/getpage"))
        .query(&[("pageurl", target.as_str())]);
    if let Some((width, height)) = viewport {
        request = request.query(&[("width", width), ("height", height)]);
    }
    let response = request.send().await?.error_for_status()?;
    Ok(response.json::<LoadedPage>().await?)
}
