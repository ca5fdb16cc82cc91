use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};

/// Characters `encodeURI` leaves alone besides ASCII alphanumerics.
const ENCODE_URI: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b';')
    .remove(b',')
    .remove(b'/')
    .remove(b'?')
    .remove(b':')
    .remove(b'@')
    .remove(b'&')
    .remove(b'=')
    .remove(b'+')
    .remove(b'$')
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')')
    .remove(b'#');

/// The image list carried by a decoded payload.
///
/// Two shapes are seen in the wild: a flat `images` array of paths or URLs,
/// and the reader's native `files` array whose entries are relative to
/// `path`. Every other field is ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ImageData {
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default)]
    pub path: String,
}

impl ImageData {
    /// Reads the image list out of a decoded payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedPayload`] if the payload is not an object or
    /// one of the image fields has the wrong type.
    pub fn from_payload(payload: &Value) -> Result<Self> {
        Self::deserialize(payload).map_err(|err| Error::MalformedPayload(err.to_string()))
    }

    /// Builds one absolute page URL per image, in payload order.
    ///
    /// Relative entries are joined onto `host`; `files` entries are joined
    /// onto `host` and `path`. Absolute `images` entries are kept as they
    /// are. Every URL goes through [`normalize_uri`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingImages`] if both lists are empty.
    pub fn page_urls(&self, host: &str) -> Result<Vec<String>> {
        let urls: Vec<String> = if !self.images.is_empty() {
            self.images
                .iter()
                .map(|image| {
                    if image.starts_with("http://") || image.starts_with("https://") {
                        normalize_uri(image)
                    } else {
                        normalize_uri(&format!("{}{}", host, image))
                    }
                })
                .collect()
        } else if !self.files.is_empty() {
            self.files
                .iter()
                .map(|file| normalize_uri(&format!("{}{}{}", host, self.path, file)))
                .collect()
        } else {
            return Err(Error::MissingImages);
        };

        debug!("built {} page urls", urls.len());
        Ok(urls)
    }
}

/// Percent-decodes `uri`, then re-encodes it the way `encodeURI` does.
///
/// Already-escaped and raw input normalise to the same string, so paths
/// copied out of a payload can be used directly as request URLs. Invalid
/// UTF-8 produced by decoding is replaced rather than rejected.
///
/// # Examples
///
/// ```rust
/// use packed_imgdata::pages::normalize_uri;
///
/// assert_eq!(normalize_uri("/a b/%E6%BC%AB.jpg"), "/a%20b/%E6%BC%AB.jpg");
/// assert_eq!(normalize_uri("/a%20b/漫.jpg"), "/a%20b/%E6%BC%AB.jpg");
/// ```
pub fn normalize_uri(uri: &str) -> String {
    let decoded = percent_decode_str(uri).decode_utf8_lossy();
    utf8_percent_encode(&decoded, ENCODE_URI).to_string()
}
