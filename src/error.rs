use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can stop a decode. None of these are transient: feeding
/// the same text again fails the same way.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// No packer invocation could be found in the source text.
    #[error("malformed p.a.c.k.e.r. input: {0}")]
    MalformedInput(&'static str),
    /// The reconstructed script holds no parsable `{...}` span.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("unsupported symbol base {0} (expected 2..=62)")]
    UnsupportedBase(usize),
    #[error("symbol count {count} exceeds the configured limit of {limit}")]
    ResourceLimitExceeded { count: usize, limit: usize },
    #[error("payload carries no image list")]
    MissingImages,
}
