/// The error type used by the rewriting pipeline.
///
/// Every variant is fatal for the current run; none of them is retried.
/// Inputs that are not BSM trails at all are handled before the pipeline
/// starts and never show up here.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The framer hit a token id it has no length rule for. Carries the
    /// byte offset of the token and the ids seen just before it, so a
    /// corrupted trail can be located in the input.
    #[error("unknown token id {id:#04x} at offset {offset} (recent ids: {trace})")]
    UnknownTokenId { id: u8, offset: u64, trace: String },

    /// End of input inside a token's extent.
    #[error("token at offset {offset} is cut short by end of input")]
    TruncatedToken { offset: u64 },

    /// Framing a single token would require bytes beyond the sliding read
    /// window.
    #[error("token at offset {offset} extends past the {limit} byte read window")]
    WindowExceeded { offset: u64, limit: usize },

    /// A correctly framed token that does not fit the per-token scratch
    /// buffer.
    #[error("token at offset {offset} needs {size} bytes, more than the {limit} byte token buffer")]
    TokenTooLarge { offset: u64, size: usize, limit: usize },

    /// An arbitrary-data token whose unit code is not one of the four
    /// audit unit sizes, which makes its length incomputable.
    #[error("invalid data unit {unit:#04x} in token at offset {offset}")]
    InvalidDataUnit { unit: u8, offset: u64 },

    /// Token variants that are framed but whose rewrite is not supported.
    #[error("{0} tokens are not supported")]
    UnsupportedToken(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
