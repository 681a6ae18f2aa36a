use thiserror::Error;

pub type Result<T> = std::result::Result<T, TransportError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The request never produced a usable response on any available path.
    #[error("Transport blocked: {0}")]
    Blocked(String),

    /// The service answered with an `error` member.
    #[error("Remote application error: {0}")]
    Application(String),

    /// The body could not be parsed or lacked the expected shape.
    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl TransportError {
    #[must_use]
    pub fn reason(&self) -> &str {
        match self {
            Self::Blocked(reason) | Self::Application(reason) | Self::Malformed(reason) => {
                reason
            }
        }
    }

    /// Keeps the variant and prefixes the primary failure so both paths show up in logs.
    #[must_use]
    pub(crate) fn after_primary(self, primary: &Self) -> Self {
        let combine = |reason: String| format!("direct: {}; relay: {reason}", primary.reason());
        match self {
            Self::Blocked(reason) => Self::Blocked(combine(reason)),
            Self::Application(reason) => Self::Application(reason),
            Self::Malformed(reason) => Self::Malformed(combine(reason)),
        }
    }
}
