use thiserror::Error;

pub type Result<T> = std::result::Result<T, ReconcilerError>;

#[derive(Error, Debug)]
pub enum ReconcilerError {
    #[error("Invalid selector `{selector}`: {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("Reconciler loop is not running: {0}")]
    ChannelClosed(String),

    #[error("{0}")]
    Other(String),
}
