use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ron error: {0}")]
    Ron(#[from] ron::error::SpannedError),

    #[error("section `{section}` could not be decoded: {source}")]
    Section {
        section: &'static str,
        #[source]
        source: ron::Error,
    },

    #[error("invalid value for `{field}`: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}
