use thiserror::Error;

pub mod context;

mod tracing;
pub use self::tracing::Fmt;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error {0}")]
    Configuration(String),

    #[error("CLI execution error: {0}")]
    Execution(String),

    #[error("CLI validation error: {0}")]
    Validation(String),
}

impl From<gasprobe_diagnostics::RegistryError> for Error {
    fn from(value: gasprobe_diagnostics::RegistryError) -> Self {
        Self::Configuration(value.to_string())
    }
}

impl From<gasprobe_ethereum::Error> for Error {
    fn from(value: gasprobe_ethereum::Error) -> Self {
        Self::Execution(value.to_string())
    }
}
