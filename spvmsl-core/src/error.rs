//! Error type shared by the loader and the MSL backend.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CompilerError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompilerError {
    /// The module uses a feature Metal has no representation for.
    #[error("Unsupported construct: {0}")]
    UnsupportedConstruct(String),

    /// A backend defect: pass bound exceeded or a record of the wrong kind.
    #[error("Internal invariant violation: {0}")]
    InternalInvariantViolation(String),

    /// The SPIR-V words could not be turned into an IR store.
    #[error("Invalid module: {0}")]
    InvalidModule(String),
}

#[macro_export]
macro_rules! err_unsupported {
    ($($arg:tt)*) => {
        $crate::error::CompilerError::UnsupportedConstruct(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! bail_unsupported {
    ($($arg:tt)*) => {
        return Err($crate::err_unsupported!($($arg)*))
    };
}

#[macro_export]
macro_rules! err_internal {
    ($($arg:tt)*) => {
        $crate::error::CompilerError::InternalInvariantViolation(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! bail_internal {
    ($($arg:tt)*) => {
        return Err($crate::err_internal!($($arg)*))
    };
}

#[macro_export]
macro_rules! err_module {
    ($($arg:tt)*) => {
        $crate::error::CompilerError::InvalidModule(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! bail_module {
    ($($arg:tt)*) => {
        return Err($crate::err_module!($($arg)*))
    };
}
