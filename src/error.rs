//! Contains the main error type for the library.
use std::fmt;

/// The main error type for the library. Soft per-message protocol failures
/// stay inside the ISO 15765 engine; only hard failures surface here.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Error {
    NotFound,
    InvalidMessage,
    NullParameter,
    Unsupported,
    Timeout,
    IsoTPError(crate::isotp::error::Error),
}

impl From<crate::isotp::error::Error> for Error {
    fn from(err: crate::isotp::error::Error) -> Error {
        Error::IsoTPError(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::NotFound => write!(fmt, "Not Found"),
            Error::InvalidMessage => write!(fmt, "Invalid Message"),
            Error::NullParameter => write!(fmt, "Null Parameter"),
            Error::Unsupported => write!(fmt, "Unsupported"),
            Error::Timeout => write!(fmt, "Timeout"),
            Error::IsoTPError(err) => err.fmt(fmt),
        }
    }
}

impl std::error::Error for Error {}
