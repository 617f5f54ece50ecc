//! Error types for the ISO 15765-2 transfer engine.

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq, Copy, Clone)]
pub enum Error {
    #[error("Invalid Message")]
    InvalidMessage,
    #[error("Data Too Large")]
    DataTooLarge,
    #[error("Transfer In Progress")]
    TransferInProgress,
    #[error("Filter Mismatch")]
    FilterMismatch,
    #[error("Unknown Frame Type")]
    UnknownFrameType,
    #[error("Unexpected Frame Type")]
    UnexpectedFrameType,
    #[error("Out Of Order")]
    OutOfOrder,
    #[error("Malformed Frame")]
    MalformedFrame,
    #[error("Write Failed")]
    WriteFailed,
    #[error("Timeout")]
    Timeout,
}
