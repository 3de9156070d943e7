//! Crate-wide error types.

use core::fmt;

use crate::att::AttErrorCode;

/// Errors produced by this crate's protocol logic, independent of the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The server replied with a well-formed `ATT_ERROR_RESPONSE`.
    Att(AttErrorCode),
    /// A PDU was well-formed at the byte level but violated a protocol invariant:
    /// a mismatched request opcode, a non-monotonic handle, a reliable-write echo
    /// mismatch, or similar.
    InvalidResponse,
    /// Bytes received from the peer could not be decoded as any known PDU.
    InvalidPdu,
    /// A second long write was attempted while one was already in progress.
    InLongWrite,
    /// Notifications or indications were requested for a characteristic with no CCCD.
    ClientCharacteristicConfigurationNotAllowed,
    /// The requested attribute handle or UUID was not found.
    NotFound,
    /// A buffer was too small, or a handle list too short, for the operation.
    InsufficientSpace,
    /// A payload was too large to send without silent truncation.
    PayloadTooLarge,
    /// The operation is not supported (e.g. signed writes without CSRK signing).
    NotSupported,
    /// The value returned by the peer did not fit the expected shape.
    InvalidValue,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Att(code) => write!(f, "attribute error: {:?}", code),
            Error::InvalidResponse => write!(f, "protocol invariant violated by peer response"),
            Error::InvalidPdu => write!(f, "malformed ATT PDU"),
            Error::InLongWrite => write!(f, "a long write is already in progress"),
            Error::ClientCharacteristicConfigurationNotAllowed => {
                write!(f, "characteristic has no Client Characteristic Configuration Descriptor")
            }
            Error::NotFound => write!(f, "attribute not found"),
            Error::InsufficientSpace => write!(f, "insufficient space"),
            Error::PayloadTooLarge => write!(f, "payload exceeds what the current MTU can carry without truncation"),
            Error::NotSupported => write!(f, "operation not supported"),
            Error::InvalidValue => write!(f, "unexpected value shape"),
        }
    }
}

impl From<AttErrorCode> for Error {
    fn from(code: AttErrorCode) -> Self {
        Error::Att(code)
    }
}

/// Wraps a protocol [`Error`] together with a transport-specific error type `E`,
/// mirroring how the underlying socket's own error is threaded through.
#[derive(Debug)]
pub enum BleHostError<E> {
    /// A transport-level I/O failure (socket read/write failed, or the link dropped).
    Transport(E),
    /// A protocol-level error, see [`Error`].
    Protocol(Error),
}

impl<E> From<Error> for BleHostError<E> {
    fn from(err: Error) -> Self {
        BleHostError::Protocol(err)
    }
}

impl<E> From<AttErrorCode> for BleHostError<E> {
    fn from(code: AttErrorCode) -> Self {
        BleHostError::Protocol(Error::Att(code))
    }
}

impl<E: fmt::Debug> fmt::Display for BleHostError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BleHostError::Transport(e) => write!(f, "transport error: {:?}", e),
            BleHostError::Protocol(e) => write!(f, "{}", e),
        }
    }
}
