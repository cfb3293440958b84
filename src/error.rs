use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("unsupported SOCKS version: {0}")]
    UnsupportedVersion(u8),

    #[error("unsupported auth version: {0}")]
    UnsupportedAuthVersion(u8),

    #[error("user authentication failed")]
    AuthFailed,

    #[error("no supported authentication mechanism")]
    NoSupportedAuth,

    #[error("unrecognized address type: {0}")]
    UnrecognizedAddrType(u8),

    #[error("unsupported command: {0}")]
    UnsupportedCommand(u8),

    #[error("invalid domain name")]
    InvalidDomain,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// True when the error only means the peer went away. Sessions end
    /// this way routinely, so these are not logged as abnormal.
    pub fn is_closed(&self) -> bool {
        match self {
            Error::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
