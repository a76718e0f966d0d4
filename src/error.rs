use thiserror::Error;

use crate::protocol::status;

/// Every failure the crate can produce.
///
/// Kinds that answer a single request map to a wire status code through
/// [`Error::wire_code`]; kinds that map to `None` are session-fatal and are
/// never sent to a client.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid request syntax")]
    InvalidSyntax,

    #[error("Name already exists")]
    AlreadyExists,

    #[error("Name not found")]
    NotFound,

    #[error("Permission denied")]
    PermissionDenied,

    #[error("Inode table full")]
    CapacityExceeded,

    #[error("Session descriptor table full")]
    MaxOpenFiles,

    #[error("File not open")]
    NotOpen,

    #[error("File is open")]
    IsOpen,

    #[error("Descriptor mode does not allow this operation")]
    InvalidMode,

    #[error("Content too large")]
    ContentTooLarge,

    #[error("Invalid inode number {0}")]
    InvalidInode(usize),

    #[error("Open count underflow on inode {0}")]
    OpenCountUnderflow(usize),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Operation failed")]
    Other,
}

impl Error {
    /// The status code a client sees for this error, or `None` for kinds
    /// that abort the session instead of answering the request.
    pub fn wire_code(&self) -> Option<i32> {
        let code = match self {
            Error::InvalidSyntax => status::INVALID_SYNTAX,
            Error::AlreadyExists => status::ALREADY_EXISTS,
            Error::NotFound => status::NOT_FOUND,
            Error::PermissionDenied => status::PERMISSION_DENIED,
            Error::MaxOpenFiles => status::MAX_OPEN_FILES,
            Error::NotOpen => status::NOT_OPEN,
            Error::IsOpen => status::IS_OPEN,
            Error::InvalidMode => status::INVALID_MODE,
            Error::ContentTooLarge => status::CONTENT_TOO_LARGE,
            // A full inode table reports as a generic failure.
            Error::CapacityExceeded => status::OTHER,
            Error::InvalidInode(_) | Error::Other => status::OTHER,
            Error::Io(_) | Error::OpenCountUnderflow(_) | Error::Config(_) => return None,
        };
        Some(code)
    }

    /// Maps a received status code back to an error kind. Unknown codes
    /// collapse into [`Error::Other`].
    pub fn from_wire(code: i32) -> Error {
        match code {
            status::INVALID_SYNTAX => Error::InvalidSyntax,
            status::ALREADY_EXISTS => Error::AlreadyExists,
            status::NOT_FOUND => Error::NotFound,
            status::PERMISSION_DENIED => Error::PermissionDenied,
            status::MAX_OPEN_FILES => Error::MaxOpenFiles,
            status::NOT_OPEN => Error::NotOpen,
            status::IS_OPEN => Error::IsOpen,
            status::INVALID_MODE => Error::InvalidMode,
            status::CONTENT_TOO_LARGE => Error::ContentTooLarge,
            _ => Error::Other,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
