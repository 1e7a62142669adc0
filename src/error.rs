//! Standard error type for softcl.

use crate::types::Status;

pub type Result<T> = std::result::Result<T, Error>;

/// An API error: the status code that would cross the host-API boundary
/// plus the name of the operation that produced it.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{fn_name}: {status}")]
pub struct ApiError {
    status: Status,
    fn_name: &'static str,
}

impl ApiError {
    pub fn new(status: Status, fn_name: &'static str) -> ApiError {
        ApiError { status, fn_name }
    }

    pub fn status(&self) -> Status {
        self.status
    }
}

/// An enum containing the failure modes a host thread can observe.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Api(#[from] ApiError),
    #[error("event failed with status code {0}")]
    EventFailed(i32),
    #[error("program build failed:\n{0}")]
    ProgramBuild(String),
    #[error("{0}")]
    String(String),
}

impl Error {
    /// Returns the API status code for `Api` variants, and maps
    /// `EventFailed` codes back into the status space when they fit.
    pub fn api_status(&self) -> Option<Status> {
        use enum_primitive::FromPrimitive;

        match *self {
            Error::Api(ref err) => Some(err.status()),
            Error::EventFailed(code) => Status::from_i32(code),
            _ => None,
        }
    }
}

impl From<Status> for Error {
    fn from(status: Status) -> Error {
        Error::Api(ApiError::new(status, "<unattributed>"))
    }
}

impl From<String> for Error {
    fn from(desc: String) -> Error {
        Error::String(desc)
    }
}

impl<'a> From<&'a str> for Error {
    fn from(desc: &'a str) -> Error {
        Error::String(String::from(desc))
    }
}

/// Shorthand used by validation paths throughout the crate.
pub(crate) fn api_error<T>(status: Status, fn_name: &'static str) -> Result<T> {
    Err(Error::Api(ApiError::new(status, fn_name)))
}
