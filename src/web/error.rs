//! Mapping of errors to HTTP responses.
//!
//! [`ApiError`] pairs an HTTP status with a message and serializes to the
//! JSON error body. [`ResultExt`] attaches statuses to `anyhow` chains;
//! [`client_bail!`] and [`status_bail!`] are the early-return forms.

use serde::Serialize;
use std::fmt::{Debug, Display, Formatter};
use warp::http::StatusCode;
use warp::reject::Reject;

#[derive(Clone, Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    /// Determines the response status; not part of the JSON body.
    #[serde(skip)]
    pub status: StatusCode,
    pub message: String,
}

impl Display for ApiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Reject for ApiError {}

impl ApiError {
    pub fn new(status: StatusCode, message: impl ToString) -> Self {
        ApiError {
            status,
            message: message.to_string(),
        }
    }
}

pub trait ResultExt<T> {
    /// Wraps the error with an [`ApiError`] carrying the given status code.
    fn with_status(self, status: StatusCode) -> Result<T, anyhow::Error>;

    /// Shorthand for `with_status(StatusCode::BAD_REQUEST)`.
    fn mark_client_error(self) -> Result<T, anyhow::Error>;
}

impl<T> ResultExt<T> for Result<T, anyhow::Error> {
    fn with_status(self, status: StatusCode) -> Result<T, anyhow::Error> {
        match self {
            Ok(t) => Ok(t),
            Err(err) => {
                let message = format!("{:#}", err);
                Err(err.context(ApiError { status, message }))
            }
        }
    }

    fn mark_client_error(self) -> Result<T, anyhow::Error> {
        self.with_status(StatusCode::BAD_REQUEST)
    }
}

/// Early return with a 400 Bad Request error.
#[macro_export]
macro_rules! client_bail {
    ($err:expr $(,)?) => {
        return $crate::web::error::ResultExt::mark_client_error(Err(::anyhow::anyhow!($err)))
    };
    ($fmt:expr, $($arg:tt)*) => {
        return $crate::web::error::ResultExt::mark_client_error(Err(::anyhow::anyhow!($fmt, $($arg)*)))
    };
}

/// Early return with a custom HTTP status code.
#[macro_export]
macro_rules! status_bail {
    ($status:expr, $msg:literal $(,)?) => {
        return $crate::web::error::ResultExt::with_status(Err(::anyhow::anyhow!($msg)), $status)
    };
    ($status:expr, $fmt:literal, $($arg:tt)*) => {
        return $crate::web::error::ResultExt::with_status(Err(::anyhow::anyhow!($fmt, $($arg)*)), $status)
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn api_error_serializes_message_only() {
        let error = ApiError::new(StatusCode::NOT_FOUND, "no such thing");
        let json = serde_json::to_value(&error).unwrap();

        assert_eq!(json, serde_json::json!({"message": "no such thing"}));
    }

    #[test]
    fn with_status_attaches_api_error_to_the_chain() {
        let result: Result<(), anyhow::Error> =
            Err(anyhow!("boom")).with_status(StatusCode::CONFLICT);

        let err = result.unwrap_err();
        let api_error = err.downcast_ref::<ApiError>().unwrap();
        assert_eq!(api_error.status, StatusCode::CONFLICT);
        assert_eq!(api_error.message, "boom");
    }

    #[test]
    fn mark_client_error_uses_bad_request() {
        let result: Result<(), anyhow::Error> = Err(anyhow!("bad input")).mark_client_error();

        let err = result.unwrap_err();
        let api_error = err.downcast_ref::<ApiError>().unwrap();
        assert_eq!(api_error.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn with_status_passes_ok_through() {
        let result: Result<u32, anyhow::Error> = Ok(7).with_status(StatusCode::CONFLICT);
        assert_eq!(result.unwrap(), 7);
    }

    #[test]
    fn client_bail_returns_early() {
        fn fails(flag: bool) -> anyhow::Result<u32> {
            if flag {
                client_bail!("rejected: {}", "reason");
            }
            Ok(1)
        }

        assert_eq!(fails(false).unwrap(), 1);
        let err = fails(true).unwrap_err();
        let api_error = err.downcast_ref::<ApiError>().unwrap();
        assert_eq!(api_error.status, StatusCode::BAD_REQUEST);
        assert_eq!(api_error.message, "rejected: reason");
    }

    #[test]
    fn status_bail_uses_the_given_status() {
        fn fails() -> anyhow::Result<()> {
            status_bail!(StatusCode::UNAUTHORIZED, "not allowed");
        }

        let err = fails().unwrap_err();
        let api_error = err.downcast_ref::<ApiError>().unwrap();
        assert_eq!(api_error.status, StatusCode::UNAUTHORIZED);
    }
}
