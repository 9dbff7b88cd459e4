use hyper::StatusCode;
use thiserror::Error;

/// A driver report rejected at the boundary. The store is left untouched.
#[derive(Error, Debug, PartialEq)]
pub enum ReportError {
    #[error("driver id is required")]
    MissingDriverId,

    #[error("latitude and longitude must be supplied together")]
    IncompleteCoordinates,

    #[error("latitude {0} is out of range")]
    InvalidLatitude(f64),

    #[error("longitude {0} is out of range")]
    InvalidLongitude(f64),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

impl ReportError {
    pub fn status(&self) -> StatusCode {
        StatusCode::BAD_REQUEST
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum AuthError {
    #[error("viewer token is required")]
    MissingToken,

    #[error("viewer token not recognised")]
    UnknownToken,
}

#[derive(Error, Debug)]
pub enum SubscribeError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("asserted viewer {asserted} does not match authenticated viewer {authenticated}")]
    ViewerMismatch {
        asserted: String,
        authenticated: String,
    },

    #[error("connection {0} is already subscribed")]
    AlreadySubscribed(String),

    #[error("could not queue bootstrap snapshot")]
    BootstrapFailed,

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
}
