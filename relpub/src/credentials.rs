use log::debug;
use reqwest::RequestBuilder;
use std::fmt;

/// A username and API token pair used to authenticate every request with HTTP Basic auth.
///
/// The token is only held in memory. It is never written anywhere by this crate, and the `Debug`
/// output of this type does not include it.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    token: String,
}

impl Credentials {
    /// Returns a new `Credentials` for the given username and token.
    #[must_use]
    pub fn new(username: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            token: token.into(),
        }
    }

    /// The username these credentials authenticate as.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    // reqwest marks the header it builds for basic auth as sensitive, so it is never logged.
    pub(crate) fn add_auth_header(&self, req_builder: RequestBuilder) -> RequestBuilder {
        debug!("Adding basic auth for user `{}` to request.", self.username);
        req_builder.basic_auth(&self.username, Some(&self.token))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("token", &"<redacted>")
            .finish()
    }
}
