//! crates/culinary_core/src/location.rs
//!
//! Detects one-time-link callbacks in the page location. The issuing service
//! may put its parameters in the query string or in the fragment, so both are
//! read.

use url::{form_urlencoded, Url};

/// The link-type value the auth service uses for emailed one-time links.
pub const MAGIC_LINK_TYPE: &str = "magiclink";

/// Credential-related parameters found in a location.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialMarkers {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
    pub token_hash: Option<String>,
    pub link_type: Option<String>,
}

impl CredentialMarkers {
    /// Parses an absolute location such as `https://app/login#access_token=...`.
    pub fn from_location(location: &str) -> Result<Self, url::ParseError> {
        let url = Url::parse(location)?;
        let mut markers = Self::default();
        for (key, value) in url.query_pairs() {
            markers.absorb(&key, &value);
        }
        if let Some(fragment) = url.fragment() {
            for (key, value) in form_urlencoded::parse(fragment.as_bytes()) {
                markers.absorb(&key, &value);
            }
        }
        Ok(markers)
    }

    fn absorb(&mut self, key: &str, value: &str) {
        if value.is_empty() {
            return;
        }
        let value = value.to_string();
        match key {
            "access_token" => self.access_token = Some(value),
            "refresh_token" => self.refresh_token = Some(value),
            "expires_in" => self.expires_in = value.parse().ok(),
            "token_hash" => self.token_hash = Some(value),
            "type" => self.link_type = Some(value),
            _ => {}
        }
    }

    /// True when this page load is the return leg of an emailed link.
    pub fn is_callback(&self) -> bool {
        self.access_token.is_some()
            || self.refresh_token.is_some()
            || self.link_type.as_deref() == Some(MAGIC_LINK_TYPE)
    }
}
