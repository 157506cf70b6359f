//! Where the render engine navigates, and how the render page proves itself to the
//! internal payload endpoint.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::domain::types::ResourceKind;

/// Header carrying the shared secret on internal print requests.
pub const INTERNAL_SECRET_HEADER: &str = "x-internal-secret";

#[derive(Clone)]
pub struct PrintTarget {
    base_url: String,
    secret: String,
}

impl std::fmt::Debug for PrintTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrintTarget")
            .field("base_url", &self.base_url)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl PrintTarget {
    pub fn new(base_url: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            secret: secret.into(),
        }
    }

    /// Render page URL; it names the document and nothing else.
    pub fn url_for(&self, kind: ResourceKind, id: i64) -> String {
        format!("{}/{}/{id}", self.base_url, kind.path_segment())
    }

    pub fn headers(&self) -> Vec<(String, String)> {
        vec![(INTERNAL_SECRET_HEADER.to_string(), self.secret.clone())]
    }

    /// Constant-time comparison of a presented secret against the configured one.
    pub fn verify_secret(&self, presented: &str) -> bool {
        if self.secret.is_empty() {
            return false;
        }
        let expected = Sha256::digest(self.secret.as_bytes());
        let actual = Sha256::digest(presented.as_bytes());
        expected[..].ct_eq(&actual[..]).unwrap_u8() == 1
    }
}
