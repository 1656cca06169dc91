use crate::frame::fingerprint;

/// Shared-secret check for producers.
///
/// The configured map identifier is hashed once at construction; an `auth`
/// message is accepted when it carries exactly that digest.
#[derive(Clone)]
pub struct AuthKey {
    expected: String,
}

impl AuthKey {
    pub fn from_map_id(map_id: &str) -> Self {
        Self {
            expected: fingerprint(map_id.as_bytes()),
        }
    }

    pub fn verify(&self, presented: &str) -> bool {
        self.expected == presented
    }

    #[cfg(test)]
    fn digest(&self) -> &str {
        &self.expected
    }
}

// Keeps the digest out of logs.
impl std::fmt::Debug for AuthKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthKey").finish_non_exhaustive()
    }
}
