use std::fmt;

/// One credential for a rate-limited external service.
///
/// The secret never appears in `Debug` output. Code outside the rotator only
/// sees a credential through a live lease.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    label: String,
    secret: String,
}

impl Credential {
    #[must_use]
    pub fn new(label: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            secret: secret.into(),
        }
    }

    /// Human-readable name, safe to log.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("label", &self.label)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}
