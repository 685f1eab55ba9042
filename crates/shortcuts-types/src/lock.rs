use serde::{Deserialize, Serialize};

/// Presence of an `AppLock` means the application is access-locked.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppLock {
    pub password_hash: String,
}

impl AppLock {
    pub fn new(password_hash: impl Into<String>) -> Self {
        Self {
            password_hash: password_hash.into(),
        }
    }

    /// BLAKE3 hex digest used for stored password hashes.
    pub fn hash_password(password: &str) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(b"app-lock-v1:");
        hasher.update(password.as_bytes());
        hasher.finalize().to_hex().to_string()
    }

    pub fn matches(&self, password: &str) -> bool {
        self.password_hash == Self::hash_password(password)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_roundtrip() {
        let lock = AppLock::new(AppLock::hash_password("hunter2"));
        assert!(lock.matches("hunter2"));
        assert!(!lock.matches("hunter3"));
        assert_eq!(lock.password_hash.len(), 64);
    }
}
