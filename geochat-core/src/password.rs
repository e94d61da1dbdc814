//! Credential hashing. Bcrypt is CPU-bound, so hashing runs on the blocking
//! pool instead of a runtime worker thread.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PasswordError {
    #[error("bcrypt error: {0}")]
    Bcrypt(#[from] bcrypt::BcryptError),

    #[error("hashing task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub async fn hash(password: &str) -> Result<String, PasswordError> {
    let password = password.to_string();
    let hashed =
        tokio::task::spawn_blocking(move || bcrypt::hash(&password, bcrypt::DEFAULT_COST))
            .await??;
    Ok(hashed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_produces_verifiable_bcrypt() {
        let hashed = hash("hunter2").await.expect("hashing failed");
        assert_ne!(hashed, "hunter2");
        assert!(hashed.starts_with("$2"));
        assert!(bcrypt::verify("hunter2", &hashed).unwrap());
        assert!(!bcrypt::verify("wrong", &hashed).unwrap());
    }
}
