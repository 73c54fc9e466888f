//! Credential hashing for school, student, and teacher accounts.
//!
//! Stored form is `salt$hexdigest` where the digest is SHA-256 over
//! `salt` + the plaintext. Verification recomputes with the stored salt.

use sha2::{Digest, Sha256};
use uuid::Uuid;

pub fn hash_password(plain: &str) -> String {
    let salt = Uuid::new_v4().simple().to_string();
    format!("{}${}", salt, digest_hex(&salt, plain))
}

pub fn verify_password(plain: &str, stored: &str) -> bool {
    let Some((salt, digest)) = stored.split_once('$') else {
        return false;
    };
    digest_hex(salt, plain) == digest
}

fn digest_hex(salt: &str, plain: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(plain.as_bytes());
    format!("{:x}", hasher.finalize())
}
