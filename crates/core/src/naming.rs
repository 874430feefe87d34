//! Unique, owner-attributable names for ephemeral environments.

use uuid::Uuid;

pub const INSTANCE_PREFIX: &str = "pr-check";

/// Reduce an identity nickname to characters valid in a resource group and host name.
pub fn sanitize_owner(nickname: &str) -> String {
    let mut out = String::with_capacity(nickname.len());
    for c in nickname.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

/// `pr-check-<owner>-<token>`, or `pr-check-<token>` without an owner.
pub fn instance_name(owner: &str, token: Uuid) -> String {
    let owner = sanitize_owner(owner);
    if owner.is_empty() {
        format!("{}-{}", INSTANCE_PREFIX, token.simple())
    } else {
        format!("{}-{}-{}", INSTANCE_PREFIX, owner, token.simple())
    }
}

/// A fresh instance name with a random suffix.
pub fn generate_instance_name(owner: &str) -> String { instance_name(owner, Uuid::new_v4()) }
