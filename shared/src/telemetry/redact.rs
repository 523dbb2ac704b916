//! Email redaction for logs and span attributes.
//!
//! Raw addresses never leave the service through telemetry. Callers pick one
//! of the derived forms below instead.

const EMPTY: &str = "[empty]";
const INVALID: &str = "[invalid]";

/// Masks an email down to its first character and domain.
///
/// `"john@x.com"` becomes `"j***@x.com"`; a one-character (or empty) local
/// part is fully masked as `"*@x.com"`.
pub fn redact_email(email: &str) -> String {
    if email.is_empty() {
        return EMPTY.to_string();
    }

    match email.split_once('@') {
        None => INVALID.to_string(),
        Some((local, domain)) => {
            let mut chars = local.chars();
            match (chars.next(), chars.next()) {
                (Some(first), Some(_)) => format!("{}***@{}", first, domain),
                _ => format!("*@{}", domain),
            }
        }
    }
}

/// Returns the domain part of an email (everything after the first `@`).
pub fn email_domain(email: &str) -> String {
    if email.is_empty() {
        return EMPTY.to_string();
    }

    match email.split_once('@') {
        Some((_, domain)) => domain.to_string(),
        None => INVALID.to_string(),
    }
}
