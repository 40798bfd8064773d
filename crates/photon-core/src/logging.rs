//! Logging helpers with automatic sensitive data redaction.
//!
//! Signatures, key material and pre-signed upload URLs must never reach a
//! log line verbatim. Wrap them in one of these types before handing them to
//! a `tracing` macro.

use std::fmt;

/// A wrapper that redacts sensitive data when displayed.
pub struct Redacted<T>(pub T);

impl<T: fmt::Display> fmt::Display for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: fmt::Debug> fmt::Debug for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

/// Redact a byte slice, showing only length.
pub struct RedactedBytes<'a>(pub &'a [u8]);

impl<'a> fmt::Display for RedactedBytes<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} bytes]", self.0.len())
    }
}

impl<'a> fmt::Debug for RedactedBytes<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Redact a URL down to scheme, host and path.
///
/// Pre-signed object-store URLs carry their credentials in the query string.
pub struct RedactedUrl<'a>(pub &'a str);

impl<'a> fmt::Display for RedactedUrl<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.split_once(['?', '#']) {
            Some((base, _)) => write!(f, "{}?[REDACTED]", base),
            None => write!(f, "{}", self.0),
        }
    }
}

impl<'a> fmt::Debug for RedactedUrl<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Redact a base64 or hex token, showing only first and last 4 characters.
pub struct RedactedToken<'a>(pub &'a str);

impl<'a> fmt::Display for RedactedToken<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.0;
        if s.len() > 12 && s.is_ascii() {
            write!(f, "{}...{}", &s[..4], &s[s.len() - 4..])
        } else {
            write!(f, "[REDACTED TOKEN]")
        }
    }
}

/// Patterns that should be redacted from logs.
const SENSITIVE_PATTERNS: &[&str] = &[
    "signature",
    "secret",
    "private",
    "priv",
    "token",
    "x-amz-security",
    "authorization",
    "credential",
];

/// Check if a string appears to contain sensitive data.
pub fn appears_sensitive(s: &str) -> bool {
    let lower = s.to_lowercase();
    SENSITIVE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Sanitize a string for logging, redacting sensitive patterns.
pub fn sanitize_for_log(s: &str) -> String {
    if appears_sensitive(s) {
        "[REDACTED]".to_string()
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redacted_display() {
        let secret = Redacted("ed25519 private key");
        assert_eq!(format!("{}", secret), "[REDACTED]");
        assert_eq!(format!("{:?}", secret), "[REDACTED]");
    }

    #[test]
    fn test_redacted_url_strips_query() {
        let url = "https://store.example.com/frames/x.jpg?X-Amz-Signature=abc&X-Amz-Credential=def";
        assert_eq!(
            RedactedUrl(url).to_string(),
            "https://store.example.com/frames/x.jpg?[REDACTED]"
        );
        assert_eq!(
            RedactedUrl("https://api.example.com/v1/upload").to_string(),
            "https://api.example.com/v1/upload"
        );
    }

    #[test]
    fn test_redacted_token() {
        let shown = RedactedToken("c2lnbmF0dXJlLWJ5dGVzLWhlcmU=").to_string();
        assert!(shown.starts_with("c2ln"));
        assert!(shown.contains("..."));
        assert_eq!(RedactedToken("short").to_string(), "[REDACTED TOKEN]");
    }

    #[test]
    fn test_redacted_bytes() {
        assert_eq!(RedactedBytes(&[1, 2, 3]).to_string(), "[3 bytes]");
    }

    #[test]
    fn test_sanitize_for_log() {
        assert_eq!(sanitize_for_log("upload ok"), "upload ok");
        assert_eq!(sanitize_for_log("x-amz-security-token: abc"), "[REDACTED]");
        assert_eq!(sanitize_for_log("bad signature"), "[REDACTED]");
        assert!(!appears_sensitive("frame uploaded"));
    }
}
