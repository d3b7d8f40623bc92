use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

static FALLBACK_SEQ: AtomicU64 = AtomicU64::new(0);

/// Opaque id joining the start and stop events of one message's timers.
///
/// Cloning is cheap; the text is shared.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationId(Arc<str>);

impl CorrelationId {
    /// A fresh id: 128 random bits, URL-safe base64 without padding.
    ///
    /// Falls back to clock nanoseconds plus a process counter if the OS
    /// random source is unavailable, which is still unique per process.
    #[must_use]
    pub fn generate() -> Self {
        let mut buf = [0u8; 16];
        if getrandom::getrandom(&mut buf).is_ok() {
            Self(URL_SAFE_NO_PAD.encode(buf).into())
        } else {
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0);
            let seq = FALLBACK_SEQ.fetch_add(1, Ordering::Relaxed);
            Self(format!("{nanos:x}-{seq:x}").into())
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CorrelationId {
    fn from(s: &str) -> Self {
        Self(s.into())
    }
}

impl From<String> for CorrelationId {
    fn from(s: String) -> Self {
        Self(s.into())
    }
}

impl AsRef<str> for CorrelationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CorrelationId({})", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generate_shape() {
        let id = CorrelationId::generate();
        assert_eq!(id.as_str().len(), 22);
        assert!(
            id.as_str()
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        );
    }

    #[test]
    fn test_generate_unique() {
        let ids: HashSet<_> = (0..10_000).map(|_| CorrelationId::generate()).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn test_from_str_round_trip() {
        let id = CorrelationId::from("abc");
        assert_eq!(id.to_string(), "abc");
        assert_eq!(id, CorrelationId::from(String::from("abc")));
    }
}
