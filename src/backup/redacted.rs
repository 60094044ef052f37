//! Secret handling with redacted display and serialization.
//!
//! `RedactedString` holds the elevation password typed at an askpass prompt. It never shows up
//! in logs, debug output or serialized results, and its memory is zeroed on drop.

use derive_more::From;
use getset::Getters;
use serde::{Serialize, Serializer};
use std::fmt::{Debug, Formatter};
use std::result;
use zeroize::Zeroize;

/// Placeholder text shown instead of the actual secret
pub static REDACTED_SECRET: &str = "###REDACTED_SECRET###";

#[derive(Clone, Zeroize, From, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct RedactedString {
    inner: String,
}

impl RedactedString {
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl From<&str> for RedactedString {
    fn from(value: &str) -> Self {
        Self {
            inner: value.to_owned(),
        }
    }
}

impl Debug for RedactedString {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", REDACTED_SECRET)
    }
}

impl Serialize for RedactedString {
    fn serialize<S: Serializer>(&self, serializer: S) -> result::Result<S::Ok, S::Error> {
        serializer.serialize_str(REDACTED_SECRET)
    }
}

impl Drop for RedactedString {
    fn drop(&mut self) {
        self.zeroize();
    }
}
