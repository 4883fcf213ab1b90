//! Open string types for message routing metadata.
//!
//! Channels, recipients and content types are free-form strings on the wire,
//! but a handful of values have fixed meaning. Each type wraps a
//! `Cow<'static, str>` so the well-known values are constants.

use std::borrow::{Borrow, Cow};
use std::fmt;
use std::ops::Deref;

use serde::{Deserialize, Serialize};

macro_rules! open_string_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Cow<'static, str>);

        impl $name {
            pub const fn from_static(value: &'static str) -> Self {
                Self(Cow::Borrowed(value))
            }

            pub fn new(value: impl Into<String>) -> Self {
                Self(Cow::Owned(value.into()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Deref for $name {
            type Target = str;

            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }

        impl PartialEq<str> for $name {
            fn eq(&self, other: &str) -> bool {
                self.as_str() == other
            }
        }

        impl PartialEq<&str> for $name {
            fn eq(&self, other: &&str) -> bool {
                self.as_str() == *other
            }
        }
    };
}

open_string_type!(
    /// Output channel of an assistant message, e.g. `analysis` or `final`.
    Channel
);

open_string_type!(
    /// Addressee of a message: a tool name, `assistant`, or `all`.
    Recipient
);

open_string_type!(
    /// Format of a message body, optionally prefixed with the constrain marker.
    ContentType
);

impl Channel {
    /// Chain-of-thought reasoning.
    pub const ANALYSIS: Channel = Channel::from_static("analysis");
    /// Tool calls and user-visible preambles.
    pub const COMMENTARY: Channel = Channel::from_static("commentary");
    /// The answer shown to the user.
    pub const FINAL: Channel = Channel::from_static("final");
}

impl Recipient {
    /// Broadcast; rendered as no recipient at all.
    pub const ALL: Recipient = Recipient::from_static("all");
    pub const ASSISTANT: Recipient = Recipient::from_static("assistant");
}

impl ContentType {
    /// Plain text, the implicit content type.
    pub const TEXT: ContentType = ContentType::from_static("text");
    pub const CONSTRAINED_JSON: ContentType = ContentType::from_static("<|constrain|>json");
}
