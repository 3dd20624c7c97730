use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! define_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generates a new random identifier.
            #[must_use]
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an identifier from an existing UUID.
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the inner UUID value.
            #[must_use]
            pub const fn as_uuid(&self) -> Uuid {
                self.0
            }

            /// Parses the canonical hyphenated lowercase form only.
            ///
            /// Path segments and claim values must match
            /// `xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx`; braced, URN and simple
            /// forms accepted by [`Uuid::parse_str`] are refused.
            #[must_use]
            pub fn parse_canonical(value: &str) -> Option<Self> {
                is_canonical_uuid(value)
                    .then(|| Uuid::parse_str(value).ok())
                    .flatten()
                    .map(Self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$name> for Uuid {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

define_id!(SubjectId, "Identifier of a credential subject (user or provider).");
define_id!(
    ResourceId,
    "Identifier of a catalogued resource (collection, tile set or coverage)."
);
define_id!(ProcessId, "Identifier of an executable process.");

fn is_canonical_uuid(value: &str) -> bool {
    let bytes = value.as_bytes();
    bytes.len() == 36
        && bytes.iter().enumerate().all(|(idx, b)| match idx {
            8 | 13 | 18 | 23 => *b == b'-',
            _ => b.is_ascii_digit() || (b'a'..=b'f').contains(b),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_form_is_accepted() {
        let id = ResourceId::parse_canonical("0f7e3a52-5c4d-4a8e-9b1f-2d3c4b5a6978");
        assert!(id.is_some());
    }

    #[test]
    fn non_canonical_forms_are_refused() {
        assert!(ResourceId::parse_canonical("0F7E3A52-5C4D-4A8E-9B1F-2D3C4B5A6978").is_none());
        assert!(ResourceId::parse_canonical("0f7e3a525c4d4a8e9b1f2d3c4b5a6978").is_none());
        assert!(ResourceId::parse_canonical("not-a-uuid").is_none());
        assert!(ResourceId::parse_canonical("").is_none());
    }

    #[test]
    fn display_round_trips_through_canonical_parse() {
        let id = SubjectId::new();
        assert_eq!(SubjectId::parse_canonical(&id.to_string()), Some(id));
    }
}
