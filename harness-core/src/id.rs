//! Typed ID wrappers for runs, conversations, scenarios, providers, and regions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Typed ID wrappers prevent mixing up a scenario ID with a provider ID at
/// the call site. These are plain strings underneath — no format is
/// enforced beyond what each ID's own constructor checks.
macro_rules! typed_id {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Wrap anything that converts to `String`.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the inner string.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }
    };
}

typed_id!(RunId, "Deterministic identifier for one scheduler dispatch.");
typed_id!(
    ConversationId,
    "Identifier for a conversation in the state store. Equal to the `RunId` for Arena executions."
);
typed_id!(ScenarioId, "Identifier for a loaded scenario.");
typed_id!(ProviderId, "Identifier for a registered provider.");
typed_id!(Region, "Deployment/locale region a run is executed under.");
typed_id!(EvalId, "Identifier for an eval/assertion pack.");
typed_id!(PersonaId, "Identifier for a self-play persona.");

impl Default for Region {
    fn default() -> Self {
        Self("default".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_ids_display_their_inner_string() {
        assert_eq!(RunId::new("abc123").to_string(), "abc123");
        assert_eq!(Region::default().to_string(), "default");
    }

    #[test]
    fn typed_ids_roundtrip_json() {
        let id = ScenarioId::new("s1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"s1\"");
        let back: ScenarioId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
