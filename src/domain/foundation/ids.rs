//! Strongly-typed identifier value objects.
//!
//! All identifiers are opaque strings on the wire: peers written in other
//! languages generate their own ids, so parsing never validates the format.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Declares a string-backed identifier with a random constructor.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4().simple().to_string())
            }

            /// Returns the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Session id of an engine connection, and id of an application socket.
    ///
    /// Each socket also owns a room named after its id, which is how single
    /// sockets are targeted across the cluster.
    Sid
);

string_id!(
    /// Secret id handed to a client so it can recover its session after a
    /// disconnection. Never broadcast.
    PrivateId
);

string_id!(
    /// Identity of one adapter instance ("this node") in a cluster.
    ServerUid
);

string_id!(
    /// Correlates a cluster request with the responses it triggers.
    RequestId
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_ids_are_unique() {
        assert_ne!(Sid::new(), Sid::new());
        assert_ne!(RequestId::new(), RequestId::new());
    }

    #[test]
    fn id_serializes_as_plain_string() {
        let sid = Sid::from("abc");
        assert_eq!(serde_json::to_string(&sid).unwrap(), "\"abc\"");

        let back: Sid = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(back, sid);
    }

    #[test]
    fn display_matches_inner_value() {
        let uid = ServerUid::from("node-1");
        assert_eq!(format!("{}", uid), "node-1");
        assert_eq!(uid.as_str(), "node-1");
    }

    #[test]
    fn generated_ids_have_no_dashes() {
        let pid = PrivateId::new();
        assert_eq!(pid.as_str().len(), 32);
        assert!(!pid.as_str().contains('-'));
    }
}
