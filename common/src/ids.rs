//! Typed string identifiers used throughout the registry and the CSI
//! façade. Every id is a thin newtype over `String` so that a `NodeId`
//! can never be passed where a `PoolId` is expected.

use std::fmt::{Debug, Display, Formatter};

use serde::{Deserialize, Serialize};

macro_rules! string_id {
    ($Id:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Serialize, Deserialize, Clone, Default, Eq, PartialEq, Hash, PartialOrd, Ord)]
        pub struct $Id(String);

        impl $Id {
            /// Borrow the inner value as a plain string slice.
            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl Debug for $Id {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                Debug::fmt(&self.0, f)
            }
        }

        impl Display for $Id {
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                Display::fmt(&self.0, f)
            }
        }

        impl From<&str> for $Id {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $Id {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<$Id> for String {
            fn from(value: $Id) -> Self {
                value.0
            }
        }
    };
}

string_id!(NodeId, "A node's user-assigned, unique name.");
string_id!(PoolId, "A pool's name, unique within the node that owns it.");
string_id!(ReplicaId, "A replica's uuid; equal to its owning Volume's uuid.");
string_id!(NexusId, "A nexus's uuid; equal to its owning Volume's uuid.");
string_id!(VolumeId, "A volume's uuid.");
string_id!(ChildUri, "The access uri of a replica, as seen by a nexus.");

impl VolumeId {
    /// Generate a new random volume id.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}
