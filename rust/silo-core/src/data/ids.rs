use serde::{Deserialize, Serialize};
use std::{fmt::Display, hash::Hash, ops::Deref};
use uuid::Uuid;

/// A helper to stamp out trait implementations that promote coherence between
/// Rust strings and a given identifier wrapper type
macro_rules! id_coherent {
    ($wrapper:ty) => {
        impl Deref for $wrapper {
            type Target = String;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }

        impl Hash for $wrapper {
            fn hash<H>(&self, hasher: &mut H)
            where
                H: std::hash::Hasher,
            {
                Hash::hash(&self.0, hasher)
            }
        }

        impl From<&str> for $wrapper {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl From<String> for $wrapper {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<$wrapper> for String {
            fn from(value: $wrapper) -> Self {
                value.0
            }
        }

        impl<'a> From<&'a $wrapper> for &'a str {
            fn from(value: &'a $wrapper) -> Self {
                &value.0
            }
        }

        impl PartialEq<String> for $wrapper {
            fn eq(&self, other: &String) -> bool {
                &self.0 == other
            }
        }

        impl PartialEq<str> for $wrapper {
            fn eq(&self, other: &str) -> bool {
                &self.0 == other
            }
        }

        impl PartialEq<&str> for $wrapper {
            fn eq(&self, other: &&str) -> bool {
                &self.0 == *other
            }
        }

        impl PartialEq for $wrapper {
            fn eq(&self, other: &Self) -> bool {
                self.0 == other.0
            }
        }

        impl Eq for $wrapper {}

        impl Display for $wrapper {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                Display::fmt(&self.0, f)
            }
        }

        impl AsRef<[u8]> for $wrapper {
            fn as_ref(&self) -> &[u8] {
                self.0.as_ref()
            }
        }
    };
}

/// A macro to declare an identifier newtype along with its coherence
/// implementations and a short documentation string
macro_rules! declare_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[repr(transparent)]
        #[derive(Default, Clone, Debug, Serialize, Deserialize, PartialOrd, Ord)]
        pub struct $name(pub String);

        id_coherent!($name);

        impl $name {
            /// Mint a fresh, globally unique identifier of this type
            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }
        }
    };
}

declare_id!(
    /// Identifies a secret row; replicated copies of a secret have their own
    /// [SecretId], distinct from the source's
    SecretId
);

declare_id!(
    /// Identifies one immutable version row of a secret
    SecretVersionId
);

declare_id!(
    /// Identifies a secret folder
    FolderId
);

declare_id!(
    /// Identifies a replicated import relationship between a source path and
    /// a destination folder
    ImportId
);

declare_id!(
    /// Identifies a project (the unit of tenancy; replication never crosses
    /// project boundaries)
    ProjectId
);

declare_id!(
    /// Identifies an environment within a project
    EnvironmentId
);

declare_id!(
    /// Identifies the actor (user or service) on whose behalf a job runs
    ActorId
);

declare_id!(
    /// Identifies an approval policy bound to a destination path
    PolicyId
);

declare_id!(
    /// Identifies a project membership row
    MembershipId
);

declare_id!(
    /// Identifies an approval request
    RequestId
);

declare_id!(
    /// Identifies a queued replication job; replays and redeliveries of the
    /// same job share a [JobId]
    JobId
);

/// A deterministic, non-reversible identifier of a secret's key. The blind
/// index is the cross-folder identity of a secret: two folders hold "the
/// same" secret exactly when the blind indices match. Blind indices are
/// computed upstream and are opaque inputs here.
#[repr(transparent)]
#[derive(Default, Clone, Debug, Serialize, Deserialize, PartialOrd, Ord)]
pub struct BlindIndex(pub String);

id_coherent!(BlindIndex);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_compares_ids_coherently_with_strings() {
        let id = SecretId::from("sec-1");
        assert_eq!(id, "sec-1");
        assert_eq!(id, String::from("sec-1"));
        assert_eq!(String::from(id), "sec-1");
    }

    #[test]
    fn it_generates_distinct_ids() {
        assert_ne!(FolderId::generate(), FolderId::generate());
    }
}
