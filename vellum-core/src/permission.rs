//! Read/write allow-lists for collections.
//!
//! Declarations write permissions as `"*"`, a single identity, or a list:
//!
//! ```json
//! { "permissions": { "read": "*", "write": ["admin", "editor"] } }
//! ```
//!
//! Only a lone `"*"` (or `["*"]`) admits everyone. Inside a longer list `"*"` is an
//! ordinary identity.

use serde::{Deserialize, Serialize};

/// Who may perform one kind of access.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "RawPermission", into = "RawPermission")]
pub enum Permission {
    /// Everyone (`"*"`).
    #[default]
    Any,
    /// Only the listed identities.
    Allow(Vec<String>),
}

impl Permission {
    pub fn allow<I, S>(identities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Permission::from(RawPermission::Many(identities.into_iter().map(Into::into).collect()))
    }

    pub fn allows(&self, identity: &str) -> bool {
        match self {
            Permission::Any => true,
            Permission::Allow(identities) => identities.iter().any(|allowed| allowed == identity),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawPermission {
    One(String),
    Many(Vec<String>),
}

impl From<RawPermission> for Permission {
    fn from(raw: RawPermission) -> Self {
        let identities = match raw {
            RawPermission::One(identity) => vec![identity],
            RawPermission::Many(identities) => identities,
        };

        if matches!(identities.as_slice(), [only] if only == "*") {
            Permission::Any
        } else {
            Permission::Allow(identities)
        }
    }
}

impl From<Permission> for RawPermission {
    fn from(permission: Permission) -> Self {
        match permission {
            Permission::Any => RawPermission::One("*".to_string()),
            Permission::Allow(identities) => RawPermission::Many(identities),
        }
    }
}

/// Read and write permissions of one collection. Both default to [`Permission::Any`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Permissions {
    pub read: Permission,
    pub write: Permission,
}

impl Permissions {
    pub fn new(read: Permission, write: Permission) -> Self {
        Self { read, write }
    }

    pub fn can_read(&self, identity: &str) -> bool {
        self.read.allows(identity)
    }

    pub fn can_write(&self, identity: &str) -> bool {
        self.write.allows(identity)
    }
}

/// A declared `permissions` object. Each omitted access falls back to a default.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DeclaredPermissions {
    pub read: Option<Permission>,
    pub write: Option<Permission>,
}

impl DeclaredPermissions {
    pub fn or_defaults(self, defaults: &Permissions) -> Permissions {
        Permissions {
            read: self.read.unwrap_or_else(|| defaults.read.clone()),
            write: self.write.unwrap_or_else(|| defaults.write.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wildcard_allows_everyone() {
        let permissions = Permissions::default();

        assert!(permissions.can_read("admin"));
        assert!(permissions.can_write("anyone"));
    }

    #[test]
    fn allow_lists_admit_only_listed_identities() {
        let permissions = Permissions::new(Permission::allow(["admin"]), Permission::allow(["admin", "editor"]));

        assert!(permissions.can_read("admin"));
        assert!(!permissions.can_read("editor"));
        assert!(permissions.can_write("editor"));
        assert!(!permissions.can_write("guest"));
    }

    #[test]
    fn declarations_accept_single_values_and_lists() {
        let permissions: Permissions =
            serde_json::from_value(json!({ "read": "admin", "write": ["admin", "editor"] })).unwrap();

        assert_eq!(permissions.read, Permission::Allow(vec!["admin".into()]));
        assert_eq!(permissions.write, Permission::Allow(vec!["admin".into(), "editor".into()]));

        let open: Permissions = serde_json::from_value(json!({ "write": "*" })).unwrap();
        assert_eq!(open, Permissions::default());
    }

    #[test]
    fn only_a_lone_wildcard_opens_access() {
        assert_eq!(Permission::allow(["*"]), Permission::Any);

        let mixed = Permission::allow(["editor", "*"]);
        assert_eq!(mixed, Permission::Allow(vec!["editor".into(), "*".into()]));
        assert!(mixed.allows("editor"));
        assert!(!mixed.allows("guest"));
    }

    #[test]
    fn omitted_accesses_fall_back_to_the_defaults() {
        let defaults = Permissions::new(Permission::Any, Permission::allow(["admin"]));
        let declared: DeclaredPermissions = serde_json::from_value(json!({ "read": ["auditor"] })).unwrap();

        let permissions = declared.or_defaults(&defaults);

        assert_eq!(permissions.read, Permission::allow(["auditor"]));
        assert_eq!(permissions.write, Permission::allow(["admin"]));
    }

    #[test]
    fn serializes_back_to_the_declaration_form() {
        let permissions = Permissions::new(Permission::Any, Permission::allow(["admin"]));

        assert_eq!(
            serde_json::to_value(&permissions).unwrap(),
            json!({ "read": "*", "write": ["admin"] })
        );
    }
}
