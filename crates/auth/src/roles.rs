use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use tallyerp_core::RoleId;

/// A named role that users can be granted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: Cow<'static, str>,
}

impl Role {
    pub fn new(id: RoleId, name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.name
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.name)
    }
}

/// How a piece of configuration refers to a role.
///
/// Configuration may carry the role id, the role name, or both. The id is
/// authoritative; the name is a fallback resolved through the directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct RoleRef {
    pub role_id: Option<RoleId>,
    pub role_name: Option<String>,
}

impl RoleRef {
    pub fn by_id(role_id: RoleId) -> Self {
        Self {
            role_id: Some(role_id),
            role_name: None,
        }
    }

    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            role_id: None,
            role_name: Some(name.into()),
        }
    }

    /// True when neither an id nor a non-blank name is configured.
    pub fn is_unset(&self) -> bool {
        self.role_id.is_none()
            && self
                .role_name
                .as_deref()
                .is_none_or(|name| name.trim().is_empty())
    }
}

impl core::fmt::Display for RoleRef {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match (&self.role_id, &self.role_name) {
            (_, Some(name)) => f.write_str(name),
            (Some(id), None) => write!(f, "role:{id}"),
            (None, None) => f.write_str("<unset>"),
        }
    }
}
