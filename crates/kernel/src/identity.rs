//! Acting-user contract.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The user a filter call acts for. Admin-only filter operations are
/// dispatchable only when [`Identity::is_admin`] is true.
pub trait Identity: Send + Sync {
    fn is_admin(&self) -> bool;

    /// Identifier exposed to filter operations, if any.
    fn id(&self) -> Option<Value> {
        None
    }
}

/// Plain identity for callers without their own user type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub admin: bool,
}

impl Principal {
    pub fn user(id: impl Into<Value>) -> Self {
        Self {
            id: Some(id.into()),
            admin: false,
        }
    }

    pub fn admin(id: impl Into<Value>) -> Self {
        Self {
            id: Some(id.into()),
            admin: true,
        }
    }
}

impl Identity for Principal {
    fn is_admin(&self) -> bool {
        self.admin
    }

    fn id(&self) -> Option<Value> {
        self.id.clone()
    }
}
