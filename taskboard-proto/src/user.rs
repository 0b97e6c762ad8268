//! User directory types.

use serde::{Deserialize, Serialize};

use crate::task::Task;

/// Role of an authenticated principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Full access.
    Admin,
    /// Can assign and edit tasks.
    Manager,
    /// Regular user; can only move their own tasks forward.
    #[default]
    User,
}

impl Role {
    /// Whether this role may create, edit and delete tasks for others.
    #[must_use]
    pub const fn can_manage(self) -> bool {
        matches!(self, Self::Admin | Self::Manager)
    }

    /// Wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Manager => "manager",
            Self::User => "user",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user as listed by the directory and cached as the session principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Server-assigned id.
    pub id: u64,
    /// Login email.
    pub email: String,
    /// Role.
    #[serde(default)]
    pub role: Role,
}

impl User {
    /// The embedded reference form of this user.
    #[must_use]
    pub fn to_ref(&self) -> UserRef {
        UserRef {
            id: self.id,
            email: self.email.clone(),
        }
    }
}

/// Reference to a user embedded in a task record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserRef {
    /// User id.
    pub id: u64,
    /// User email.
    pub email: String,
}

/// A user together with the tasks assigned to them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDetails {
    /// User id.
    pub id: u64,
    /// Login email.
    pub email: String,
    /// Role.
    #[serde(default)]
    pub role: Role,
    /// Tasks assigned to this user.
    #[serde(default)]
    pub tasks: Vec<Task>,
}
