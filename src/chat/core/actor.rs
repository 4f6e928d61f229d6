//! Resolved identities attached to live connections.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Account types treated as support staff.
///
/// This single set gates the `staff` and `voice_monitoring` rooms, joining
/// any session room and sending as an agent.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StaffRole {
    /// Platform administrator.
    Admin,
    /// Administrator with account management rights.
    Superadmin,
    /// Front-line support agent.
    Support,
    /// Support team lead.
    Supervisor,
    /// Support manager.
    Manager,
}

impl StaffRole {
    /// Every staff role.
    pub const ALL: [Self; 5] = [
        Self::Admin,
        Self::Superadmin,
        Self::Support,
        Self::Supervisor,
        Self::Manager,
    ];

    /// Stable string form, matching the `accountType` claim.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Superadmin => "superadmin",
            Self::Support => "support",
            Self::Supervisor => "supervisor",
            Self::Manager => "manager",
        }
    }
}

impl fmt::Display for StaffRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for StaffRole {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| value.to_string())
    }
}

/// Identity attached to a connection.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Actor {
    /// No verified account; `id` correlates the connection with its session.
    Anonymous {
        /// Connection or client-supplied correlation id.
        id: String,
    },
    /// Authenticated customer account.
    Customer {
        /// Account id.
        id: String,
        /// Display name from the token.
        name: Option<String>,
        /// Email from the token.
        email: Option<String>,
    },
    /// Authenticated support staff.
    Staff {
        /// Account id.
        id: String,
        /// Display name from the token.
        name: Option<String>,
        /// Staff role.
        role: StaffRole,
    },
}

impl Actor {
    /// Identity string of the actor.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Anonymous { id } | Self::Customer { id, .. } | Self::Staff { id, .. } => id,
        }
    }

    /// Display name, if the token carried one.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Anonymous { .. } => None,
            Self::Customer { name, .. } | Self::Staff { name, .. } => name.as_deref(),
        }
    }

    /// Whether the actor is support staff.
    #[must_use]
    pub const fn is_staff(&self) -> bool {
        matches!(self, Self::Staff { .. })
    }

    /// Whether the actor has no verified account.
    #[must_use]
    pub const fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous { .. })
    }

    /// Staff role, if any.
    #[must_use]
    pub const fn staff_role(&self) -> Option<StaffRole> {
        match self {
            Self::Staff { role, .. } => Some(*role),
            _ => None,
        }
    }

    /// Short label used in logs and as the default `closedBy`.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Anonymous { .. } => "anonymous",
            Self::Customer { .. } => "customer",
            Self::Staff { .. } => "agent",
        }
    }
}
