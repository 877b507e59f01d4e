use crate::error::{Result, WarrantyError};
use crate::ids::{ActorId, CustomerId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Who performed an action, as recorded on timeline events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorType {
    Customer,
    Agent,
    Technician,
    System,
}

impl ActorType {
    pub fn as_str(self) -> &'static str {
        match self {
            ActorType::Customer => "customer",
            ActorType::Agent => "agent",
            ActorType::Technician => "technician",
            ActorType::System => "system",
        }
    }
}

impl fmt::Display for ActorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role claims carried by a verified caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Agent,
    Technician,
    Customer,
}

/// A verified caller identity.
///
/// Authentication happens upstream; the warranty services trust this value.
/// For customers, the actor id doubles as the customer reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    pub actor_type: ActorType,
    pub roles: BTreeSet<Role>,
}

impl Actor {
    pub fn new(id: ActorId, actor_type: ActorType, roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            id,
            actor_type,
            roles: roles.into_iter().collect(),
        }
    }

    pub fn customer(id: CustomerId) -> Self {
        Self::new(ActorId::new(id.get()), ActorType::Customer, [Role::Customer])
    }

    pub fn agent(id: ActorId) -> Self {
        Self::new(id, ActorType::Agent, [Role::Agent])
    }

    pub fn admin(id: ActorId) -> Self {
        Self::new(id, ActorType::Agent, [Role::Admin, Role::Agent])
    }

    pub fn technician(id: ActorId) -> Self {
        Self::new(id, ActorType::Technician, [Role::Technician])
    }

    pub fn system() -> Self {
        Self::new(ActorId::new(0), ActorType::System, [Role::Admin, Role::Agent])
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// The customer reference of a customer caller.
    pub fn customer_id(&self) -> Option<CustomerId> {
        (self.actor_type == ActorType::Customer).then(|| CustomerId::new(self.id.get()))
    }

    /// Fails with `forbidden` unless the caller holds one of `roles`.
    pub fn require_any(&self, roles: &[Role], operation: &str) -> Result<()> {
        if roles.iter().any(|role| self.has_role(*role)) {
            Ok(())
        } else {
            Err(WarrantyError::Forbidden(format!(
                "{} {} may not {}",
                self.actor_type, self.id, operation
            )))
        }
    }

    pub fn require_admin(&self, operation: &str) -> Result<()> {
        self.require_any(&[Role::Admin], operation)
    }

    pub fn require_agent(&self, operation: &str) -> Result<()> {
        self.require_any(&[Role::Agent, Role::Admin], operation)
    }
}
