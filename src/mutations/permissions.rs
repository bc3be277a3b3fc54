//! Mutation permission checks
//!
//! Every check falls back to the next more general one, ending in
//! [`MutationPermission::has_permission`], so a permission only overrides
//! the hooks it cares about.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::database::Record;

/// The user performing a mutation
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: Option<i64>,
    pub is_authenticated: bool,
    pub is_staff: bool,
    pub is_superuser: bool,
}

impl Actor {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn authenticated(id: i64) -> Self {
        Self {
            id: Some(id),
            is_authenticated: true,
            ..Self::default()
        }
    }

    pub fn staff(id: i64) -> Self {
        Self {
            is_staff: true,
            ..Self::authenticated(id)
        }
    }

    pub fn superuser(id: i64) -> Self {
        Self {
            is_staff: true,
            is_superuser: true,
            ..Self::authenticated(id)
        }
    }
}

#[async_trait]
pub trait MutationPermission: Send + Sync {
    async fn has_permission(&self, actor: &Actor) -> bool {
        let _ = actor;
        false
    }

    async fn has_mutation_permission(&self, actor: &Actor, input: &Value) -> bool {
        let _ = input;
        self.has_permission(actor).await
    }

    async fn has_create_permission(&self, actor: &Actor, input: &Value) -> bool {
        self.has_mutation_permission(actor, input).await
    }

    async fn has_update_permission(&self, instance: &Record, actor: &Actor, input: &Value) -> bool {
        let _ = instance;
        self.has_mutation_permission(actor, input).await
    }

    async fn has_delete_permission(&self, instance: &Record, actor: &Actor, input: &Value) -> bool {
        let _ = instance;
        self.has_mutation_permission(actor, input).await
    }
}

pub struct AllowAny;

#[async_trait]
impl MutationPermission for AllowAny {
    async fn has_permission(&self, _actor: &Actor) -> bool {
        true
    }
}

pub struct AllowAuthenticated;

#[async_trait]
impl MutationPermission for AllowAuthenticated {
    async fn has_permission(&self, actor: &Actor) -> bool {
        actor.is_authenticated
    }
}

pub struct AllowStaff;

#[async_trait]
impl MutationPermission for AllowStaff {
    async fn has_permission(&self, actor: &Actor) -> bool {
        actor.is_staff
    }
}

pub struct AllowSuperuser;

#[async_trait]
impl MutationPermission for AllowSuperuser {
    async fn has_permission(&self, actor: &Actor) -> bool {
        actor.is_superuser
    }
}
