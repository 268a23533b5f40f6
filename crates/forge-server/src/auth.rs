//! Permission levels and the pluggable authorization seam.
//!
//! Authentication itself is out of scope for the server; every connection
//! gets an admin-level context by default. The seam exists so deployments
//! can mount a real policy without touching the dispatch path.

/// Privilege required to invoke a method, ordered from weakest to strongest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Permission {
    /// Read-only queries and subscriptions.
    Observer,
    /// Commands that drive the machine.
    Operator,
    /// Server administration.
    Admin,
}

/// What a connection is allowed to do.
#[derive(Clone, Copy, Debug)]
pub struct PermissionContext {
    /// Granted privilege level.
    pub level: Permission,
}

impl Default for PermissionContext {
    fn default() -> Self {
        Self {
            level: Permission::Admin,
        }
    }
}

/// Decides whether a context may invoke a method requiring `needed`.
pub trait AuthPolicy: Send + Sync {
    /// True when the call may proceed.
    fn permit(&self, ctx: &PermissionContext, needed: Permission) -> bool;
}

/// Default policy: a context may do anything at or below its level.
#[derive(Clone, Copy, Debug, Default)]
pub struct LevelPolicy;

impl AuthPolicy for LevelPolicy {
    fn permit(&self, ctx: &PermissionContext, needed: Permission) -> bool {
        ctx.level >= needed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_ordered() {
        assert!(Permission::Admin > Permission::Operator);
        assert!(Permission::Operator > Permission::Observer);
    }

    #[test]
    fn level_policy_compares_levels() {
        let policy = LevelPolicy;
        let observer = PermissionContext {
            level: Permission::Observer,
        };
        assert!(policy.permit(&observer, Permission::Observer));
        assert!(!policy.permit(&observer, Permission::Operator));
        assert!(policy.permit(&PermissionContext::default(), Permission::Admin));
    }
}
