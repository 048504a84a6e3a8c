//! Role-based permission checks.
//!
//! Both functions are pure. Callers must derive the role from a verified
//! token payload, never from a flag computed by an earlier layer.

use crate::models::Role;
use crate::services::token::TokenPayload;

/// Roles allowed to create, read and list accounts.
pub const ACCOUNT_ROLES: &[Role] = &[Role::Depositor, Role::Banker];
/// Roles allowed to delete accounts.
pub const ACCOUNT_ADMIN_ROLES: &[Role] = &[Role::Banker];
/// Roles allowed to move money.
pub const TRANSFER_ROLES: &[Role] = &[Role::Depositor];
/// Roles allowed to revoke their own sessions and read their own profile.
pub const SESSION_ROLES: &[Role] = &[Role::Depositor, Role::Banker];
/// Roles allowed to update a profile. Bankers may also update depositors.
pub const USER_UPDATE_ROLES: &[Role] = &[Role::Depositor, Role::Banker];

/// `Admin` always passes; otherwise the role must be listed.
pub fn has_permission(role: Role, allowed: &[Role]) -> bool {
    role == Role::Admin || allowed.contains(&role)
}

/// Whether `role` may act on a resource it does not own. `Admin` always may;
/// `Banker` only where the operation lists it.
pub fn can_override(role: Role, allowed: &[Role]) -> bool {
    match role {
        Role::Admin => true,
        Role::Banker => allowed.contains(&Role::Banker),
        Role::Depositor => false,
    }
}

/// Authenticated caller, built only from a verified access-token payload and
/// passed explicitly into every engine operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub username: String,
    pub role: Role,
}

impl From<TokenPayload> for Caller {
    fn from(payload: TokenPayload) -> Self {
        Self {
            username: payload.username,
            role: payload.role,
        }
    }
}

impl Caller {
    pub fn has_permission(&self, allowed: &[Role]) -> bool {
        has_permission(self.role, allowed)
    }

    pub fn can_override(&self, allowed: &[Role]) -> bool {
        can_override(self.role, allowed)
    }

    /// Owner match, or an override the operation grants.
    pub fn may_act_for(&self, owner: &str, allowed: &[Role]) -> bool {
        self.username == owner || self.can_override(allowed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caller(username: &str, role: Role) -> Caller {
        Caller {
            username: username.to_string(),
            role,
            }
    }

    #[test]
    fn admin_passes_everything() {
        assert!(has_permission(Role::Admin, &[]));
        assert!(has_permission(Role::Admin, TRANSFER_ROLES));
        assert!(can_override(Role::Admin, &[]));
    }

    #[test]
    fn role_must_be_listed() {
        assert!(has_permission(Role::Depositor, TRANSFER_ROLES));
        assert!(!has_permission(Role::Banker, TRANSFER_ROLES));
        assert!(has_permission(Role::Banker, ACCOUNT_ADMIN_ROLES));
        assert!(!has_permission(Role::Depositor, ACCOUNT_ADMIN_ROLES));
    }

    #[test]
    fn banker_overrides_only_where_listed() {
        assert!(can_override(Role::Banker, ACCOUNT_ROLES));
        assert!(!can_override(Role::Banker, TRANSFER_ROLES));
        assert!(!can_override(Role::Depositor, ACCOUNT_ROLES));
    }

    #[test]
    fn may_act_for_owner_or_override() {
        let alice = caller("alice", Role::Depositor);
        assert!(alice.may_act_for("alice", ACCOUNT_ROLES));
        assert!(!alice.may_act_for("bob", ACCOUNT_ROLES));

        let banker = caller("bank_staff", Role::Banker);
        assert!(banker.may_act_for("bob", ACCOUNT_ROLES));
        assert!(!banker.may_act_for("bob", TRANSFER_ROLES));
    }
}
