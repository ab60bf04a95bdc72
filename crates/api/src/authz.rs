//! API-side authorization guard for commands.
//!
//! Permissions are checked at the command boundary (before dispatch), so the
//! domain aggregates and infra stay auth-agnostic.

use campusledger_auth::{
    AuthzError, CommandAuthorization, Permission, Principal, Role, TenantMembership, authorize,
};

use crate::context::{PrincipalContext, TenantContext};

/// Check authorization for a command in the current request context.
///
/// Intended to be called **before** dispatching a command.
pub fn authorize_command<C: CommandAuthorization>(
    tenant: &TenantContext,
    principal: &PrincipalContext,
    command: &C,
) -> Result<(), AuthzError> {
    let membership = TenantMembership {
        tenant_id: tenant.tenant_id(),
        roles: principal.roles().to_vec(),
        permissions: permissions_from_roles(principal.roles()),
    };

    let principal = Principal {
        principal_id: principal.principal_id(),
        active_tenant_id: tenant.tenant_id(),
        membership,
    };

    for perm in command.required_permissions() {
        authorize(&principal, perm)?;
    }

    Ok(())
}

/// Static role→permission mapping.
///
/// Three roles cover the fee office today: school admins hold everything,
/// accountants run the fee office, parents can only lodge payment claims.
/// Reads are not permission-gated; tenancy scoping alone bounds them.
fn permissions_from_roles(roles: &[Role]) -> Vec<Permission> {
    let mut permissions = Vec::new();

    for role in roles {
        match role.as_str() {
            "admin" => return vec![Permission::new("*")],
            "accountant" => {
                for p in [
                    "fees.manage",
                    "students.manage",
                    "invoices.generate",
                    "invoices.adjust",
                    "payments.submit",
                    "payments.review",
                ] {
                    permissions.push(Permission::new(p));
                }
            }
            "parent" => permissions.push(Permission::new("payments.submit")),
            _ => {}
        }
    }

    permissions
}
