use std::fmt;
use std::ops::BitOr;

use rusqlite::{params, Connection, OptionalExtension, Transaction};
use serde::{Deserialize, Serialize};

use crate::db::models::Role;
use crate::error::{AppError, AppResult};

/// A set of capabilities, one bit per capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Permission(u32);

impl Permission {
    pub const NONE: Permission = Permission(0);
    pub const FOLLOW: Permission = Permission(1);
    pub const COMMENT: Permission = Permission(2);
    pub const WRITE: Permission = Permission(4);
    pub const MODERATE: Permission = Permission(8);
    pub const ADMIN: Permission = Permission(16);

    pub const ALL: [Permission; 5] = [
        Permission::FOLLOW,
        Permission::COMMENT,
        Permission::WRITE,
        Permission::MODERATE,
        Permission::ADMIN,
    ];

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// True when every bit of `other` is set in `self`.
    pub const fn contains(self, other: Permission) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Permission {
    type Output = Permission;

    fn bitor(self, rhs: Permission) -> Permission {
        Permission(self.0 | rhs.0)
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#07b}", self.0)
    }
}

pub const DEFAULT_ROLE: &str = "User";
pub const MODERATOR_ROLE: &str = "Moderator";
pub const ADMIN_ROLE: &str = "Administrator";

/// The fixed role table written by [`insert_roles`].
pub fn seeded_roles() -> [(&'static str, Permission); 3] {
    let user = Permission::FOLLOW | Permission::COMMENT | Permission::WRITE;
    let moderator = user | Permission::MODERATE;
    [
        (DEFAULT_ROLE, user),
        (MODERATOR_ROLE, moderator),
        (ADMIN_ROLE, moderator | Permission::ADMIN),
    ]
}

impl Role {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            is_default: false,
            permissions: Permission::NONE,
        }
    }

    pub fn has_permission(&self, perm: Permission) -> bool {
        self.permissions.contains(perm)
    }

    pub fn add_permission(&mut self, perm: Permission) {
        if !self.has_permission(perm) {
            self.permissions = self.permissions | perm;
        }
    }

    pub fn remove_permission(&mut self, perm: Permission) {
        if self.has_permission(perm) {
            self.permissions = Permission(self.permissions.0 & !perm.0);
        }
    }

    pub fn reset_permissions(&mut self) {
        self.permissions = Permission::NONE;
    }
}

/// Upsert the three fixed roles by name and make "User" the only default.
pub fn insert_roles(tx: &Transaction<'_>) -> AppResult<()> {
    for (name, perms) in seeded_roles() {
        let mut role = role_by_name(tx, name)?.unwrap_or_else(|| Role::new(name));
        role.reset_permissions();
        for perm in Permission::ALL {
            if perms.contains(perm) {
                role.add_permission(perm);
            }
        }
        role.is_default = role.name == DEFAULT_ROLE;

        tx.execute(
            "INSERT INTO roles (name, is_default, permissions) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO UPDATE SET
               is_default = excluded.is_default,
               permissions = excluded.permissions",
            params![role.name, role.is_default, role.permissions.bits()],
        )?;
    }

    // Roles created by hand must not keep a stale default flag.
    tx.execute(
        "UPDATE roles SET is_default = (name = ?1)",
        params![DEFAULT_ROLE],
    )?;

    tracing::info!("Roles seeded");
    Ok(())
}

pub fn role_by_name(conn: &Connection, name: &str) -> AppResult<Option<Role>> {
    let role = conn
        .query_row(
            &format!("SELECT {} FROM roles WHERE name = ?1", Role::COLUMNS),
            params![name],
            Role::from_row,
        )
        .optional()?;
    Ok(role)
}

pub fn role_by_id(conn: &Connection, id: i64) -> AppResult<Option<Role>> {
    let role = conn
        .query_row(
            &format!("SELECT {} FROM roles WHERE id = ?1", Role::COLUMNS),
            params![id],
            Role::from_row,
        )
        .optional()?;
    Ok(role)
}

pub fn default_role(conn: &Connection) -> AppResult<Role> {
    conn.query_row(
        &format!("SELECT {} FROM roles WHERE is_default = 1", Role::COLUMNS),
        [],
        Role::from_row,
    )
    .optional()?
    .ok_or_else(|| AppError::Internal("No default role; run the deploy task".into()))
}

pub fn list_roles(conn: &Connection) -> AppResult<Vec<Role>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM roles ORDER BY permissions",
        Role::COLUMNS
    ))?;
    let roles = stmt
        .query_map([], Role::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(roles)
}

/// Anything that can be asked whether it holds a capability.
pub trait Principal {
    /// The permission mask of the principal's role, if it has one.
    fn role_permissions(&self) -> Option<Permission>;

    fn can(&self, perm: Permission) -> bool {
        self.role_permissions()
            .is_some_and(|mask| mask.contains(perm))
    }

    fn is_administrator(&self) -> bool {
        self.can(Permission::ADMIN)
    }
}

/// The unauthenticated visitor. Holds no capability.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnonymousUser;

impl Principal for AnonymousUser {
    fn role_permissions(&self) -> Option<Permission> {
        None
    }
}

impl Principal for Role {
    fn role_permissions(&self) -> Option<Permission> {
        Some(self.permissions)
    }
}
