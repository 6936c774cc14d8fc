//! Page gating and per-resource data scoping for organization members.
//!
//! Owners and admins of an organization, and platform administrators, see
//! everything. Plain members carry a [`Permissions`] record: the set of
//! back-office pages they may open, plus an access mode and allow-list for
//! each scoped resource (properties and leases).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{PropdeskError, Result, TeamMember, User};

text_enum! {
    pub enum Role {
        Owner => "owner",
        Admin => "admin",
        Member => "member",
    }
}

impl Role {
    pub fn is_manager(&self) -> bool {
        matches!(self, Role::Owner | Role::Admin)
    }
}

text_enum! {
    /// Areas of the back-office that can be granted to a member.
    pub enum Page {
        Dashboard => "dashboard",
        Properties => "properties",
        Leases => "leases",
        Team => "team",
        Notifications => "notifications",
        AuditLogs => "audit_logs",
        Billing => "billing",
        Settings => "settings",
    }
}

text_enum! {
    pub enum AccessMode {
        All => "all",
        Selected => "selected",
        NoAccess => "none",
    }
}

impl AccessMode {
    fn rank(&self) -> u8 {
        match self {
            AccessMode::NoAccess => 0,
            AccessMode::Selected => 1,
            AccessMode::All => 2,
        }
    }

    /// The more permissive of two modes.
    pub fn widest(self, other: AccessMode) -> AccessMode {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    #[serde(default)]
    pub pages: BTreeSet<Page>,
    #[serde(default = "Permissions::default_mode")]
    pub properties_access_mode: AccessMode,
    #[serde(default = "Permissions::default_mode")]
    pub leases_access_mode: AccessMode,
    #[serde(default)]
    pub allowed_property_ids: BTreeSet<Uuid>,
    #[serde(default)]
    pub allowed_lease_ids: BTreeSet<Uuid>,
}

impl Default for Permissions {
    fn default() -> Self {
        Self {
            pages: BTreeSet::from([Page::Dashboard]),
            properties_access_mode: AccessMode::NoAccess,
            leases_access_mode: AccessMode::NoAccess,
            allowed_property_ids: BTreeSet::new(),
            allowed_lease_ids: BTreeSet::new(),
        }
    }
}

impl Permissions {
    fn default_mode() -> AccessMode {
        AccessMode::NoAccess
    }

    pub fn full() -> Self {
        Self {
            pages: Page::ALL.iter().copied().collect(),
            properties_access_mode: AccessMode::All,
            leases_access_mode: AccessMode::All,
            allowed_property_ids: BTreeSet::new(),
            allowed_lease_ids: BTreeSet::new(),
        }
    }

    /// Drops allow-lists that have no effect under their mode and makes sure
    /// the dashboard is always reachable.
    pub fn normalized(mut self) -> Self {
        self.pages.insert(Page::Dashboard);
        if self.properties_access_mode != AccessMode::Selected {
            self.allowed_property_ids.clear();
        }
        if self.leases_access_mode != AccessMode::Selected {
            self.allowed_lease_ids.clear();
        }
        self
    }

    /// Combines two grants into one that allows everything either allows.
    pub fn merge(&self, other: &Permissions) -> Permissions {
        let pages = self.pages.union(&other.pages).copied().collect();

        let allowed_property_ids = selected_ids(self.properties_access_mode, &self.allowed_property_ids)
            .chain(selected_ids(other.properties_access_mode, &other.allowed_property_ids))
            .collect();
        let allowed_lease_ids = selected_ids(self.leases_access_mode, &self.allowed_lease_ids)
            .chain(selected_ids(other.leases_access_mode, &other.allowed_lease_ids))
            .collect();

        Permissions {
            pages,
            properties_access_mode: self
                .properties_access_mode
                .widest(other.properties_access_mode),
            leases_access_mode: self.leases_access_mode.widest(other.leases_access_mode),
            allowed_property_ids,
            allowed_lease_ids,
        }
        .normalized()
    }

    pub fn property_scope(&self) -> DataScope {
        DataScope::from_mode(self.properties_access_mode, &self.allowed_property_ids)
    }

    pub fn lease_scope(&self) -> DataScope {
        DataScope::from_mode(self.leases_access_mode, &self.allowed_lease_ids)
    }
}

fn selected_ids<'a>(
    mode: AccessMode,
    ids: &'a BTreeSet<Uuid>,
) -> impl Iterator<Item = Uuid> + 'a {
    ids.iter()
        .copied()
        .filter(move |_| mode == AccessMode::Selected)
}

/// The rows of one resource a caller may see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataScope {
    All,
    Only(BTreeSet<Uuid>),
    Nothing,
}

impl DataScope {
    pub fn from_mode(mode: AccessMode, ids: &BTreeSet<Uuid>) -> Self {
        match mode {
            AccessMode::All => DataScope::All,
            AccessMode::Selected if ids.is_empty() => DataScope::Nothing,
            AccessMode::Selected => DataScope::Only(ids.clone()),
            AccessMode::NoAccess => DataScope::Nothing,
        }
    }

    pub fn allows(&self, id: &Uuid) -> bool {
        match self {
            DataScope::All => true,
            DataScope::Only(ids) => ids.contains(id),
            DataScope::Nothing => false,
        }
    }

    pub fn is_nothing(&self) -> bool {
        matches!(self, DataScope::Nothing)
    }

    pub fn intersect(&self, other: &DataScope) -> DataScope {
        match (self, other) {
            (DataScope::Nothing, _) | (_, DataScope::Nothing) => DataScope::Nothing,
            (DataScope::All, scope) | (scope, DataScope::All) => scope.clone(),
            (DataScope::Only(a), DataScope::Only(b)) => {
                let ids: BTreeSet<Uuid> = a.intersection(b).copied().collect();
                if ids.is_empty() {
                    DataScope::Nothing
                } else {
                    DataScope::Only(ids)
                }
            }
        }
    }
}

/// What the current user may do inside one organization.
#[derive(Debug, Clone)]
pub struct AccessContext {
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub is_platform_admin: bool,
    pub role: Option<Role>,
    permissions: Permissions,
}

impl AccessContext {
    pub fn resolve(
        user: &User,
        organization_id: Uuid,
        membership: Option<&TeamMember>,
    ) -> Result<Self> {
        if let Some(member) = membership {
            if member.organization_id != organization_id || member.user_id != user.id {
                return Err(PropdeskError::InvalidOperation(
                    "membership does not belong to this user and organization".to_string(),
                ));
            }
        }

        let role = membership.map(|m| m.role);
        let permissions = match (user.is_admin, membership) {
            (true, _) => Permissions::full(),
            (false, Some(member)) if member.role.is_manager() => Permissions::full(),
            (false, Some(member)) => member.permissions.clone().normalized(),
            (false, None) => {
                return Err(PropdeskError::Forbidden(
                    "not a member of this organization".to_string(),
                ))
            }
        };

        Ok(Self {
            user_id: user.id,
            organization_id,
            is_platform_admin: user.is_admin,
            role,
            permissions,
        })
    }

    pub fn permissions(&self) -> &Permissions {
        &self.permissions
    }

    pub fn can_view_page(&self, page: Page) -> bool {
        self.permissions.pages.contains(&page)
    }

    pub fn require_page(&self, page: Page) -> Result<()> {
        if self.can_view_page(page) {
            Ok(())
        } else {
            Err(PropdeskError::Forbidden(format!(
                "no access to the {} page",
                page
            )))
        }
    }

    pub fn can_manage_team(&self) -> bool {
        self.is_platform_admin || self.role.map_or(false, |r| r.is_manager())
    }

    pub fn require_manager(&self) -> Result<()> {
        if self.can_manage_team() {
            Ok(())
        } else {
            Err(PropdeskError::Forbidden(
                "only owners and admins can do this".to_string(),
            ))
        }
    }

    pub fn is_owner(&self) -> bool {
        self.is_platform_admin || self.role == Some(Role::Owner)
    }

    pub fn property_scope(&self) -> DataScope {
        self.permissions.property_scope()
    }

    pub fn lease_scope(&self) -> DataScope {
        self.permissions.lease_scope()
    }
}
