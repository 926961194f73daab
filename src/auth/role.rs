//! Role hierarchy and the signed role-token strategy.
//!
//! A role inherits the permissions of its parent roles, transitively. A user
//! holding role `R` satisfies a requirement for role `Q` when `R == Q` or `Q`
//! is one of `R`'s ancestors, so `admin` satisfies `user` if `user` sits above
//! `admin` in the parent chain. The `*` permission grants everything.

use crate::auth::repository::UserRepository;
use crate::auth::signing::Signer;
use crate::auth::strategy::AuthStrategy;
use crate::auth::user::{AuthenticatedUser, Credentials, TokenData};
use crate::error::AppError;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

pub const WILDCARD: &str = "*";

const TOKEN_PREFIX: &str = "role_";
const REFRESH_PREFIX: &str = "role_refresh_";

/// Role definition: parent roles and directly granted permissions.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RoleDefinition {
    #[serde(default)]
    pub parents: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RoleHierarchy {
    roles: HashMap<String, RoleDefinition>,
    ancestors: HashMap<String, HashSet<String>>,
    effective: HashMap<String, BTreeSet<String>>,
}

impl RoleHierarchy {
    /// Builds the hierarchy. Cycles are tolerated; each role is visited once.
    pub fn new(roles: HashMap<String, RoleDefinition>) -> Self {
        let mut ancestors = HashMap::new();
        let mut effective = HashMap::new();

        for name in roles.keys() {
            let mut seen = HashSet::new();
            let mut stack: Vec<&str> = roles[name].parents.iter().map(String::as_str).collect();
            while let Some(parent) = stack.pop() {
                if parent == name || !seen.insert(parent.to_string()) {
                    continue;
                }
                if let Some(def) = roles.get(parent) {
                    stack.extend(def.parents.iter().map(String::as_str));
                }
            }

            let mut permissions: BTreeSet<String> = roles[name].permissions.iter().cloned().collect();
            for ancestor in &seen {
                if let Some(def) = roles.get(ancestor) {
                    permissions.extend(def.permissions.iter().cloned());
                }
            }

            ancestors.insert(name.clone(), seen);
            effective.insert(name.clone(), permissions);
        }

        Self {
            roles,
            ancestors,
            effective,
        }
    }

    pub fn is_known(&self, role: &str) -> bool {
        self.roles.contains_key(role)
    }

    /// Permissions granted by a role and all its ancestors.
    pub fn effective_permissions(&self, role: &str) -> BTreeSet<String> {
        self.effective.get(role).cloned().unwrap_or_default()
    }

    /// Union of effective permissions over several roles.
    pub fn permissions_for(&self, roles: &[String]) -> BTreeSet<String> {
        roles
            .iter()
            .flat_map(|r| self.effective_permissions(r))
            .collect()
    }

    pub fn has_role(&self, user_roles: &[String], required: &str) -> bool {
        user_roles.iter().any(|role| {
            role == required
                || self
                    .ancestors
                    .get(role)
                    .is_some_and(|a| a.contains(required))
        })
    }

    pub fn has_permission(&self, user_roles: &[String], permission: &str) -> bool {
        user_roles.iter().any(|role| {
            self.effective
                .get(role)
                .is_some_and(|p| p.contains(WILDCARD) || p.contains(permission))
        })
    }

    /// Drops roles the hierarchy does not define.
    pub fn known_roles(&self, roles: &[String]) -> Vec<String> {
        roles.iter().filter(|r| self.is_known(r)).cloned().collect()
    }
}

impl Default for RoleHierarchy {
    /// `super_admin > admin > manager > user > guest`.
    fn default() -> Self {
        let role = |parents: &[&str], permissions: &[&str]| RoleDefinition {
            parents: parents.iter().map(|s| s.to_string()).collect(),
            permissions: permissions.iter().map(|s| s.to_string()).collect(),
        };

        Self::new(HashMap::from([
            ("super_admin".to_string(), role(&["admin"], &[WILDCARD])),
            ("admin".to_string(), role(&["manager"], &["delete", "manage_users"])),
            ("manager".to_string(), role(&["user"], &["manage_team", "view_reports"])),
            ("user".to_string(), role(&["guest"], &["write", "write_own"])),
            ("guest".to_string(), role(&[], &["read"])),
        ]))
    }
}

/// Issues `role_<user id>_<signature>` tokens and resolves roles against a hierarchy.
pub struct RoleStrategy {
    users: Arc<dyn UserRepository>,
    signer: Signer,
    hierarchy: Arc<RoleHierarchy>,
}

impl RoleStrategy {
    pub fn new(signing_secret: &str, users: Arc<dyn UserRepository>, hierarchy: Arc<RoleHierarchy>) -> Self {
        Self {
            users,
            signer: Signer::new(signing_secret),
            hierarchy,
        }
    }

    pub fn hierarchy(&self) -> &Arc<RoleHierarchy> {
        &self.hierarchy
    }

    fn sign(&self, prefix: &str, user_id: &str) -> String {
        let payload = format!("{}{}", prefix, user_id);
        let signature = self.signer.sign_hex(&payload);
        format!("{}_{}", payload, signature)
    }

    /// Returns the user id if the token carries a valid signature for `prefix`.
    fn verify(&self, token: &str, prefix: &str) -> Option<String> {
        let (payload, signature) = token.rsplit_once('_')?;
        let user_id = payload.strip_prefix(prefix)?;
        if user_id.is_empty() || !self.signer.verify_hex(payload, signature) {
            return None;
        }
        Some(user_id.to_string())
    }

    pub fn create_refresh_token(&self, user_id: &str) -> String {
        self.sign(REFRESH_PREFIX, user_id)
    }
}

#[async_trait]
impl AuthStrategy for RoleStrategy {
    fn name(&self) -> &'static str {
        "role"
    }

    async fn authenticate(
        &self,
        credentials: &Credentials,
    ) -> Result<Option<AuthenticatedUser>, AppError> {
        match credentials {
            Credentials::Bearer(token) if token.starts_with(TOKEN_PREFIX) => {
                self.validate_token(token).await
            }
            _ => Ok(None),
        }
    }

    async fn create_token(&self, user_id: &str) -> Result<TokenData, AppError> {
        Ok(TokenData::bearer(self.sign(TOKEN_PREFIX, user_id), None))
    }

    async fn validate_token(&self, token: &str) -> Result<Option<AuthenticatedUser>, AppError> {
        if token.starts_with(REFRESH_PREFIX) {
            return Ok(None);
        }
        let Some(user_id) = self.verify(token, TOKEN_PREFIX) else {
            return Ok(None);
        };

        let Some(record) = self.users.find_by_id(&user_id).await?.filter(|r| r.active) else {
            return Ok(None);
        };

        let mut user = record.to_user(self.name());
        user.roles = self.hierarchy.known_roles(&user.roles);
        user.permissions = self.hierarchy.permissions_for(&user.roles).into_iter().collect();
        Ok(Some(user))
    }

    async fn refresh_token(&self, token: &str) -> Result<Option<TokenData>, AppError> {
        match self.verify(token, REFRESH_PREFIX) {
            Some(user_id) => self.create_token(&user_id).await.map(Some),
            None => Ok(None),
        }
    }
}
