//! In-memory store backed by `DashMap`.
//!
//! Reads never block each other. Membership mutations take a single async
//! mutex so the "at least one owner" rule cannot be raced.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use super::models::{Locale, NewLocale, NewUser, Project, ProjectClient, ProjectUser, User};
use super::{Store, StoreError, StoreResult};
use crate::rbac::{PrincipalId, ProjectId, Role, RoleAssignment, SubjectKind};

#[derive(Debug, Clone)]
struct StoredClient {
    project_id: ProjectId,
    name: String,
    secret_digest: String,
}

impl StoredClient {
    fn to_client(&self, client_id: &str) -> ProjectClient {
        ProjectClient {
            client_id: client_id.to_string(),
            project_id: self.project_id.clone(),
            name: self.name.clone(),
            secret: None,
        }
    }
}

/// Process-local store. Cloning shares the underlying maps.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    users: Arc<DashMap<String, User>>,
    user_ids_by_email: Arc<DashMap<String, String>>,
    projects: Arc<DashMap<ProjectId, Project>>,
    memberships: Arc<DashMap<(ProjectId, String), Role>>,
    clients: Arc<DashMap<String, StoredClient>>,
    locales: Arc<DashMap<(ProjectId, String), Locale>>,
    membership_lock: Arc<Mutex<()>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a project with a fixed identifier, bypassing id generation.
    pub fn insert_project(&self, project: Project) {
        self.projects.insert(project.id.clone(), project);
    }

    /// Insert a user with a fixed identifier.
    pub fn insert_user(&self, user: User) {
        self.user_ids_by_email
            .insert(user.email.clone(), user.id.clone());
        self.users.insert(user.id.clone(), user);
    }

    /// Grant `role` to `user_id` in `project` without any checks.
    pub fn grant(&self, project: &ProjectId, user_id: &str, role: Role) {
        self.memberships
            .insert((project.clone(), user_id.to_string()), role);
    }

    fn require_project(&self, id: &ProjectId) -> StoreResult<Project> {
        self.projects
            .get(id)
            .map(|p| p.clone())
            .ok_or_else(|| StoreError::not_found("Project", id.as_str()))
    }

    fn owner_count(&self, id: &ProjectId) -> usize {
        self.memberships
            .iter()
            .filter(|entry| &entry.key().0 == id && *entry.value() == Role::Owner)
            .count()
    }

    fn project_user(&self, id: &ProjectId, user_id: &str, role: Role) -> ProjectUser {
        let (email, name) = self
            .users
            .get(user_id)
            .map(|u| (u.email.clone(), u.name.clone()))
            .unwrap_or_default();
        ProjectUser {
            user_id: user_id.to_string(),
            project_id: id.clone(),
            email,
            name,
            role,
        }
    }

    fn client_of(&self, id: &ProjectId, client_id: &str) -> StoreResult<StoredClient> {
        self.clients
            .get(client_id)
            .filter(|c| &c.project_id == id)
            .map(|c| c.clone())
            .ok_or_else(|| StoreError::not_found("Client", client_id))
    }

    fn locale_key(id: &ProjectId, ident: &str) -> (ProjectId, String) {
        (id.clone(), ident.to_string())
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn lookup_role_assignment(
        &self,
        principal: &PrincipalId,
        kind: SubjectKind,
        project: &ProjectId,
    ) -> StoreResult<Option<RoleAssignment>> {
        let role = match kind {
            SubjectKind::User => self
                .memberships
                .get(&(project.clone(), principal.as_str().to_string()))
                .map(|r| *r),
            SubjectKind::Client => self
                .clients
                .get(principal.as_str())
                .filter(|c| &c.project_id == project)
                .map(|_| Role::Client),
        };

        Ok(role.map(|role| RoleAssignment::new(principal.clone(), project.clone(), role)))
    }

    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        let id = uuid::Uuid::new_v4().to_string();
        match self.user_ids_by_email.entry(user.email.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(StoreError::already_exists("User", user.email));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(id.clone());
            }
        }

        let user = User {
            id: id.clone(),
            email: user.email,
            name: user.name,
            password_hash: user.password_hash,
        };
        self.users.insert(id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: &str) -> StoreResult<Option<User>> {
        Ok(self.users.get(id).map(|u| u.clone()))
    }

    async fn get_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let id = match self.user_ids_by_email.get(email) {
            Some(id) => id.clone(),
            None => return Ok(None),
        };
        Ok(self.users.get(&id).map(|u| u.clone()))
    }

    async fn create_project(&self, owner: &PrincipalId, name: &str) -> StoreResult<Project> {
        let project = Project {
            id: ProjectId::generate(),
            name: name.to_string(),
            keys: Vec::new(),
        };
        self.projects.insert(project.id.clone(), project.clone());
        self.grant(&project.id, owner.as_str(), Role::Owner);
        debug!(project_id = %project.id, owner = %owner, "Project created");
        Ok(project)
    }

    async fn get_project(&self, id: &ProjectId) -> StoreResult<Option<Project>> {
        Ok(self.projects.get(id).map(|p| p.clone()))
    }

    async fn delete_project(&self, id: &ProjectId) -> StoreResult<()> {
        let _guard = self.membership_lock.lock().await;
        if self.projects.remove(id).is_none() {
            return Err(StoreError::not_found("Project", id.as_str()));
        }
        self.memberships.retain(|(project, _), _| project != id);
        self.clients.retain(|_, client| &client.project_id != id);
        self.locales.retain(|(project, _), _| project != id);
        Ok(())
    }

    async fn list_user_projects(&self, user: &PrincipalId) -> StoreResult<Vec<Project>> {
        let project_ids: Vec<ProjectId> = self
            .memberships
            .iter()
            .filter(|entry| entry.key().1 == user.as_str())
            .map(|entry| entry.key().0.clone())
            .collect();

        let mut projects: Vec<Project> = project_ids
            .iter()
            .filter_map(|id| self.projects.get(id).map(|p| p.clone()))
            .collect();
        projects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(projects)
    }

    async fn add_project_key(&self, id: &ProjectId, key: &str) -> StoreResult<Project> {
        let project = {
            let mut project = self
                .projects
                .get_mut(id)
                .ok_or_else(|| StoreError::not_found("Project", id.as_str()))?;
            if project.keys.iter().any(|k| k == key) {
                return Err(StoreError::already_exists("Key", key));
            }
            project.keys.push(key.to_string());
            project.clone()
        };

        for mut locale in self.locales.iter_mut() {
            if &locale.key().0 == id {
                locale.pairs.entry(key.to_string()).or_default();
            }
        }
        Ok(project)
    }

    async fn rename_project_key(
        &self,
        id: &ProjectId,
        old_key: &str,
        new_key: &str,
    ) -> StoreResult<Project> {
        let project = {
            let mut project = self
                .projects
                .get_mut(id)
                .ok_or_else(|| StoreError::not_found("Project", id.as_str()))?;
            if project.keys.iter().any(|k| k == new_key) {
                return Err(StoreError::already_exists("Key", new_key));
            }
            let slot = project
                .keys
                .iter_mut()
                .find(|k| *k == old_key)
                .ok_or_else(|| StoreError::not_found("Key", old_key))?;
            *slot = new_key.to_string();
            project.clone()
        };

        for mut locale in self.locales.iter_mut() {
            if &locale.key().0 == id {
                let value = locale.pairs.remove(old_key).unwrap_or_default();
                locale.pairs.insert(new_key.to_string(), value);
            }
        }
        Ok(project)
    }

    async fn delete_project_key(&self, id: &ProjectId, key: &str) -> StoreResult<Project> {
        let project = {
            let mut project = self
                .projects
                .get_mut(id)
                .ok_or_else(|| StoreError::not_found("Project", id.as_str()))?;
            let before = project.keys.len();
            project.keys.retain(|k| k != key);
            if project.keys.len() == before {
                return Err(StoreError::not_found("Key", key));
            }
            project.clone()
        };

        for mut locale in self.locales.iter_mut() {
            if &locale.key().0 == id {
                locale.pairs.remove(key);
            }
        }
        Ok(project)
    }

    async fn list_project_users(&self, id: &ProjectId) -> StoreResult<Vec<ProjectUser>> {
        self.require_project(id)?;
        let members: Vec<(String, Role)> = self
            .memberships
            .iter()
            .filter(|entry| &entry.key().0 == id)
            .map(|entry| (entry.key().1.clone(), *entry.value()))
            .collect();

        let mut users: Vec<ProjectUser> = members
            .into_iter()
            .map(|(user_id, role)| self.project_user(id, &user_id, role))
            .collect();
        users.sort_by(|a, b| a.email.cmp(&b.email));
        Ok(users)
    }

    async fn assign_project_user(
        &self,
        id: &ProjectId,
        user_id: &str,
        role: Role,
    ) -> StoreResult<ProjectUser> {
        if !role.is_assignable() {
            return Err(StoreError::Rejected(format!("role {} cannot be assigned", role)));
        }
        let _guard = self.membership_lock.lock().await;
        self.require_project(id)?;
        if !self.users.contains_key(user_id) {
            return Err(StoreError::not_found("User", user_id));
        }

        let key = (id.clone(), user_id.to_string());
        if self.memberships.contains_key(&key) {
            return Err(StoreError::already_exists("Project user", user_id));
        }
        self.memberships.insert(key, role);
        Ok(self.project_user(id, user_id, role))
    }

    async fn update_project_user_role(
        &self,
        id: &ProjectId,
        user_id: &str,
        role: Role,
    ) -> StoreResult<ProjectUser> {
        if !role.is_assignable() {
            return Err(StoreError::Rejected(format!("role {} cannot be assigned", role)));
        }
        let _guard = self.membership_lock.lock().await;
        let key = (id.clone(), user_id.to_string());
        let current = self
            .memberships
            .get(&key)
            .map(|r| *r)
            .ok_or_else(|| StoreError::not_found("Project user", user_id))?;

        if current == Role::Owner && role != Role::Owner && self.owner_count(id) <= 1 {
            return Err(StoreError::Rejected(
                "a project must keep at least one owner".to_string(),
            ));
        }
        self.memberships.insert(key, role);
        Ok(self.project_user(id, user_id, role))
    }

    async fn revoke_project_user(&self, id: &ProjectId, user_id: &str) -> StoreResult<()> {
        let _guard = self.membership_lock.lock().await;
        let key = (id.clone(), user_id.to_string());
        let current = self
            .memberships
            .get(&key)
            .map(|r| *r)
            .ok_or_else(|| StoreError::not_found("Project user", user_id))?;

        if current == Role::Owner && self.owner_count(id) <= 1 {
            return Err(StoreError::Rejected(
                "a project must keep at least one owner".to_string(),
            ));
        }
        self.memberships.remove(&key);
        Ok(())
    }

    async fn list_project_clients(&self, id: &ProjectId) -> StoreResult<Vec<ProjectClient>> {
        self.require_project(id)?;
        let mut clients: Vec<ProjectClient> = self
            .clients
            .iter()
            .filter(|entry| &entry.value().project_id == id)
            .map(|entry| entry.value().to_client(entry.key()))
            .collect();
        clients.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(clients)
    }

    async fn get_project_client(
        &self,
        id: &ProjectId,
        client_id: &str,
    ) -> StoreResult<Option<ProjectClient>> {
        Ok(self
            .clients
            .get(client_id)
            .filter(|c| &c.project_id == id)
            .map(|c| c.to_client(client_id)))
    }

    async fn create_project_client(
        &self,
        id: &ProjectId,
        name: &str,
        secret_digest: &str,
    ) -> StoreResult<ProjectClient> {
        self.require_project(id)?;
        let client_id = uuid::Uuid::new_v4().to_string();
        let stored = StoredClient {
            project_id: id.clone(),
            name: name.to_string(),
            secret_digest: secret_digest.to_string(),
        };
        let client = stored.to_client(&client_id);
        self.clients.insert(client_id, stored);
        Ok(client)
    }

    async fn reset_project_client_secret(
        &self,
        id: &ProjectId,
        client_id: &str,
        secret_digest: &str,
    ) -> StoreResult<ProjectClient> {
        let mut stored = self.client_of(id, client_id)?;
        stored.secret_digest = secret_digest.to_string();
        let client = stored.to_client(client_id);
        self.clients.insert(client_id.to_string(), stored);
        Ok(client)
    }

    async fn rename_project_client(
        &self,
        id: &ProjectId,
        client_id: &str,
        name: &str,
    ) -> StoreResult<ProjectClient> {
        let mut stored = self.client_of(id, client_id)?;
        stored.name = name.to_string();
        let client = stored.to_client(client_id);
        self.clients.insert(client_id.to_string(), stored);
        Ok(client)
    }

    async fn delete_project_client(&self, id: &ProjectId, client_id: &str) -> StoreResult<()> {
        self.client_of(id, client_id)?;
        self.clients.remove(client_id);
        Ok(())
    }

    async fn list_locales(&self, id: &ProjectId) -> StoreResult<Vec<Locale>> {
        self.require_project(id)?;
        let mut locales: Vec<Locale> = self
            .locales
            .iter()
            .filter(|entry| &entry.key().0 == id)
            .map(|entry| entry.value().clone())
            .collect();
        locales.sort_by(|a, b| a.ident.cmp(&b.ident));
        Ok(locales)
    }

    async fn create_locale(&self, id: &ProjectId, locale: NewLocale) -> StoreResult<Locale> {
        let project = self.require_project(id)?;
        let created = Locale {
            project_id: id.clone(),
            ident: locale.ident.clone(),
            language: locale.language,
            country: locale.country,
            pairs: project
                .keys
                .iter()
                .map(|k| (k.clone(), String::new()))
                .collect(),
        };

        match self.locales.entry(Self::locale_key(id, &locale.ident)) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(StoreError::already_exists("Locale", locale.ident))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(created.clone());
                Ok(created)
            }
        }
    }

    async fn get_locale(&self, id: &ProjectId, ident: &str) -> StoreResult<Option<Locale>> {
        Ok(self
            .locales
            .get(&Self::locale_key(id, ident))
            .map(|l| l.clone()))
    }

    async fn update_locale_pairs(
        &self,
        id: &ProjectId,
        ident: &str,
        pairs: BTreeMap<String, String>,
    ) -> StoreResult<Locale> {
        let project = self.require_project(id)?;
        if let Some(unknown) = pairs.keys().find(|k| !project.keys.contains(k)) {
            return Err(StoreError::Rejected(format!(
                "key {} is not defined in the project",
                unknown
            )));
        }

        let mut locale = self
            .locales
            .get_mut(&Self::locale_key(id, ident))
            .ok_or_else(|| StoreError::not_found("Locale", ident))?;
        locale.pairs.extend(pairs);
        Ok(locale.clone())
    }

    async fn delete_locale(&self, id: &ProjectId, ident: &str) -> StoreResult<()> {
        self.locales
            .remove(&Self::locale_key(id, ident))
            .map(|_| ())
            .ok_or_else(|| StoreError::not_found("Locale", ident))
    }
}
