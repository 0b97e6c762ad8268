//! In-memory accounts, bearer tokens and tasks.
//!
//! The [`Store`] keeps everything behind one lock and validates writes the
//! way the REST collaborator does: failures come back as a list of
//! human-readable messages that the server renders as an `errors` body.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use taskboard_proto::rest::{NewTask, TaskFilters, TaskUpdate};
use taskboard_proto::task::{Task, TaskId, TaskStatus};
use taskboard_proto::user::{Role, User, UserDetails, UserRef};

/// Minimum accepted password length.
const MIN_PASSWORD_LEN: usize = 6;

/// Why a store operation was refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The input failed validation.
    #[error("validation failed: {}", .0.join(", "))]
    Invalid(Vec<String>),

    /// Unknown email or wrong password.
    #[error("Invalid Email or password.")]
    BadCredentials,

    /// No record with that id.
    #[error("not found")]
    NotFound,
}

#[derive(Debug)]
struct Account {
    user: User,
    password: String,
}

#[derive(Debug, Default)]
struct Inner {
    accounts: Vec<Account>,
    tasks: BTreeMap<TaskId, Task>,
    tokens: HashMap<String, u64>,
    last_user_id: u64,
    last_task_id: u64,
    issued_tokens: u64,
}

impl Inner {
    fn user(&self, id: u64) -> Option<&User> {
        self.accounts
            .iter()
            .map(|a| &a.user)
            .find(|user| user.id == id)
    }

    fn user_ref(&self, id: u64) -> Result<UserRef, StoreError> {
        self.user(id)
            .map(User::to_ref)
            .ok_or_else(|| StoreError::Invalid(vec!["Assigned to must exist".to_string()]))
    }

    fn issue_token(&mut self, user_id: u64) -> String {
        self.issued_tokens += 1;
        let token = format!("dev-{user_id}-{:08x}", self.issued_tokens);
        self.tokens.insert(token.clone(), user_id);
        token
    }
}

/// Thread-safe in-memory backing store.
#[derive(Debug, Default)]
pub struct Store {
    inner: RwLock<Inner>,
}

impl Store {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an account without issuing a token.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invalid`] if the email is taken or malformed, or
    /// the password is too short.
    pub fn create_account(
        &self,
        email: &str,
        password: &str,
        role: Role,
    ) -> Result<User, StoreError> {
        let mut inner = self.inner.write();
        let mut errors = Vec::new();
        if email.trim().is_empty() {
            errors.push("Email can't be blank".to_string());
        } else if !email.contains('@') {
            errors.push("Email is invalid".to_string());
        } else if inner.accounts.iter().any(|a| a.user.email == email) {
            errors.push("Email has already been taken".to_string());
        }
        if password.len() < MIN_PASSWORD_LEN {
            errors.push(format!(
                "Password is too short (minimum is {MIN_PASSWORD_LEN} characters)"
            ));
        }
        if !errors.is_empty() {
            return Err(StoreError::Invalid(errors));
        }

        inner.last_user_id += 1;
        let user = User {
            id: inner.last_user_id,
            email: email.to_string(),
            role,
        };
        inner.accounts.push(Account {
            user: user.clone(),
            password: password.to_string(),
        });
        tracing::debug!(user = %user.email, role = %user.role, "account created");
        Ok(user)
    }

    /// Registers a regular user and signs them in.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invalid`] with every validation failure.
    pub fn sign_up(
        &self,
        email: &str,
        password: &str,
        password_confirmation: Option<&str>,
    ) -> Result<(String, User), StoreError> {
        if password_confirmation.is_some_and(|c| c != password) {
            return Err(StoreError::Invalid(vec![
                "Password confirmation doesn't match Password".to_string(),
            ]));
        }
        let user = self.create_account(email, password, Role::User)?;
        let token = self.inner.write().issue_token(user.id);
        Ok((token, user))
    }

    /// Checks a password and issues a fresh token.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::BadCredentials`] for an unknown email or wrong
    /// password.
    pub fn sign_in(&self, email: &str, password: &str) -> Result<(String, User), StoreError> {
        let mut inner = self.inner.write();
        let user = inner
            .accounts
            .iter()
            .find(|a| a.user.email == email && a.password == password)
            .map(|a| a.user.clone())
            .ok_or(StoreError::BadCredentials)?;
        let token = inner.issue_token(user.id);
        Ok((token, user))
    }

    /// The user a token belongs to, if the token is live.
    #[must_use]
    pub fn authenticate(&self, token: &str) -> Option<User> {
        let inner = self.inner.read();
        let id = *inner.tokens.get(token)?;
        inner.user(id).cloned()
    }

    /// Revokes a token. Returns whether it was live.
    pub fn revoke(&self, token: &str) -> bool {
        self.inner.write().tokens.remove(token).is_some()
    }

    /// Users whose email contains `query` (case-insensitive).
    #[must_use]
    pub fn list_users(&self, query: &str) -> Vec<User> {
        let needle = query.to_lowercase();
        self.inner
            .read()
            .accounts
            .iter()
            .filter(|a| a.user.email.to_lowercase().contains(&needle))
            .map(|a| a.user.clone())
            .collect()
    }

    /// A user together with the tasks assigned to them.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown id.
    pub fn user_details(&self, id: u64) -> Result<UserDetails, StoreError> {
        let inner = self.inner.read();
        let user = inner.user(id).ok_or(StoreError::NotFound)?;
        let tasks = inner
            .tasks
            .values()
            .rev()
            .filter(|t| t.assigned_to.as_ref().is_some_and(|u| u.id == id))
            .cloned()
            .collect();
        Ok(UserDetails {
            id: user.id,
            email: user.email.clone(),
            role: user.role,
            tasks,
        })
    }

    /// Tasks matching `filters`, newest first.
    ///
    /// The query matches title, description or assignee email. A date bound
    /// excludes tasks without a due date.
    #[must_use]
    pub fn list_tasks(&self, filters: &TaskFilters) -> Vec<Task> {
        let needle = filters.query.to_lowercase();
        self.inner
            .read()
            .tasks
            .values()
            .rev()
            .filter(|task| {
                needle.is_empty()
                    || task.title.to_lowercase().contains(&needle)
                    || task
                        .description
                        .as_ref()
                        .is_some_and(|d| d.to_lowercase().contains(&needle))
                    || task
                        .assigned_to
                        .as_ref()
                        .is_some_and(|u| u.email.to_lowercase().contains(&needle))
            })
            .filter(|task| filters.status.is_none_or(|s| task.status == s))
            .filter(|task| {
                filters
                    .start_date
                    .is_none_or(|start| task.due_date.is_some_and(|d| d >= start))
            })
            .filter(|task| {
                filters
                    .end_date
                    .is_none_or(|end| task.due_date.is_some_and(|d| d <= end))
            })
            .cloned()
            .collect()
    }

    /// One task.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown id.
    pub fn task(&self, id: TaskId) -> Result<Task, StoreError> {
        self.inner
            .read()
            .tasks
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    /// Creates a task assigned by `creator`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Invalid`] for a blank title or unknown assignee.
    pub fn create_task(&self, creator: &User, new: &NewTask) -> Result<Task, StoreError> {
        if new.title.trim().is_empty() {
            return Err(StoreError::Invalid(vec!["Title can't be blank".to_string()]));
        }
        let mut inner = self.inner.write();
        let assigned_to = new
            .assigned_to_id
            .map(|id| inner.user_ref(id))
            .transpose()?;

        inner.last_task_id += 1;
        let task = Task {
            id: TaskId::new(inner.last_task_id),
            title: new.title.clone(),
            description: new.description.clone(),
            status: TaskStatus::Pending,
            due_date: new.due_date,
            assigned_to,
            assigned_by: Some(creator.to_ref()),
        };
        inner.tasks.insert(task.id, task.clone());
        tracing::debug!(task_id = %task.id, "task created");
        Ok(task)
    }

    /// Applies an update to a task.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown id, or
    /// [`StoreError::Invalid`] for a blank title or unknown assignee.
    pub fn update_task(&self, id: TaskId, update: &TaskUpdate) -> Result<Task, StoreError> {
        if update.title.as_ref().is_some_and(|t| t.trim().is_empty()) {
            return Err(StoreError::Invalid(vec!["Title can't be blank".to_string()]));
        }
        let mut inner = self.inner.write();
        let assigned_to = update
            .assigned_to_id
            .map(|uid| inner.user_ref(uid))
            .transpose()?;
        let task = inner.tasks.get_mut(&id).ok_or(StoreError::NotFound)?;

        if let Some(title) = &update.title {
            task.title.clone_from(title);
        }
        if let Some(description) = &update.description {
            task.description = Some(description.clone());
        }
        if let Some(status) = update.status {
            task.status = status;
        }
        if let Some(due_date) = update.due_date {
            task.due_date = Some(due_date);
        }
        if assigned_to.is_some() {
            task.assigned_to = assigned_to;
        }
        tracing::debug!(task_id = %id, "task updated");
        Ok(task.clone())
    }

    /// Deletes a task.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown id.
    pub fn delete_task(&self, id: TaskId) -> Result<(), StoreError> {
        self.inner
            .write()
            .tasks
            .remove(&id)
            .ok_or(StoreError::NotFound)?;
        tracing::debug!(task_id = %id, "task deleted");
        Ok(())
    }
}
