//! User procedures.

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{Output, Workspace, required};
use crate::models::{Role, User};
use crate::permissions::{Caller, Capability};
use crate::{Error, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateUser {
    pub name: String,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListUsers {
    pub role: Option<Role>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserList {
    pub users: Vec<User>,
    pub count: usize,
}

/// Check the shape of an email address.
pub(crate) fn validate_email(email: &str) -> Result<String> {
    let email = required(email, "Email")?;
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(Error::BadRequest(format!("Invalid email address: {}", email))),
    }
}

/// Create a user. Admin only.
pub fn user_create(ws: &mut Workspace, caller: &Caller, input: CreateUser) -> Result<User> {
    caller.require(Capability::ManageUsers)?;
    let name = required(&input.name, "Name")?;
    let email = validate_email(&input.email)?;

    let user = ws.storage.create_user(&name, &email, input.role)?;
    ws.audit(
        caller,
        "user.create",
        "user",
        Some(user.id),
        &json!({"name": user.name, "email": user.email, "role": user.role}),
    );
    Ok(user)
}

pub fn user_list(ws: &mut Workspace, _caller: &Caller, input: ListUsers) -> Result<UserList> {
    let users = ws.storage.list_users(input.role)?;
    Ok(UserList {
        count: users.len(),
        users,
    })
}

/// The calling user.
pub fn user_me(ws: &mut Workspace, caller: &Caller) -> Result<User> {
    ws.storage.get_user(caller.user_id)
}

impl Output for User {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        format!("#{} {} <{}> [{}]", self.id, self.name, self.email, self.role)
    }
}

impl Output for UserList {
    fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    fn to_human(&self) -> String {
        if self.users.is_empty() {
            return "No users.".to_string();
        }
        let mut lines = vec![format!("{} user(s):", self.count)];
        for user in &self.users {
            lines.push(format!("  {}", user.to_human()));
        }
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::Site;

    #[test]
    fn test_only_admin_creates_users() {
        let mut site = Site::new();
        let manager = site.manager;
        let err = user_create(
            &mut site.ws,
            &manager,
            CreateUser {
                name: "Somchai".to_string(),
                email: "somchai@site.test".to_string(),
                role: Role::FieldEngineer,
            },
        )
        .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
    }

    #[test]
    fn test_create_validates_email_and_uniqueness() {
        let mut site = Site::new();
        let admin = site.admin;
        let bad = user_create(
            &mut site.ws,
            &admin,
            CreateUser {
                name: "X".to_string(),
                email: "not-an-email".to_string(),
                role: Role::Viewer,
            },
        );
        assert!(matches!(bad, Err(Error::BadRequest(_))));

        let dup = user_create(
            &mut site.ws,
            &admin,
            CreateUser {
                name: "Again".to_string(),
                email: "manager@site.test".to_string(),
                role: Role::Viewer,
            },
        );
        assert!(matches!(dup, Err(Error::BadRequest(_))));
    }

    #[test]
    fn test_list_filters_by_role() {
        let mut site = Site::new();
        let viewer = site.viewer;
        let all = user_list(&mut site.ws, &viewer, ListUsers::default()).unwrap();
        assert_eq!(all.count, 5);

        let inspectors = user_list(
            &mut site.ws,
            &viewer,
            ListUsers {
                role: Some(Role::QcInspector),
            },
        )
        .unwrap();
        assert_eq!(inspectors.count, 1);
        assert_eq!(inspectors.users[0].name, "Inspector");

        let me = user_me(&mut site.ws, &viewer).unwrap();
        assert_eq!(me.role, Role::Viewer);
    }
}
