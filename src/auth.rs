use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::{PgWireError, PgWireResult};
use ulid::Ulid;

use crate::model::Caller;

/// Resolve a startup user name to the caller it acts as. The configured admin
/// name is the operator; any other user name must be the caller's ULID.
pub fn caller_for_user(user: &str, admin_user: &str) -> Option<Caller> {
    if user == admin_user {
        return Some(Caller::admin(Ulid::nil()));
    }
    Ulid::from_string(user).ok().map(Caller::user)
}

/// Shared-password authentication. Users that don't resolve to a caller are
/// refused before the password check.
#[derive(Debug)]
pub struct StayrateAuthSource {
    password: String,
    admin_user: String,
}

impl StayrateAuthSource {
    pub fn new(password: String, admin_user: String) -> Self {
        Self {
            password,
            admin_user,
        }
    }
}

#[async_trait]
impl AuthSource for StayrateAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        let user = login.user().unwrap_or_default();
        if caller_for_user(user, &self.admin_user).is_none() {
            metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL).increment(1);
            tracing::warn!("login refused: user {user:?} is neither admin nor a ULID");
            return Err(PgWireError::InvalidPassword(user.to_owned()));
        }
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_user_is_admin() {
        let caller = caller_for_user("admin", "admin").unwrap();
        assert!(caller.is_admin);
    }

    #[test]
    fn ulid_user_is_plain_caller() {
        let id = Ulid::new();
        let caller = caller_for_user(&id.to_string(), "admin").unwrap();
        assert_eq!(caller, Caller::user(id));
    }

    #[test]
    fn other_names_do_not_resolve() {
        assert!(caller_for_user("postgres", "admin").is_none());
        assert!(caller_for_user("", "admin").is_none());
    }
}
