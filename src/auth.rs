use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use ulid::Ulid;

use crate::model::Caller;

/// Shared-password auth. The login name is the caller's identity: either the
/// configured admin name or a user ULID.
#[derive(Debug)]
pub struct IntrabookAuthSource {
    password: String,
    admin_user: String,
}

impl IntrabookAuthSource {
    pub fn new(password: String, admin_user: String) -> Self {
        Self { password, admin_user }
    }
}

#[async_trait]
impl AuthSource for IntrabookAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        let user = login.user().unwrap_or_default();
        if let Err(reason) = resolve_caller(user, &self.admin_user) {
            metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL).increment(1);
            tracing::warn!(user, "rejected login: {reason}");
            return Err(PgWireError::UserError(Box::new(ErrorInfo::new(
                "FATAL".into(),
                "28000".into(),
                reason,
            ))));
        }
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

/// Map a login name to the caller it acts as.
pub fn resolve_caller(user: &str, admin_user: &str) -> Result<Caller, String> {
    if user == admin_user {
        return Ok(Caller::admin());
    }
    Ulid::from_string(user)
        .map(Caller::user)
        .map_err(|_| format!("login {user:?} is neither the admin nor a user ULID"))
}
