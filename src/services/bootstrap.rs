use secrecy::{ExposeSecret, Secret};

use crate::models::{user::CreateUserData, Role, User};
use crate::services::password::{self, PasswordError};
use crate::services::store::{PrimaryStore, StoreError};

#[derive(thiserror::Error, Debug)]
pub enum BootstrapError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Password(#[from] PasswordError),
}

/// Creates the configured administrator on first start.
///
/// Returns the new user, or `None` when an account with that email exists.
pub async fn ensure_admin_user(
    primary: &dyn PrimaryStore,
    email: &str,
    password: &Secret<String>,
) -> Result<Option<User>, BootstrapError> {
    if primary.find_user_by_email(email).await?.is_some() {
        tracing::debug!(email = %email, "Admin user already present");
        return Ok(None);
    }

    let password_hash = password::hash_password(password.expose_secret())?;
    let user = primary
        .create_user(CreateUserData {
            email: email.to_string(),
            password_hash,
            role: Role::Admin,
            client_id: None,
        })
        .await?;

    tracing::info!(user_id = %user.id, email = %user.email, "Admin user created");

    Ok(Some(user))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store::memory::MemoryPrimaryStore;

    #[tokio::test]
    async fn test_admin_created_once() {
        let store = MemoryPrimaryStore::new();
        let secret = Secret::new("admin-password".to_string());

        let created = ensure_admin_user(&store, "admin@bank.test", &secret)
            .await
            .unwrap();
        let user = created.expect("admin should be created");
        assert_eq!(user.role, Role::Admin);
        assert!(password::verify_password("admin-password", &user.password_hash).unwrap());

        let again = ensure_admin_user(&store, "ADMIN@bank.test", &secret)
            .await
            .unwrap();
        assert!(again.is_none());
    }
}
