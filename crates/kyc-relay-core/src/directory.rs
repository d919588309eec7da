//! Lookup of internal users by provider customer resource id.

use crate::{ResourceId, UserId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

#[cfg(test)]
#[path = "directory_tests.rs"]
mod tests;

/// Errors from customer directory lookups
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("Customer directory unavailable: {message}")]
    Unavailable { message: String },
}

/// Maps provider resource ids to internal users
#[async_trait]
pub trait CustomerDirectory: Send + Sync {
    /// `Ok(None)` when the resource belongs to no known user
    async fn user_for_resource(
        &self,
        resource_id: &ResourceId,
    ) -> Result<Option<UserId>, DirectoryError>;
}

// ============================================================================
// In-memory
// ============================================================================

/// Directory held in memory. Clones share the same mapping.
///
/// ```
/// use kyc_relay_core::{CustomerDirectory, InMemoryCustomerDirectory, ResourceId, UserId};
///
/// # tokio_test::block_on(async {
/// let directory = InMemoryCustomerDirectory::new().with_customer(
///     ResourceId::new("1700-anc_ind_cst").unwrap(),
///     UserId::new("user-1").unwrap(),
/// );
///
/// let user = directory
///     .user_for_resource(&ResourceId::new("1700-anc_ind_cst").unwrap())
///     .await
///     .unwrap();
/// assert_eq!(user.unwrap().as_str(), "user-1");
/// # });
/// ```
#[derive(Clone, Default)]
pub struct InMemoryCustomerDirectory {
    entries: Arc<RwLock<HashMap<ResourceId, UserId>>>,
}

impl InMemoryCustomerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, resource_id: ResourceId, user_id: UserId) -> Result<(), DirectoryError> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.insert(resource_id, user_id);
        Ok(())
    }

    /// Builder-style variant of [`insert`](Self::insert). A poisoned lock is
    /// recovered rather than reported; a single map insert cannot be left half done.
    pub fn with_customer(self, resource_id: ResourceId, user_id: UserId) -> Self {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(resource_id, user_id);
        self
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> DirectoryError {
    DirectoryError::Unavailable {
        message: "customer directory lock poisoned".to_string(),
    }
}

#[async_trait]
impl CustomerDirectory for InMemoryCustomerDirectory {
    async fn user_for_resource(
        &self,
        resource_id: &ResourceId,
    ) -> Result<Option<UserId>, DirectoryError> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries.get(resource_id).cloned())
    }
}

// ============================================================================
// PostgreSQL
// ============================================================================

#[cfg(feature = "postgres")]
pub use self::postgres::PostgresCustomerDirectory;

#[cfg(feature = "postgres")]
mod postgres {
    use super::{CustomerDirectory, DirectoryError};
    use crate::{ResourceId, UserId};
    use async_trait::async_trait;
    use sqlx::PgPool;

    /// Directory backed by the `customer_resources` table
    pub struct PostgresCustomerDirectory {
        pool: PgPool,
    }

    impl PostgresCustomerDirectory {
        pub fn new(pool: PgPool) -> Self {
            Self { pool }
        }
    }

    #[async_trait]
    impl CustomerDirectory for PostgresCustomerDirectory {
        async fn user_for_resource(
            &self,
            resource_id: &ResourceId,
        ) -> Result<Option<UserId>, DirectoryError> {
            let row: Option<(String,)> =
                sqlx::query_as("SELECT user_id FROM customer_resources WHERE resource_id = $1")
                    .bind(resource_id.as_str())
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| DirectoryError::Unavailable {
                        message: format!("Failed to look up customer: {}", e),
                    })?;

            row.map(|(user_id,)| {
                UserId::new(user_id).map_err(|e| DirectoryError::Unavailable {
                    message: format!("Stored user id is invalid: {}", e),
                })
            })
            .transpose()
        }
    }
}
