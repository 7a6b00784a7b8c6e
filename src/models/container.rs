//! Represents a container, the top-level namespace for objects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A storage container row in the local SQLite backend.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Container {
    /// Unique identifier for this container (UUID for internal DB use).
    pub id: Uuid,

    /// Container name, unique per account.
    pub name: String,

    /// When this container was created.
    pub created_at: DateTime<Utc>,
}
