//! PostgreSQL storage for the SSPM discovery engine.
//!
//! Implements the `sspm_discovery` store traits on top of `sqlx`:
//!
//! - [`PgDiscoveryStore`] - apps, bindings, posture inputs, overrides, sync runs
//! - [`PgConnectorRegistry`] - connector runtime configuration
//! - [`PgBindingAuditStore`] - administrator audit trail
//!
//! Binding writes use a conditional `ON CONFLICT ... DO UPDATE ... WHERE`
//! so an automatic claim never overwrites a manual binding, even under
//! concurrent writers.
//!
//! # Example
//!
//! ```rust,ignore
//! use sspm_db::{run_migrations, DbPool, PgDiscoveryStore};
//!
//! let pool = DbPool::connect(&database_url).await?;
//! run_migrations(&pool).await?;
//! let store = PgDiscoveryStore::new(pool.clone());
//! ```

pub mod audit;
pub mod error;
pub mod migrations;
pub mod models;
pub mod pool;
pub mod registry;
pub mod store;

pub use audit::PgBindingAuditStore;
pub use error::DbError;
pub use migrations::run_migrations;
pub use pool::{DbPool, PoolSettings};
pub use registry::PgConnectorRegistry;
pub use store::{PgDiscoveryStore, ACTOR_WINDOW_DAYS};
