//! Database entity models for sspm-db.
//!
//! Each model maps one table onto a row struct, provides the queries that
//! touch that table, and converts rows into `sspm_discovery` domain types.
//! Enum columns are stored as lower-case text.

pub mod binding_audit_event;
pub mod connector_configuration;
pub mod governance_override;
pub mod posture_input;
pub mod saas_app;
pub mod saas_app_binding;
pub mod sync_run;

pub use binding_audit_event::BindingAuditEventRow;
pub use connector_configuration::ConnectorConfigurationRow;
pub use governance_override::GovernanceOverrideRow;
pub use posture_input::PostureInputDbRow;
pub use saas_app::SaasAppRow;
pub use saas_app_binding::SaasAppBindingRow;
pub use sync_run::{SyncRunRollupRow, SyncRunRow};

use std::str::FromStr;

use sspm_discovery::{ConnectorKind, SourceKey};

use crate::error::DbError;

/// Parse a text enum column.
pub(crate) fn decode<T>(column: &str, value: &str) -> Result<T, DbError>
where
    T: FromStr<Err = String>,
{
    value
        .parse()
        .map_err(|e: String| DbError::Decode(format!("{column}: {e}")))
}

pub(crate) fn decode_opt<T>(column: &str, value: Option<&str>) -> Result<Option<T>, DbError>
where
    T: FromStr<Err = String>,
{
    value.map(|v| decode(column, v)).transpose()
}

/// Split source keys into the parallel arrays bound to `UNNEST($1, $2)`.
pub(crate) fn source_arrays(sources: &[SourceKey]) -> (Vec<String>, Vec<String>) {
    sources
        .iter()
        .map(|s| (s.connector_kind.as_str().to_string(), s.source_name.clone()))
        .unzip()
}

/// Rebuild a source key from its stored columns.
pub(crate) fn source_key(
    connector_kind: &str,
    source_name: String,
) -> sspm_discovery::Result<SourceKey> {
    let kind: ConnectorKind = connector_kind.parse()?;
    Ok(SourceKey::new(kind, source_name))
}
