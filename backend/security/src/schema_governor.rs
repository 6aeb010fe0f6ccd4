//! Namespace enforcement for app-submitted schemas.
//!
//! An app may only define collections named `<its identifier>:<localName>`.

use once_cell::sync::Lazy;
use regex::Regex;
use storehub_core::{AppSchema, ProtocolError, UpdateSchemaError};
use tracing::debug;

static COLLECTION_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z]+)(?::([A-Za-z]+))?$").expect("static regex"));

/// Check every collection in `schema` against the identified app's namespace.
///
/// Stops at the first violation. Pure validation: nothing is persisted here.
pub fn check_app_schema(schema: &AppSchema, identified_app: &str) -> Result<(), ProtocolError> {
    for collection_name in schema.collection_names() {
        let Some(captures) = COLLECTION_NAME_RE.captures(collection_name) else {
            return Err(ProtocolError::schema(
                UpdateSchemaError::BadRequest,
                format!("Cannot create collection with invalid name '{collection_name}'"),
            ));
        };

        let namespace = &captures[1];
        let Some(local_name) = captures.get(2) else {
            return Err(ProtocolError::schema(
                UpdateSchemaError::SchemaNotAllowed,
                format!("Cannot create non-namespaced collection '{collection_name}'"),
            ));
        };

        if namespace != identified_app {
            return Err(ProtocolError::schema(
                UpdateSchemaError::SchemaNotAllowed,
                format!(
                    "Cannot create collection '{}' in app namespace '{namespace}'",
                    local_name.as_str()
                ),
            ));
        }
    }

    debug!(app = %identified_app, collections = schema.collection_definitions.len(), "Schema accepted");
    Ok(())
}
