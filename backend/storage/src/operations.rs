use anyhow::{Result, anyhow, bail};
use serde_json::{Map, Value};

pub type Object = Map<String, Value>;

/// A parsed storage operation.
///
/// Wire form is `[name, collection, ...args]`; the hub strips the name before
/// handing the rest over as positional arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    CreateObject { collection: String, object: Object },
    FindObject { collection: String, filter: Object },
    FindObjects { collection: String, filter: Object },
    CountObjects { collection: String, filter: Object },
    UpdateObjects { collection: String, filter: Object, updates: Object },
    DeleteObjects { collection: String, filter: Object },
}

impl Operation {
    pub fn parse(name: &str, args: &[Value]) -> Result<Self> {
        let collection = || -> Result<String> {
            args.first()
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| anyhow!("{name}: first argument must be a collection name"))
        };
        let object_at = |index: usize, what: &str, required: bool| -> Result<Object> {
            match args.get(index) {
                Some(Value::Object(map)) => Ok(map.clone()),
                None | Some(Value::Null) if !required => Ok(Object::new()),
                _ => bail!("{name}: {what} must be an object"),
            }
        };

        let operation = match name {
            "createObject" => Operation::CreateObject {
                collection: collection()?,
                object: object_at(1, "object", true)?,
            },
            "findObject" => Operation::FindObject {
                collection: collection()?,
                filter: object_at(1, "where", false)?,
            },
            "findObjects" => Operation::FindObjects {
                collection: collection()?,
                filter: object_at(1, "where", false)?,
            },
            "countObjects" => Operation::CountObjects {
                collection: collection()?,
                filter: object_at(1, "where", false)?,
            },
            "updateObjects" => Operation::UpdateObjects {
                collection: collection()?,
                filter: object_at(1, "where", true)?,
                updates: object_at(2, "updates", true)?,
            },
            "deleteObjects" => Operation::DeleteObjects {
                collection: collection()?,
                filter: object_at(1, "where", true)?,
            },
            other => bail!("Unknown storage operation '{other}'"),
        };
        Ok(operation)
    }

    pub fn collection(&self) -> &str {
        match self {
            Operation::CreateObject { collection, .. }
            | Operation::FindObject { collection, .. }
            | Operation::FindObjects { collection, .. }
            | Operation::CountObjects { collection, .. }
            | Operation::UpdateObjects { collection, .. }
            | Operation::DeleteObjects { collection, .. } => collection,
        }
    }
}

/// Field-equality match. An empty filter matches everything.
pub fn matches_filter(object: &Object, filter: &Object) -> bool {
    filter
        .iter()
        .all(|(field, expected)| object.get(field) == Some(expected))
}
