use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::debug;

/// Flat, export-ready view of a provider user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UserRecord {
    pub id: String,
    pub name: String,
    pub phone: String,
    pub email: String,
    pub roles: BTreeSet<String>,
    pub location_ids: BTreeSet<String>,
}

impl UserRecord {
    /// Fold another sighting of the same user into this one.
    pub fn merge(&mut self, other: UserRecord) {
        for (mine, theirs) in [
            (&mut self.name, other.name),
            (&mut self.phone, other.phone),
            (&mut self.email, other.email),
        ] {
            if mine.is_empty() {
                *mine = theirs;
            }
        }
        self.roles.extend(other.roles);
        self.location_ids.extend(other.location_ids);
    }
}

/// Map a raw user object to a [`UserRecord`], defaulting anything missing.
pub fn project(raw: &Value) -> UserRecord {
    let id = text(raw, "id");
    let roles = raw.get("roles");
    if roles.is_none() {
        debug!(user_id = %id, "user has no roles object, defaulting to empty sets");
    }

    UserRecord {
        name: text(raw, "name"),
        phone: text(raw, "phone"),
        email: text(raw, "email"),
        roles: string_set(roles.and_then(|r| r.get("role"))),
        location_ids: string_set(roles.and_then(|r| r.get("locationIds"))),
        id,
    }
}

fn text(raw: &Value, field: &str) -> String {
    match raw.get(field) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => {
            debug!(field, "user field missing, defaulting to empty string");
            String::new()
        }
    }
}

// `role` is sometimes a bare string rather than a list.
fn string_set(value: Option<&Value>) -> BTreeSet<String> {
    match value {
        Some(Value::String(s)) => BTreeSet::from([s.clone()]),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => BTreeSet::new(),
    }
}
