use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Profile projection of the signed-in admin.
///
/// Only these four fields are kept from whatever the server returns; anything
/// else in the login or verification payload is dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[cfg_attr(feature = "ts", ts(export))]
pub struct SessionUser {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub email: String,
}

impl SessionUser {
    /// Project a server user object onto the session profile.
    ///
    /// Accepts `id` or `_id`, as a string or a number. Returns `None` when the
    /// value is not an object or carries no usable identifier.
    pub fn project(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let id = match obj.get("id").or_else(|| obj.get("_id"))? {
            Value::String(s) if !s.is_empty() => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        let text = |key: &str| {
            obj.get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        Some(Self {
            id,
            name: text("name"),
            role: text("role"),
            email: text("email"),
        })
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.role == role
    }
}

/// The durable copy of the session, stored under a single key.
///
/// Serialized as `{ "adminToken": ..., "admin": { id, name, role, email } }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedRecord {
    #[serde(rename = "adminToken")]
    pub token: String,
    #[serde(rename = "admin")]
    pub user: SessionUser,
}

impl PersistedRecord {
    pub fn new(token: impl Into<String>, user: SessionUser) -> Self {
        Self {
            token: token.into(),
            user,
        }
    }

    /// A record with an empty token is treated the same as no record.
    pub fn has_token(&self) -> bool {
        !self.token.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_project_drops_extra_fields() {
        let raw = json!({
            "id": "64f1c2",
            "name": "Asha Rao",
            "role": "admin",
            "email": "asha@example.com",
            "password": "hash",
            "empId": "E-100"
        });

        let user = SessionUser::project(&raw).expect("projectable user");
        assert_eq!(
            user,
            SessionUser {
                id: "64f1c2".to_string(),
                name: "Asha Rao".to_string(),
                role: "admin".to_string(),
                email: "asha@example.com".to_string(),
            }
        );
    }

    #[test]
    fn test_project_accepts_mongo_id_and_numbers() {
        let user = SessionUser::project(&json!({"_id": "abc", "role": "employee"})).unwrap();
        assert_eq!(user.id, "abc");
        assert_eq!(user.name, "");

        let user = SessionUser::project(&json!({"id": 42})).unwrap();
        assert_eq!(user.id, "42");
    }

    #[test]
    fn test_project_rejects_missing_id() {
        assert!(SessionUser::project(&json!({"name": "No Id"})).is_none());
        assert!(SessionUser::project(&json!({"id": ""})).is_none());
        assert!(SessionUser::project(&json!(null)).is_none());
        assert!(SessionUser::project(&json!("admin")).is_none());
    }

    #[test]
    fn test_persisted_record_wire_shape() {
        let record = PersistedRecord::new(
            "tok",
            SessionUser {
                id: "1".to_string(),
                name: "A".to_string(),
                role: "admin".to_string(),
                email: "a@example.com".to_string(),
            },
        );

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({
                "adminToken": "tok",
                "admin": { "id": "1", "name": "A", "role": "admin", "email": "a@example.com" }
            })
        );
    }
}
