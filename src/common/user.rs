//! User records and the field validation applied before they reach the store

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use uuid::Uuid;

/// Validated attributes of a user, everything but the id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAttributes {
    pub username: String,
    /// Kept as the JSON number the client sent (25 stays 25, 2.5 stays 2.5)
    pub age: Number,
    pub hobbies: Vec<String>,
}

/// A stored user. The id is assigned by the store and never changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    #[serde(flatten)]
    pub attributes: UserAttributes,
}

impl UserAttributes {
    pub fn new(username: impl Into<String>, age: impl Into<Number>, hobbies: Vec<String>) -> Self {
        Self {
            username: username.into(),
            age: age.into(),
            hobbies,
        }
    }

    /// Checks the invariants serde cannot express (non-empty username).
    pub fn validate(&self) -> Result<()> {
        if self.username.is_empty() {
            return Err(Error::InvalidFields(vec![USERNAME_ERROR.to_string()]));
        }
        Ok(())
    }
}

const USERNAME_ERROR: &str = "username must be a non-empty string";
const AGE_ERROR: &str = "age must be a number";
const HOBBIES_ERROR: &str = "hobbies must be an array of strings";

/// Parse the `{id}` path segment. Only canonical version-4 UUIDs are ids.
pub fn parse_user_id(raw: &str) -> Result<Uuid> {
    if raw.len() != 36 {
        return Err(Error::InvalidUserId);
    }
    match Uuid::parse_str(raw) {
        Ok(id) if id.get_version_num() == 4 => Ok(id),
        _ => Err(Error::InvalidUserId),
    }
}

/// Parse and validate a create/update request body.
pub fn parse_attributes(body: &[u8]) -> Result<UserAttributes> {
    let value: Value = serde_json::from_slice(body).map_err(|_| Error::InvalidBody)?;
    let Value::Object(fields) = value else {
        return Err(Error::InvalidBody);
    };
    attributes_from_object(&fields)
}

fn attributes_from_object(fields: &Map<String, Value>) -> Result<UserAttributes> {
    let present = |name: &str| fields.get(name).filter(|v| !v.is_null());

    let (Some(username), Some(age), Some(hobbies)) =
        (present("username"), present("age"), present("hobbies"))
    else {
        return Err(Error::MissingFields);
    };

    let mut errors = Vec::new();

    let username = match username.as_str() {
        Some(s) if !s.is_empty() => Some(s.to_string()),
        _ => {
            errors.push(USERNAME_ERROR.to_string());
            None
        }
    };

    let age = match age {
        Value::Number(n) => Some(n.clone()),
        _ => {
            errors.push(AGE_ERROR.to_string());
            None
        }
    };

    let hobbies = hobbies.as_array().and_then(|items| {
        items
            .iter()
            .map(|h| h.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
    });
    if hobbies.is_none() {
        errors.push(HOBBIES_ERROR.to_string());
    }

    match (username, age, hobbies) {
        (Some(username), Some(age), Some(hobbies)) => Ok(UserAttributes {
            username,
            age,
            hobbies,
        }),
        _ => Err(Error::InvalidFields(errors)),
    }
}
