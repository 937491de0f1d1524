//! The canonical user store
//!
//! Owned by the coordinator loop and only ever touched from it, so plain
//! `&mut self` methods are enough; there is no lock anywhere.

use crate::common::user::{User, UserAttributes};
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct Store {
    /// Insertion order, stable for the life of the process
    users: Vec<User>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn list(&self) -> Vec<User> {
        self.users.clone()
    }

    pub fn get_by_id(&self, id: &Uuid) -> Option<User> {
        self.users.iter().find(|u| &u.id == id).cloned()
    }

    /// Store a new user under a freshly generated id.
    pub fn create(&mut self, attributes: UserAttributes) -> User {
        let mut id = Uuid::new_v4();
        while self.position(&id).is_some() {
            id = Uuid::new_v4();
        }
        let user = User { id, attributes };
        self.users.push(user.clone());
        user
    }

    /// Replace the attributes of an existing user; the id and position stay.
    pub fn update(&mut self, id: &Uuid, attributes: UserAttributes) -> Option<User> {
        let index = self.position(id)?;
        let user = &mut self.users[index];
        user.attributes = attributes;
        Some(user.clone())
    }

    pub fn remove(&mut self, id: &Uuid) -> bool {
        match self.position(id) {
            Some(index) => {
                self.users.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    fn position(&self, id: &Uuid) -> Option<usize> {
        self.users.iter().position(|u| &u.id == id)
    }
}
