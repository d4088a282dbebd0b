use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

/// Persistence of experiment assignments, so a user keeps their variation across
/// configuration changes.
///
/// Lookups and saves are keyed by user id and experiment id and store variation ids.
pub trait UserProfileService {
    /// Previously saved variation id of `user_id` in `experiment_id`.
    fn lookup(&self, user_id: &str, experiment_id: &str) -> Option<String>;

    /// Remember a fresh bucketing result.
    fn save(&self, user_id: &str, experiment_id: &str, variation_id: &str) {
        let _ = (user_id, experiment_id, variation_id);
    }
}

pub(crate) struct NoopUserProfileService;

impl UserProfileService for NoopUserProfileService {
    fn lookup(&self, _user_id: &str, _experiment_id: &str) -> Option<String> {
        None
    }
}

/// Read-only lookups from a closure.
impl<T: Fn(&str, &str) -> Option<String>> UserProfileService for T {
    fn lookup(&self, user_id: &str, experiment_id: &str) -> Option<String> {
        self(user_id, experiment_id)
    }
}

/// Process-local profile store.
#[derive(Debug, Default)]
pub struct InMemoryUserProfileService {
    // user id -> experiment id -> variation id
    profiles: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl InMemoryUserProfileService {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl UserProfileService for InMemoryUserProfileService {
    fn lookup(&self, user_id: &str, experiment_id: &str) -> Option<String> {
        let profiles = self.profiles.read().ok()?;
        profiles.get(user_id)?.get(experiment_id).cloned()
    }

    fn save(&self, user_id: &str, experiment_id: &str, variation_id: &str) {
        let mut profiles = self.profiles.write().unwrap_or_else(PoisonError::into_inner);
        profiles
            .entry(user_id.to_owned())
            .or_default()
            .insert(experiment_id.to_owned(), variation_id.to_owned());
    }
}
