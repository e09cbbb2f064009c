//! Typed access to story contexts, content units and sessions.

use crate::models::{ContentUnit, Session, StoryContext, UnitKey};
use crate::storage::traits::DocumentStore;
use crate::{Error, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::instrument;

/// Key of a session's story context.
#[must_use]
pub fn story_key(session_id: &str) -> String {
    format!("story/{session_id}")
}

/// Key of a content unit.
#[must_use]
pub fn unit_key(key: &UnitKey) -> String {
    format!("unit/{key}")
}

/// Key of a session.
#[must_use]
pub fn session_key(session_id: &str) -> String {
    format!("session/{session_id}")
}

/// Documents that carry the store revision they were read at.
pub trait Versioned: Serialize + DeserializeOwned {
    /// Kind label used in `NotFound` errors.
    const KIND: &'static str;

    /// Revision the value was read at.
    fn revision(&self) -> u64;

    /// Records the revision the value was read at.
    fn set_revision(&mut self, revision: u64);
}

impl Versioned for ContentUnit {
    const KIND: &'static str = "content unit";

    fn revision(&self) -> u64 {
        self.revision
    }

    fn set_revision(&mut self, revision: u64) {
        self.revision = revision;
    }
}

impl Versioned for Session {
    const KIND: &'static str = "session";

    fn revision(&self) -> u64 {
        self.revision
    }

    fn set_revision(&mut self, revision: u64) {
        self.revision = revision;
    }
}

/// Repository over a [`DocumentStore`].
///
/// Every mutation is a read-modify-write: load at revision `r`, apply a pure
/// change, `update(.., r)`. A `Conflict` re-reads and re-applies, up to
/// `max_cas_attempts` times.
#[derive(Clone)]
pub struct RubricRepository {
    store: Arc<dyn DocumentStore>,
    max_cas_attempts: u32,
}

impl RubricRepository {
    /// Default number of compare-and-swap attempts per mutation.
    pub const DEFAULT_CAS_ATTEMPTS: u32 = 8;

    /// Creates a repository.
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            max_cas_attempts: Self::DEFAULT_CAS_ATTEMPTS,
        }
    }

    /// Overrides the number of compare-and-swap attempts (at least one).
    #[must_use]
    pub fn with_max_cas_attempts(mut self, attempts: u32) -> Self {
        self.max_cas_attempts = attempts.max(1);
        self
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    // Story contexts

    /// Loads a story context.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the body cannot be decoded.
    pub fn get_story(&self, session_id: &str) -> Result<Option<StoryContext>> {
        let key = story_key(session_id);
        self.store
            .get(&key)?
            .map(|doc| decode::<StoryContext>(&key, &doc.body))
            .transpose()
    }

    /// Stores a story context. Story contexts are write-once.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`] if the session already has a story.
    pub fn put_story(&self, story: &StoryContext) -> Result<()> {
        self.store
            .put(&story_key(&story.session_id), &encode(story)?)
            .map(|_| ())
    }

    // Content units

    /// Loads a unit.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the body cannot be decoded.
    pub fn get_unit(&self, key: &UnitKey) -> Result<Option<ContentUnit>> {
        self.load(&unit_key(key))
    }

    /// Loads a unit, failing when it has not been planned.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the unit does not exist.
    pub fn require_unit(&self, key: &UnitKey) -> Result<ContentUnit> {
        self.require(&unit_key(key))
    }

    /// Creates a unit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`] if the unit already exists.
    pub fn put_unit(&self, unit: &ContentUnit) -> Result<ContentUnit> {
        self.create(&unit_key(&unit.key), unit)
    }

    /// Writes `unit` if the stored revision still matches `unit.revision`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`] if the unit changed since it was read.
    pub fn update_unit(&self, unit: &ContentUnit) -> Result<ContentUnit> {
        self.replace(&unit_key(&unit.key), unit)
    }

    /// Applies `change` to a unit under compare-and-swap.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the unit does not exist, any error returned by
    /// `change`, or the last [`Error::Conflict`] when attempts run out.
    pub fn mutate_unit<T, F>(&self, key: &UnitKey, change: F) -> Result<(ContentUnit, T)>
    where
        F: FnMut(&mut ContentUnit) -> Result<T>,
    {
        self.mutate(&unit_key(key), change)
    }

    /// Lists every unit of a session.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or a body cannot be decoded.
    pub fn list_units(&self, session_id: &str) -> Result<Vec<ContentUnit>> {
        let prefix = format!("unit/{session_id}/");
        let mut units = Vec::new();
        for key in self.store.list_keys(&prefix)? {
            if let Some(unit) = self.load::<ContentUnit>(&key)? {
                units.push(unit);
            }
        }
        Ok(units)
    }

    // Sessions

    /// Loads a session.
    ///
    /// # Errors
    ///
    /// Returns an error if the store fails or the body cannot be decoded.
    pub fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        self.load(&session_key(session_id))
    }

    /// Loads a session, failing when it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the session does not exist.
    pub fn require_session(&self, session_id: &str) -> Result<Session> {
        self.require(&session_key(session_id))
    }

    /// Creates a session.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`] if the session already exists.
    pub fn put_session(&self, session: &Session) -> Result<Session> {
        self.create(&session_key(&session.session_id), session)
    }

    /// Writes `session` if the stored revision still matches `session.revision`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Conflict`] if the session changed since it was read.
    pub fn update_session(&self, session: &Session) -> Result<Session> {
        self.replace(&session_key(&session.session_id), session)
    }

    /// Applies `change` to a session under compare-and-swap.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the session does not exist, any error returned
    /// by `change`, or the last [`Error::Conflict`] when attempts run out.
    pub fn mutate_session<T, F>(&self, session_id: &str, change: F) -> Result<(Session, T)>
    where
        F: FnMut(&mut Session) -> Result<T>,
    {
        self.mutate(&session_key(session_id), change)
    }

    // Generic plumbing

    fn load<V: Versioned>(&self, key: &str) -> Result<Option<V>> {
        let Some(doc) = self.store.get(key)? else {
            return Ok(None);
        };
        let mut value: V = decode(key, &doc.body)?;
        value.set_revision(doc.revision);
        Ok(Some(value))
    }

    fn require<V: Versioned>(&self, key: &str) -> Result<V> {
        self.load(key)?.ok_or_else(|| Error::not_found(V::KIND, key))
    }

    fn create<V: Versioned + Clone>(&self, key: &str, value: &V) -> Result<V> {
        let doc = self.store.put(key, &encode(value)?)?;
        let mut stored = value.clone();
        stored.set_revision(doc.revision);
        Ok(stored)
    }

    fn replace<V: Versioned + Clone>(&self, key: &str, value: &V) -> Result<V> {
        let doc = self.store.update(key, &encode(value)?, value.revision())?;
        let mut stored = value.clone();
        stored.set_revision(doc.revision);
        Ok(stored)
    }

    #[instrument(skip(self, change), fields(backend = self.store.backend_name()))]
    fn mutate<V, T, F>(&self, key: &str, mut change: F) -> Result<(V, T)>
    where
        V: Versioned + Clone,
        F: FnMut(&mut V) -> Result<T>,
    {
        let mut last_conflict = None;
        for attempt in 1..=self.max_cas_attempts {
            let mut value: V = self.require(key)?;
            let output = change(&mut value)?;
            match self.replace(key, &value) {
                Ok(stored) => return Ok((stored, output)),
                Err(err @ Error::Conflict { .. }) => {
                    tracing::debug!(attempt, error = %err, "compare-and-swap lost, retrying");
                    metrics::counter!("document_cas_conflicts_total").increment(1);
                    last_conflict = Some(err);
                },
                Err(err) => return Err(err),
            }
        }
        Err(last_conflict.unwrap_or_else(|| {
            Error::operation("mutate_document", format!("no attempts made for '{key}'"))
        }))
    }
}

fn encode<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::operation("encode_document", e))
}

fn decode<T: DeserializeOwned>(key: &str, body: &str) -> Result<T> {
    serde_json::from_str(body)
        .map_err(|e| Error::operation("decode_document", format!("{key}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContainerType, DeviceDescriptor, DeviceType, PromptTemplate, Subject};
    use crate::storage::MemoryDocumentStore;
    use chrono::{DateTime, Duration, Utc};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn now() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + Duration::days(19_000)
    }

    fn repo() -> RubricRepository {
        RubricRepository::new(Arc::new(MemoryDocumentStore::new()))
    }

    #[test]
    fn test_keys_follow_families() {
        let key = UnitKey::new("s1", ContainerType::Learn, Subject::SocialStudies);
        assert_eq!(unit_key(&key), "unit/s1/LEARN/social_studies");
        assert_eq!(session_key("s1"), "session/s1");
        assert_eq!(story_key("s1"), "story/s1");
    }

    #[test]
    fn test_unit_revision_is_tracked() {
        let repo = repo();
        let key = UnitKey::new("s1", ContainerType::Learn, Subject::Math);
        let unit = ContentUnit::new(key.clone(), PromptTemplate::new("sys", "user"), now());
        let stored = repo.put_unit(&unit).unwrap();
        assert_eq!(stored.revision, 1);

        let (updated, ()) = repo
            .mutate_unit(&key, |u| {
                u.completed = true;
                Ok(())
            })
            .unwrap();
        assert_eq!(updated.revision, 2);
        assert!(repo.require_unit(&key).unwrap().completed);

        // stale copy loses
        assert!(matches!(
            repo.update_unit(&stored),
            Err(Error::Conflict { .. })
        ));
    }

    #[test]
    fn test_mutate_retries_after_conflict() {
        let repo = repo();
        let session = Session::new(
            "s1",
            "u1",
            "3",
            vec![Subject::Math],
            DeviceDescriptor::new("d1", DeviceType::Desktop),
            now(),
        );
        repo.put_session(&session).unwrap();

        let calls = AtomicU32::new(0);
        let (stored, ()) = repo
            .mutate_session("s1", |s| {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    // a concurrent writer lands between our read and our write
                    let mut other = repo.require_session("s1").unwrap();
                    other.grade_level = "4".to_string();
                    repo.update_session(&other).unwrap();
                }
                s.user_id = "u2".to_string();
                Ok(())
            })
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(stored.grade_level, "4");
        assert_eq!(stored.user_id, "u2");
        assert_eq!(stored.revision, 3);
    }

    #[test]
    fn test_require_missing_session() {
        assert!(matches!(
            repo().require_session("nope"),
            Err(Error::NotFound {
                kind: "session",
                ..
            })
        ));
    }

    #[test]
    fn test_story_is_write_once() {
        let repo = repo();
        let story = StoryContext {
            session_id: "s1".to_string(),
            persona: "Captain Nova".to_string(),
            career: "astronaut".to_string(),
            theme: "space".to_string(),
            setting: "orbital station".to_string(),
            created_at: now(),
        };
        repo.put_story(&story).unwrap();
        assert!(matches!(repo.put_story(&story), Err(Error::Conflict { .. })));
        assert_eq!(repo.get_story("s1").unwrap().unwrap(), story);
    }

    #[test]
    fn test_list_units_for_session_only() {
        let repo = repo();
        for sid in ["s1", "s2"] {
            for container in ContainerType::SEQUENCE {
                let key = UnitKey::new(sid, container, Subject::Math);
                let unit = ContentUnit::new(key, PromptTemplate::new("s", "u"), now());
                repo.put_unit(&unit).unwrap();
            }
        }
        let units = repo.list_units("s1").unwrap();
        assert_eq!(units.len(), 3);
        assert!(units.iter().all(|u| u.key.session_id == "s1" && u.revision == 1));
    }
}
