//! `SQLite` queue store.

use super::{acquire_lock, observe, open_connection, timestamp_from_millis};
use crate::models::{ContainerType, GenerationTarget, QueueItem, QueueStats, QueueStatus, Subject};
use crate::storage::traits::QueueStore;
use crate::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::instrument;

const BACKEND: &str = "sqlite";

/// Claim attempts before giving up on a contended queue for this tick.
const CLAIM_ATTEMPTS: usize = 4;

const SELECT_COLUMNS: &str = "id, student_id, grade_level, subject, skill_id, container,
    question_type, priority, status, retry_count, claimed_by, lease_expires_at,
    last_error, created_at, updated_at";

/// Queue store on a `generation_queue` table.
///
/// Claims select the best candidate and then flip its status with
/// `UPDATE ... WHERE id = ? AND status = ?`. Zero changed rows means another
/// worker (possibly in another process) won the race, and the next candidate is
/// tried.
pub struct SqliteQueueStore {
    conn: Mutex<Connection>,
}

impl SqliteQueueStore {
    /// Opens or creates the queue at `db_path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn new(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        let store = Self {
            conn: Mutex::new(open_connection(Some(&db_path))?),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Creates an in-memory queue.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(open_connection(None)?),
        };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&self) -> Result<()> {
        let conn = acquire_lock(&self.conn);
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS generation_queue (
                id TEXT PRIMARY KEY,
                student_id TEXT NOT NULL,
                grade_level TEXT NOT NULL,
                subject TEXT NOT NULL,
                skill_id TEXT NOT NULL,
                container TEXT NOT NULL,
                question_type TEXT NOT NULL,
                priority INTEGER NOT NULL,
                status TEXT NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                claimed_by TEXT,
                lease_expires_at INTEGER,
                last_error TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_queue_claim
                ON generation_queue (status, priority DESC, created_at ASC);
            CREATE INDEX IF NOT EXISTS idx_queue_target
                ON generation_queue (student_id, subject, skill_id, container);",
        )
        .map_err(|e| Error::operation("create_queue_table", e))
    }

    fn fetch(conn: &Connection, id: &str) -> Result<Option<QueueItem>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM generation_queue WHERE id = ?1");
        conn.query_row(&sql, params![id], QueueRow::from_row)
            .optional()
            .map_err(|e| Error::operation("get_queue_item", e))?
            .map(QueueRow::into_item)
            .transpose()
    }

    fn fetch_required(conn: &Connection, id: &str) -> Result<QueueItem> {
        Self::fetch(conn, id)?.ok_or_else(|| Error::not_found("queue item", id))
    }

    /// Writes `item` back if the stored row is still processing under
    /// `worker_id`.
    fn write_transition(conn: &Connection, item: &QueueItem, worker_id: &str) -> Result<bool> {
        let changed = conn
            .execute(
                "UPDATE generation_queue
                 SET status = ?2, retry_count = ?3, claimed_by = ?4, lease_expires_at = ?5,
                     last_error = ?6, updated_at = ?7
                 WHERE id = ?1 AND status = 'processing' AND claimed_by = ?8",
                params![
                    item.id,
                    item.status.as_str(),
                    item.retry_count,
                    item.claimed_by,
                    item.lease_expires_at.map(|t| t.timestamp_millis()),
                    item.last_error,
                    item.updated_at.timestamp_millis(),
                    worker_id,
                ],
            )
            .map_err(|e| Error::operation("update_queue_item", e))?;
        Ok(changed > 0)
    }

    /// Applies a worker's report to `id`. The guarded `UPDATE` loses to any
    /// writer that reclaimed or re-claimed the item since it was read.
    fn transition<F>(&self, id: &str, worker_id: &str, apply: F) -> Result<QueueItem>
    where
        F: FnOnce(&mut QueueItem) -> Result<()>,
    {
        let conn = acquire_lock(&self.conn);
        let mut item = Self::fetch_required(&conn, id)?;
        apply(&mut item)?;
        if Self::write_transition(&conn, &item, worker_id)? {
            return Ok(item);
        }
        Err(Error::LeaseLost {
            item_id: id.to_string(),
            worker_id: worker_id.to_string(),
        })
    }
}

/// Raw row of `generation_queue`.
struct QueueRow {
    id: String,
    student_id: String,
    grade_level: String,
    subject: String,
    skill_id: String,
    container: String,
    question_type: String,
    priority: i32,
    status: String,
    retry_count: u32,
    claimed_by: Option<String>,
    lease_expires_at: Option<i64>,
    last_error: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl QueueRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            student_id: row.get(1)?,
            grade_level: row.get(2)?,
            subject: row.get(3)?,
            skill_id: row.get(4)?,
            container: row.get(5)?,
            question_type: row.get(6)?,
            priority: row.get(7)?,
            status: row.get(8)?,
            retry_count: row.get(9)?,
            claimed_by: row.get(10)?,
            lease_expires_at: row.get(11)?,
            last_error: row.get(12)?,
            created_at: row.get(13)?,
            updated_at: row.get(14)?,
        })
    }

    fn into_item(self) -> Result<QueueItem> {
        let corrupt = |field: &str, value: &str| {
            Error::operation("decode_queue_item", format!("invalid {field} '{value}'"))
        };
        let subject = Subject::parse(&self.subject).ok_or_else(|| corrupt("subject", &self.subject))?;
        let container = ContainerType::parse(&self.container)
            .ok_or_else(|| corrupt("container", &self.container))?;
        let status = QueueStatus::parse(&self.status).ok_or_else(|| corrupt("status", &self.status))?;
        Ok(QueueItem {
            id: self.id,
            target: GenerationTarget {
                student_id: self.student_id,
                grade_level: self.grade_level,
                subject,
                skill_id: self.skill_id,
                container,
                question_type: self.question_type,
            },
            priority: self.priority,
            status,
            retry_count: self.retry_count,
            claimed_by: self.claimed_by,
            lease_expires_at: self.lease_expires_at.map(timestamp_from_millis).transpose()?,
            last_error: self.last_error,
            created_at: timestamp_from_millis(self.created_at)?,
            updated_at: timestamp_from_millis(self.updated_at)?,
        })
    }
}

impl QueueStore for SqliteQueueStore {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    #[instrument(skip(self, item), fields(backend = BACKEND, item_id = %item.id, priority = item.priority))]
    fn enqueue(&self, item: QueueItem) -> Result<QueueItem> {
        observe(BACKEND, "enqueue", || {
            let conn = acquire_lock(&self.conn);
            let inserted = conn
                .execute(
                    "INSERT INTO generation_queue (
                        id, student_id, grade_level, subject, skill_id, container,
                        question_type, priority, status, retry_count, claimed_by,
                        lease_expires_at, last_error, created_at, updated_at
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                     ON CONFLICT(id) DO NOTHING",
                    params![
                        item.id,
                        item.target.student_id,
                        item.target.grade_level,
                        item.target.subject.as_str(),
                        item.target.skill_id,
                        item.target.container.as_str(),
                        item.target.question_type,
                        item.priority,
                        item.status.as_str(),
                        item.retry_count,
                        item.claimed_by,
                        item.lease_expires_at.map(|t| t.timestamp_millis()),
                        item.last_error,
                        item.created_at.timestamp_millis(),
                        item.updated_at.timestamp_millis(),
                    ],
                )
                .map_err(|e| Error::operation("enqueue", e))?;
            if inserted == 0 {
                return Err(Error::Conflict {
                    key: item.id,
                    expected: 0,
                    actual: 1,
                });
            }
            Ok(item)
        })
    }

    #[instrument(skip(self), fields(backend = BACKEND))]
    fn claim_next(
        &self,
        worker_id: &str,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Option<QueueItem>> {
        observe(BACKEND, "claim_next", || {
            let conn = acquire_lock(&self.conn);
            for _ in 0..CLAIM_ATTEMPTS {
                let candidate: Option<(String, String)> = conn
                    .query_row(
                        "SELECT id, status FROM generation_queue
                         WHERE status IN ('pending', 'failed')
                         ORDER BY priority DESC, created_at ASC, rowid ASC
                         LIMIT 1",
                        [],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()
                    .map_err(|e| Error::operation("claim_next", e))?;

                let Some((id, previous)) = candidate else {
                    return Ok(None);
                };

                let changed = conn
                    .execute(
                        "UPDATE generation_queue
                         SET status = 'processing', claimed_by = ?2, lease_expires_at = ?3,
                             updated_at = ?4
                         WHERE id = ?1 AND status = ?5",
                        params![
                            id,
                            worker_id,
                            (now + lease).timestamp_millis(),
                            now.timestamp_millis(),
                            previous,
                        ],
                    )
                    .map_err(|e| Error::operation("claim_next", e))?;

                if changed == 0 {
                    continue;
                }
                return Self::fetch(&conn, &id);
            }
            Ok(None)
        })
    }

    #[instrument(skip(self), fields(backend = BACKEND))]
    fn complete(&self, id: &str, worker_id: &str, now: DateTime<Utc>) -> Result<QueueItem> {
        observe(BACKEND, "complete", || {
            self.transition(id, worker_id, |item| item.mark_completed(worker_id, now))
        })
    }

    #[instrument(skip(self), fields(backend = BACKEND))]
    fn fail(
        &self,
        id: &str,
        worker_id: &str,
        error: &str,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Result<QueueItem> {
        observe(BACKEND, "fail", || {
            self.transition(id, worker_id, |item| {
                item.mark_failed(worker_id, error, max_retries, now)
            })
        })
    }

    #[instrument(skip(self), fields(backend = BACKEND))]
    fn reclaim_expired(&self, max_retries: u32, now: DateTime<Utc>) -> Result<usize> {
        observe(BACKEND, "reclaim_expired", || {
            let conn = acquire_lock(&self.conn);
            conn.execute(
                "UPDATE generation_queue
                 SET retry_count = retry_count + 1,
                     status = CASE WHEN retry_count + 1 > ?2
                         THEN 'permanently_failed' ELSE 'failed' END,
                     claimed_by = NULL, lease_expires_at = NULL,
                     last_error = 'lease expired', updated_at = ?1
                 WHERE status = 'processing' AND lease_expires_at < ?1",
                params![now.timestamp_millis(), max_retries],
            )
            .map_err(|e| Error::operation("reclaim_expired", e))
        })
    }

    fn get(&self, id: &str) -> Result<Option<QueueItem>> {
        observe(BACKEND, "get", || {
            let conn = acquire_lock(&self.conn);
            Self::fetch(&conn, id)
        })
    }

    fn stats(&self) -> Result<QueueStats> {
        observe(BACKEND, "stats", || {
            let conn = acquire_lock(&self.conn);
            let mut stmt = conn
                .prepare("SELECT status, COUNT(*) FROM generation_queue GROUP BY status")
                .map_err(|e| Error::operation("queue_stats", e))?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))
                .map_err(|e| Error::operation("queue_stats", e))?;

            let mut stats = QueueStats::default();
            for row in rows {
                let (status, count) = row.map_err(|e| Error::operation("queue_stats", e))?;
                let Some(status) = QueueStatus::parse(&status) else {
                    tracing::warn!(status = %status, "skipping unknown queue status");
                    continue;
                };
                for _ in 0..count {
                    stats.record(status);
                }
            }
            Ok(stats)
        })
    }

    fn find_open(&self, target: &GenerationTarget) -> Result<Option<QueueItem>> {
        observe(BACKEND, "find_open", || {
            let conn = acquire_lock(&self.conn);
            let sql = format!(
                "SELECT {SELECT_COLUMNS} FROM generation_queue
                 WHERE student_id = ?1 AND grade_level = ?2 AND subject = ?3
                   AND skill_id = ?4 AND container = ?5 AND question_type = ?6
                   AND status IN ('pending', 'processing', 'failed')
                 ORDER BY created_at ASC, rowid ASC
                 LIMIT 1"
            );
            conn.query_row(
                &sql,
                params![
                    target.student_id,
                    target.grade_level,
                    target.subject.as_str(),
                    target.skill_id,
                    target.container.as_str(),
                    target.question_type,
                ],
                QueueRow::from_row,
            )
            .optional()
            .map_err(|e| Error::operation("find_open", e))?
            .map(QueueRow::into_item)
            .transpose()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PRIORITY_DEMAND, PRIORITY_PRELOAD};

    fn now() -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + Duration::days(19_000)
    }

    fn target(skill: &str) -> GenerationTarget {
        GenerationTarget::new(
            "stu",
            "3",
            Subject::SocialStudies,
            skill,
            ContainerType::Experience,
            "short_answer",
        )
    }

    #[test]
    fn test_enqueue_and_get_round_trip_fields() {
        let store = SqliteQueueStore::in_memory().unwrap();
        let item = store
            .enqueue(QueueItem::new(target("civics.1"), PRIORITY_PRELOAD, now()))
            .unwrap();
        let loaded = store.get(&item.id).unwrap().unwrap();
        assert_eq!(loaded, item);
    }

    #[test]
    fn test_claim_order_and_exclusivity() {
        let store = SqliteQueueStore::in_memory().unwrap();
        let preload = store
            .enqueue(QueueItem::new(target("a"), PRIORITY_PRELOAD, now()))
            .unwrap();
        let demand = store
            .enqueue(QueueItem::new(target("b"), PRIORITY_DEMAND, now()))
            .unwrap();

        let lease = Duration::seconds(30);
        let first = store.claim_next("w1", lease, now()).unwrap().unwrap();
        assert_eq!(first.id, demand.id);
        assert_eq!(first.status, QueueStatus::Processing);
        assert_eq!(first.lease_expires_at, Some(now() + lease));

        let second = store.claim_next("w2", lease, now()).unwrap().unwrap();
        assert_eq!(second.id, preload.id);
        assert!(store.claim_next("w3", lease, now()).unwrap().is_none());
    }

    #[test]
    fn test_fail_until_permanent() {
        let store = SqliteQueueStore::in_memory().unwrap();
        let item = store
            .enqueue(QueueItem::new(target("a"), PRIORITY_DEMAND, now()))
            .unwrap();
        let lease = Duration::seconds(30);

        for attempt in 1..=3 {
            store.claim_next("w", lease, now()).unwrap().unwrap();
            let failed = store
                .fail(&item.id, "w", "provider down", 2, now())
                .unwrap();
            assert_eq!(failed.retry_count, attempt);
        }
        let item = store.get(&item.id).unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::PermanentlyFailed);
        assert!(store.claim_next("w", lease, now()).unwrap().is_none());
        assert_eq!(
            store.reclaim_expired(2, now() + Duration::days(1)).unwrap(),
            0
        );
    }

    #[test]
    fn test_report_from_a_lapsed_claim_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");
        let first = SqliteQueueStore::new(&path).unwrap();
        let second = SqliteQueueStore::new(&path).unwrap();
        let item = first
            .enqueue(QueueItem::new(target("a"), PRIORITY_DEMAND, now()))
            .unwrap();
        let lease = Duration::seconds(30);
        first.claim_next("w1", lease, now()).unwrap().unwrap();

        let later = now() + Duration::seconds(31);
        assert_eq!(second.reclaim_expired(3, later).unwrap(), 1);
        second.claim_next("w2", lease, later).unwrap().unwrap();

        assert!(matches!(
            first.fail(&item.id, "w1", "late failure", 3, later),
            Err(Error::LeaseLost { .. })
        ));
        let held = second.get(&item.id).unwrap().unwrap();
        assert_eq!(held.status, QueueStatus::Processing);
        assert_eq!(held.claimed_by.as_deref(), Some("w2"));
        assert_eq!(held.retry_count, 1);
        assert!(first.claim_next("w3", lease, later).unwrap().is_none());

        let done = second.complete(&item.id, "w2", later).unwrap();
        assert_eq!(done.status, QueueStatus::Completed);
    }

    #[test]
    fn test_lapsed_leases_count_toward_retries() {
        let store = SqliteQueueStore::in_memory().unwrap();
        let item = store
            .enqueue(QueueItem::new(target("a"), PRIORITY_DEMAND, now()))
            .unwrap();
        let lease = Duration::seconds(5);
        let mut at = now();
        for attempt in 1..=3u32 {
            store.claim_next("w", lease, at).unwrap().unwrap();
            at += Duration::seconds(6);
            assert_eq!(store.reclaim_expired(2, at).unwrap(), 1);
            assert_eq!(store.get(&item.id).unwrap().unwrap().retry_count, attempt);
        }
        let item = store.get(&item.id).unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::PermanentlyFailed);
        assert_eq!(item.last_error.as_deref(), Some("lease expired"));
        assert!(store.claim_next("w", lease, at).unwrap().is_none());
    }

    #[test]
    fn test_reclaim_and_stats() {
        let store = SqliteQueueStore::in_memory().unwrap();
        store
            .enqueue(QueueItem::new(target("a"), PRIORITY_DEMAND, now()))
            .unwrap();
        store
            .enqueue(QueueItem::new(target("b"), PRIORITY_DEMAND, now()))
            .unwrap();
        store
            .claim_next("w", Duration::seconds(5), now())
            .unwrap()
            .unwrap();

        assert_eq!(
            store.reclaim_expired(3, now() + Duration::seconds(6)).unwrap(),
            1
        );
        let stats = store.stats().unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.open(), 2);
    }

    #[test]
    fn test_find_open_matches_whole_target() {
        let store = SqliteQueueStore::in_memory().unwrap();
        let item = store
            .enqueue(QueueItem::new(target("a"), PRIORITY_DEMAND, now()))
            .unwrap();
        let found = store.find_open(&target("a")).unwrap().unwrap();
        assert_eq!(found.id, item.id);

        let other_type = GenerationTarget {
            question_type: "multiple_choice".to_string(),
            ..target("a")
        };
        assert!(store.find_open(&other_type).unwrap().is_none());
    }

    #[test]
    fn test_two_handles_share_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.db");
        let producer = SqliteQueueStore::new(&path).unwrap();
        let consumer = SqliteQueueStore::new(&path).unwrap();

        let item = producer
            .enqueue(QueueItem::new(target("a"), PRIORITY_DEMAND, now()))
            .unwrap();
        let claimed = consumer
            .claim_next("w", Duration::seconds(30), now())
            .unwrap()
            .unwrap();
        assert_eq!(claimed.id, item.id);
        assert!(
            producer
                .claim_next("w2", Duration::seconds(30), now())
                .unwrap()
                .is_none()
        );
    }
}
