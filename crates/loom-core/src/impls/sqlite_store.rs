//! SQLite TaskStore / ScheduleStore（永続化）
//!
//! 複数ステップの更新（状態遷移 + イベント、スケジュール発火）は `Transaction` で包み、
//! commit 前にエラーが起きれば drop でロールバックされます。
//! 時刻は UTC のマイクロ秒（INTEGER）で保存するので範囲比較がそのまま使えます。

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::{Type, Value};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, Transaction, params, params_from_iter};
use tracing::debug;

use crate::domain::{Schedule, ScheduleId, Task, TaskEvent, TaskId, TaskStatus};
use crate::ports::{
    Clock, Page, ScheduleFilter, ScheduleStore, StoreError, TaskFilter, TaskStore,
};

const TASK_COLUMNS: &str = "id, scheduler_id, schedule_id, organisation, priority, status, type, hash, payload, created_at, modified_at";
const SCHEDULE_COLUMNS: &str = "id, scheduler_id, organisation, hash, payload, enabled, cron_expression, deadline_at, created_at, modified_at";

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match &e {
            rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation => {
                StoreError::Conflict(e.to_string())
            }
            _ => StoreError::Storage(e.to_string()),
        }
    }
}

fn micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

fn conversion_error(
    idx: usize,
    ty: Type,
    e: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, Box::new(e))
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct ColumnError(String);

fn time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let value: i64 = row.get(idx)?;
    DateTime::from_timestamp_micros(value).ok_or_else(|| {
        conversion_error(idx, Type::Integer, ColumnError(format!("timestamp out of range: {value}")))
    })
}

fn parsed_at<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: T::Err| conversion_error(idx, Type::Text, ColumnError(e.to_string())))
}

fn json_at<T: serde::de::DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, Type::Text, e))
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    let schedule_id: Option<String> = row.get(2)?;
    let schedule_id = schedule_id
        .map(|raw| {
            raw.parse::<ScheduleId>()
                .map_err(|e| conversion_error(2, Type::Text, e))
        })
        .transpose()?;
    Ok(Task {
        id: parsed_at(row, 0)?,
        scheduler_id: row.get(1)?,
        schedule_id,
        organisation: row.get(3)?,
        priority: row.get(4)?,
        status: parsed_at(row, 5)?,
        kind: parsed_at(row, 6)?,
        hash: row.get(7)?,
        payload: json_at(row, 8)?,
        created_at: time_at(row, 9)?,
        modified_at: time_at(row, 10)?,
    })
}

fn schedule_from_row(row: &Row<'_>) -> rusqlite::Result<Schedule> {
    Ok(Schedule {
        id: parsed_at(row, 0)?,
        scheduler_id: row.get(1)?,
        organisation: row.get(2)?,
        hash: row.get(3)?,
        payload: json_at(row, 4)?,
        enabled: row.get(5)?,
        cron_expression: row.get(6)?,
        deadline_at: time_at(row, 7)?,
        created_at: time_at(row, 8)?,
        modified_at: time_at(row, 9)?,
    })
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<TaskEvent> {
    let old_status: Option<String> = row.get(3)?;
    let old_status = old_status
        .map(|raw| {
            raw.parse::<TaskStatus>()
                .map_err(|e| conversion_error(3, Type::Text, ColumnError(e)))
        })
        .transpose()?;
    Ok(TaskEvent {
        seq: row.get::<_, i64>(0)?.max(0) as u64,
        task_id: parsed_at(row, 1)?,
        at: time_at(row, 2)?,
        old_status,
        new_status: parsed_at(row, 4)?,
    })
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Storage(format!("encode payload: {e}")))
}

/// WHERE clause builder for the dynamic list filters.
#[derive(Default)]
struct Conditions {
    clauses: Vec<&'static str>,
    values: Vec<Value>,
}

impl Conditions {
    fn push(&mut self, clause: &'static str, value: Option<Value>) {
        if let Some(value) = value {
            self.clauses.push(clause);
            self.values.push(value);
        }
    }

    fn sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", self.clauses.join(" AND "))
        }
    }
}

fn text(value: &Option<String>) -> Option<Value> {
    value.clone().map(Value::Text)
}

fn time(value: Option<DateTime<Utc>>) -> Option<Value> {
    value.map(|t| Value::Integer(micros(t)))
}

fn insert_task(tx: &Transaction<'_>, task: &Task) -> Result<(), StoreError> {
    tx.execute(
        &format!("INSERT INTO tasks ({TASK_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"),
        params![
            task.id.as_ulid().to_string(),
            task.scheduler_id,
            task.schedule_id.map(|id| id.as_ulid().to_string()),
            task.organisation,
            task.priority,
            task.status.as_str(),
            task.kind.as_str(),
            task.hash,
            to_json(&task.payload)?,
            micros(task.created_at),
            micros(task.modified_at),
        ],
    )?;
    log_event(tx, task.id, task.created_at, None, task.status)
}

fn log_event(
    tx: &Transaction<'_>,
    task_id: TaskId,
    at: DateTime<Utc>,
    old_status: Option<TaskStatus>,
    new_status: TaskStatus,
) -> Result<(), StoreError> {
    tx.execute(
        "INSERT INTO task_events (task_id, at, old_status, new_status) VALUES (?1, ?2, ?3, ?4)",
        params![
            task_id.as_ulid().to_string(),
            micros(at),
            old_status.map(|s| s.as_str()),
            new_status.as_str(),
        ],
    )?;
    Ok(())
}

fn select_task(conn: &Connection, id: TaskId) -> Result<Option<Task>, StoreError> {
    Ok(conn
        .query_row(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1"),
            params![id.as_ulid().to_string()],
            task_from_row,
        )
        .optional()?)
}

fn select_schedule(conn: &Connection, id: ScheduleId) -> Result<Option<Schedule>, StoreError> {
    Ok(conn
        .query_row(
            &format!("SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE id = ?1"),
            params![id.as_ulid().to_string()],
            schedule_from_row,
        )
        .optional()?)
}

pub struct SqliteStore {
    clock: Arc<dyn Clock>,
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(db_path: &Path, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Storage(format!("create {}: {e}", parent.display()))
            })?;
        }
        let conn = Connection::open(db_path)?;
        debug!(path = %db_path.display(), "opened sqlite store");
        Self::init(conn, clock)
    }

    pub fn open_in_memory(clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?, clock)
    }

    fn init(conn: Connection, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(include_str!("../../migrations/0001_init.sql"))?;
        Ok(Self {
            clock,
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn create_task(&self, task: Task) -> Result<Task, StoreError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        insert_task(&tx, &task)?;
        tx.commit()?;
        Ok(task)
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        select_task(&self.conn(), id)
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> Result<Page<Task>, StoreError> {
        let mut conditions = Conditions::default();
        conditions.push("scheduler_id = ?", text(&filter.scheduler_id));
        conditions.push("organisation = ?", text(&filter.organisation));
        conditions.push("status = ?", filter.status.map(|s| Value::Text(s.as_str().into())));
        conditions.push("type = ?", filter.kind.map(|k| Value::Text(k.as_str().into())));
        conditions.push("hash = ?", text(&filter.hash));
        conditions.push("created_at >= ?", time(filter.min_created_at));
        conditions.push("created_at <= ?", time(filter.max_created_at));
        let where_sql = conditions.sql();

        let conn = self.conn();
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM tasks{where_sql}"),
            params_from_iter(conditions.values.iter()),
            |row| row.get(0),
        )?;

        let mut values = conditions.values.clone();
        values.push(Value::Integer(filter.limit as i64));
        values.push(Value::Integer(filter.offset as i64));
        let mut stmt = conn.prepare(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks{where_sql} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
        ))?;
        let results = stmt
            .query_map(params_from_iter(values.iter()), task_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Page {
            count: count.max(0) as usize,
            offset: filter.offset,
            limit: filter.limit,
            results,
        })
    }

    async fn latest_task_by_hash(&self, hash: &str) -> Result<Option<Task>, StoreError> {
        Ok(self
            .conn()
            .query_row(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM tasks WHERE hash = ?1 ORDER BY created_at DESC, id DESC LIMIT 1"
                ),
                params![hash],
                task_from_row,
            )
            .optional()?)
    }

    async fn update_status(&self, id: TaskId, status: TaskStatus) -> Result<Task, StoreError> {
        let now = self.clock.now();
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut task = select_task(&tx, id)?.ok_or_else(|| StoreError::task_not_found(id))?;
        let old = task.transition(status, now)?;
        tx.execute(
            "UPDATE tasks SET status = ?1, modified_at = ?2 WHERE id = ?3",
            params![status.as_str(), micros(now), id.as_ulid().to_string()],
        )?;
        log_event(&tx, id, now, Some(old), status)?;
        tx.commit()?;
        Ok(task)
    }

    async fn update_priority(&self, id: TaskId, priority: i64) -> Result<Task, StoreError> {
        let now = self.clock.now();
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE tasks SET priority = ?1, modified_at = ?2 WHERE id = ?3",
            params![priority, micros(now), id.as_ulid().to_string()],
        )?;
        if changed == 0 {
            return Err(StoreError::task_not_found(id));
        }
        select_task(&conn, id)?.ok_or_else(|| StoreError::task_not_found(id))
    }

    async fn task_events(&self, id: TaskId) -> Result<Vec<TaskEvent>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT seq, task_id, at, old_status, new_status FROM task_events WHERE task_id = ?1 ORDER BY seq",
        )?;
        let events = stmt
            .query_map(params![id.as_ulid().to_string()], event_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(events)
    }
}

#[async_trait]
impl ScheduleStore for SqliteStore {
    async fn create_schedule(&self, schedule: Schedule) -> Result<Schedule, StoreError> {
        self.conn().execute(
            &format!("INSERT INTO schedules ({SCHEDULE_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
            params![
                schedule.id.as_ulid().to_string(),
                schedule.scheduler_id,
                schedule.organisation,
                schedule.hash,
                to_json(&schedule.payload)?,
                schedule.enabled,
                schedule.cron_expression,
                micros(schedule.deadline_at),
                micros(schedule.created_at),
                micros(schedule.modified_at),
            ],
        )?;
        Ok(schedule)
    }

    async fn get_schedule(&self, id: ScheduleId) -> Result<Option<Schedule>, StoreError> {
        select_schedule(&self.conn(), id)
    }

    async fn get_schedule_by_hash(&self, hash: &str) -> Result<Option<Schedule>, StoreError> {
        Ok(self
            .conn()
            .query_row(
                &format!("SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE hash = ?1"),
                params![hash],
                schedule_from_row,
            )
            .optional()?)
    }

    async fn list_schedules(&self, filter: &ScheduleFilter) -> Result<Page<Schedule>, StoreError> {
        let mut conditions = Conditions::default();
        conditions.push("scheduler_id = ?", text(&filter.scheduler_id));
        conditions.push("organisation = ?", text(&filter.organisation));
        conditions.push("enabled = ?", filter.enabled.map(|e| Value::Integer(e as i64)));
        conditions.push("hash = ?", text(&filter.hash));
        conditions.push("deadline_at >= ?", time(filter.min_deadline_at));
        conditions.push("deadline_at <= ?", time(filter.max_deadline_at));
        let where_sql = conditions.sql();

        let conn = self.conn();
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM schedules{where_sql}"),
            params_from_iter(conditions.values.iter()),
            |row| row.get(0),
        )?;

        let mut values = conditions.values.clone();
        values.push(Value::Integer(filter.limit as i64));
        values.push(Value::Integer(filter.offset as i64));
        let mut stmt = conn.prepare(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedules{where_sql} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
        ))?;
        let results = stmt
            .query_map(params_from_iter(values.iter()), schedule_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(Page {
            count: count.max(0) as usize,
            offset: filter.offset,
            limit: filter.limit,
            results,
        })
    }

    async fn update_schedule(&self, schedule: &Schedule) -> Result<Schedule, StoreError> {
        let now = self.clock.now();
        let conn = self.conn();
        let changed = conn.execute(
            "UPDATE schedules SET enabled = ?1, cron_expression = ?2, deadline_at = ?3, payload = ?4, modified_at = ?5 WHERE id = ?6",
            params![
                schedule.enabled,
                schedule.cron_expression,
                micros(schedule.deadline_at),
                to_json(&schedule.payload)?,
                micros(now),
                schedule.id.as_ulid().to_string(),
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::schedule_not_found(schedule.id));
        }
        select_schedule(&conn, schedule.id)?
            .ok_or_else(|| StoreError::schedule_not_found(schedule.id))
    }

    async fn due_schedules(
        &self,
        scheduler_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<Schedule>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE scheduler_id = ?1 AND enabled = 1 AND deadline_at <= ?2 ORDER BY deadline_at, id"
        ))?;
        let due = stmt
            .query_map(params![scheduler_id, micros(now)], schedule_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(due)
    }

    async fn fire_schedule(
        &self,
        schedule_id: ScheduleId,
        task: Task,
        next_deadline: DateTime<Utc>,
    ) -> Result<Task, StoreError> {
        let now = self.clock.now();
        let task = task.with_schedule(schedule_id);
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let changed = tx.execute(
            "UPDATE schedules SET deadline_at = ?1, modified_at = ?2 WHERE id = ?3",
            params![micros(next_deadline), micros(now), schedule_id.as_ulid().to_string()],
        )?;
        if changed == 0 {
            return Err(StoreError::schedule_not_found(schedule_id));
        }
        insert_task(&tx, &task)?;
        tx.commit()?;
        Ok(task)
    }
}
