//! SQLite 持久化存储
//!
//! 单连接 + Mutex 串行访问；复合操作包在事务里，与内存实现保持同一原子语义。
//! 时间戳以 RFC3339 文本落库（rusqlite chrono 特性），枚举存文本/整数并在读取时解析。

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::traits::{RecordStore, StoreError};
use crate::model::{
    AgentProfile, AgentStatus, MemoryNote, MessageRecord, MessageKind, Person, Priority, Request,
    RequestStatus, Task, TaskStatus,
};

/// SQLite 版记录存储
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path).map_err(backend)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.lock();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS people (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                role TEXT,
                team_id TEXT,
                expertise TEXT NOT NULL,
                platform_id TEXT,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS agents (
                id TEXT PRIMARY KEY,
                person_id TEXT NOT NULL UNIQUE,
                status TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS requests (
                id TEXT PRIMARY KEY,
                from_person_id TEXT NOT NULL,
                to_person_id TEXT,
                to_team_id TEXT,
                subject TEXT NOT NULL,
                description TEXT NOT NULL,
                context TEXT NOT NULL,
                status TEXT NOT NULL,
                priority INTEGER NOT NULL,
                due_date TEXT,
                follow_up_count INTEGER NOT NULL DEFAULT 0,
                last_follow_up TEXT,
                response TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                completed_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_requests_from ON requests(from_person_id);
            CREATE INDEX IF NOT EXISTS idx_requests_status ON requests(status);
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                owner_person_id TEXT NOT NULL,
                request_id TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                status TEXT NOT NULL,
                priority INTEGER NOT NULL,
                due_date TEXT,
                created_at TEXT NOT NULL,
                completed_at TEXT,
                UNIQUE(owner_person_id, request_id)
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_owner ON tasks(owner_person_id);
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                from_person_id TEXT NOT NULL,
                to_person_id TEXT,
                request_id TEXT,
                kind TEXT NOT NULL,
                content TEXT NOT NULL,
                is_public INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_request ON messages(request_id);
            CREATE TABLE IF NOT EXISTS memory_notes (
                id TEXT PRIMARY KEY,
                owner_person_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                content TEXT NOT NULL,
                source TEXT NOT NULL,
                tags TEXT NOT NULL,
                is_public INTEGER NOT NULL DEFAULT 0,
                expires_at TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_notes_owner ON memory_notes(owner_person_id);",
        )
        .map_err(backend)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn json_vec(v: &[String]) -> String {
    serde_json::to_string(v).unwrap_or_else(|_| "[]".to_string())
}

fn parse_json_vec(s: &str) -> Vec<String> {
    serde_json::from_str(s).unwrap_or_default()
}

fn row_to_person(row: &Row<'_>) -> rusqlite::Result<Person> {
    Ok(Person {
        id: row.get("id")?,
        name: row.get("name")?,
        role: row.get("role")?,
        team_id: row.get("team_id")?,
        expertise: parse_json_vec(&row.get::<_, String>("expertise")?),
        platform_id: row.get("platform_id")?,
        created_at: row.get("created_at")?,
    })
}

fn row_to_agent(row: &Row<'_>) -> rusqlite::Result<AgentProfile> {
    Ok(AgentProfile {
        id: row.get("id")?,
        person_id: row.get("person_id")?,
        status: AgentStatus::parse(&row.get::<_, String>("status")?),
        created_at: row.get("created_at")?,
    })
}

fn row_to_request(row: &Row<'_>) -> rusqlite::Result<Request> {
    Ok(Request {
        id: row.get("id")?,
        from_person_id: row.get("from_person_id")?,
        to_person_id: row.get("to_person_id")?,
        to_team_id: row.get("to_team_id")?,
        subject: row.get("subject")?,
        description: row.get("description")?,
        context: row.get("context")?,
        status: RequestStatus::parse(&row.get::<_, String>("status")?),
        priority: Priority::parse(row.get::<_, i32>("priority")?),
        due_date: row.get("due_date")?,
        follow_up_count: row.get::<_, i64>("follow_up_count")? as u32,
        last_follow_up: row.get("last_follow_up")?,
        response: row.get("response")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
        completed_at: row.get("completed_at")?,
    })
}

fn row_to_task(row: &Row<'_>) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get("id")?,
        owner_person_id: row.get("owner_person_id")?,
        request_id: row.get("request_id")?,
        title: row.get("title")?,
        description: row.get("description")?,
        status: TaskStatus::parse(&row.get::<_, String>("status")?),
        priority: Priority::parse(row.get::<_, i32>("priority")?),
        due_date: row.get("due_date")?,
        created_at: row.get("created_at")?,
        completed_at: row.get("completed_at")?,
    })
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<MessageRecord> {
    Ok(MessageRecord {
        id: row.get("id")?,
        from_person_id: row.get("from_person_id")?,
        to_person_id: row.get("to_person_id")?,
        request_id: row.get("request_id")?,
        kind: MessageKind::parse(&row.get::<_, String>("kind")?),
        content: row.get("content")?,
        is_public: row.get("is_public")?,
        created_at: row.get("created_at")?,
    })
}

fn row_to_note(row: &Row<'_>) -> rusqlite::Result<MemoryNote> {
    Ok(MemoryNote {
        id: row.get("id")?,
        owner_person_id: row.get("owner_person_id")?,
        kind: row.get("kind")?,
        content: row.get("content")?,
        source: row.get("source")?,
        tags: parse_json_vec(&row.get::<_, String>("tags")?),
        is_public: row.get("is_public")?,
        expires_at: row.get("expires_at")?,
        created_at: row.get("created_at")?,
    })
}

fn insert_request(conn: &Connection, request: &Request) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO requests (id, from_person_id, to_person_id, to_team_id, subject,
            description, context, status, priority, due_date, follow_up_count,
            last_follow_up, response, created_at, updated_at, completed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
        params![
            request.id,
            request.from_person_id,
            request.to_person_id,
            request.to_team_id,
            request.subject,
            request.description,
            request.context,
            request.status.as_str(),
            request.priority as i32,
            request.due_date,
            request.follow_up_count as i64,
            request.last_follow_up,
            request.response,
            request.created_at,
            request.updated_at,
            request.completed_at,
        ],
    )
    .map_err(backend)?;
    Ok(())
}

fn insert_task(conn: &Connection, task: &Task) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO tasks (id, owner_person_id, request_id, title, description,
            status, priority, due_date, created_at, completed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            task.id,
            task.owner_person_id,
            task.request_id,
            task.title,
            task.description,
            task.status.as_str(),
            task.priority as i32,
            task.due_date,
            task.created_at,
            task.completed_at,
        ],
    )
    .map_err(backend)?;
    Ok(())
}

fn fetch_request(conn: &Connection, id: &str) -> Result<Option<Request>, StoreError> {
    conn.query_row("SELECT * FROM requests WHERE id = ?1", params![id], |row| {
        row_to_request(row)
    })
    .optional()
    .map_err(backend)
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn create_person(&self, person: Person) -> Result<Person, StoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT OR REPLACE INTO people (id, name, role, team_id, expertise, platform_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                person.id,
                person.name,
                person.role,
                person.team_id,
                json_vec(&person.expertise),
                person.platform_id,
                person.created_at,
            ],
        )
        .map_err(backend)?;
        Ok(person)
    }

    async fn get_person(&self, id: &str) -> Result<Option<Person>, StoreError> {
        let conn = self.lock();
        conn.query_row("SELECT * FROM people WHERE id = ?1", params![id], |row| {
            row_to_person(row)
        })
        .optional()
        .map_err(backend)
    }

    async fn list_people(&self) -> Result<Vec<Person>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM people ORDER BY created_at ASC")
            .map_err(backend)?;
        let people = stmt
            .query_map([], row_to_person)
            .map_err(backend)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(backend)?;
        Ok(people)
    }

    async fn update_person(&self, person: Person) -> Result<(), StoreError> {
        let conn = self.lock();
        let changed = conn
            .execute(
                "UPDATE people SET name = ?2, role = ?3, team_id = ?4, expertise = ?5,
                    platform_id = ?6 WHERE id = ?1",
                params![
                    person.id,
                    person.name,
                    person.role,
                    person.team_id,
                    json_vec(&person.expertise),
                    person.platform_id,
                ],
            )
            .map_err(backend)?;
        if changed == 0 {
            return Err(StoreError::NotFound(person.id));
        }
        Ok(())
    }

    async fn create_agent(&self, agent: AgentProfile) -> Result<AgentProfile, StoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT OR REPLACE INTO agents (id, person_id, status, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                agent.id,
                agent.person_id,
                agent.status.as_str(),
                agent.created_at
            ],
        )
        .map_err(backend)?;
        Ok(agent)
    }

    async fn get_agent_by_person(
        &self,
        person_id: &str,
    ) -> Result<Option<AgentProfile>, StoreError> {
        let conn = self.lock();
        conn.query_row(
            "SELECT * FROM agents WHERE person_id = ?1",
            params![person_id],
            row_to_agent,
        )
        .optional()
        .map_err(backend)
    }

    async fn set_agent_status(
        &self,
        person_id: &str,
        status: AgentStatus,
    ) -> Result<(), StoreError> {
        let conn = self.lock();
        let changed = conn
            .execute(
                "UPDATE agents SET status = ?2 WHERE person_id = ?1",
                params![person_id, status.as_str()],
            )
            .map_err(backend)?;
        if changed == 0 {
            return Err(StoreError::NotFound(person_id.to_string()));
        }
        Ok(())
    }

    async fn list_agents(
        &self,
        status: Option<AgentStatus>,
    ) -> Result<Vec<AgentProfile>, StoreError> {
        let conn = self.lock();
        let agents = match status {
            Some(s) => {
                let mut stmt = conn
                    .prepare("SELECT * FROM agents WHERE status = ?1 ORDER BY created_at ASC")
                    .map_err(backend)?;
                let rows = stmt
                    .query_map(params![s.as_str()], row_to_agent)
                    .map_err(backend)?
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(backend)?;
                rows
            }
            None => {
                let mut stmt = conn
                    .prepare("SELECT * FROM agents ORDER BY created_at ASC")
                    .map_err(backend)?;
                let rows = stmt
                    .query_map([], row_to_agent)
                    .map_err(backend)?
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(backend)?;
                rows
            }
        };
        Ok(agents)
    }

    async fn create_request_with_task(
        &self,
        request: Request,
        task: Task,
    ) -> Result<(Request, Task), StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(backend)?;
        insert_request(&tx, &request)?;
        insert_task(&tx, &task)?;
        tx.commit().map_err(backend)?;
        Ok((request, task))
    }

    async fn get_request(&self, id: &str) -> Result<Option<Request>, StoreError> {
        let conn = self.lock();
        fetch_request(&conn, id)
    }

    async fn list_requests_from(&self, person_id: &str) -> Result<Vec<Request>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT * FROM requests WHERE from_person_id = ?1
                 ORDER BY priority DESC, created_at ASC",
            )
            .map_err(backend)?;
        let requests = stmt
            .query_map(params![person_id], row_to_request)
            .map_err(backend)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(backend)?;
        Ok(requests)
    }

    async fn update_request_status(
        &self,
        id: &str,
        status: RequestStatus,
        now: DateTime<Utc>,
    ) -> Result<Request, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(backend)?;

        let request =
            fetch_request(&tx, id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if request.is_terminal() {
            return Err(StoreError::AlreadyTerminal(id.to_string()));
        }

        tx.execute(
            "UPDATE requests SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status.as_str(), now],
        )
        .map_err(backend)?;
        let updated =
            fetch_request(&tx, id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        tx.commit().map_err(backend)?;
        Ok(updated)
    }

    async fn complete_request(
        &self,
        id: &str,
        response: &str,
        now: DateTime<Utc>,
    ) -> Result<(Request, Option<Task>), StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(backend)?;

        let request =
            fetch_request(&tx, id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if request.is_terminal() {
            return Err(StoreError::AlreadyTerminal(id.to_string()));
        }

        tx.execute(
            "UPDATE requests SET status = 'completed', response = ?2,
                updated_at = ?3, completed_at = ?3 WHERE id = ?1",
            params![id, response, now],
        )
        .map_err(backend)?;
        tx.execute(
            "UPDATE tasks SET status = 'completed', completed_at = ?2
             WHERE request_id = ?1 AND status != 'completed'",
            params![id, now],
        )
        .map_err(backend)?;

        let updated =
            fetch_request(&tx, id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let task = tx
            .query_row(
                "SELECT * FROM tasks WHERE request_id = ?1 ORDER BY created_at ASC LIMIT 1",
                params![id],
                row_to_task,
            )
            .optional()
            .map_err(backend)?;

        tx.commit().map_err(backend)?;
        Ok((updated, task))
    }

    async fn cancel_request(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Result<Request, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(backend)?;

        let request =
            fetch_request(&tx, id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if request.is_terminal() {
            return Err(StoreError::AlreadyTerminal(id.to_string()));
        }

        tx.execute(
            "UPDATE requests SET status = 'cancelled', updated_at = ?2 WHERE id = ?1",
            params![id, now],
        )
        .map_err(backend)?;
        tx.execute(
            "UPDATE tasks SET status = 'deferred' WHERE request_id = ?1 AND status != 'completed'",
            params![id],
        )
        .map_err(backend)?;

        let updated =
            fetch_request(&tx, id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        tx.commit().map_err(backend)?;
        Ok(updated)
    }

    async fn record_follow_up(
        &self,
        id: &str,
        max_follow_ups: u32,
        now: DateTime<Utc>,
    ) -> Result<Option<Request>, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(backend)?;

        let request =
            fetch_request(&tx, id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        if request.is_terminal() || request.follow_up_count >= max_follow_ups {
            return Ok(None);
        }

        tx.execute(
            "UPDATE requests SET follow_up_count = follow_up_count + 1,
                last_follow_up = ?2, updated_at = ?2 WHERE id = ?1",
            params![id, now],
        )
        .map_err(backend)?;
        let updated =
            fetch_request(&tx, id)?.ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        tx.commit().map_err(backend)?;
        Ok(Some(updated))
    }

    async fn create_task(&self, task: Task) -> Result<Task, StoreError> {
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(backend)?;

        if fetch_request(&tx, &task.request_id)?.is_none() {
            return Err(StoreError::NotFound(task.request_id));
        }
        let existing: i64 = tx
            .query_row(
                "SELECT COUNT(*) FROM tasks WHERE owner_person_id = ?1 AND request_id = ?2",
                params![task.owner_person_id, task.request_id],
                |row| row.get(0),
            )
            .map_err(backend)?;
        if existing > 0 {
            return Err(StoreError::DuplicateTask(task.request_id));
        }

        insert_task(&tx, &task)?;
        tx.commit().map_err(backend)?;
        Ok(task)
    }

    async fn get_task(&self, id: &str) -> Result<Option<Task>, StoreError> {
        let conn = self.lock();
        conn.query_row("SELECT * FROM tasks WHERE id = ?1", params![id], row_to_task)
            .optional()
            .map_err(backend)
    }

    async fn pending_tasks(&self, owner_person_id: &str) -> Result<Vec<Task>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare(
                "SELECT * FROM tasks WHERE owner_person_id = ?1 AND status = 'pending'
                 ORDER BY priority DESC, created_at ASC",
            )
            .map_err(backend)?;
        let tasks = stmt
            .query_map(params![owner_person_id], row_to_task)
            .map_err(backend)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(backend)?;
        Ok(tasks)
    }

    async fn append_message(
        &self,
        message: MessageRecord,
    ) -> Result<MessageRecord, StoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO messages (id, from_person_id, to_person_id, request_id, kind,
                content, is_public, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                message.id,
                message.from_person_id,
                message.to_person_id,
                message.request_id,
                message.kind.as_str(),
                message.content,
                message.is_public,
                message.created_at,
            ],
        )
        .map_err(backend)?;
        Ok(message)
    }

    async fn messages_for_request(
        &self,
        request_id: &str,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM messages WHERE request_id = ?1 ORDER BY created_at ASC")
            .map_err(backend)?;
        let messages = stmt
            .query_map(params![request_id], row_to_message)
            .map_err(backend)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(backend)?;
        Ok(messages)
    }

    async fn create_memory_note(&self, note: MemoryNote) -> Result<MemoryNote, StoreError> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO memory_notes (id, owner_person_id, kind, content, source, tags,
                is_public, expires_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                note.id,
                note.owner_person_id,
                note.kind,
                note.content,
                note.source,
                json_vec(&note.tags),
                note.is_public,
                note.expires_at,
                note.created_at,
            ],
        )
        .map_err(backend)?;
        Ok(note)
    }

    async fn search_memory_notes(
        &self,
        owner_person_id: &str,
        query: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<MemoryNote>, StoreError> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT * FROM memory_notes WHERE owner_person_id = ?1")
            .map_err(backend)?;
        let notes = stmt
            .query_map(params![owner_person_id], row_to_note)
            .map_err(backend)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(backend)?;
        Ok(notes.into_iter().filter(|n| n.matches(query, now)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_store() -> (SqliteStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open(dir.path().join("courier.db")).unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_person_round_trip() {
        let (store, _dir) = open_store();

        let person = Person::new("Sarah")
            .with_role("analyst")
            .with_expertise(vec!["finance".to_string(), "reports".to_string()]);
        store.create_person(person.clone()).await.unwrap();

        let loaded = store.get_person(&person.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "Sarah");
        assert_eq!(loaded.role.as_deref(), Some("analyst"));
        assert_eq!(loaded.expertise, vec!["finance", "reports"]);
    }

    #[tokio::test]
    async fn test_request_task_round_trip_and_complete() {
        let (store, _dir) = open_store();

        let request = Request::new("person_a", "Q4 report", "Send the Q4 report")
            .with_target("person_b")
            .with_context("I need the Q4 report");
        let task = Task::mirror(&request, "person_b");
        store
            .create_request_with_task(request.clone(), task.clone())
            .await
            .unwrap();

        let loaded = store.get_request(&request.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, RequestStatus::Pending);
        assert_eq!(loaded.context, "I need the Q4 report");

        let now = Utc::now();
        let (done, done_task) = store
            .complete_request(&request.id, "attached", now)
            .await
            .unwrap();
        assert_eq!(done.status, RequestStatus::Completed);
        assert_eq!(done.response.as_deref(), Some("attached"));
        assert_eq!(done_task.unwrap().status, TaskStatus::Completed);

        let second = store.complete_request(&request.id, "again", now).await;
        assert!(matches!(second, Err(StoreError::AlreadyTerminal(_))));
    }

    #[tokio::test]
    async fn test_follow_up_counter_persists() {
        let (store, _dir) = open_store();

        let request = Request::new("person_a", "ping", "please reply").with_target("person_b");
        let task = Task::mirror(&request, "person_b");
        store.create_request_with_task(request.clone(), task).await.unwrap();

        let now = Utc::now();
        store.record_follow_up(&request.id, 3, now).await.unwrap();
        store.record_follow_up(&request.id, 3, now).await.unwrap();

        let loaded = store.get_request(&request.id).await.unwrap().unwrap();
        assert_eq!(loaded.follow_up_count, 2);
        assert!(loaded.last_follow_up.is_some());
    }

    #[tokio::test]
    async fn test_duplicate_task_rejected() {
        let (store, _dir) = open_store();

        let request = Request::new("person_a", "subject", "ask").with_target("person_b");
        let task = Task::mirror(&request, "person_b");
        store.create_request_with_task(request.clone(), task).await.unwrap();

        let result = store.create_task(Task::mirror(&request, "person_b")).await;
        assert!(matches!(result, Err(StoreError::DuplicateTask(_))));
    }

    #[tokio::test]
    async fn test_pending_tasks_ordering() {
        let (store, _dir) = open_store();

        let normal = Request::new("person_a", "normal", "ask").with_target("person_b");
        let normal_task = Task::mirror(&normal, "person_b");
        store.create_request_with_task(normal, normal_task.clone()).await.unwrap();

        let urgent = Request::new("person_a", "urgent", "ask")
            .with_target("person_b")
            .with_priority(Priority::Urgent);
        let urgent_task = Task::mirror(&urgent, "person_b");
        store.create_request_with_task(urgent, urgent_task.clone()).await.unwrap();

        let tasks = store.pending_tasks("person_b").await.unwrap();
        assert_eq!(tasks[0].id, urgent_task.id);
        assert_eq!(tasks[1].id, normal_task.id);
    }
}
