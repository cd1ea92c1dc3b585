/// Embedded schema, applied idempotently on every open.
pub(crate) struct Migration {
    pub sql: &'static str,
}

pub(crate) const TASKS_SCHEMA_V1: Migration = Migration {
    sql: r#"
CREATE TABLE IF NOT EXISTS tasks (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id   INTEGER NOT NULL,
    title       TEXT NOT NULL,
    description TEXT,
    due_date    TEXT,
    priority    TEXT NOT NULL DEFAULT 'Medium',
    tags        TEXT NOT NULL DEFAULT '[]',
    completed   INTEGER NOT NULL DEFAULT 0,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tasks_tenant_created_at
    ON tasks (tenant_id, created_at);
"#,
};

pub(crate) const CONVERSATIONS_SCHEMA_V1: Migration = Migration {
    sql: r#"
CREATE TABLE IF NOT EXISTS conversation_turns (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id TEXT NOT NULL,
    role            TEXT NOT NULL,
    content         TEXT NOT NULL,
    created_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_turns_conversation_id
    ON conversation_turns (conversation_id, id);
"#,
};
