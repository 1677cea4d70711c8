//! Startup schema. Tables are created if missing; idempotent on every boot.

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS world_sessions (
    id                  TEXT PRIMARY KEY,
    title               TEXT,
    world_preset        TEXT NOT NULL,
    running             INTEGER NOT NULL DEFAULT 0,
    tick_label          TEXT NOT NULL,
    post_gen_delay_sec  INTEGER NOT NULL DEFAULT 5,
    active_branch_id    TEXT,
    output_language     TEXT NOT NULL DEFAULT 'zh-cn',
    timeline_start_iso  TEXT NOT NULL,
    timeline_step_value INTEGER NOT NULL DEFAULT 1,
    timeline_step_unit  TEXT NOT NULL DEFAULT 'month',
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS branches (
    id                   TEXT PRIMARY KEY,
    session_id           TEXT NOT NULL REFERENCES world_sessions(id) ON DELETE CASCADE,
    name                 TEXT NOT NULL,
    parent_branch_id     TEXT,
    fork_from_message_id TEXT,
    is_archived          INTEGER NOT NULL DEFAULT 0,
    created_at           TEXT NOT NULL,
    UNIQUE (session_id, name)
);

CREATE TABLE IF NOT EXISTS timeline_messages (
    id                   TEXT PRIMARY KEY,
    session_id           TEXT NOT NULL REFERENCES world_sessions(id) ON DELETE CASCADE,
    branch_id            TEXT NOT NULL REFERENCES branches(id) ON DELETE CASCADE,
    seq                  INTEGER NOT NULL,
    role                 TEXT NOT NULL,
    content              TEXT NOT NULL,
    time_jump_label      TEXT NOT NULL,
    model_provider       TEXT,
    model_name           TEXT,
    token_in             INTEGER,
    token_out            INTEGER,
    is_user_edited       INTEGER NOT NULL DEFAULT 0,
    report_snapshot_json TEXT,
    created_at           TEXT NOT NULL,
    edited_at            TEXT,
    UNIQUE (branch_id, seq)
);

CREATE INDEX IF NOT EXISTS ix_messages_branch_seq
    ON timeline_messages (branch_id, seq);

CREATE TABLE IF NOT EXISTS user_interventions (
    id          TEXT PRIMARY KEY,
    session_id  TEXT NOT NULL REFERENCES world_sessions(id) ON DELETE CASCADE,
    branch_id   TEXT NOT NULL REFERENCES branches(id) ON DELETE CASCADE,
    content     TEXT NOT NULL,
    status      TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    consumed_at TEXT
);

CREATE INDEX IF NOT EXISTS ix_interventions_branch_status
    ON user_interventions (branch_id, status);

CREATE TABLE IF NOT EXISTS provider_configs (
    id                TEXT PRIMARY KEY,
    session_id        TEXT NOT NULL UNIQUE REFERENCES world_sessions(id) ON DELETE CASCADE,
    provider          TEXT NOT NULL,
    base_url          TEXT,
    api_key_encrypted TEXT,
    model_name        TEXT,
    extra_json        TEXT,
    updated_at        TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS memory_items (
    id                 TEXT PRIMARY KEY,
    session_id         TEXT NOT NULL REFERENCES world_sessions(id) ON DELETE CASCADE,
    branch_id          TEXT NOT NULL REFERENCES branches(id) ON DELETE CASCADE,
    source_message_id  TEXT NOT NULL,
    source_message_seq INTEGER NOT NULL,
    source_role        TEXT NOT NULL,
    content            TEXT NOT NULL,
    content_hash       TEXT NOT NULL,
    is_active          INTEGER NOT NULL DEFAULT 1,
    created_at         TEXT NOT NULL,
    invalidated_at     TEXT,
    UNIQUE (branch_id, source_message_id, content_hash)
);

CREATE INDEX IF NOT EXISTS ix_memory_scope_active
    ON memory_items (session_id, branch_id, is_active);

CREATE INDEX IF NOT EXISTS ix_memory_source_message
    ON memory_items (source_message_id);

CREATE TABLE IF NOT EXISTS memory_embeddings (
    id             TEXT PRIMARY KEY,
    memory_item_id TEXT NOT NULL UNIQUE REFERENCES memory_items(id) ON DELETE CASCADE,
    provider       TEXT NOT NULL,
    model_name     TEXT NOT NULL,
    dim            INTEGER NOT NULL,
    vector_json    TEXT NOT NULL,
    vector_norm    REAL NOT NULL,
    created_at     TEXT NOT NULL
);
"#;
