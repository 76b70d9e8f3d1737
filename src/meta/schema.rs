//! SQLite schema definition

/// SQL schema for the pipeline database
pub const SCHEMA_SQL: &str = r#"
-- Repositories: lifecycle projection, one row per registered repository
CREATE TABLE IF NOT EXISTS repositories (
    id TEXT PRIMARY KEY,
    owner TEXT NOT NULL,
    name TEXT NOT NULL,
    url TEXT NOT NULL UNIQUE,
    git_ref TEXT,
    status TEXT NOT NULL,
    last_good_status TEXT,
    generation INTEGER NOT NULL DEFAULT 0,
    commit_hash TEXT,
    indexed_commit TEXT,
    structure_commit TEXT,
    local_path TEXT,
    total_files INTEGER NOT NULL DEFAULT 0,
    total_size_bytes INTEGER NOT NULL DEFAULT 0,
    total_chunks INTEGER NOT NULL DEFAULT 0,
    primary_language TEXT,
    language_breakdown_json TEXT,
    file_tree_json TEXT,
    entry_points_json TEXT,
    force_reingest INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Jobs: one row per pipeline stage execution
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    repository_id TEXT NOT NULL REFERENCES repositories(id),
    kind TEXT NOT NULL,
    status TEXT NOT NULL,
    generation INTEGER NOT NULL,
    force INTEGER NOT NULL DEFAULT 0,
    progress INTEGER NOT NULL DEFAULT 0,
    attempt_count INTEGER NOT NULL DEFAULT 0,
    max_attempts INTEGER NOT NULL,
    error_kind TEXT,
    error_message TEXT,
    run_after TEXT NOT NULL,
    created_at TEXT NOT NULL,
    started_at TEXT,
    finished_at TEXT
);

-- At most one non-terminal job per (repository, kind)
CREATE UNIQUE INDEX IF NOT EXISTS idx_jobs_single_flight
    ON jobs(repository_id, kind) WHERE status IN ('pending', 'running');

-- Events: append-only log behind the repository and job projections
CREATE TABLE IF NOT EXISTS events (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    repository_id TEXT NOT NULL,
    job_id TEXT,
    event TEXT NOT NULL,
    from_status TEXT,
    to_status TEXT,
    detail TEXT,
    created_at TEXT NOT NULL
);

-- Chunks: content-addressed code spans
CREATE TABLE IF NOT EXISTS chunks (
    fingerprint TEXT PRIMARY KEY,
    repository_id TEXT NOT NULL REFERENCES repositories(id),
    commit_hash TEXT NOT NULL,
    file_path TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    start_byte INTEGER NOT NULL,
    end_byte INTEGER NOT NULL,
    language TEXT NOT NULL,
    symbol TEXT,
    content TEXT NOT NULL,
    live INTEGER NOT NULL DEFAULT 1,
    structure_pass TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- Embeddings: one vector per chunk for the current model
CREATE TABLE IF NOT EXISTS embeddings (
    chunk_fingerprint TEXT PRIMARY KEY REFERENCES chunks(fingerprint),
    repository_id TEXT NOT NULL,
    model_id TEXT NOT NULL,
    dimension INTEGER NOT NULL,
    vector BLOB NOT NULL,
    created_at TEXT NOT NULL
);

-- Generated documentation, replaced atomically per type
CREATE TABLE IF NOT EXISTS documents (
    repository_id TEXT NOT NULL REFERENCES repositories(id),
    doc_type TEXT NOT NULL,
    markdown TEXT NOT NULL,
    citations_json TEXT NOT NULL,
    commit_hash TEXT,
    generated_at TEXT NOT NULL,
    PRIMARY KEY (repository_id, doc_type)
);

-- Tutor sessions and their ordered turns
CREATE TABLE IF NOT EXISTS tutor_sessions (
    id TEXT PRIMARY KEY,
    repository_id TEXT NOT NULL REFERENCES repositories(id),
    status TEXT NOT NULL,
    commit_hash TEXT,
    focus TEXT,
    created_at TEXT NOT NULL,
    last_activity_at TEXT NOT NULL,
    closed_at TEXT,
    rolling_summary TEXT
);

CREATE TABLE IF NOT EXISTS tutor_turns (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL REFERENCES tutor_sessions(id),
    position INTEGER NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    citations_json TEXT,
    insufficient_evidence INTEGER NOT NULL DEFAULT 0,
    warning TEXT,
    created_at TEXT NOT NULL,
    UNIQUE(session_id, position)
);

-- Indexes for performance
CREATE INDEX IF NOT EXISTS idx_jobs_queue ON jobs(status, run_after, created_at);
CREATE INDEX IF NOT EXISTS idx_jobs_repo ON jobs(repository_id, created_at);
CREATE INDEX IF NOT EXISTS idx_events_repo ON events(repository_id, seq);
CREATE INDEX IF NOT EXISTS idx_chunks_repo ON chunks(repository_id, live);
CREATE INDEX IF NOT EXISTS idx_chunks_path ON chunks(repository_id, file_path);
CREATE INDEX IF NOT EXISTS idx_embeddings_repo ON embeddings(repository_id, model_id);
CREATE INDEX IF NOT EXISTS idx_turns_session ON tutor_turns(session_id, position);
"#;
