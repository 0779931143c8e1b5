//! Database schema definitions

/// SQL to create the primary key counters table
pub const CREATE_PRIMARY_KEYS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS primary_keys (
    table_name TEXT PRIMARY KEY,
    current_id INTEGER NOT NULL
)
"#;

pub const CREATE_RUNS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY,
    job_id TEXT UNIQUE,
    date INTEGER NOT NULL,
    commit_hash TEXT,
    kind TEXT,
    repository TEXT,
    status TEXT NOT NULL DEFAULT 'finished',
    status_description TEXT
)
"#;

/// Shared strings; (contents, kind) is the natural key
pub const CREATE_SHARED_TEXTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS shared_texts (
    id INTEGER PRIMARY KEY,
    contents TEXT NOT NULL,
    kind TEXT NOT NULL DEFAULT 'feature',
    UNIQUE(contents, kind)
)
"#;

pub const CREATE_ISSUES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS issues (
    id INTEGER PRIMARY KEY,
    handle TEXT NOT NULL UNIQUE,
    code INTEGER NOT NULL,
    callable TEXT NOT NULL,
    filename TEXT,
    first_seen INTEGER NOT NULL,
    run_id INTEGER,
    json TEXT
)
"#;

pub const CREATE_ISSUE_INSTANCE_FIX_INFO_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS issue_instance_fix_info (
    id INTEGER PRIMARY KEY,
    fix_info TEXT NOT NULL
)
"#;

pub const CREATE_ISSUE_INSTANCES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS issue_instances (
    id INTEGER PRIMARY KEY,
    location TEXT NOT NULL,
    filename TEXT,
    taint_locations TEXT,
    is_new_issue INTEGER NOT NULL DEFAULT 0,
    run_id INTEGER NOT NULL,
    issue_id INTEGER NOT NULL,
    fix_info_id INTEGER,
    message_id INTEGER,
    min_trace_length_to_sources INTEGER,
    min_trace_length_to_sinks INTEGER,
    rank INTEGER NOT NULL DEFAULT 0,
    callable_count INTEGER NOT NULL DEFAULT 0
)
"#;

pub const CREATE_TRACE_FRAMES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS trace_frames (
    id INTEGER PRIMARY KEY,
    kind TEXT NOT NULL,
    caller TEXT NOT NULL,
    caller_port TEXT NOT NULL DEFAULT '',
    callee TEXT NOT NULL,
    callee_port TEXT NOT NULL DEFAULT '',
    callee_location TEXT NOT NULL,
    filename TEXT NOT NULL,
    run_id INTEGER NOT NULL,
    type_interval_lower INTEGER,
    type_interval_upper INTEGER,
    preserves_type_context INTEGER NOT NULL DEFAULT 0,
    titos TEXT NOT NULL DEFAULT ''
)
"#;

pub const CREATE_TRACE_FRAME_ANNOTATIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS trace_frame_annotations (
    id INTEGER PRIMARY KEY,
    location TEXT NOT NULL,
    message TEXT NOT NULL,
    link TEXT,
    trace_key TEXT,
    trace_frame_id INTEGER NOT NULL
)
"#;

pub const CREATE_ISSUE_INSTANCE_SHARED_TEXT_ASSOC_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS issue_instance_shared_text_assoc (
    issue_instance_id INTEGER NOT NULL,
    shared_text_id INTEGER NOT NULL,
    PRIMARY KEY (issue_instance_id, shared_text_id)
)
"#;

pub const CREATE_ISSUE_INSTANCE_TRACE_FRAME_ASSOC_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS issue_instance_trace_frame_assoc (
    issue_instance_id INTEGER NOT NULL,
    trace_frame_id INTEGER NOT NULL,
    PRIMARY KEY (issue_instance_id, trace_frame_id)
)
"#;

pub const CREATE_TRACE_FRAME_LEAF_ASSOC_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS trace_frame_leaf_assoc (
    trace_frame_id INTEGER NOT NULL,
    leaf_id INTEGER NOT NULL,
    trace_length INTEGER,
    PRIMARY KEY (trace_frame_id, leaf_id)
)
"#;

/// SQL to create indexes
pub const CREATE_INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_shared_texts_kind ON shared_texts(kind)",
    "CREATE INDEX IF NOT EXISTS idx_issues_code ON issues(code)",
    "CREATE INDEX IF NOT EXISTS idx_issues_callable ON issues(callable)",
    "CREATE INDEX IF NOT EXISTS idx_issue_instances_issue ON issue_instances(issue_id)",
    "CREATE INDEX IF NOT EXISTS idx_issue_instances_run ON issue_instances(run_id)",
    "CREATE INDEX IF NOT EXISTS idx_issue_instances_new ON issue_instances(is_new_issue)",
    "CREATE INDEX IF NOT EXISTS idx_trace_frames_caller ON trace_frames(caller, caller_port)",
    "CREATE INDEX IF NOT EXISTS idx_trace_frames_run ON trace_frames(run_id)",
    "CREATE INDEX IF NOT EXISTS idx_trace_frame_annotations_frame ON trace_frame_annotations(trace_frame_id)",
    "CREATE INDEX IF NOT EXISTS idx_issue_instance_trace_frame_frame ON issue_instance_trace_frame_assoc(trace_frame_id)",
];

/// All schema creation statements
pub fn all_schema_statements() -> Vec<&'static str> {
    let mut stmts = vec![
        CREATE_PRIMARY_KEYS_TABLE,
        CREATE_RUNS_TABLE,
        CREATE_SHARED_TEXTS_TABLE,
        CREATE_ISSUES_TABLE,
        CREATE_ISSUE_INSTANCE_FIX_INFO_TABLE,
        CREATE_ISSUE_INSTANCES_TABLE,
        CREATE_TRACE_FRAMES_TABLE,
        CREATE_TRACE_FRAME_ANNOTATIONS_TABLE,
        CREATE_ISSUE_INSTANCE_SHARED_TEXT_ASSOC_TABLE,
        CREATE_ISSUE_INSTANCE_TRACE_FRAME_ASSOC_TABLE,
        CREATE_TRACE_FRAME_LEAF_ASSOC_TABLE,
    ];
    stmts.extend(CREATE_INDEXES.iter().copied());
    stmts
}
