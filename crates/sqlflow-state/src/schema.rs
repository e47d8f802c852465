//! Diesel schema for the three tables the State Backend must create on
//! first use (spec §4.1). Hand-written rather than `diesel print-schema`
//! output, mirroring the teacher's persistence schema module.

diesel::table! {
    watermarks (pipeline, source, target, cursor_field) {
        pipeline -> Text,
        source -> Text,
        target -> Text,
        cursor_field -> Text,
        cursor_value -> Text,
        last_updated -> Timestamptz,
        sync_mode -> Text,
    }
}

diesel::table! {
    execution_history (id) {
        id -> BigInt,
        watermark_id -> Nullable<Text>,
        start -> Timestamptz,
        end_ -> Nullable<Timestamptz>,
        rows_processed -> Nullable<BigInt>,
        status -> Text,
        error_message -> Nullable<Text>,
    }
}

diesel::table! {
    kv_state (key) {
        key -> Text,
        value -> Text,
        timestamp -> Timestamptz,
    }
}

diesel::allow_tables_to_appear_in_same_query!(watermarks, execution_history, kv_state,);

pub const CREATE_TABLES_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS watermarks (
    pipeline TEXT NOT NULL,
    source TEXT NOT NULL,
    target TEXT NOT NULL,
    cursor_field TEXT NOT NULL,
    cursor_value TEXT NOT NULL,
    last_updated TIMESTAMPTZ NOT NULL,
    sync_mode TEXT NOT NULL,
    PRIMARY KEY (pipeline, source, target, cursor_field)
);

CREATE TABLE IF NOT EXISTS execution_history (
    id BIGSERIAL PRIMARY KEY,
    watermark_id TEXT,
    start TIMESTAMPTZ NOT NULL,
    end_ TIMESTAMPTZ,
    rows_processed BIGINT,
    status TEXT NOT NULL,
    error_message TEXT
);

CREATE TABLE IF NOT EXISTS kv_state (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    timestamp TIMESTAMPTZ NOT NULL
);
"#;
