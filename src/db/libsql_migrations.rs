//! libSQL schema.
//!
//! Mirrors `migrations/V1__caseflow_schema.sql` using SQLite types: UUIDs and
//! timestamps are TEXT, specializations and intake documents are JSON text,
//! ratings are decimal strings.

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    email TEXT NOT NULL UNIQUE,
    role TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_users_role_status ON users(role, status);

CREATE TABLE IF NOT EXISTS client_profiles (
    user_id TEXT PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    phone TEXT
);

CREATE TABLE IF NOT EXISTS staff_profiles (
    user_id TEXT PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    department TEXT
);

CREATE TABLE IF NOT EXISTS admin_profiles (
    user_id TEXT PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
    name TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS lawyer_profiles (
    user_id TEXT PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    experience_years INTEGER NOT NULL DEFAULT 0,
    specializations TEXT NOT NULL DEFAULT '[]',
    active_case_count INTEGER NOT NULL DEFAULT 0 CHECK (active_case_count >= 0),
    rating TEXT NOT NULL DEFAULT '0',
    rating_count INTEGER NOT NULL DEFAULT 0 CHECK (rating_count >= 0)
);

CREATE TABLE IF NOT EXISTS intakes (
    id TEXT PRIMARY KEY,
    client_id TEXT NOT NULL REFERENCES users(id),
    case_type TEXT NOT NULL,
    details TEXT NOT NULL DEFAULT '{}',
    documents TEXT NOT NULL DEFAULT '[]',
    documents_verified INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'pending',
    attempts INTEGER NOT NULL DEFAULT 1,
    assigned_staff_id TEXT REFERENCES users(id),
    rejection_reason TEXT,
    internal_notes TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_intakes_status_staff ON intakes(status, assigned_staff_id);
CREATE INDEX IF NOT EXISTS idx_intakes_client ON intakes(client_id, created_at);

CREATE TABLE IF NOT EXISTS cases (
    id TEXT PRIMARY KEY,
    intake_id TEXT NOT NULL UNIQUE REFERENCES intakes(id),
    client_id TEXT NOT NULL REFERENCES users(id),
    lawyer_id TEXT REFERENCES users(id),
    case_number TEXT NOT NULL UNIQUE,
    status TEXT NOT NULL DEFAULT 'queued',
    case_type TEXT NOT NULL,
    next_hearing_date TEXT,
    notes TEXT,
    client_rating INTEGER CHECK (client_rating BETWEEN 1 AND 5),
    client_review TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_cases_queue ON cases(status, case_type, created_at);
CREATE INDEX IF NOT EXISTS idx_cases_lawyer ON cases(lawyer_id);
CREATE INDEX IF NOT EXISTS idx_cases_client ON cases(client_id);
CREATE INDEX IF NOT EXISTS idx_cases_hearing ON cases(next_hearing_date);
"#;
