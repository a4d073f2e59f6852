use super::settings::{
    AdminApiConfig, AuditConfig, ClickVelocityConfig, EscalationConfig, LoggingConfig,
    RateLimitConfig, ServerConfig, StorageBackend, StorageConfig,
};

// ---------------------------------------------------------------------------
// Top-level struct defaults
// ---------------------------------------------------------------------------

pub fn default_server_config() -> ServerConfig {
    ServerConfig {
        bind: default_bind(),
    }
}

pub fn default_escalation_config() -> EscalationConfig {
    EscalationConfig {
        violation_threshold: default_violation_threshold(),
        violation_expiration_secs: default_violation_expiration_secs(),
        block_duration_ms: default_block_duration_ms(),
    }
}

pub fn default_click_velocity_config() -> ClickVelocityConfig {
    ClickVelocityConfig {
        max_clicks: default_max_clicks(),
        minimum_click_interval_ms: default_minimum_click_interval_ms(),
        tracker_expiration_ms: default_tracker_expiration_ms(),
        block_duration_ms: default_block_duration_ms(),
    }
}

pub fn default_rate_limit_config() -> RateLimitConfig {
    RateLimitConfig {
        window_ms: default_window_ms(),
        max_requests: default_max_requests(),
    }
}

pub fn default_storage_config() -> StorageConfig {
    StorageConfig {
        backend: default_storage_backend(),
        sqlite_path: default_sqlite_path(),
        journal_path: default_journal_path(),
        write_retries: default_write_retries(),
    }
}

pub fn default_audit_config() -> AuditConfig {
    AuditConfig {
        log_admitted: false,
        decision_log: None,
    }
}

pub fn default_logging_config() -> LoggingConfig {
    LoggingConfig {
        level: default_log_level(),
        file: default_log_file(),
    }
}

pub fn default_admin_api_config() -> AdminApiConfig {
    AdminApiConfig {
        api_key: default_api_key(),
    }
}

// ---------------------------------------------------------------------------
// ServerConfig defaults
// ---------------------------------------------------------------------------

pub fn default_bind() -> String { "0.0.0.0:3200".to_string() }

// ---------------------------------------------------------------------------
// EscalationConfig defaults
// ---------------------------------------------------------------------------

pub fn default_violation_threshold() -> u32 { 3 }
pub fn default_violation_expiration_secs() -> u64 { 20 }
pub fn default_block_duration_ms() -> u64 { 10_000 }

// ---------------------------------------------------------------------------
// ClickVelocityConfig defaults
// ---------------------------------------------------------------------------

pub fn default_max_clicks() -> u32 { 50 }
pub fn default_minimum_click_interval_ms() -> u64 { 500 }
pub fn default_tracker_expiration_ms() -> u64 { 5_000 }

// ---------------------------------------------------------------------------
// RateLimitConfig defaults
// ---------------------------------------------------------------------------

pub fn default_window_ms() -> u64 { 3_000 }
pub fn default_max_requests() -> u64 { 10 }

// ---------------------------------------------------------------------------
// StorageConfig defaults
// ---------------------------------------------------------------------------

pub fn default_storage_backend() -> StorageBackend { StorageBackend::Sqlite }
pub fn default_sqlite_path() -> String { "data/gatekeeper.db".to_string() }
pub fn default_journal_path() -> String { "data/blocked_ips.jsonl".to_string() }
pub fn default_write_retries() -> u32 { 1 }

// ---------------------------------------------------------------------------
// Logging / admin / maintenance defaults
// ---------------------------------------------------------------------------

pub fn default_log_level() -> String { "info".to_string() }
pub fn default_log_file() -> String { "logs/gatekeeper.log".to_string() }
pub fn default_api_key() -> String { "change-me".to_string() }
pub fn default_cleanup_interval_secs() -> u64 { 30 }
