use chrono::Utc;

/// Current wall-clock time in unix seconds.
pub fn now_secs() -> i64 {
    Utc::now().timestamp()
}
