//! Generated identifiers: `<prefix>_<unix-millis>_<9-char suffix>`.
//!
//! The millisecond prefix keeps ids roughly creation-ordered; the random
//! suffix (from a UUID v4) keeps ids generated in the same instant unique
//! without any coordination.

use chrono::Utc;

const SUFFIX_LEN: usize = 9;

pub fn generate(prefix: &str) -> String {
    let suffix: String = uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(SUFFIX_LEN)
        .collect();
    format!("{prefix}_{}_{suffix}", Utc::now().timestamp_millis())
}
