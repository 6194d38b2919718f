//! UUID columns stored as text

use uuid::Uuid;

/// Parse a UUID read from `column`
pub fn parse_stored(column: &'static str, s: &str) -> crate::Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| crate::Error::corrupt(column, s, e))
}
