use crate::errors::SessionError;

/// Longest session id accepted; tmux itself allows more, but ids end up in markers and logs.
pub const MAX_SESSION_ID_LEN: usize = 64;

const RANDOM_SUFFIX_BYTES: usize = 6;

/// Compose a session id from `prefix` and 12 random hex characters.
///
/// Collisions are not checked here; the launcher refuses an id that already exists in the sandbox.
pub fn create_session_id(prefix: &str) -> String {
    let mut buf = [0u8; RANDOM_SUFFIX_BYTES];
    if getrandom::getrandom(&mut buf).is_err() {
        // Fall back to time and pid entropy when the OS source is unavailable
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::SystemTime::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let mix = nanos ^ ((std::process::id() as u128) << 64);
        buf.copy_from_slice(&mix.to_le_bytes()[..RANDOM_SUFFIX_BYTES]);
    }
    let mut s = String::with_capacity(prefix.len() + RANDOM_SUFFIX_BYTES * 2);
    s.push_str(prefix);
    for b in buf {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

/// Validate a caller-supplied session id.
///
/// tmux treats `:` and `.` as target separators, so ids are limited to `[A-Za-z0-9_-]`.
pub fn validate_session_id(id: &str) -> Result<(), SessionError> {
    if id.is_empty() {
        return Err(SessionError::input("session_id is required"));
    }
    if id.len() > MAX_SESSION_ID_LEN {
        return Err(SessionError::input(format!(
            "session_id is longer than {MAX_SESSION_ID_LEN} characters"
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(SessionError::input(format!(
            "session_id {id:?} may only contain ASCII letters, digits, '_' and '-'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_carry_prefix_and_hex_suffix() {
        let id = create_session_id("sbx_");
        assert!(id.starts_with("sbx_"));
        let suffix = &id["sbx_".len()..];
        assert_eq!(suffix.len(), 12);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(validate_session_id(&id).is_ok());
    }

    #[test]
    fn generated_ids_differ() {
        let a = create_session_id("sbx_");
        let b = create_session_id("sbx_");
        assert_ne!(a, b);
    }

    #[test]
    fn rejects_tmux_target_separators_and_empty() {
        assert!(validate_session_id("").is_err());
        assert!(validate_session_id("a:b").is_err());
        assert!(validate_session_id("a.b").is_err());
        assert!(validate_session_id("has space").is_err());
        assert!(validate_session_id(&"x".repeat(MAX_SESSION_ID_LEN + 1)).is_err());
        assert!(validate_session_id("build-42_a").is_ok());
    }
}
