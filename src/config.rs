//! Environment configuration of the global thread pool.

use core::num::NonZero;
use std::env;
use std::thread::available_parallelism;

use tracing::warn;

/// Environment variable holding the number of workers of the global pool.
pub const NUM_THREADS_VAR: &str = "PARLOOP_NUM_THREADS";

/// Parses a worker count. Blank values are treated as absent.
///
/// Returns `Err` with the trimmed input if the value is set but is not a
/// positive integer.
pub fn parse_num_threads(raw: &str) -> Result<Option<usize>, &str> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    match trimmed.parse::<usize>() {
        Ok(value) if value > 0 => Ok(Some(value)),
        _ => Err(trimmed),
    }
}

/// The number of workers the global pool starts with: the value of
/// [`NUM_THREADS_VAR`] if it is valid, the number of available cores
/// otherwise.
pub fn num_threads() -> usize {
    let configured = match env::var(NUM_THREADS_VAR) {
        Ok(raw) => match parse_num_threads(&raw) {
            Ok(value) => value,
            Err(invalid) => {
                warn!(
                    "ignoring {}={:?}, expected a positive integer",
                    NUM_THREADS_VAR, invalid
                );
                None
            }
        },
        Err(env::VarError::NotPresent) => None,
        Err(env::VarError::NotUnicode(_)) => {
            warn!("ignoring {}, value is not unicode", NUM_THREADS_VAR);
            None
        }
    };

    configured.unwrap_or_else(|| available_parallelism().map_or(1, NonZero::get))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_positive_counts() {
        assert_eq!(parse_num_threads("4"), Ok(Some(4)));
        assert_eq!(parse_num_threads(" 12\n"), Ok(Some(12)));
    }

    #[test]
    fn blank_is_absent() {
        assert_eq!(parse_num_threads(""), Ok(None));
        assert_eq!(parse_num_threads("   "), Ok(None));
    }

    #[test]
    fn rejects_zero_and_garbage() {
        assert_eq!(parse_num_threads("0"), Err("0"));
        assert_eq!(parse_num_threads("-3"), Err("-3"));
        assert_eq!(parse_num_threads(" many "), Err("many"));
    }

    #[test]
    fn falls_back_to_a_positive_count() {
        assert!(num_threads() > 0);
    }
}
