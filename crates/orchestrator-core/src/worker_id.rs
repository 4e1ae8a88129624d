//! Worker identity generation: `hostname + "-" + 8-char-random`, stable for
//! the process lifetime.

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Generate a worker identity stable for the calling process's lifetime.
/// Callers should compute this once (e.g. in a `OnceLock`/`Lazy`) and reuse
/// it across the Poller, Recovery Loop, and Delivery Engine.
pub fn generate_worker_id() -> String {
    let hostname = hostname();
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect();
    format!("{hostname}-{suffix}")
}

fn hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_have_a_dash_separated_random_suffix() {
        let id = generate_worker_id();
        let (_, suffix) = id.rsplit_once('-').expect("worker id must contain a dash");
        assert_eq!(suffix.len(), 8);
    }

    #[test]
    fn generated_ids_are_not_trivially_colliding() {
        let a = generate_worker_id();
        let b = generate_worker_id();
        assert_ne!(a, b);
    }
}
