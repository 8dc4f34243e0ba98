//! Id generation.
//!
//! All entities are identified by a 26-character time-prefixed,
//! lexicographically sortable string (Crockford base32 ULID), per
//! `spec.md` §6 "Ids".

use chrono::{DateTime, Utc};
use ulid::Ulid;

/// Generate a new id for `now`.
pub fn new_id_at(now: DateTime<Utc>) -> String {
    let ms = now.timestamp_millis().max(0) as u64;
    Ulid::from_parts(ms, rand_u128()).to_string()
}

/// Generate a new id for the current time.
pub fn new_id() -> String {
    new_id_at(Utc::now())
}

fn rand_u128() -> u128 {
    // ulid::Ulid::new() already sources randomness from the OS; reuse it
    // for the random component so we don't pull in a second RNG crate.
    Ulid::new().random()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_26_chars_and_sortable() {
        let a = new_id_at(Utc::now());
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = new_id_at(Utc::now());
        assert_eq!(a.len(), 26);
        assert_eq!(b.len(), 26);
        assert!(a < b);
    }
}
