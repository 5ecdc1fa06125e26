//! Sortable string identifiers for records that do not carry a UUID.
//!
//! An identifier is the UTC creation instant at microsecond precision
//! (`YYYYMMDDHHMMSSffffff`, always 20 characters) followed by five random
//! decimal digits. Collisions are not detected.

use chrono::{DateTime, Utc};
use rand::Rng;

pub const TIMESTAMP_LEN: usize = 20;
pub const SUFFIX_LEN: usize = 5;

pub fn generate() -> String {
    generate_at(Utc::now(), &mut rand::thread_rng())
}

pub fn generate_at<R: Rng + ?Sized>(now: DateTime<Utc>, rng: &mut R) -> String {
    let mut id = now.format("%Y%m%d%H%M%S%6f").to_string();
    for _ in 0..SUFFIX_LEN {
        let digit: u8 = rng.gen_range(0..10);
        id.push(char::from(b'0' + digit));
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn identifier_is_fixed_width_digits() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let id = generate_at(now, &mut StdRng::seed_from_u64(7));

        assert_eq!(id.len(), TIMESTAMP_LEN + SUFFIX_LEN);
        assert!(id.chars().all(|c| c.is_ascii_digit()));
        assert!(id.starts_with("20240102030405000000"));
    }

    #[test]
    fn identifiers_sort_by_creation_time() {
        let mut rng = StdRng::seed_from_u64(1);
        let earlier = Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

        assert!(generate_at(earlier, &mut rng) < generate_at(later, &mut rng));
    }
}
