//! Binary payload storage for incident attachments.
//!
//! Keys are relative, slash-separated paths such as
//! `incidents/{incident_id}/attachments/{filename}`.

use async_trait::async_trait;
use rand::{distributions::Alphanumeric, Rng};
use thiserror::Error;

pub mod local;
pub mod memory;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("file not found: {0}")]
    NotFound(String),
    #[error("invalid storage key: {0}")]
    InvalidKey(String),
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait FileStore: Send + Sync {
    /// Stores `data` under `key`, or under a free variant of it when `key` is
    /// taken, and returns the key actually used.
    async fn save(&self, key: &str, data: Vec<u8>) -> StorageResult<String>;

    async fn open(&self, key: &str) -> StorageResult<Vec<u8>>;

    async fn delete(&self, key: &str) -> StorageResult<()>;

    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Public URL a client can fetch the payload from.
    fn url(&self, key: &str) -> String;
}

/// Rejects absolute keys and keys that climb out of the storage root.
pub fn check_key(key: &str) -> StorageResult<()> {
    if key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

/// `dir/name_abc1234.ext` for `dir/name.ext`.
pub fn alternative_key<R: Rng + ?Sized>(key: &str, rng: &mut R) -> String {
    let suffix: String = rng
        .sample_iter(&Alphanumeric)
        .take(7)
        .map(char::from)
        .collect();

    let (dir, name) = match key.rfind('/') {
        Some(index) => key.split_at(index + 1),
        None => ("", key),
    };
    match name.rfind('.') {
        Some(dot) if dot > 0 => format!("{dir}{}_{suffix}{}", &name[..dot], &name[dot..]),
        _ => format!("{dir}{name}_{suffix}"),
    }
}

/// Final path segment of a key.
pub fn key_basename(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

pub fn join_url(base_url: &str, key: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};
    use rstest::rstest;

    #[rstest]
    #[case("incidents/1/attachments/a.pdf", true)]
    #[case("/etc/passwd", false)]
    #[case("incidents/../../secret", false)]
    #[case("incidents//a.pdf", false)]
    #[case("incidents\\a.pdf", false)]
    #[case("", false)]
    fn keys_must_stay_inside_the_root(#[case] key: &str, #[case] ok: bool) {
        assert_eq!(check_key(key).is_ok(), ok);
    }

    #[test]
    fn alternative_key_keeps_directory_and_extension() {
        let mut rng = StdRng::seed_from_u64(3);
        let key = alternative_key("incidents/7/attachments/photo.jpg", &mut rng);

        assert!(key.starts_with("incidents/7/attachments/photo_"));
        assert!(key.ends_with(".jpg"));
        assert_eq!(key.len(), "incidents/7/attachments/photo_.jpg".len() + 7);

        let bare = alternative_key("README", &mut rng);
        assert!(bare.starts_with("README_"));
    }

    #[test]
    fn basename_and_url() {
        assert_eq!(key_basename("incidents/7/attachments/a b.pdf"), "a b.pdf");
        assert_eq!(
            join_url("/media/", "incidents/7/attachments/a.pdf"),
            "/media/incidents/7/attachments/a.pdf"
        );
    }
}
