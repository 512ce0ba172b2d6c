use std::io;
use std::path::PathBuf;

use chrono::Utc;
use rand::Rng;
use tokio::{fs, io::AsyncWriteExt};

pub const SEED_CEILING: u32 = 4_294_967_294;

const MAX_NAME_ATTEMPTS: usize = 8;

pub fn random_seed() -> u32 {
    rand::rng().random_range(0..SEED_CEILING)
}

/// `{seed}-{unixSeconds}.jpeg`
pub fn generate_file_name() -> String {
    format!("{}-{}.jpeg", random_seed(), Utc::now().timestamp())
}

#[derive(Clone, Debug)]
pub struct ImageStore {
    base_dir: PathBuf,
    base_url: String,
}

impl ImageStore {
    pub fn new(base_dir: PathBuf, base_url: String) -> Self {
        Self { base_dir, base_url }
    }

    /// Writes `data` under a fresh file name. Never overwrites an existing
    /// file: a name collision draws a new name.
    pub async fn save(&self, data: &[u8]) -> io::Result<String> {
        fs::create_dir_all(&self.base_dir).await?;
        for _ in 0..MAX_NAME_ATTEMPTS {
            let name = generate_file_name();
            let path = self.base_dir.join(&name);
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    file.write_all(data).await?;
                    file.flush().await?;
                    tracing::debug!(path = %path.display(), bytes = data.len(), "stored image");
                    return Ok(self.public_url(&name));
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                    tracing::warn!(name = %name, "image name collision, drawing a new name");
                }
                Err(err) => return Err(err),
            }
        }
        Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "could not allocate a unique image name",
        ))
    }

    pub fn public_url(&self, name: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        let name = name.trim_start_matches('/');
        format!("{base}/img/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_has_seed_and_timestamp() {
        let name = generate_file_name();
        let stem = name.strip_suffix(".jpeg").unwrap();
        let (seed, secs) = stem.split_once('-').unwrap();
        assert!(seed.parse::<u32>().unwrap() < SEED_CEILING);
        let secs: i64 = secs.parse().unwrap();
        assert!((Utc::now().timestamp() - secs).abs() <= 1);
    }

    #[test]
    fn public_url_joins_base_host() {
        let store = ImageStore::new(PathBuf::from("generated"), "http://localhost:5000/".into());
        assert_eq!(
            store.public_url("1-2.jpeg"),
            "http://localhost:5000/img/1-2.jpeg"
        );
    }

    #[tokio::test]
    async fn save_writes_bytes_and_returns_url() {
        let dir = tempfile::tempdir().unwrap();
        let store = ImageStore::new(dir.path().join("generated"), "http://example.test".into());

        let first = store.save(b"one").await.unwrap();
        let second = store.save(b"two").await.unwrap();

        assert_ne!(first, second);
        let name = first.strip_prefix("http://example.test/img/").unwrap();
        let bytes = std::fs::read(dir.path().join("generated").join(name)).unwrap();
        assert_eq!(bytes, b"one");
    }
}
