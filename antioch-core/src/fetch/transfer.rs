use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use reqwest::Client;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::time::timeout;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::manifest::MEDIA_EXTENSION;

use super::error::{FetchError, FetchResult};

const PART_SUFFIX: &str = "part";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedMedia {
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Fresh `<uuid>.movie` path inside `dir`.
pub fn unique_media_path(dir: &Path) -> PathBuf {
    dir.join(format!("{}.{}", Uuid::new_v4().simple(), MEDIA_EXTENSION))
}

/// Removes the file on drop unless it was committed. Dropping a cancelled
/// download future therefore discards whatever was written so far.
struct PartialFile {
    path: PathBuf,
    armed: bool,
}

impl PartialFile {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    async fn commit(mut self, target: &Path) -> FetchResult<()> {
        fs::rename(&self.path, target)
            .await
            .map_err(|source| FetchError::Io {
                source,
                path: target.to_path_buf(),
            })?;
        self.armed = false;
        Ok(())
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.armed {
            match std::fs::remove_file(&self.path) {
                Ok(()) => debug!(path = %self.path.display(), "discarded partial download"),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    tracing::warn!(path = %self.path.display(), error = %err, "failed to discard partial download")
                }
            }
        }
    }
}

enum Source {
    Http(reqwest::Response),
    Local { path: PathBuf, file: fs::File },
}

/// Streams a URL into a uniquely named media file, writing through a buffer
/// of `chunk_size` bytes.
#[derive(Debug, Clone)]
pub struct Transfer {
    client: Client,
    chunk_size: usize,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl Transfer {
    pub fn new(
        client: Client,
        chunk_size: usize,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Self {
        Self {
            client,
            chunk_size: chunk_size.max(1),
            connect_timeout,
            read_timeout,
        }
    }

    pub async fn download(&self, url: &str, dest_dir: &Path) -> FetchResult<FetchedMedia> {
        let source = self.open(url).await?;

        let target = unique_media_path(dest_dir);
        let mut part_name = target.clone().into_os_string();
        part_name.push(".");
        part_name.push(PART_SUFFIX);
        let part_path = PathBuf::from(part_name);

        let file = fs::File::create(&part_path)
            .await
            .map_err(|source| FetchError::Io {
                source,
                path: part_path.clone(),
            })?;
        let guard = PartialFile::new(part_path.clone());
        let mut writer = BufWriter::with_capacity(self.chunk_size, file);

        let written = match source {
            Source::Http(response) => self.copy_http(url, response, &mut writer, &part_path).await?,
            Source::Local { path, file } => {
                self.copy_local(&path, file, &mut writer, &part_path)
                    .await?
            }
        };
        writer.flush().await.map_err(|source| FetchError::Io {
            source,
            path: part_path.clone(),
        })?;
        writer
            .get_mut()
            .sync_all()
            .await
            .map_err(|source| FetchError::Io {
                source,
                path: part_path.clone(),
            })?;
        drop(writer);

        guard.commit(&target).await?;
        debug!(url, path = %target.display(), bytes = written, "download complete");
        Ok(FetchedMedia {
            path: target,
            size_bytes: written,
        })
    }

    async fn open(&self, url: &str) -> FetchResult<Source> {
        let parsed = Url::parse(url).map_err(|_| FetchError::UnsupportedUrl(url.to_string()))?;
        match parsed.scheme() {
            "http" | "https" => {
                let budget = self.connect_timeout + self.read_timeout;
                let response = timeout(budget, self.client.get(parsed).send())
                    .await
                    .map_err(|_| FetchError::Timeout {
                        url: url.to_string(),
                        stage: "requesting",
                        after: budget,
                    })??;
                let status = response.status();
                if !status.is_success() {
                    return Err(FetchError::Status {
                        url: url.to_string(),
                        status: status.as_u16(),
                    });
                }
                Ok(Source::Http(response))
            }
            "file" => {
                let path = parsed
                    .to_file_path()
                    .map_err(|_| FetchError::UnsupportedUrl(url.to_string()))?;
                let file = fs::File::open(&path)
                    .await
                    .map_err(|source| FetchError::Io {
                        source,
                        path: path.clone(),
                    })?;
                Ok(Source::Local { path, file })
            }
            _ => Err(FetchError::UnsupportedUrl(url.to_string())),
        }
    }

    async fn copy_http<W>(
        &self,
        url: &str,
        response: reqwest::Response,
        writer: &mut W,
        part_path: &Path,
    ) -> FetchResult<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        loop {
            let next = timeout(self.read_timeout, stream.next())
                .await
                .map_err(|_| FetchError::Timeout {
                    url: url.to_string(),
                    stage: "reading",
                    after: self.read_timeout,
                })?;
            let Some(chunk) = next else {
                break;
            };
            let chunk = chunk?;
            writer
                .write_all(&chunk)
                .await
                .map_err(|source| FetchError::Io {
                    source,
                    path: part_path.to_path_buf(),
                })?;
            written += chunk.len() as u64;
        }
        Ok(written)
    }

    async fn copy_local<W>(
        &self,
        path: &Path,
        mut file: fs::File,
        writer: &mut W,
        part_path: &Path,
    ) -> FetchResult<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let mut buffer = vec![0u8; self.chunk_size];
        let mut written = 0u64;
        loop {
            let read = file
                .read(&mut buffer)
                .await
                .map_err(|source| FetchError::Io {
                    source,
                    path: path.to_path_buf(),
                })?;
            if read == 0 {
                break;
            }
            writer
                .write_all(&buffer[..read])
                .await
                .map_err(|source| FetchError::Io {
                    source,
                    path: part_path.to_path_buf(),
                })?;
            written += read as u64;
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn transfer(chunk_size: usize) -> Transfer {
        Transfer::new(
            Client::new(),
            chunk_size,
            Duration::from_millis(500),
            Duration::from_millis(500),
        )
    }

    fn entries(dir: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .collect()
    }

    #[tokio::test]
    async fn local_file_is_copied_in_chunks() {
        let dir = TempDir::new().unwrap();
        let drop_dir = dir.path().join("drop");
        std::fs::create_dir_all(&drop_dir).unwrap();
        let source = dir.path().join("source.mp4");
        let payload = vec![7u8; 10_000];
        std::fs::write(&source, &payload).unwrap();

        let url = Url::from_file_path(&source).unwrap().to_string();
        let fetched = transfer(64).download(&url, &drop_dir).await.unwrap();

        assert_eq!(fetched.size_bytes, payload.len() as u64);
        assert_eq!(std::fs::read(&fetched.path).unwrap(), payload);
        assert_eq!(
            fetched.path.extension().and_then(|e| e.to_str()),
            Some(MEDIA_EXTENSION)
        );
        assert_eq!(entries(&drop_dir), vec![fetched.path.clone()]);
    }

    #[tokio::test]
    async fn missing_local_source_leaves_no_file() {
        let dir = TempDir::new().unwrap();
        let url = Url::from_file_path(dir.path().join("absent.mp4"))
            .unwrap()
            .to_string();
        let err = transfer(64).download(&url, dir.path()).await.unwrap_err();
        assert!(matches!(err, FetchError::Io { .. }));
        assert!(entries(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn refused_connection_leaves_no_file() {
        let dir = TempDir::new().unwrap();
        let err = transfer(64)
            .download("http://127.0.0.1:9/never.mp4", dir.path())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            FetchError::Network(_) | FetchError::Timeout { .. }
        ));
        assert!(entries(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn unsupported_scheme_is_rejected() {
        let dir = TempDir::new().unwrap();
        let err = transfer(64)
            .download("ftp://example.com/a.mp4", dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::UnsupportedUrl(_)));
    }

    #[test]
    fn dropping_uncommitted_partial_removes_it() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.movie.part");
        std::fs::write(&path, b"half").unwrap();
        drop(PartialFile::new(path.clone()));
        assert!(!path.exists());
    }
}
