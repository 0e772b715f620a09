use camino::{Utf8Path, Utf8PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::warn;

/// A download in progress at `<target>.part`.
///
/// `commit` moves it over the target. Dropped uncommitted, the partial file is removed,
/// so an interrupted transfer never leaves something that looks finished.
pub(crate) struct PartFile {
    file: Option<File>,
    part_path: Utf8PathBuf,
    target: Utf8PathBuf,
    committed: bool,
}

impl PartFile {
    pub(crate) async fn create(target: &Utf8Path) -> std::io::Result<Self> {
        let part_path = Utf8PathBuf::from(format!("{target}.part"));
        let file = File::create(part_path.as_std_path()).await?;
        Ok(Self {
            file: Some(file),
            part_path,
            target: target.to_path_buf(),
            committed: false,
        })
    }

    pub(crate) async fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.write_all(buf).await,
            None => Err(std::io::Error::other("part file already closed")),
        }
    }

    /// Flush, sync and rename over the target, replacing any existing file.
    pub(crate) async fn commit(mut self) -> std::io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
            file.sync_all().await?;
        }
        tokio::fs::rename(self.part_path.as_std_path(), self.target.as_std_path()).await?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        self.file.take();
        // A single unlink, done inline: the partial file must be gone once drop returns,
        // and no runtime is guaranteed here to defer it to.
        match std::fs::remove_file(self.part_path.as_std_path()) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("could not remove partial file {}: {}", self.part_path, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::PartFile;
    use camino::Utf8PathBuf;

    #[tokio::test]
    async fn commit_replaces_existing_target() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let target = root.join("disk-0.vmdk");
        std::fs::write(&target, b"stale contents").unwrap();

        let mut part = PartFile::create(&target).await.unwrap();
        part.write_all(b"fresh").await.unwrap();
        part.commit().await.unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"fresh");
        assert!(!root.join("disk-0.vmdk.part").exists());
    }

    #[tokio::test]
    async fn dropping_uncommitted_removes_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let target = root.join("cd.iso");

        {
            let mut part = PartFile::create(&target).await.unwrap();
            part.write_all(&[0u8; 400]).await.unwrap();
            assert!(root.join("cd.iso.part").exists());
        }

        assert!(!root.join("cd.iso.part").exists());
        assert!(!target.exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn partial_file_is_gone_when_a_transfer_task_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let target = root.join("disk-1.vmdk");

        let (created_tx, created_rx) = tokio::sync::oneshot::channel();
        let writer = {
            let target = target.clone();
            tokio::spawn(async move {
                let mut part = PartFile::create(&target).await.unwrap();
                part.write_all(&[1u8; 4096]).await.unwrap();
                let _ = created_tx.send(());
                std::future::pending::<()>().await;
            })
        };
        created_rx.await.unwrap();
        assert!(root.join("disk-1.vmdk.part").exists());

        writer.abort();
        assert!(writer.await.unwrap_err().is_cancelled());
        assert!(!root.join("disk-1.vmdk.part").exists());
    }

    #[tokio::test]
    async fn dropping_after_the_part_vanished_is_quiet() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let target = root.join("nvram");

        let part = PartFile::create(&target).await.unwrap();
        std::fs::remove_file(root.join("nvram.part")).unwrap();
        drop(part);

        assert!(!target.exists());
    }
}
