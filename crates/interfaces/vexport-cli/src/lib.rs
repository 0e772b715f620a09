pub mod commands;
pub mod render;

use camino::Utf8PathBuf;

/// Everything `export` needs to reach the endpoint and write the files.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub endpoint: String,
    pub vm: String,
    pub token: Option<String>,
    pub insecure: bool,
    pub threads: usize,
    pub limit_mb: Option<u64>,
    pub destination: Utf8PathBuf,
}

impl ExportRequest {
    pub fn rate_limit_bytes(&self) -> Option<u64> {
        self.limit_mb
            .filter(|mb| *mb > 0)
            .map(|mb| mb.saturating_mul(1024 * 1024))
    }
}
