use percent_encoding::percent_decode_str;

pub struct ExportPath;

impl ExportPath {
    /// Standardize directory separators to forward slashes.
    pub fn normalize(path: &str) -> String {
        path.replace('\\', "/")
    }

    /// Sanitize a path to prevent directory traversal from a hostile endpoint.
    pub fn verify_safe(rel_path: &str) -> bool {
        let normalized = Self::normalize(rel_path);
        let p = std::path::Path::new(&normalized);
        !normalized.is_empty()
            && !normalized.starts_with('/')
            && !p.is_absolute()
            && !(normalized.len() > 1 && normalized.chars().nth(1) == Some(':'))
            && !p
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
    }

    /// Local file name for a device URL path: the last non-empty segment, percent-decoded.
    /// Returns `None` when no usable name exists.
    pub fn file_name_from_url_path(url_path: &str) -> Option<String> {
        let last = url_path.split('/').rev().find(|s| !s.is_empty())?;
        let decoded = percent_decode_str(last).decode_utf8().ok()?.into_owned();
        if decoded.contains('/') || decoded.contains('\\') || decoded == "." {
            return None;
        }
        Self::verify_safe(&decoded).then_some(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::ExportPath;

    #[test]
    fn file_name_is_last_segment() {
        assert_eq!(
            ExportPath::file_name_from_url_path("/nfc/52a4-11/disk-0.vmdk").as_deref(),
            Some("disk-0.vmdk")
        );
        assert_eq!(
            ExportPath::file_name_from_url_path("/nfc/52a4-11/my%20vm.nvram").as_deref(),
            Some("my vm.nvram")
        );
        assert_eq!(
            ExportPath::file_name_from_url_path("/nfc/trailing/").as_deref(),
            Some("trailing")
        );
    }

    #[test]
    fn file_name_rejects_traversal_and_empty() {
        assert_eq!(ExportPath::file_name_from_url_path("/"), None);
        assert_eq!(ExportPath::file_name_from_url_path(""), None);
        assert_eq!(ExportPath::file_name_from_url_path("/nfc/.."), None);
        assert_eq!(ExportPath::file_name_from_url_path("/nfc/..%2Fetc%2Fpasswd"), None);
        assert_eq!(ExportPath::file_name_from_url_path("/nfc/a%5Cb"), None);
    }

    #[test]
    fn verify_safe_rejects_absolute() {
        assert!(ExportPath::verify_safe("disk.vmdk"));
        assert!(ExportPath::verify_safe("sub/disk.vmdk"));
        assert!(!ExportPath::verify_safe("/etc/passwd"));
        assert!(!ExportPath::verify_safe("C:\\x"));
        assert!(!ExportPath::verify_safe("a/../../b"));
    }
}
