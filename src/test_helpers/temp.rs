use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use zip::write::FileOptions;
use zip::ZipWriter;

const DFU_MANIFEST: &str = r#"{"manifest": {"application": {"bin_file": "app.bin"}}}"#;
const DFU_MANIFEST_WITH_DAT: &str =
    r#"{"manifest": {"application": {"bin_file": "app.bin", "dat_file": "app.dat"}}}"#;

/// Scratch directory for firmware packages and settings files, removed on drop.
pub struct TestContext {
    temp_dir: TempDir,
}

impl TestContext {
    /// Create a new test context with a fresh temporary directory
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    /// Get the root path of the temporary directory
    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Create a file with binary content at the given relative path
    pub fn create_file_bytes(&self, relative_path: &str, content: &[u8]) -> PathBuf {
        let path = self.root().join(relative_path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent dirs");
        }
        fs::write(&path, content).expect("Failed to write file");
        path
    }

    /// Create a stored (uncompressed) zip archive from `(name, contents)` entries
    pub fn create_zip(&self, name: &str, entries: &[(&str, &[u8])]) -> PathBuf {
        let path = self.root().join(name);
        let file = fs::File::create(&path).expect("Failed to create archive");
        let mut zip = ZipWriter::new(file);
        let options = FileOptions::default().compression_method(zip::CompressionMethod::Stored);

        for (entry, contents) in entries {
            zip.start_file(*entry, options).expect("Failed to start entry");
            zip.write_all(contents).expect("Failed to write entry");
        }

        zip.finish().expect("Failed to finish archive");
        path
    }

    /// Create a Nordic DFU package (`manifest.json`, `app.bin`, optional `app.dat`)
    pub fn create_dfu_package(&self, name: &str, bin: &[u8], dat: Option<&[u8]>) -> PathBuf {
        match dat {
            Some(dat) => self.create_zip(
                name,
                &[
                    ("manifest.json", DFU_MANIFEST_WITH_DAT.as_bytes()),
                    ("app.bin", bin),
                    ("app.dat", dat),
                ],
            ),
            None => self.create_zip(
                name,
                &[("manifest.json", DFU_MANIFEST.as_bytes()), ("app.bin", bin)],
            ),
        }
    }

    /// Get full path for a relative path
    pub fn path(&self, relative: &str) -> PathBuf {
        self.root().join(relative)
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
