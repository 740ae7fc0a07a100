//! Verify command implementation.

use arkdb_core::Adb;
use arkdb_trust::Trust;
use std::fs::File;
use std::path::Path;
use tracing::info;

/// Runs the verify command.
pub fn run(
    path: &Path,
    keys_dir: &Path,
    schema: Option<u32>,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Verifying {:?} against keys in {:?}", path, keys_dir);

    let trust = Trust::init(Some(keys_dir), &[])?;
    if trust.trusted_keys().is_empty() {
        return Err(format!("no usable public keys in {}", keys_dir.display()).into());
    }
    info!("Loaded {} trusted keys", trust.trusted_keys().len());

    match Adb::map(File::open(path)?, schema, Some(&trust)) {
        Ok(db) => {
            println!("✓ {} verified", path.display());
            println!(
                "  schema {:#010x}, arena {} bytes",
                db.schema(),
                db.len()
            );
            Ok(())
        }
        Err(e) => {
            println!("✗ {} failed verification: {e}", path.display());
            Err(e.into())
        }
    }
}
