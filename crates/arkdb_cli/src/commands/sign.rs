//! Sign command implementation.
//!
//! Re-signs a container with a transform pass: the ADB block streams
//! through while its digest is computed, existing SIG blocks are
//! dropped, bulk data copies through untouched, and fresh signatures
//! are appended at the end.

use arkdb_core::{copy_block, sign_blocks, transform, BlockType, VerifyCtx};
use arkdb_trust::Trust;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Runs the sign command.
pub fn run(
    path: &Path,
    sign_keys: &[PathBuf],
    output: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let trust = Trust::init(None, sign_keys)?;
    if trust.signing_keys().is_empty() {
        return Err("no signing keys loaded".into());
    }
    info!(
        "Signing {:?} with {} keys",
        path,
        trust.signing_keys().len()
    );

    let in_place = output.is_none();
    let target: PathBuf = match output {
        Some(out) => out.to_path_buf(),
        None => path.with_extension("adb.tmp"),
    };

    let result = resign(path, &target, &trust);
    match result {
        Ok(()) => {
            if in_place {
                fs::rename(&target, path)?;
            }
            println!(
                "✓ signed {} ({} signatures)",
                path.display(),
                trust.signing_keys().len()
            );
            Ok(())
        }
        Err(e) => {
            // Drop the partial output so a failed pass leaves nothing behind.
            let _ = fs::remove_file(&target);
            Err(e)
        }
    }
}

fn resign(path: &Path, target: &Path, trust: &Trust) -> Result<(), Box<dyn std::error::Error>> {
    let mut is = BufReader::new(File::open(path)?);
    let mut os = BufWriter::new(File::create(target)?);
    let mut vfy = VerifyCtx::new();

    transform(&mut is, &mut os, |x, block| match block {
        Some(b) => match b.block.block_type() {
            BlockType::Adb => copy_block(x.os, b.block, b.payload, Some(&mut vfy)),
            BlockType::Sig => {
                b.payload.skip_remaining()?;
                Ok(())
            }
            _ => Ok(()),
        },
        None => sign_blocks(trust, &x.hdr, None, &mut vfy, x.os),
    })?;

    os.flush()?;
    Ok(())
}
