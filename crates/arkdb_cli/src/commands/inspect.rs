//! Inspect command implementation.

use arkdb_core::{BlockIter, BlockType, ContainerHeader, SignatureRecord};
use serde::Serialize;
use std::path::Path;

/// Container inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Container path.
    pub path: String,
    /// Schema tag from the header.
    pub schema: String,
    /// Total file size in bytes.
    pub file_size: usize,
    /// Arena payload size in bytes.
    pub arena_size: usize,
    /// Number of signature blocks.
    pub signature_count: usize,
    /// Number of bulk data blocks.
    pub data_count: usize,
    /// Parsed signature records.
    pub signatures: Vec<SignatureInfo>,
    /// Full block table (if requested).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blocks: Option<Vec<BlockInfo>>,
}

/// One entry of the block table.
#[derive(Debug, Serialize)]
pub struct BlockInfo {
    /// Block index within the container.
    pub index: usize,
    /// Block type name.
    pub block_type: String,
    /// Offset of the block header within the file.
    pub offset: usize,
    /// Payload size in bytes.
    pub payload_size: usize,
    /// On-disk footprint including padding.
    pub padded_size: usize,
}

/// One parsed signature record.
#[derive(Debug, Serialize)]
pub struct SignatureInfo {
    /// Digest algorithm named by the record.
    pub hash_alg: String,
    /// Hex-encoded signing key identifier.
    pub key_id: String,
    /// Signature length in bytes.
    pub signature_len: usize,
}

/// Runs the inspect command.
pub fn run(path: &Path, show_blocks: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let bytes = std::fs::read(path)?;
    if bytes.len() < ContainerHeader::SIZE {
        return Err(format!("{}: file shorter than a container header", path.display()).into());
    }

    let mut hdr_bytes = [0u8; ContainerHeader::SIZE];
    hdr_bytes.copy_from_slice(&bytes[..ContainerHeader::SIZE]);
    let hdr = ContainerHeader::decode(hdr_bytes);
    if !hdr.is_valid() {
        return Err(format!("{}: bad container magic", path.display()).into());
    }

    let mut result = InspectResult {
        path: path.display().to_string(),
        schema: format!("{:#010x}", hdr.schema),
        file_size: bytes.len(),
        arena_size: 0,
        signature_count: 0,
        data_count: 0,
        signatures: Vec::new(),
        blocks: None,
    };
    let mut blocks = Vec::new();

    for (index, entry) in BlockIter::new(&bytes[ContainerHeader::SIZE..]).enumerate() {
        let entry = entry?;
        let type_name = match entry.block.block_type() {
            BlockType::Adb => "ADB",
            BlockType::Sig => "SIG",
            BlockType::Data => "DATA",
            BlockType::Reserved => "reserved",
        };
        match entry.block.block_type() {
            BlockType::Adb if index == 0 => result.arena_size = entry.payload.len(),
            BlockType::Sig => {
                result.signature_count += 1;
                match SignatureRecord::parse(entry.payload) {
                    Ok(record) => result.signatures.push(SignatureInfo {
                        hash_alg: format!("{:?}", record.hash_alg),
                        key_id: record.key_id.to_string(),
                        signature_len: record.signature.len(),
                    }),
                    Err(e) => tracing::debug!("unparseable signature record: {e}"),
                }
            }
            BlockType::Data => result.data_count += 1,
            _ => {}
        }
        blocks.push(BlockInfo {
            index,
            block_type: type_name.to_string(),
            offset: ContainerHeader::SIZE + entry.offset,
            payload_size: entry.payload.len(),
            padded_size: entry.block.padded_size(),
        });
    }

    if show_blocks {
        result.blocks = Some(blocks);
    }

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        _ => print_text(&result),
    }
    Ok(())
}

fn print_text(result: &InspectResult) {
    println!("Container: {}", result.path);
    println!("  schema:     {}", result.schema);
    println!("  file size:  {} bytes", result.file_size);
    println!("  arena size: {} bytes", result.arena_size);
    println!(
        "  blocks:     1 ADB, {} SIG, {} DATA",
        result.signature_count, result.data_count
    );
    for sig in &result.signatures {
        println!(
            "  signature:  {} key {} ({} bytes)",
            sig.hash_alg, sig.key_id, sig.signature_len
        );
    }
    if let Some(blocks) = &result.blocks {
        println!();
        println!("  {:>5}  {:<8}  {:>10}  {:>10}  {:>10}", "index", "type", "offset", "payload", "padded");
        for b in blocks {
            println!(
                "  {:>5}  {:<8}  {:>10}  {:>10}  {:>10}",
                b.index, b.block_type, b.offset, b.payload_size, b.padded_size
            );
        }
    }
}
