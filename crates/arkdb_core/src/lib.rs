//! # ArkDB Core
//!
//! Engine for the ADB container format: a binary, signed,
//! content-addressed document used for package metadata and file
//! manifests.
//!
//! The format is a small header followed by 32-byte-aligned blocks. The
//! first block (`ADB`) carries a value arena; `SIG` blocks carry detached
//! signatures over it; `DATA` blocks carry opaque bulk payloads consumed
//! by a caller-supplied callback during streaming.
//!
//! Inside the arena every value is a tagged 32-bit word ([`Val`]): either
//! an inline integer or an offset to an out-of-line payload (length-
//! prefixed blob, 32-bit integer, or object/array value vector). Static
//! [`schema`] descriptors tell the engine how to interpret object slots.
//!
//! ## Reading
//!
//! ```no_run
//! use arkdb_core::{Adb, schema::ObjectSchema};
//! # static PACKAGE: ObjectSchema = arkdb_core::schema::ObjectSchema::new_object(&[]);
//! # fn main() -> arkdb_core::CoreResult<()> {
//! let file = std::fs::File::open("world.adb")?;
//! let db = Adb::map(file, Some(0x6b637066), None)?;
//! let root = db.view().root_obj(&PACKAGE);
//! println!("{} entries", root.len() - 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Writing
//!
//! ```
//! use arkdb_core::{Adb, ObjBuilder, schema::ObjectSchema};
//! # use arkdb_core::schema::{Field, FieldKind, SCALAR_INT};
//! # static FIELDS: [Field; 1] = [Field::new("count", FieldKind::Int(&SCALAR_INT))];
//! # static OBJ: ObjectSchema = ObjectSchema::new_object(&FIELDS);
//! # fn main() -> arkdb_core::CoreResult<()> {
//! let mut db = Adb::new_writable(0x1234);
//! let mut obj = ObjBuilder::new(&OBJ);
//! obj.set_int(&mut db, 1, 7)?;
//! let root = obj.commit(&mut db)?;
//! db.write_root(root)?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

mod block;
mod container;
mod db;
mod error;
mod reader;
mod sign;
mod stream;
mod value;
mod writer;

pub mod schema;

pub use block::{Block, BlockEntry, BlockIter, BlockType, BLOCK_ALIGNMENT};
pub use container::{
    arena_of_blocks, transform, write_block, write_container, write_data_block, Xfrm, XfrmBlock,
};
pub use db::{Adb, ContainerHeader, FORMAT_MAGIC};
pub use error::{CoreError, CoreResult};
pub use reader::{ArenaView, ObjView};
pub use sign::{
    copy_block, sign_blocks, verify_signature, HashAlg, SignatureRecord, VerifyCtx,
    SIGNATURE_PREFIX_LEN,
};
pub use stream::SegmentReader;
pub use value::{Val, ValKind};
pub use writer::ObjBuilder;
