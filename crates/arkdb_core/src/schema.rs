//! Static schema descriptors.
//!
//! Schemas are read-only tables that tell the engine how to interpret
//! the slots of object and array value vectors: which scalar comparator
//! to use, what an absent integer field defaults to, and how to parse a
//! field from text. The engine consumes them; the catalogues describing
//! concrete package records live with the applications that own those
//! records.
//!
//! A field's category is a tagged variant ([`FieldKind`]) carrying a
//! reference to the descriptor for that category, so dispatch is a match
//! rather than pointer arithmetic.

use crate::db::Adb;
use crate::error::{CoreError, CoreResult};
use crate::reader::{ArenaView, ObjView};
use crate::value::Val;
use crate::writer::ObjBuilder;
use std::cmp::Ordering;

/// Compares two scalar values, each interpreted against its own arena.
pub type ScalarCompareFn = fn(ArenaView<'_>, Val, ArenaView<'_>, Val) -> Ordering;

/// Parses a scalar from text, writing any out-of-line payload into `db`.
pub type ScalarFromStringFn = fn(&mut Adb, &[u8]) -> CoreResult<Val>;

/// Compares two object views of the same schema.
pub type ObjectCompareFn = fn(&ObjView<'_>, &ObjView<'_>) -> Ordering;

/// Adjusts a builder right before it is committed.
pub type PreCommitFn = fn(&mut ObjBuilder, &mut Adb);

/// Returns the default integer for a 1-based field index.
pub type DefaultIntFn = fn(usize) -> u32;

/// Parses a whole object or array from text into a builder.
pub type ObjectFromStringFn = fn(&mut ObjBuilder, &mut Adb, &[u8]) -> CoreResult<()>;

/// Descriptor for scalar (integer or blob) fields.
#[derive(Debug)]
pub struct ScalarSchema {
    /// Total order over values of this scalar.
    pub compare: ScalarCompareFn,
    /// Optional text parser.
    pub from_string: Option<ScalarFromStringFn>,
}

/// Whether an [`ObjectSchema`] describes an object or an array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectKind {
    /// Fixed field list addressed by 1-based index.
    Object,
    /// Homogeneous elements appended in order.
    Array,
}

/// Descriptor for object and array value vectors.
#[derive(Debug)]
pub struct ObjectSchema {
    /// Object or array.
    pub kind: ObjectKind,
    /// Vector capacity including the length slot.
    pub num_fields: usize,
    /// Field descriptors; for arrays, the single element descriptor.
    pub fields: &'static [Field],
    /// Total order over committed values of this schema.
    pub compare: Option<ObjectCompareFn>,
    /// Hook run at the start of every commit.
    pub pre_commit: Option<PreCommitFn>,
    /// Default integers substituted for absent fields.
    pub get_default_int: Option<DefaultIntFn>,
    /// Parser building a whole value from text.
    pub from_string: Option<ObjectFromStringFn>,
}

impl ObjectSchema {
    /// Builds an object descriptor with one slot per field plus the
    /// length slot and no callbacks.
    #[must_use]
    pub const fn new_object(fields: &'static [Field]) -> Self {
        Self {
            kind: ObjectKind::Object,
            num_fields: fields.len() + 1,
            fields,
            compare: None,
            pre_commit: None,
            get_default_int: None,
            from_string: None,
        }
    }

    /// Builds an array descriptor for up to `capacity` elements.
    ///
    /// `fields` must hold exactly the element descriptor.
    #[must_use]
    pub const fn new_array(fields: &'static [Field], capacity: usize) -> Self {
        Self {
            kind: ObjectKind::Array,
            num_fields: capacity + 1,
            fields,
            compare: None,
            pre_commit: None,
            get_default_int: None,
            from_string: None,
        }
    }

    /// Returns the descriptor for the 1-based field index `i`.
    ///
    /// Arrays always yield the element descriptor regardless of index.
    ///
    /// # Panics
    ///
    /// Panics if `i` is out of range for an object schema; addressing a
    /// field that does not exist is a programming error.
    #[must_use]
    pub fn field_kind(&self, i: usize) -> &FieldKind {
        match self.kind {
            ObjectKind::Array => &self.fields[0].kind,
            ObjectKind::Object => {
                assert!(i >= 1 && i < self.num_fields, "field index {i} out of range");
                &self.fields[i - 1].kind
            }
        }
    }

    /// Finds a field's 1-based index by name, or 0 if absent.
    #[must_use]
    pub fn field_by_name(&self, name: &str) -> usize {
        self.fields
            .iter()
            .position(|f| f.name == name)
            .map_or(0, |i| i + 1)
    }
}

/// A named field inside an [`ObjectSchema`].
#[derive(Debug)]
pub struct Field {
    /// Field name used by text parsers and tooling.
    pub name: &'static str,
    /// Value category and its descriptor.
    pub kind: FieldKind,
}

impl Field {
    /// Creates a field descriptor.
    #[must_use]
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind }
    }
}

/// Value category of a field, carrying the descriptor to dispatch to.
#[derive(Debug, Clone, Copy)]
pub enum FieldKind {
    /// Integer scalar.
    Int(&'static ScalarSchema),
    /// Blob scalar.
    Blob(&'static ScalarSchema),
    /// Nested object.
    Object(&'static ObjectSchema),
    /// Nested array.
    Array(&'static ObjectSchema),
    /// Nested container stored as a framed blob.
    Adb(&'static AdbSchema),
}

impl FieldKind {
    /// Returns the object descriptor for object-shaped kinds.
    ///
    /// Nested containers resolve to their root object schema.
    #[must_use]
    pub fn object_schema(&self) -> Option<&'static ObjectSchema> {
        match self {
            FieldKind::Object(s) | FieldKind::Array(s) => Some(s),
            FieldKind::Adb(s) => Some(s.root),
            FieldKind::Int(_) | FieldKind::Blob(_) => None,
        }
    }
}

/// Descriptor for nested containers carried as BLOB_32 values.
#[derive(Debug)]
pub struct AdbSchema {
    /// Schema tag expected in the nested container.
    pub schema_id: u32,
    /// Root object schema of the nested arena.
    pub root: &'static ObjectSchema,
}

/// Plain unsigned integer scalar: numeric order, decimal parsing.
pub static SCALAR_INT: ScalarSchema = ScalarSchema {
    compare: compare_int,
    from_string: Some(int_from_string),
};

/// Plain byte-string scalar: lexicographic order, verbatim parsing.
pub static SCALAR_BLOB: ScalarSchema = ScalarSchema {
    compare: compare_blob,
    from_string: Some(blob_from_string),
};

fn compare_int(a: ArenaView<'_>, va: Val, b: ArenaView<'_>, vb: Val) -> Ordering {
    a.read_int(va).cmp(&b.read_int(vb))
}

fn compare_blob(a: ArenaView<'_>, va: Val, b: ArenaView<'_>, vb: Val) -> Ordering {
    a.read_blob(va).cmp(b.read_blob(vb))
}

fn int_from_string(db: &mut Adb, text: &[u8]) -> CoreResult<Val> {
    let text = std::str::from_utf8(text)
        .map_err(|_| CoreError::malformed("integer field is not UTF-8"))?;
    let n: u32 = text
        .trim()
        .parse()
        .map_err(|_| CoreError::malformed(format!("bad integer: {text:?}")))?;
    db.write_int(n)
}

fn blob_from_string(db: &mut Adb, text: &[u8]) -> CoreResult<Val> {
    db.write_blob(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    static FIELDS: [Field; 2] = [
        Field::new("name", FieldKind::Blob(&SCALAR_BLOB)),
        Field::new("size", FieldKind::Int(&SCALAR_INT)),
    ];
    static OBJ: ObjectSchema = ObjectSchema::new_object(&FIELDS);

    #[test]
    fn field_lookup_is_one_based() {
        assert_eq!(OBJ.field_by_name("name"), 1);
        assert_eq!(OBJ.field_by_name("size"), 2);
        assert_eq!(OBJ.field_by_name("missing"), 0);
    }

    #[test]
    fn object_capacity_counts_length_slot() {
        assert_eq!(OBJ.num_fields, 3);
    }

    #[test]
    fn array_kind_ignores_index() {
        static ELEM: [Field; 1] = [Field::new("", FieldKind::Int(&SCALAR_INT))];
        static ARR: ObjectSchema = ObjectSchema::new_array(&ELEM, 8);
        assert!(matches!(ARR.field_kind(1), FieldKind::Int(_)));
        assert!(matches!(ARR.field_kind(5), FieldKind::Int(_)));
    }

    #[test]
    fn int_parsing() {
        let mut db = Adb::new_writable(0);
        let v = int_from_string(&mut db, b"42").unwrap();
        assert_eq!(db.view().read_int(v), 42);
        assert!(int_from_string(&mut db, b"nope").is_err());
    }
}
