//! Arena navigation.
//!
//! [`ArenaView`] is a copyable, bounds-checked window over one arena;
//! [`ObjView`] overlays an object schema on a value vector. Lookups never
//! fail loudly: out-of-bounds or mistyped values decode as null / zero /
//! the empty blob, and a bad vector produces a degenerate view whose
//! fields all read as null. Containers are untrusted input until their
//! signatures verify, and even then a damaged arena must not take the
//! reader out of bounds.

use crate::schema::{FieldKind, ObjectKind, ObjectSchema};
use crate::value::{Val, ValKind};
use std::cmp::Ordering;

/// A read-only view of one arena.
#[derive(Debug, Clone, Copy)]
pub struct ArenaView<'a> {
    bytes: &'a [u8],
}

impl<'a> ArenaView<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    /// Returns the underlying arena bytes.
    #[must_use]
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Arena length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the arena is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Resolves `size` bytes at the value's offset plus `extra`, or
    /// `None` when the range leaves the arena.
    pub(crate) fn deref(&self, v: Val, extra: usize, size: usize) -> Option<&'a [u8]> {
        let offs = v.payload() as usize + extra;
        let end = offs.checked_add(size)?;
        if end > self.bytes.len() {
            return None;
        }
        Some(&self.bytes[offs..end])
    }

    /// The root value: the last 4 bytes of the arena.
    #[must_use]
    pub fn root(&self) -> Val {
        let n = self.bytes.len();
        if n < 4 {
            return Val::NULL;
        }
        Val::from_raw(u32::from_le_bytes([
            self.bytes[n - 4],
            self.bytes[n - 3],
            self.bytes[n - 2],
            self.bytes[n - 1],
        ]))
    }

    /// Reads an integer value; non-integers read as zero.
    #[must_use]
    pub fn read_int(&self, v: Val) -> u32 {
        match v.kind() {
            ValKind::Int => v.payload(),
            ValKind::Int32 => self
                .deref(v, 0, 4)
                .map_or(0, |b| u32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            _ => 0,
        }
    }

    /// Reads a blob value; non-blobs and damaged blobs read as empty.
    #[must_use]
    pub fn read_blob(&self, v: Val) -> &'a [u8] {
        let (prefix, len) = match v.kind() {
            ValKind::Blob8 => match self.deref(v, 0, 1) {
                Some(b) => (1, usize::from(b[0])),
                None => return &[],
            },
            ValKind::Blob16 => match self.deref(v, 0, 2) {
                Some(b) => (2, usize::from(u16::from_le_bytes([b[0], b[1]]))),
                None => return &[],
            },
            ValKind::Blob32 => match self.deref(v, 0, 4) {
                Some(b) => (4, u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as usize),
                None => return &[],
            },
            _ => return &[],
        };
        self.deref(v, prefix, len).unwrap_or(&[])
    }

    /// Overlays `schema` on an object or array value.
    ///
    /// Returns a degenerate single-slot view when the value is not a
    /// vector or its bytes run past the arena, so field reads yield null
    /// instead of failing.
    #[must_use]
    pub fn read_obj(&self, v: Val, schema: &'static ObjectSchema) -> ObjView<'a> {
        let degenerate = ObjView {
            arena: *self,
            schema,
            slots: &[],
            num: 1,
        };

        if !matches!(v.kind(), ValKind::Object | ValKind::Array) {
            return degenerate;
        }
        let Some(len_slot) = self.deref(v, 0, 4) else {
            return degenerate;
        };
        let num = u32::from_le_bytes([len_slot[0], len_slot[1], len_slot[2], len_slot[3]]) as usize;
        if num == 0 {
            return degenerate;
        }
        let Some(slots) = self.deref(v, 0, num * 4) else {
            return degenerate;
        };
        ObjView {
            arena: *self,
            schema,
            slots,
            num,
        }
    }

    /// Overlays `schema` on the root value.
    #[must_use]
    pub fn root_obj(&self, schema: &'static ObjectSchema) -> ObjView<'a> {
        self.read_obj(self.root(), schema)
    }
}

/// A typed view of one object or array value vector.
#[derive(Debug, Clone, Copy)]
pub struct ObjView<'a> {
    arena: ArenaView<'a>,
    schema: &'static ObjectSchema,
    slots: &'a [u8],
    num: usize,
}

impl<'a> ObjView<'a> {
    /// Vector length including the length slot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.num
    }

    /// Whether the view holds no fields (degenerate or empty).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.num <= 1
    }

    /// The arena this view reads from.
    #[must_use]
    pub fn arena(&self) -> ArenaView<'a> {
        self.arena
    }

    /// The schema the view was opened with.
    #[must_use]
    pub fn schema(&self) -> &'static ObjectSchema {
        self.schema
    }

    /// Returns slot `i`, or null when `i` is past the vector.
    #[must_use]
    pub fn val(&self, i: usize) -> Val {
        if i >= self.num {
            return Val::NULL;
        }
        let Some(bytes) = self.slots.get(i * 4..i * 4 + 4) else {
            return Val::NULL;
        };
        Val::from_raw(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Reads field `i` as an integer, substituting the schema default
    /// for absent slots.
    #[must_use]
    pub fn int(&self, i: usize) -> u32 {
        let v = self.val(i);
        if v.is_null() {
            if let Some(default) = self.schema.get_default_int {
                return default(i);
            }
        }
        self.arena.read_int(v)
    }

    /// Reads field `i` as a blob.
    #[must_use]
    pub fn blob(&self, i: usize) -> &'a [u8] {
        self.arena.read_blob(self.val(i))
    }

    /// Returns the descriptor for field `i`; arrays always yield the
    /// element descriptor.
    #[must_use]
    pub fn field_kind(&self, i: usize) -> &FieldKind {
        self.schema.field_kind(i)
    }

    /// Opens field `i` as a child object or array view.
    ///
    /// # Panics
    ///
    /// Panics if the schema does not describe field `i` as an object or
    /// array; that is a programming error, not an input error.
    #[must_use]
    pub fn child(&self, i: usize) -> ObjView<'a> {
        let child_schema = match self.field_kind(i) {
            FieldKind::Object(s) | FieldKind::Array(s) => *s,
            other => panic!("field {i} is not an object or array: {other:?}"),
        };
        self.arena.read_obj(self.val(i), child_schema)
    }

    /// Compares field `i` of two views sharing this object schema.
    ///
    /// # Panics
    ///
    /// Panics on schema mismatch, on an array view, or when the field's
    /// kind has no comparator; all programming errors.
    #[must_use]
    pub fn cmp_field(&self, other: &ObjView<'_>, i: usize) -> Ordering {
        assert!(
            std::ptr::eq(self.schema, other.schema),
            "comparing views of different schemas"
        );
        assert_eq!(self.schema.kind, ObjectKind::Object);
        match self.field_kind(i) {
            FieldKind::Int(s) | FieldKind::Blob(s) => {
                (s.compare)(self.arena, self.val(i), other.arena, other.val(i))
            }
            FieldKind::Object(s) => {
                let compare = s.compare.expect("object field without comparator");
                compare(&self.child(i), &other.child(i))
            }
            other => panic!("field {i} is not comparable: {other:?}"),
        }
    }

    /// Searches a sorted array for `needle` (a value in `needle_view`).
    ///
    /// With `cursor == 0`, binary-searches and returns the first equal
    /// element's 1-based index. With a previous match index as `cursor`,
    /// checks whether the following element is still equal, for
    /// iterating runs of duplicates. Returns `None` when exhausted.
    ///
    /// # Panics
    ///
    /// Panics if this view's schema is not an array of objects with a
    /// comparator.
    #[must_use]
    pub fn find(&self, cursor: usize, needle_view: ArenaView<'_>, needle: Val) -> Option<usize> {
        assert_eq!(self.schema.kind, ObjectKind::Array);
        let elem_schema = self.schema.fields[0]
            .kind
            .object_schema()
            .expect("array element is not object-shaped");
        let compare = elem_schema.compare.expect("array element without comparator");

        let cmp_at = |i: usize| -> Ordering {
            let lhs = needle_view.read_obj(needle, elem_schema);
            let rhs = self.arena.read_obj(self.val(i), elem_schema);
            compare(&lhs, &rhs)
        };

        if cursor == 0 {
            let mut lo = 1;
            let mut hi = self.num;
            let mut found = None;
            while lo < hi {
                let mid = lo + (hi - lo) / 2;
                match cmp_at(mid) {
                    Ordering::Less => hi = mid,
                    Ordering::Greater => lo = mid + 1,
                    Ordering::Equal => {
                        found = Some(mid);
                        break;
                    }
                }
            }
            let mut cur = found?;
            while cur > 1 && cmp_at(cur - 1) == Ordering::Equal {
                cur -= 1;
            }
            Some(cur)
        } else {
            let cur = cursor + 1;
            if cur < self.num && cmp_at(cur) == Ordering::Equal {
                Some(cur)
            } else {
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Adb;
    use crate::schema::{Field, FieldKind, ObjectSchema, SCALAR_BLOB, SCALAR_INT};
    use crate::writer::ObjBuilder;

    static FIELDS: [Field; 2] = [
        Field::new("field1", FieldKind::Int(&SCALAR_INT)),
        Field::new("field2", FieldKind::Blob(&SCALAR_BLOB)),
    ];
    static OBJ: ObjectSchema = ObjectSchema::new_object(&FIELDS);

    fn sample_db() -> Adb {
        let mut db = Adb::new_writable(0);
        let mut obj = ObjBuilder::new(&OBJ);
        obj.set_int(&mut db, 1, 7).unwrap();
        obj.set_blob(&mut db, 2, b"hi").unwrap();
        let root = obj.commit(&mut db).unwrap();
        db.write_root(root).unwrap();
        db
    }

    #[test]
    fn root_is_last_four_bytes() {
        let db = sample_db();
        let view = db.view();
        let root = view.root();
        assert_eq!(root.kind(), ValKind::Object);
        let tail = &view.bytes()[view.len() - 4..];
        assert_eq!(root.raw(), u32::from_le_bytes(tail.try_into().unwrap()));
    }

    #[test]
    fn short_arena_has_null_root() {
        assert!(ArenaView::new(&[0u8; 3]).root().is_null());
    }

    #[test]
    fn object_fields_read_back() {
        let db = sample_db();
        let root = db.view().root_obj(&OBJ);
        assert_eq!(root.len(), 3);
        assert_eq!(root.int(1), 7);
        assert_eq!(root.blob(2), b"hi");
        assert!(root.val(3).is_null());
    }

    #[test]
    fn mistyped_values_read_as_defaults() {
        let db = sample_db();
        let view = db.view();
        let root = view.root();
        assert_eq!(view.read_int(root), 0);
        assert_eq!(view.read_blob(root), b"");
    }

    #[test]
    fn degenerate_view_yields_nulls() {
        let db = sample_db();
        let view = db.view();
        // An inline int is not a vector.
        let bogus = view.read_obj(view.root_obj(&OBJ).val(1), &OBJ);
        assert_eq!(bogus.len(), 1);
        assert!(bogus.val(1).is_null());
        assert_eq!(bogus.int(1), 0);
    }

    #[test]
    fn truncated_vector_is_degenerate() {
        // A vector whose declared length runs past the arena.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&100u32.to_le_bytes());
        let view = ArenaView::new(&bytes);
        let obj = view.read_obj(Val::from_raw(0xe000_0000), &OBJ);
        assert_eq!(obj.len(), 1);
        assert!(obj.val(1).is_null());
    }

    #[test]
    fn blob_bounds_are_checked() {
        // BLOB_8 prefix claiming more bytes than the arena holds.
        let bytes = [200u8, b'x'];
        let view = ArenaView::new(&bytes);
        assert_eq!(view.read_blob(Val::from_raw(0x8000_0000)), b"");
    }

    fn default_int(i: usize) -> u32 {
        if i == 1 {
            99
        } else {
            0
        }
    }

    #[test]
    fn default_int_substitutes_for_absent_fields() {
        static DEFAULTED: ObjectSchema = ObjectSchema {
            get_default_int: Some(default_int),
            ..ObjectSchema::new_object(&FIELDS)
        };
        let mut db = Adb::new_writable(0);
        let mut obj = ObjBuilder::new(&DEFAULTED);
        obj.set_blob(&mut db, 2, b"only").unwrap();
        let root = obj.commit(&mut db).unwrap();
        db.write_root(root).unwrap();

        let view = db.view().root_obj(&DEFAULTED);
        assert!(view.val(1).is_null());
        assert_eq!(view.int(1), 99);
    }

    #[test]
    fn cmp_field_orders_by_scalar() {
        let mut db = Adb::new_writable(0);
        let mut obj = ObjBuilder::new(&OBJ);
        obj.set_int(&mut db, 1, 1).unwrap();
        let a = obj.commit(&mut db).unwrap();
        obj.set_int(&mut db, 1, 2).unwrap();
        let b = obj.commit(&mut db).unwrap();

        let view = db.view();
        let oa = view.read_obj(a, &OBJ);
        let ob = view.read_obj(b, &OBJ);
        assert_eq!(oa.cmp_field(&ob, 1), Ordering::Less);
        assert_eq!(ob.cmp_field(&oa, 1), Ordering::Greater);
        assert_eq!(oa.cmp_field(&oa, 1), Ordering::Equal);
    }
}
