//! Arena construction.
//!
//! Scalar writers live on [`Adb`]; objects and arrays are assembled in an
//! [`ObjBuilder`] and committed into the arena as one interned value
//! vector. Any write failure poisons the database header so a later
//! attempt to serialize the container refuses.

use crate::block::{Block, BlockType};
use crate::db::Adb;
use crate::error::{CoreError, CoreResult};
use crate::reader::ArenaView;
use crate::schema::{FieldKind, ObjectKind, ObjectSchema};
use crate::value::{Val, ValKind};

/// Hard cap on slots copied per object level by [`Adb::copy_from`].
const COPY_SLOT_LIMIT: usize = 512;

impl Adb {
    /// Writes an integer: inline when it fits in 28 bits, otherwise an
    /// interned 4-byte little-endian payload.
    pub fn write_int(&mut self, v: u32) -> CoreResult<Val> {
        if v <= Val::MAX_INLINE_INT {
            return Ok(Val::new(Val::TAG_INT, v));
        }
        let offs = self.write_data(&[&v.to_le_bytes()], 4)?;
        Ok(Val::new(Val::TAG_INT_32, offs))
    }

    /// Writes a blob with the smallest length prefix that fits.
    ///
    /// The empty blob is the null value.
    pub fn write_blob(&mut self, b: &[u8]) -> CoreResult<Val> {
        let n = b.len();
        let (tag, prefix, prefix_len): (u32, [u8; 4], usize) = if n == 0 {
            return Ok(Val::NULL);
        } else if n <= 0xff {
            (Val::TAG_BLOB_8, [n as u8, 0, 0, 0], 1)
        } else if n <= 0xffff {
            let le = (n as u16).to_le_bytes();
            (Val::TAG_BLOB_16, [le[0], le[1], 0, 0], 2)
        } else {
            (Val::TAG_BLOB_32, (n as u32).to_le_bytes(), 4)
        };
        let offs = self.write_data(&[&prefix[..prefix_len], b], prefix_len)?;
        Ok(Val::new(tag, offs))
    }

    /// Appends the root value; it must be the final write.
    ///
    /// Readers locate the root in the last 4 bytes of the arena.
    pub fn write_root(&mut self, root: Val) -> CoreResult<()> {
        self.write_raw(&[&root.raw().to_le_bytes()], 4)?;
        Ok(())
    }

    /// Parses a value of the given field kind from text.
    pub fn write_from_string(&mut self, kind: &FieldKind, text: &[u8]) -> CoreResult<Val> {
        match kind {
            FieldKind::Int(s) | FieldKind::Blob(s) => {
                let parse = s
                    .from_string
                    .ok_or_else(|| CoreError::not_implemented("scalar has no text parser"))?;
                parse(self, text)
            }
            FieldKind::Object(s) | FieldKind::Array(s) => {
                let parse = s
                    .from_string
                    .ok_or_else(|| CoreError::malformed("schema has no text parser"))?;
                let mut obj = ObjBuilder::new(s);
                parse(&mut obj, self, text)?;
                obj.commit(self)
            }
            FieldKind::Adb(_) => Err(CoreError::not_implemented(
                "nested containers cannot be parsed from text",
            )),
        }
    }

    /// Deep-copies a value from another database's arena.
    ///
    /// Inline values copy by word; out-of-line payloads are re-interned
    /// here. Objects and arrays recurse with a per-level cap of 512
    /// slots. 64-bit integers and 32-bit-prefixed blobs have no copy
    /// path yet.
    pub fn copy_from(&mut self, src: ArenaView<'_>, v: Val) -> CoreResult<Val> {
        let result = self.copy_value(src, v);
        if result.is_err() {
            self.poison();
        }
        result
    }

    fn copy_value(&mut self, src: ArenaView<'_>, v: Val) -> CoreResult<Val> {
        let (size, align) = match v.kind() {
            ValKind::Null | ValKind::Error | ValKind::Int => return Ok(v),
            ValKind::Int32 => (4, 4),
            ValKind::Blob8 => {
                let prefix = src
                    .deref(v, 0, 1)
                    .ok_or_else(|| CoreError::malformed("blob prefix out of bounds"))?;
                (1 + usize::from(prefix[0]), 1)
            }
            ValKind::Blob16 => {
                let prefix = src
                    .deref(v, 0, 2)
                    .ok_or_else(|| CoreError::malformed("blob prefix out of bounds"))?;
                (2 + usize::from(u16::from_le_bytes([prefix[0], prefix[1]])), 2)
            }
            ValKind::Object | ValKind::Array => return self.copy_vector(src, v),
            ValKind::Int64 | ValKind::Blob32 | ValKind::Reserved => {
                return Err(CoreError::not_implemented(format!(
                    "copy of {:?} values",
                    v.kind()
                )));
            }
        };
        let bytes = src
            .deref(v, 0, size)
            .ok_or_else(|| CoreError::malformed("payload out of bounds"))?;
        let offs = self.write_data(&[bytes], align)?;
        Ok(Val::new(v.tag(), offs))
    }

    fn copy_vector(&mut self, src: ArenaView<'_>, v: Val) -> CoreResult<Val> {
        let len_slot = src
            .deref(v, 0, 4)
            .ok_or_else(|| CoreError::malformed("vector out of bounds"))?;
        let num =
            u32::from_le_bytes([len_slot[0], len_slot[1], len_slot[2], len_slot[3]]) as usize;
        if num > COPY_SLOT_LIMIT {
            return Err(CoreError::TooLarge {
                size: num,
                limit: COPY_SLOT_LIMIT,
            });
        }
        let slots = src
            .deref(v, 0, num.max(1) * 4)
            .ok_or_else(|| CoreError::malformed("vector out of bounds"))?;

        let mut copied = Vec::with_capacity(num * 4);
        copied.extend_from_slice(&slots[..4]);
        for i in 1..num {
            let raw = u32::from_le_bytes([
                slots[i * 4],
                slots[i * 4 + 1],
                slots[i * 4 + 2],
                slots[i * 4 + 3],
            ]);
            let child = self.copy_value(src, Val::from_raw(raw))?;
            copied.extend_from_slice(&child.raw().to_le_bytes());
        }
        let offs = self.write_data(&[&copied], 4)?;
        Ok(Val::new(v.tag(), offs))
    }

    /// Embeds another database as a nested container blob.
    ///
    /// The inner arena is framed as a single ADB block and stored under
    /// a 4-byte length prefix, so readers can open the blob with the
    /// block-range entry point. Returns null for an effectively empty
    /// inner database.
    pub fn write_nested(&mut self, inner: &Adb) -> CoreResult<Val> {
        if inner.len() <= 4 {
            return Ok(Val::NULL);
        }
        let blk = Block::new(BlockType::Adb, inner.len());
        let padding = [0u8; crate::block::BLOCK_ALIGNMENT];
        let blob_len = (blk.padded_size() as u32).to_le_bytes();
        let offs = self.write_raw(
            &[
                &blob_len,
                &blk.encode(),
                inner.arena(),
                &padding[..blk.padding()],
            ],
            4,
        )?;
        Ok(Val::new(Val::TAG_BLOB_32, offs))
    }
}

/// Builder for one object or array value vector.
///
/// Slot writes are 1-based; slot 0 becomes the length slot at commit.
/// A builder can be reused: [`commit`](Self::commit) resets it in place.
#[derive(Debug)]
pub struct ObjBuilder {
    schema: &'static ObjectSchema,
    slots: Vec<Val>,
    num: usize,
}

impl ObjBuilder {
    /// Creates a builder sized to the schema's capacity.
    #[must_use]
    pub fn new(schema: &'static ObjectSchema) -> Self {
        Self {
            schema,
            slots: vec![Val::NULL; schema.num_fields],
            num: 1,
        }
    }

    /// Creates a builder for the object-shaped field `i` of `schema`.
    ///
    /// # Panics
    ///
    /// Panics if the field is not object-shaped; a programming error.
    #[must_use]
    pub fn for_field(schema: &'static ObjectSchema, i: usize) -> Self {
        let child = schema
            .field_kind(i)
            .object_schema()
            .expect("field is not object-shaped");
        Self::new(child)
    }

    /// The schema this builder commits under.
    #[must_use]
    pub fn schema(&self) -> &'static ObjectSchema {
        self.schema
    }

    /// Number of occupied slots including the length slot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.num
    }

    /// Whether no field or element has been set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.num <= 1
    }

    /// Clears all slots, keeping the capacity.
    pub fn reset(&mut self) {
        self.slots.fill(Val::NULL);
        self.num = 1;
    }

    /// Stores a value in 1-based slot `i`.
    pub fn set_val(&mut self, db: &mut Adb, i: usize, v: Val) -> CoreResult<Val> {
        assert!(i >= 1, "slot 0 is the length slot");
        if i >= self.slots.len() {
            db.poison();
            return Err(CoreError::TooLarge {
                size: i + 1,
                limit: self.slots.len(),
            });
        }
        if !v.is_null() && i >= self.num {
            self.num = i + 1;
        }
        self.slots[i] = v;
        Ok(v)
    }

    /// Stores an integer field, eliding it when it equals the schema
    /// default.
    pub fn set_int(&mut self, db: &mut Adb, i: usize, v: u32) -> CoreResult<Val> {
        if let Some(default) = self.schema.get_default_int {
            if default(i) == v {
                return Ok(Val::NULL);
            }
        }
        let val = db.write_int(v)?;
        self.set_val(db, i, val)
    }

    /// Stores a blob field.
    pub fn set_blob(&mut self, db: &mut Adb, i: usize, b: &[u8]) -> CoreResult<Val> {
        debug_assert_eq!(self.schema.kind, ObjectKind::Object);
        let val = db.write_blob(b)?;
        self.set_val(db, i, val)
    }

    /// Commits `child` and stores the result in slot `i`.
    pub fn set_obj(&mut self, db: &mut Adb, i: usize, child: &mut ObjBuilder) -> CoreResult<Val> {
        debug_assert_eq!(self.schema.kind, ObjectKind::Object);
        let val = child.commit(db)?;
        self.set_val(db, i, val)
    }

    /// Parses field `i` from text and stores it.
    pub fn set_from_string(&mut self, db: &mut Adb, i: usize, text: &[u8]) -> CoreResult<Val> {
        if i >= self.slots.len() {
            db.poison();
            return Err(CoreError::TooLarge {
                size: i + 1,
                limit: self.slots.len(),
            });
        }
        let result = db.write_from_string(self.schema.field_kind(i), text);
        match result {
            Ok(val) => self.set_val(db, i, val),
            Err(e) => {
                db.poison();
                Err(e)
            }
        }
    }

    /// Appends an element to an array; null appends are dropped.
    pub fn append(&mut self, db: &mut Adb, v: Val) -> CoreResult<Val> {
        debug_assert_eq!(self.schema.kind, ObjectKind::Array);
        if v.is_null() {
            return Ok(v);
        }
        if self.num >= self.slots.len() {
            db.poison();
            return Err(CoreError::TooLarge {
                size: self.num + 1,
                limit: self.slots.len(),
            });
        }
        self.slots[self.num] = v;
        self.num += 1;
        Ok(v)
    }

    /// Commits `child` and appends the result.
    pub fn append_obj(&mut self, db: &mut Adb, child: &mut ObjBuilder) -> CoreResult<Val> {
        let val = child.commit(db)?;
        self.append(db, val)
    }

    /// Parses an element from text and appends it.
    pub fn append_from_string(&mut self, db: &mut Adb, text: &[u8]) -> CoreResult<Val> {
        let val = db.write_from_string(&self.schema.fields[0].kind, text)?;
        self.append(db, val)
    }

    /// Fills this builder from text using the schema's parser.
    ///
    /// The builder is reset first; commit separately.
    pub fn fill_from_string(&mut self, db: &mut Adb, text: &[u8]) -> CoreResult<()> {
        let parse = self
            .schema
            .from_string
            .ok_or_else(|| CoreError::malformed("schema has no text parser"))?;
        self.reset();
        parse(self, db, text)
    }

    /// Sorts array elements in place under the element descriptor.
    ///
    /// Elements are already-committed values; only the slot order
    /// changes. Nested-container elements compare by their root objects.
    ///
    /// # Panics
    ///
    /// Panics when called on an object builder or when the element
    /// descriptor has no usable comparator; programming errors.
    pub fn sort(&mut self, db: &Adb) {
        assert_eq!(self.schema.kind, ObjectKind::Array);
        let view = db.view();
        let elements = &mut self.slots[1..self.num];

        match self.schema.fields[0].kind {
            FieldKind::Int(s) | FieldKind::Blob(s) => {
                elements.sort_by(|&a, &b| (s.compare)(view, a, view, b));
            }
            FieldKind::Object(s) | FieldKind::Array(s) => {
                let compare = s.compare.expect("array element without comparator");
                elements.sort_by(|&a, &b| {
                    compare(&view.read_obj(a, s), &view.read_obj(b, s))
                });
            }
            FieldKind::Adb(s) => {
                let compare = s.root.compare.expect("nested root without comparator");
                elements.sort_by(|&a, &b| {
                    let va = nested_view(view, a);
                    let vb = nested_view(view, b);
                    compare(&va.root_obj(s.root), &vb.root_obj(s.root))
                });
            }
        }
    }

    /// Sorts, then drops adjacent duplicate elements.
    ///
    /// Interning makes equal content produce equal value words within
    /// one writable database, so word equality detects duplicates and
    /// the result is strictly increasing under the element comparator.
    pub fn sort_unique(&mut self, db: &Adb) {
        self.sort(db);
        if self.num > 2 {
            let mut j = 2;
            for i in 2..self.num {
                if self.slots[i] == self.slots[i - 1] {
                    continue;
                }
                self.slots[j] = self.slots[i];
                j += 1;
            }
            for slot in &mut self.slots[j..self.num] {
                *slot = Val::NULL;
            }
            self.num = j;
        }
    }

    /// Commits the vector into the arena.
    ///
    /// Runs the schema's pre-commit hook, trims trailing null slots,
    /// interns the vector, and resets the builder. An empty vector
    /// commits to null.
    pub fn commit(&mut self, db: &mut Adb) -> CoreResult<Val> {
        if let Some(hook) = self.schema.pre_commit {
            hook(self, db);
        }

        let mut n = self.num;
        while n > 1 && self.slots[n - 1].is_null() {
            n -= 1;
        }
        if n <= 1 {
            self.reset();
            return Ok(Val::NULL);
        }

        let mut bytes = Vec::with_capacity(n * 4);
        bytes.extend_from_slice(&(n as u32).to_le_bytes());
        for slot in &self.slots[1..n] {
            bytes.extend_from_slice(&slot.raw().to_le_bytes());
        }

        let tag = match self.schema.kind {
            ObjectKind::Object => Val::TAG_OBJECT,
            ObjectKind::Array => Val::TAG_ARRAY,
        };
        let result = db.write_data(&[&bytes], 4).map(|offs| Val::new(tag, offs));
        if result.is_err() {
            db.poison();
        }
        self.reset();
        result
    }
}

/// Opens a nested-container element blob as an arena view.
///
/// Damaged nested blobs read as the empty arena, whose root object is
/// degenerate; they sort together at one end rather than aborting.
fn nested_view<'a>(view: ArenaView<'a>, v: Val) -> ArenaView<'a> {
    crate::container::arena_of_blocks(view.read_blob(v), None)
        .unwrap_or_else(|_| ArenaView::new(&[]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Field, SCALAR_BLOB, SCALAR_INT};
    use crate::value::ValKind;

    static FIELDS: [Field; 2] = [
        Field::new("field1", FieldKind::Int(&SCALAR_INT)),
        Field::new("field2", FieldKind::Blob(&SCALAR_BLOB)),
    ];
    static OBJ: ObjectSchema = ObjectSchema::new_object(&FIELDS);

    static INT_ELEM: [Field; 1] = [Field::new("", FieldKind::Int(&SCALAR_INT))];
    static INT_ARR: ObjectSchema = ObjectSchema::new_array(&INT_ELEM, 16);

    #[test]
    fn inline_int_boundary() {
        let mut db = Adb::new_writable(0);
        let inline = db.write_int((1 << 28) - 1).unwrap();
        assert_eq!(inline.kind(), ValKind::Int);
        assert_eq!(inline.payload(), (1 << 28) - 1);
        assert_eq!(db.len(), 0);

        let spilled = db.write_int(1 << 28).unwrap();
        assert_eq!(spilled.kind(), ValKind::Int32);
        assert_eq!(spilled.payload() % 4, 0);
        assert_eq!(db.view().read_int(spilled), 1 << 28);
    }

    #[test]
    fn blob_prefix_widths() {
        let mut db = Adb::new_writable(0);
        assert!(db.write_blob(b"").unwrap().is_null());

        let small = db.write_blob(b"hi").unwrap();
        assert_eq!(small.kind(), ValKind::Blob8);
        assert_eq!(db.arena()[small.payload() as usize], 0x02);

        let medium = db.write_blob(&[7u8; 300]).unwrap();
        assert_eq!(medium.kind(), ValKind::Blob16);
        assert_eq!(medium.payload() % 2, 0);

        let large = db.write_blob(&[7u8; 0x1_0001]).unwrap();
        assert_eq!(large.kind(), ValKind::Blob32);
        assert_eq!(large.payload() % 4, 0);
        assert_eq!(db.view().read_blob(large).len(), 0x1_0001);
    }

    #[test]
    fn blob_interning_returns_same_value() {
        let mut db = Adb::new_writable(0);
        let a = db.write_blob(b"abc").unwrap();
        let b = db.write_blob(b"abc").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn commit_trims_trailing_nulls() {
        let mut db = Adb::new_writable(0);
        let mut obj = ObjBuilder::new(&OBJ);
        obj.set_int(&mut db, 1, 5).unwrap();
        obj.set_val(&mut db, 2, Val::NULL).unwrap();
        let val = obj.commit(&mut db).unwrap();

        let view = db.view().read_obj(val, &OBJ);
        assert_eq!(view.len(), 2);
    }

    #[test]
    fn empty_commit_is_null() {
        let mut db = Adb::new_writable(0);
        let mut obj = ObjBuilder::new(&OBJ);
        assert!(obj.commit(&mut db).unwrap().is_null());
        assert!(!db.is_poisoned());
    }

    #[test]
    fn builder_resets_after_commit() {
        let mut db = Adb::new_writable(0);
        let mut obj = ObjBuilder::new(&OBJ);
        obj.set_int(&mut db, 1, 5).unwrap();
        obj.commit(&mut db).unwrap();
        assert!(obj.is_empty());
        assert!(obj.commit(&mut db).unwrap().is_null());
    }

    #[test]
    fn array_append_and_overflow() {
        static TINY_ARR: ObjectSchema = ObjectSchema::new_array(&INT_ELEM, 2);
        let mut db = Adb::new_writable(0);
        let mut arr = ObjBuilder::new(&TINY_ARR);
        for n in [1u32, 2] {
            let v = db.write_int(n).unwrap();
            arr.append(&mut db, v).unwrap();
        }
        let v = db.write_int(3).unwrap();
        assert!(matches!(
            arr.append(&mut db, v),
            Err(CoreError::TooLarge { .. })
        ));
        assert!(db.is_poisoned());
    }

    #[test]
    fn sort_unique_produces_strictly_increasing() {
        let mut db = Adb::new_writable(0);
        let mut arr = ObjBuilder::new(&INT_ARR);
        for n in [5u32, 2, 2, 9] {
            let v = db.write_int(n).unwrap();
            arr.append(&mut db, v).unwrap();
        }
        arr.sort_unique(&db);
        let val = arr.commit(&mut db).unwrap();

        let view = db.view().read_obj(val, &INT_ARR);
        let elems: Vec<u32> = (1..view.len()).map(|i| view.int(i)).collect();
        assert_eq!(elems, [2, 5, 9]);
    }

    #[test]
    fn sort_is_idempotent() {
        let mut db = Adb::new_writable(0);
        let mut arr = ObjBuilder::new(&INT_ARR);
        for n in [3u32, 1, 4, 1, 5] {
            let v = db.write_int(n).unwrap();
            arr.append(&mut db, v).unwrap();
        }
        arr.sort(&db);
        let first: Vec<Val> = arr.slots[1..arr.num].to_vec();
        arr.sort(&db);
        assert_eq!(&arr.slots[1..arr.num], &first[..]);
    }

    #[test]
    fn copy_between_databases() {
        let mut src = Adb::new_writable(0);
        let mut obj = ObjBuilder::new(&OBJ);
        obj.set_int(&mut src, 1, 1 << 28).unwrap();
        obj.set_blob(&mut src, 2, b"payload").unwrap();
        let val = obj.commit(&mut src).unwrap();

        let mut dst = Adb::new_writable(0);
        let copied = dst.copy_from(src.view(), val).unwrap();

        let view = dst.view().read_obj(copied, &OBJ);
        assert_eq!(view.int(1), 1 << 28);
        assert_eq!(view.blob(2), b"payload");
    }

    #[test]
    fn copy_rejects_unimplemented_encodings() {
        let mut src = Adb::new_writable(0);
        let big = src.write_blob(&[1u8; 0x1_0001]).unwrap();
        assert_eq!(big.kind(), ValKind::Blob32);

        let mut dst = Adb::new_writable(0);
        assert!(matches!(
            dst.copy_from(src.view(), big),
            Err(CoreError::NotImplemented { .. })
        ));
        assert!(dst.is_poisoned());
    }

    #[test]
    fn nested_database_round_trips_as_blob() {
        let mut inner = Adb::new_writable(7);
        let mut obj = ObjBuilder::new(&OBJ);
        obj.set_int(&mut inner, 1, 11).unwrap();
        let root = obj.commit(&mut inner).unwrap();
        inner.write_root(root).unwrap();

        let mut outer = Adb::new_writable(0);
        let val = outer.write_nested(&inner).unwrap();
        assert_eq!(val.kind(), ValKind::Blob32);

        let blob = outer.view().read_blob(val);
        let arena = crate::container::arena_of_blocks(blob, None).unwrap();
        assert_eq!(arena.root_obj(&OBJ).int(1), 11);
    }

    #[test]
    fn empty_nested_database_is_null() {
        let inner = Adb::new_writable(0);
        let mut outer = Adb::new_writable(0);
        assert!(outer.write_nested(&inner).unwrap().is_null());
    }
}
