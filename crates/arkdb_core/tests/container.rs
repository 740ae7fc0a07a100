//! End-to-end container tests: build, serialize, sign, map, stream.

use arkdb_core::schema::{
    AdbSchema, Field, FieldKind, ObjectSchema, SCALAR_BLOB, SCALAR_INT,
};
use arkdb_core::{
    arena_of_blocks, transform, write_container, Adb, BlockType, CoreError, ObjBuilder, ObjView,
    ValKind,
};
use arkdb_trust::{PrivateKey, Trust};
use std::cmp::Ordering;
use std::fs::File;
use std::io::{Cursor, Read};
use tempfile::tempdir;

const SCHEMA_ID: u32 = 0x302e6b70;

static PKG_FIELDS: [Field; 3] = [
    Field::new("name", FieldKind::Blob(&SCALAR_BLOB)),
    Field::new("version", FieldKind::Int(&SCALAR_INT)),
    Field::new("description", FieldKind::Blob(&SCALAR_BLOB)),
];

static PKG: ObjectSchema = ObjectSchema {
    compare: Some(compare_pkg),
    ..ObjectSchema::new_object(&PKG_FIELDS)
};

fn compare_pkg(a: &ObjView<'_>, b: &ObjView<'_>) -> Ordering {
    a.cmp_field(b, 1).then_with(|| a.cmp_field(b, 2))
}

static PKG_ELEM: [Field; 1] = [Field::new("", FieldKind::Object(&PKG))];
static PKG_LIST: ObjectSchema = ObjectSchema::new_array(&PKG_ELEM, 32);

static NESTED_PKG: AdbSchema = AdbSchema {
    schema_id: SCHEMA_ID,
    root: &PKG,
};
static NESTED_ELEM: [Field; 1] = [Field::new("", FieldKind::Adb(&NESTED_PKG))];
static NESTED_LIST: ObjectSchema = ObjectSchema::new_array(&NESTED_ELEM, 8);

static INT_ELEM: [Field; 1] = [Field::new("", FieldKind::Int(&SCALAR_INT))];
static WIDE_LIST: ObjectSchema = ObjectSchema::new_array(&INT_ELEM, 600);

fn write_pkg(db: &mut Adb, name: &[u8], version: u32) -> arkdb_core::Val {
    let mut obj = ObjBuilder::new(&PKG);
    obj.set_blob(db, 1, name).unwrap();
    obj.set_int(db, 2, version).unwrap();
    obj.commit(db).unwrap()
}

fn test_key() -> PrivateKey {
    PrivateKey::from_seed([11u8; 32])
}

fn signer() -> Trust {
    let mut trust = Trust::new();
    trust.add_private_key(test_key());
    trust
}

fn verifier() -> Trust {
    let mut trust = Trust::new();
    trust.add_public_key(test_key().public_key());
    trust
}

#[test]
fn object_round_trip() {
    // {field1: 7, field2: "hi"} per the two-field package prefix.
    let mut db = Adb::new_writable(SCHEMA_ID);
    let mut obj = ObjBuilder::new(&PKG);
    obj.set_int(&mut db, 2, 7).unwrap();
    obj.set_blob(&mut db, 1, b"hi").unwrap();
    let root = obj.commit(&mut db).unwrap();
    db.write_root(root).unwrap();

    let view = db.view();
    assert_eq!(view.root().kind(), ValKind::Object);

    let obj = view.root_obj(&PKG);
    assert_eq!(obj.len(), 3);
    assert_eq!(obj.int(2), 7);
    assert_eq!(obj.val(2).kind(), ValKind::Int);
    assert_eq!(obj.blob(1), b"hi");
    assert_eq!(obj.val(1).kind(), ValKind::Blob8);
    // One byte of length prefix, value 2.
    let blob_offs = obj.val(1).payload() as usize;
    assert_eq!(view.bytes()[blob_offs], 0x02);
}

#[test]
fn identical_blobs_intern_to_one_offset() {
    let mut db = Adb::new_writable(SCHEMA_ID);
    let a = db.write_blob(b"abc").unwrap();
    let b = db.write_blob(b"abc").unwrap();
    assert_eq!(a.payload(), b.payload());
}

#[test]
fn root_is_the_final_word() {
    let mut db = Adb::new_writable(SCHEMA_ID);
    let root = write_pkg(&mut db, b"tool", 3);
    db.write_root(root).unwrap();

    let bytes = db.arena();
    let tail = u32::from_le_bytes(bytes[bytes.len() - 4..].try_into().unwrap());
    assert_eq!(tail, root.raw());
}

#[test]
fn int32_boundary() {
    let mut db = Adb::new_writable(SCHEMA_ID);
    let inline = db.write_int((1 << 28) - 1).unwrap();
    assert_eq!(inline.kind(), ValKind::Int);

    let spilled = db.write_int(1 << 28).unwrap();
    assert_eq!(spilled.kind(), ValKind::Int32);
    assert_eq!(spilled.payload() % 4, 0);
    assert_eq!(
        &db.arena()[spilled.payload() as usize..spilled.payload() as usize + 4],
        (1u32 << 28).to_le_bytes()
    );
}

#[test]
fn sorted_package_list_supports_find() {
    let mut db = Adb::new_writable(SCHEMA_ID);
    let mut list = ObjBuilder::new(&PKG_LIST);
    for (name, version) in [
        (b"zlib".as_slice(), 1u32),
        (b"curl".as_slice(), 2),
        (b"curl".as_slice(), 1),
        (b"acl".as_slice(), 9),
    ] {
        let pkg = write_pkg(&mut db, name, version);
        list.append(&mut db, pkg).unwrap();
    }
    list.sort(&db);
    let arr = list.commit(&mut db).unwrap();
    db.write_root(arr).unwrap();

    // Needle lives in its own database.
    let mut needle_db = Adb::new_writable(SCHEMA_ID);
    let needle = write_pkg(&mut needle_db, b"curl", 1);

    let list = db.view().root_obj(&PKG_LIST);
    let hit = list.find(0, needle_db.view(), needle).unwrap();
    assert_eq!(list.child(hit).blob(1), b"curl");
    assert_eq!(list.child(hit).int(2), 1);

    // A same-name needle matches only its exact version.
    assert!(list.find(hit, needle_db.view(), needle).is_none());

    let missing = write_pkg(&mut needle_db, b"openssl", 1);
    assert!(list.find(0, needle_db.view(), missing).is_none());
}

fn compare_by_name(a: &ObjView<'_>, b: &ObjView<'_>) -> Ordering {
    a.cmp_field(b, 1)
}

#[test]
fn duplicate_runs_are_walked_from_the_left() {
    static NAME_ONLY: ObjectSchema = ObjectSchema {
        compare: Some(compare_by_name),
        ..ObjectSchema::new_object(&PKG_FIELDS)
    };
    static NAME_ELEM: [Field; 1] = [Field::new("", FieldKind::Object(&NAME_ONLY))];
    static NAME_LIST: ObjectSchema = ObjectSchema::new_array(&NAME_ELEM, 32);

    let mut db = Adb::new_writable(SCHEMA_ID);
    let mut list = ObjBuilder::new(&NAME_LIST);
    for (name, version) in [
        (b"curl".as_slice(), 1u32),
        (b"curl".as_slice(), 2),
        (b"curl".as_slice(), 3),
        (b"zlib".as_slice(), 1),
    ] {
        let mut obj = ObjBuilder::new(&NAME_ONLY);
        obj.set_blob(&mut db, 1, name).unwrap();
        obj.set_int(&mut db, 2, version).unwrap();
        list.append_obj(&mut db, &mut obj).unwrap();
    }
    list.sort(&db);
    let arr = list.commit(&mut db).unwrap();
    db.write_root(arr).unwrap();

    let mut needle_db = Adb::new_writable(SCHEMA_ID);
    let mut obj = ObjBuilder::new(&NAME_ONLY);
    obj.set_blob(&mut needle_db, 1, b"curl").unwrap();
    let needle = obj.commit(&mut needle_db).unwrap();

    let list = db.view().root_obj(&NAME_LIST);
    // Binary search lands somewhere in the run; the result must be its
    // first element, and the cursor walks the rest in order.
    let first = list.find(0, needle_db.view(), needle).unwrap();
    assert_eq!(list.child(first).int(2), 1);
    let second = list.find(first, needle_db.view(), needle).unwrap();
    assert_eq!(list.child(second).int(2), 2);
    let third = list.find(second, needle_db.view(), needle).unwrap();
    assert_eq!(list.child(third).int(2), 3);
    assert!(list.find(third, needle_db.view(), needle).is_none());
}

#[test]
fn sort_unique_is_idempotent_and_strict() {
    let mut db = Adb::new_writable(SCHEMA_ID);
    let mut list = ObjBuilder::new(&PKG_LIST);
    for (name, version) in [
        (b"b".as_slice(), 1u32),
        (b"a".as_slice(), 1),
        (b"b".as_slice(), 1),
        (b"c".as_slice(), 1),
        (b"a".as_slice(), 1),
    ] {
        let pkg = write_pkg(&mut db, name, version);
        list.append(&mut db, pkg).unwrap();
    }
    list.sort_unique(&db);
    let arr = list.commit(&mut db).unwrap();
    db.write_root(arr).unwrap();

    let view = db.view().root_obj(&PKG_LIST);
    let names: Vec<&[u8]> = (1..view.len()).map(|i| view.child(i).blob(1)).collect();
    assert_eq!(names, [b"a".as_slice(), b"b", b"c"]);
    for i in 2..view.len() {
        assert_eq!(
            compare_pkg(&view.child(i - 1), &view.child(i)),
            Ordering::Less
        );
    }
}

#[test]
fn nested_containers_sort_by_root_object() {
    let mut outer = Adb::new_writable(SCHEMA_ID);
    let mut list = ObjBuilder::new(&NESTED_LIST);
    for name in [b"zsh".as_slice(), b"bash".as_slice(), b"fish".as_slice()] {
        let mut inner = Adb::new_writable(SCHEMA_ID);
        let root = write_pkg(&mut inner, name, 1);
        inner.write_root(root).unwrap();
        let val = outer.write_nested(&inner).unwrap();
        list.append(&mut outer, val).unwrap();
    }
    list.sort(&outer);
    let arr = list.commit(&mut outer).unwrap();
    outer.write_root(arr).unwrap();

    let view = outer.view().root_obj(&NESTED_LIST);
    let mut names = Vec::new();
    for i in 1..view.len() {
        let inner = arena_of_blocks(view.blob(i), None).unwrap();
        names.push(inner.root_obj(&PKG).blob(1).to_vec());
    }
    assert_eq!(names, [b"bash".to_vec(), b"fish".to_vec(), b"zsh".to_vec()]);
}

#[test]
fn cross_database_copy_preserves_structure() {
    let mut src = Adb::new_writable(SCHEMA_ID);
    let mut list = ObjBuilder::new(&PKG_LIST);
    for (name, version) in [(b"curl".as_slice(), 2u32), (b"zlib".as_slice(), 1)] {
        let pkg = write_pkg(&mut src, name, version);
        list.append(&mut src, pkg).unwrap();
    }
    let arr = list.commit(&mut src).unwrap();
    src.write_root(arr).unwrap();

    let mut dst = Adb::new_writable(SCHEMA_ID);
    let copied = dst.copy_from(src.view(), src.view().root()).unwrap();
    dst.write_root(copied).unwrap();

    let view = dst.view().root_obj(&PKG_LIST);
    assert_eq!(view.len(), 3);
    assert_eq!(view.child(1).blob(1), b"curl");
    assert_eq!(view.child(1).int(2), 2);
    assert_eq!(view.child(2).blob(1), b"zlib");
}

#[test]
fn oversized_copy_is_rejected() {
    let mut src = Adb::new_writable(SCHEMA_ID);
    let mut list = ObjBuilder::new(&WIDE_LIST);
    for n in 0..540u32 {
        let v = src.write_int(n).unwrap();
        list.append(&mut src, v).unwrap();
    }
    let arr = list.commit(&mut src).unwrap();

    let mut dst = Adb::new_writable(SCHEMA_ID);
    assert!(matches!(
        dst.copy_from(src.view(), arr),
        Err(CoreError::TooLarge { .. })
    ));
    assert!(dst.is_poisoned());
}

#[test]
fn stream_and_map_agree_on_the_arena() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("pkg.adb");

    let mut db = Adb::new_writable(SCHEMA_ID);
    let root = write_pkg(&mut db, b"curl", 4);
    db.write_root(root).unwrap();

    let mut file = File::create(&path).unwrap();
    write_container(&mut file, &db, None).unwrap();
    file.sync_all().unwrap();

    let mapped = Adb::map(File::open(&path).unwrap(), Some(SCHEMA_ID), None).unwrap();
    let streamed = Adb::from_stream(
        File::open(&path).unwrap(),
        Some(SCHEMA_ID),
        None,
        |_, _, _| Ok(()),
    )
    .unwrap();

    assert_eq!(mapped.arena(), streamed.arena());
    assert_eq!(mapped.view().root_obj(&PKG).blob(1), b"curl");
}

#[test]
fn signed_container_verifies_and_detects_tampering() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("signed.adb");

    let mut db = Adb::new_writable(SCHEMA_ID);
    let root = write_pkg(&mut db, b"curl", 4);
    db.write_root(root).unwrap();

    let mut bytes = Vec::new();
    write_container(&mut bytes, &db, Some(&signer())).unwrap();
    std::fs::write(&path, &bytes).unwrap();

    let trust = verifier();
    let mapped = Adb::map(File::open(&path).unwrap(), Some(SCHEMA_ID), Some(&trust)).unwrap();
    assert_eq!(mapped.view().root_obj(&PKG).int(2), 4);

    // Flip one byte inside the ADB block payload.
    let mut tampered = bytes.clone();
    tampered[12] ^= 0x01;
    let bad_path = dir.path().join("tampered.adb");
    std::fs::write(&bad_path, &tampered).unwrap();
    assert!(matches!(
        Adb::map(File::open(&bad_path).unwrap(), Some(SCHEMA_ID), Some(&trust)),
        Err(CoreError::KeyRejected)
    ));

    // Flip one byte of the signed header.
    let mut bad_hdr = bytes.clone();
    bad_hdr[4] ^= 0x01;
    let hdr_path = dir.path().join("badhdr.adb");
    std::fs::write(&hdr_path, &bad_hdr).unwrap();
    assert!(matches!(
        Adb::map(File::open(&hdr_path).unwrap(), None, Some(&trust)),
        Err(CoreError::KeyRejected)
    ));
}

#[test]
fn unsigned_container_needs_no_key_with_trust() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("unsigned.adb");

    let mut db = Adb::new_writable(SCHEMA_ID);
    let root = write_pkg(&mut db, b"curl", 4);
    db.write_root(root).unwrap();
    let mut file = File::create(&path).unwrap();
    write_container(&mut file, &db, None).unwrap();
    drop(file);

    let trust = verifier();
    assert!(matches!(
        Adb::map(File::open(&path).unwrap(), None, Some(&trust)),
        Err(CoreError::NoKey)
    ));
}

#[test]
fn map_rejects_garbage() {
    let dir = tempdir().unwrap();

    let empty = dir.path().join("empty.adb");
    std::fs::write(&empty, b"").unwrap();
    assert!(matches!(
        Adb::map(File::open(&empty).unwrap(), None, None),
        Err(CoreError::Malformed { .. })
    ));

    let junk = dir.path().join("junk.adb");
    std::fs::write(&junk, b"this is not a container at all").unwrap();
    assert!(matches!(
        Adb::map(File::open(&junk).unwrap(), None, None),
        Err(CoreError::Malformed { .. })
    ));
}

#[test]
fn map_rejects_wrong_schema() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("pkg.adb");

    let mut db = Adb::new_writable(SCHEMA_ID);
    let root = write_pkg(&mut db, b"x", 1);
    db.write_root(root).unwrap();
    let mut file = File::create(&path).unwrap();
    write_container(&mut file, &db, None).unwrap();
    drop(file);

    assert!(matches!(
        Adb::map(File::open(&path).unwrap(), Some(0x1111), None),
        Err(CoreError::SchemaMismatch { .. })
    ));
}

#[test]
fn resign_flow_strips_and_replaces_signatures() {
    let old_key = PrivateKey::from_seed([21u8; 32]);
    let new_key = PrivateKey::from_seed([22u8; 32]);

    let mut old_signer = Trust::new();
    old_signer.add_private_key(old_key);
    let mut new_signer = Trust::new();
    new_signer.add_private_key(new_key.clone());

    let mut db = Adb::new_writable(SCHEMA_ID);
    let root = write_pkg(&mut db, b"curl", 9);
    db.write_root(root).unwrap();
    let mut signed = Vec::new();
    write_container(&mut signed, &db, Some(&old_signer)).unwrap();

    // Transform: digest the ADB block while copying it, drop old SIG
    // blocks, append fresh signatures at the end.
    let mut vfy = arkdb_core::VerifyCtx::new();
    let mut resigned = Vec::new();
    transform(&mut Cursor::new(&signed), &mut resigned, |x, block| {
        match block {
            Some(b) => match b.block.block_type() {
                BlockType::Adb => arkdb_core::copy_block(x.os, b.block, b.payload, Some(&mut vfy)),
                BlockType::Sig => {
                    b.payload.skip_remaining()?;
                    Ok(())
                }
                _ => Ok(()),
            },
            None => arkdb_core::sign_blocks(&new_signer, &x.hdr, None, &mut vfy, x.os),
        }
    })
    .unwrap();

    let mut new_verifier = Trust::new();
    new_verifier.add_public_key(new_key.public_key());

    let dir = tempdir().unwrap();
    let path = dir.path().join("resigned.adb");
    std::fs::write(&path, &resigned).unwrap();
    let mapped = Adb::map(File::open(&path).unwrap(), Some(SCHEMA_ID), Some(&new_verifier)).unwrap();
    assert_eq!(mapped.view().root_obj(&PKG).int(2), 9);
}

#[test]
fn data_blocks_stream_with_partial_consumption() {
    let trust = signer();
    let verify = verifier();

    let mut db = Adb::new_writable(SCHEMA_ID);
    let root = write_pkg(&mut db, b"curl", 1);
    db.write_root(root).unwrap();

    let mut bytes = Vec::new();
    write_container(&mut bytes, &db, Some(&trust)).unwrap();
    let payload = vec![0x5au8; 100];
    arkdb_core::write_data_block(&mut bytes, b"", payload.len(), &mut Cursor::new(payload))
        .unwrap();
    let tail = vec![0x77u8; 10];
    arkdb_core::write_data_block(&mut bytes, b"", tail.len(), &mut Cursor::new(tail)).unwrap();

    let mut lengths = Vec::new();
    Adb::from_stream(
        Cursor::new(bytes),
        Some(SCHEMA_ID),
        Some(&verify),
        |_, len, seg| {
            lengths.push(len);
            if len == 100 {
                // Consume only 40 of the 100 bytes; the framer must
                // still find the next block.
                let mut buf = [0u8; 40];
                seg.read_exact(&mut buf)?;
                assert!(buf.iter().all(|&b| b == 0x5a));
            }
            Ok(())
        },
    )
    .unwrap();
    assert_eq!(lengths, [100, 10]);
}

#[test]
fn from_string_builds_fields_and_elements() {
    static PARSED_LIST: ObjectSchema = ObjectSchema::new_array(&INT_ELEM, 8);

    let mut db = Adb::new_writable(SCHEMA_ID);
    let mut obj = ObjBuilder::new(&PKG);
    obj.set_from_string(&mut db, 1, b"curl").unwrap();
    obj.set_from_string(&mut db, 2, b"42").unwrap();
    let root = obj.commit(&mut db).unwrap();
    db.write_root(root).unwrap();

    let view = db.view().root_obj(&PKG);
    assert_eq!(view.blob(1), b"curl");
    assert_eq!(view.int(2), 42);

    let mut list = ObjBuilder::new(&PARSED_LIST);
    for text in [b"3".as_slice(), b"1", b"2"] {
        list.append_from_string(&mut db, text).unwrap();
    }
    list.sort(&db);
    let arr = list.commit(&mut db).unwrap();
    let arr_view = db.view().read_obj(arr, &PARSED_LIST);
    let values: Vec<u32> = (1..arr_view.len()).map(|i| arr_view.int(i)).collect();
    assert_eq!(values, [1, 2, 3]);
}

#[test]
fn mapped_database_rejects_writes() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ro.adb");

    let mut db = Adb::new_writable(SCHEMA_ID);
    let root = write_pkg(&mut db, b"curl", 1);
    db.write_root(root).unwrap();
    let mut file = File::create(&path).unwrap();
    write_container(&mut file, &db, None).unwrap();
    drop(file);

    let mut mapped = Adb::map(File::open(&path).unwrap(), Some(SCHEMA_ID), None).unwrap();
    // An inline int never touches the arena; a spilled one must refuse.
    assert!(matches!(
        mapped.write_int(1 << 28),
        Err(CoreError::NotSupported { .. })
    ));
    assert!(matches!(
        mapped.write_blob(b"nope"),
        Err(CoreError::NotSupported { .. })
    ));
    assert!(matches!(
        mapped.write_root(arkdb_core::Val::NULL),
        Err(CoreError::NotSupported { .. })
    ));
    // The arena is untouched and still readable.
    assert_eq!(mapped.view().root_obj(&PKG).blob(1), b"curl");
}

#[test]
fn static_database_builds_small_objects() {
    let mut db = Adb::new_static(SCHEMA_ID, 256);
    let root = write_pkg(&mut db, b"tiny", 1);
    db.write_root(root).unwrap();
    assert_eq!(db.view().root_obj(&PKG).blob(1), b"tiny");

    let mut cramped = Adb::new_static(SCHEMA_ID, 8);
    let result = cramped.write_blob(&[9u8; 64]);
    assert!(matches!(result, Err(CoreError::TooLarge { .. })));
}
