//! Byte encoding for the keyspace.
//!
//! Every logical entity owns a disjoint partition of one flat sorted
//! keyspace. A key starts with a [`KeyPrefix`] (varint database id, object
//! store id, and index id) where reserved ids select the partition:
//!
//! - `(0, 0, 0)`: global metadata, then one type byte (schema version, max
//!   database id, data version, database-name rows);
//! - `(db, 0, 0)`: per-database metadata, then one type byte selecting the
//!   plain slots, object-store metadata, index metadata, or store-name rows;
//! - `(db, store, 1)`: primary records, prefix plus encoded primary key;
//! - `(db, store, 2)`: exists entries, same shape;
//! - `(db, store, idx >= 30)`: index entries, prefix plus encoded index key
//!   plus encoded primary key, so duplicate index keys stay individually
//!   addressable.
//!
//! [`compare`] defines the total order the store is opened with. Varints and
//! doubles do not sort byte-wise, so the comparator decodes and compares
//! component-wise; `index_keys` mode ignores the trailing primary-key
//! disambiguator of index entries, which is what range-bound checks want.

use std::cmp::Ordering;

use byteorder::{ByteOrder, LittleEndian};
use strata_store::KeyComparator;

use crate::key::{compare_code_points, Key, KeyPath};

// ============================================================================
// Primitives
// ============================================================================

/// Encodes a non-negative integer as minimal-length little-endian bytes.
pub fn encode_int(value: i64) -> Vec<u8> {
    debug_assert!(value >= 0);
    let mut buf = Vec::with_capacity(8);
    let mut n = value as u64;
    loop {
        buf.push((n & 0xff) as u8);
        n >>= 8;
        if n == 0 {
            break;
        }
    }
    buf
}

/// Decodes a minimal-length little-endian integer from the whole slice.
pub fn decode_int(data: &[u8]) -> Option<i64> {
    if data.is_empty() || data.len() > 8 {
        return None;
    }
    let mut n: u64 = 0;
    for (i, &byte) in data.iter().enumerate() {
        n |= (byte as u64) << (8 * i);
    }
    Some(n as i64)
}

/// Appends a non-negative integer in LEB128 form.
pub fn push_var_int(buf: &mut Vec<u8>, value: i64) {
    debug_assert!(value >= 0);
    let mut n = value as u64;
    loop {
        let byte = (n & 0x7f) as u8;
        n >>= 7;
        if n == 0 {
            buf.push(byte);
            break;
        }
        buf.push(byte | 0x80);
    }
}

/// Encodes a non-negative integer in LEB128 form.
pub fn encode_var_int(value: i64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(2);
    push_var_int(&mut buf, value);
    buf
}

/// Decodes a LEB128 integer, advancing `input` past it.
pub fn decode_var_int(input: &mut &[u8]) -> Option<i64> {
    let mut rest = *input;
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let (&byte, tail) = rest.split_first()?;
        rest = tail;
        if shift >= 64 {
            return None;
        }
        value |= ((byte & 0x7f) as u64) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            break;
        }
    }
    if value > i64::MAX as u64 {
        return None;
    }
    *input = rest;
    Some(value as i64)
}

/// Encodes a bool as one byte.
pub fn encode_bool(value: bool) -> Vec<u8> {
    vec![value as u8]
}

/// Decodes a bool value; anything non-zero is true.
pub fn decode_bool(data: &[u8]) -> bool {
    data.first().map_or(false, |&byte| byte != 0)
}

/// Encodes a string value as raw UTF-8.
pub fn encode_string(value: &str) -> Vec<u8> {
    value.as_bytes().to_vec()
}

/// Decodes a raw UTF-8 string value from the whole slice.
pub fn decode_string(data: &[u8]) -> Option<String> {
    std::str::from_utf8(data).ok().map(str::to_owned)
}

fn push_string_with_length(buf: &mut Vec<u8>, value: &str) {
    push_var_int(buf, value.len() as i64);
    buf.extend_from_slice(value.as_bytes());
}

fn decode_string_piece<'a>(input: &mut &'a [u8]) -> Option<&'a str> {
    let mut rest: &'a [u8] = *input;
    let length = decode_var_int(&mut rest)?;
    if length < 0 || length as usize > rest.len() {
        return None;
    }
    let (head, tail) = rest.split_at(length as usize);
    let piece = std::str::from_utf8(head).ok()?;
    *input = tail;
    Some(piece)
}

fn push_double(buf: &mut Vec<u8>, value: f64) {
    let mut raw = [0u8; 8];
    LittleEndian::write_f64(&mut raw, value);
    buf.extend_from_slice(&raw);
}

fn read_double(input: &mut &[u8]) -> Option<f64> {
    if input.len() < 8 {
        return None;
    }
    let (head, rest) = input.split_at(8);
    let value = LittleEndian::read_f64(head);
    *input = rest;
    Some(value)
}

// ============================================================================
// Logical key encoding
// ============================================================================

const TYPE_MIN: u8 = 0;
const TYPE_ARRAY: u8 = 1;
const TYPE_STRING: u8 = 2;
const TYPE_DATE: u8 = 3;
const TYPE_NUMBER: u8 = 4;
const TYPE_MAX: u8 = 255;

/// Maximum array nesting accepted by the key decoder.
pub const MAX_ARRAY_DEPTH: usize = 32;

/// Encodes a logical key. The type byte carries the cross-type order.
pub fn encode_key(key: &Key) -> Vec<u8> {
    let mut buf = Vec::new();
    push_key(&mut buf, key);
    buf
}

fn push_key(buf: &mut Vec<u8>, key: &Key) {
    match key {
        Key::Invalid => buf.push(TYPE_MIN),
        Key::Array(items) => {
            buf.push(TYPE_ARRAY);
            push_var_int(buf, items.len() as i64);
            for item in items {
                push_key(buf, item);
            }
        }
        Key::String(value) => {
            buf.push(TYPE_STRING);
            push_string_with_length(buf, value);
        }
        Key::Date(value) => {
            buf.push(TYPE_DATE);
            push_double(buf, *value);
        }
        Key::Number(value) => {
            buf.push(TYPE_NUMBER);
            push_double(buf, *value);
        }
    }
}

/// Decodes one logical key, advancing `input` past it.
///
/// Arrays nested beyond [`MAX_ARRAY_DEPTH`] fail to decode; callers treat
/// such rows as invalid rather than recursing further.
pub fn decode_key(input: &mut &[u8]) -> Option<Key> {
    decode_key_at_depth(input, 0)
}

fn decode_key_at_depth(input: &mut &[u8], depth: usize) -> Option<Key> {
    if depth > MAX_ARRAY_DEPTH {
        return None;
    }
    let mut rest = *input;
    let (&type_byte, tail) = rest.split_first()?;
    rest = tail;
    let key = match type_byte {
        TYPE_MIN | TYPE_MAX => Key::Invalid,
        TYPE_ARRAY => {
            let length = decode_var_int(&mut rest)?;
            if length < 0 {
                return None;
            }
            let mut items = Vec::new();
            for _ in 0..length {
                items.push(decode_key_at_depth(&mut rest, depth + 1)?);
            }
            Key::Array(items)
        }
        TYPE_STRING => Key::String(decode_string_piece(&mut rest)?.to_owned()),
        TYPE_DATE => Key::Date(read_double(&mut rest)?),
        TYPE_NUMBER => Key::Number(read_double(&mut rest)?),
        _ => return None,
    };
    *input = rest;
    Some(key)
}

/// Splits off the raw bytes of the next encoded key.
pub fn extract_encoded_key(input: &mut &[u8]) -> Option<Vec<u8>> {
    let start = *input;
    let mut probe = *input;
    decode_key(&mut probe)?;
    let consumed = start.len() - probe.len();
    *input = probe;
    Some(start[..consumed].to_vec())
}

/// Encoded key sorting before every valid key.
pub fn min_key_bytes() -> Vec<u8> {
    vec![TYPE_MIN]
}

/// Encoded key sorting after every valid key. A range sentinel only; it does
/// not decode back to a usable key.
pub fn max_key_bytes() -> Vec<u8> {
    vec![TYPE_MAX]
}

/// Compares two encoded keys, advancing both slices past them when they
/// compare equal.
fn compare_encoded_keys(a: &mut &[u8], b: &mut &[u8]) -> Option<Ordering> {
    let mut rest_a = *a;
    let mut rest_b = *b;
    let (&type_a, tail_a) = rest_a.split_first()?;
    let (&type_b, tail_b) = rest_b.split_first()?;
    if type_a != type_b {
        return Some(type_a.cmp(&type_b));
    }
    rest_a = tail_a;
    rest_b = tail_b;
    let ord = match type_a {
        TYPE_MIN | TYPE_MAX => Ordering::Equal,
        TYPE_ARRAY => {
            let len_a = decode_var_int(&mut rest_a)?;
            let len_b = decode_var_int(&mut rest_b)?;
            let mut ord = len_a.cmp(&len_b);
            for _ in 0..len_a.min(len_b) {
                let element = compare_encoded_keys(&mut rest_a, &mut rest_b)?;
                if element != Ordering::Equal {
                    ord = element;
                    break;
                }
            }
            ord
        }
        TYPE_STRING => {
            let piece_a = decode_string_piece(&mut rest_a)?;
            let piece_b = decode_string_piece(&mut rest_b)?;
            compare_code_points(piece_a, piece_b)
        }
        TYPE_DATE | TYPE_NUMBER => {
            let value_a = read_double(&mut rest_a)?;
            let value_b = read_double(&mut rest_b)?;
            value_a.partial_cmp(&value_b).unwrap_or(Ordering::Equal)
        }
        _ => return None,
    };
    *a = rest_a;
    *b = rest_b;
    Some(ord)
}

// ============================================================================
// Key paths
// ============================================================================

const KEY_PATH_NONE: u8 = 0;
const KEY_PATH_SINGLE: u8 = 1;
const KEY_PATH_MULTIPLE: u8 = 2;

/// Encodes a key path value.
pub fn encode_key_path(path: &KeyPath) -> Vec<u8> {
    let mut buf = Vec::new();
    match path {
        KeyPath::None => buf.push(KEY_PATH_NONE),
        KeyPath::Single(expression) => {
            buf.push(KEY_PATH_SINGLE);
            push_string_with_length(&mut buf, expression);
        }
        KeyPath::Multiple(expressions) => {
            buf.push(KEY_PATH_MULTIPLE);
            push_var_int(&mut buf, expressions.len() as i64);
            for expression in expressions {
                push_string_with_length(&mut buf, expression);
            }
        }
    }
    buf
}

/// Decodes a key path value.
pub fn decode_key_path(data: &[u8]) -> Option<KeyPath> {
    let mut rest = data;
    let (&kind, tail) = rest.split_first()?;
    rest = tail;
    match kind {
        KEY_PATH_NONE => Some(KeyPath::None),
        KEY_PATH_SINGLE => Some(KeyPath::Single(decode_string_piece(&mut rest)?.to_owned())),
        KEY_PATH_MULTIPLE => {
            let count = decode_var_int(&mut rest)?;
            if count < 0 {
                return None;
            }
            let mut expressions = Vec::new();
            for _ in 0..count {
                expressions.push(decode_string_piece(&mut rest)?.to_owned());
            }
            Some(KeyPath::Multiple(expressions))
        }
        _ => None,
    }
}

// ============================================================================
// Key prefix and partitions
// ============================================================================

// Global metadata rows, under prefix (0, 0, 0).
const GLOBAL_SCHEMA_VERSION: u8 = 0;
const GLOBAL_MAX_DATABASE_ID: u8 = 1;
const GLOBAL_DATA_VERSION: u8 = 2;
const GLOBAL_DATABASE_NAME: u8 = 201;

// Database-scoped rows, under prefix (db, 0, 0). Bytes 0..=4 are the plain
// DatabaseMetaDataKey slots.
const DATABASE_OBJECT_STORE_META: u8 = 50;
const DATABASE_INDEX_META: u8 = 100;
const DATABASE_OBJECT_STORE_NAMES: u8 = 200;

/// The structured header partitioning the keyspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPrefix {
    /// Database id, or 0 for global metadata.
    pub database_id: i64,
    /// Object store id, or 0 for metadata partitions.
    pub object_store_id: i64,
    /// Index id, or one of the reserved partition sentinels.
    pub index_id: i64,
}

impl KeyPrefix {
    /// Index-id sentinel selecting the primary-record partition.
    pub const OBJECT_STORE_DATA_INDEX_ID: i64 = 1;
    /// Index-id sentinel selecting the exists-entry partition.
    pub const EXISTS_ENTRY_INDEX_ID: i64 = 2;
    /// Smallest id a real index may use.
    pub const MINIMUM_INDEX_ID: i64 = 30;
    /// Ids are validated below this before encoding.
    pub const MAX_ID: i64 = (1 << 56) - 1;

    /// Creates a prefix from raw ids.
    pub fn new(database_id: i64, object_store_id: i64, index_id: i64) -> Self {
        Self { database_id, object_store_id, index_id }
    }

    /// Encodes the prefix as three varints.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(12);
        push_var_int(&mut buf, self.database_id);
        push_var_int(&mut buf, self.object_store_id);
        push_var_int(&mut buf, self.index_id);
        buf
    }

    /// Decodes a prefix, advancing `input` past it.
    pub fn decode(input: &mut &[u8]) -> Option<KeyPrefix> {
        let mut rest = *input;
        let database_id = decode_var_int(&mut rest)?;
        let object_store_id = decode_var_int(&mut rest)?;
        let index_id = decode_var_int(&mut rest)?;
        *input = rest;
        Some(KeyPrefix { database_id, object_store_id, index_id })
    }

    /// Whether `id` can name a database.
    pub fn valid_database_id(id: i64) -> bool {
        id > 0 && id <= Self::MAX_ID
    }

    /// Whether the pair can name an object store.
    pub fn valid_ids(database_id: i64, object_store_id: i64) -> bool {
        Self::valid_database_id(database_id)
            && object_store_id > 0
            && object_store_id <= Self::MAX_ID
    }

    /// Whether the triple can name an index.
    pub fn valid_ids_with_index(database_id: i64, object_store_id: i64, index_id: i64) -> bool {
        Self::valid_ids(database_id, object_store_id)
            && index_id >= Self::MINIMUM_INDEX_ID
            && index_id <= Self::MAX_ID
    }
}

fn global_metadata_key(type_byte: u8) -> Vec<u8> {
    let mut buf = KeyPrefix::new(0, 0, 0).encode();
    buf.push(type_byte);
    buf
}

/// Row storing the backing store's schema version.
pub struct SchemaVersionKey;

impl SchemaVersionKey {
    /// Encodes the schema-version key.
    pub fn encode() -> Vec<u8> {
        global_metadata_key(GLOBAL_SCHEMA_VERSION)
    }
}

/// Row storing the highest database id ever allocated.
pub struct MaxDatabaseIdKey;

impl MaxDatabaseIdKey {
    /// Encodes the max-database-id key.
    pub fn encode() -> Vec<u8> {
        global_metadata_key(GLOBAL_MAX_DATABASE_ID)
    }
}

/// Row storing the serialization version of record values.
pub struct DataVersionKey;

impl DataVersionKey {
    /// Encodes the data-version key.
    pub fn encode() -> Vec<u8> {
        global_metadata_key(GLOBAL_DATA_VERSION)
    }
}

/// Row mapping an (origin, database name) pair to its database id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseNameKey {
    /// Origin the database belongs to.
    pub origin: String,
    /// User-visible database name.
    pub name: String,
}

impl DatabaseNameKey {
    /// Encodes the name row for `origin` and `name`.
    pub fn encode(origin: &str, name: &str) -> Vec<u8> {
        let mut buf = global_metadata_key(GLOBAL_DATABASE_NAME);
        push_string_with_length(&mut buf, origin);
        push_string_with_length(&mut buf, name);
        buf
    }

    /// Smallest name row an origin can own; scans start here.
    pub fn encode_min_key_for_origin(origin: &str) -> Vec<u8> {
        Self::encode(origin, "")
    }

    /// Decodes a name row, advancing `input` past it.
    pub fn decode(input: &mut &[u8]) -> Option<DatabaseNameKey> {
        let mut rest = *input;
        let prefix = KeyPrefix::decode(&mut rest)?;
        if prefix.database_id != 0 || prefix.object_store_id != 0 || prefix.index_id != 0 {
            return None;
        }
        let (&type_byte, tail) = rest.split_first()?;
        if type_byte != GLOBAL_DATABASE_NAME {
            return None;
        }
        rest = tail;
        let origin = decode_string_piece(&mut rest)?.to_owned();
        let name = decode_string_piece(&mut rest)?.to_owned();
        *input = rest;
        Some(DatabaseNameKey { origin, name })
    }
}

/// Plain per-database metadata rows.
pub struct DatabaseMetaDataKey;

impl DatabaseMetaDataKey {
    /// Origin-name slot; also the smallest database-scoped key.
    pub const ORIGIN_NAME: u8 = 0;
    /// Database-name slot.
    pub const DATABASE_NAME: u8 = 1;
    /// Legacy string version slot.
    pub const USER_VERSION: u8 = 2;
    /// Highest object store id ever allocated.
    pub const MAX_OBJECT_STORE_ID: u8 = 3;
    /// Integer version slot.
    pub const USER_INT_VERSION: u8 = 4;

    /// Encodes the metadata row `meta_type` of a database.
    pub fn encode(database_id: i64, meta_type: u8) -> Vec<u8> {
        let mut buf = KeyPrefix::new(database_id, 0, 0).encode();
        buf.push(meta_type);
        buf
    }
}

/// Object-store metadata rows within a database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectStoreMetaDataKey {
    /// Object store the row belongs to.
    pub object_store_id: i64,
    /// Which slot this row is.
    pub meta_type: u8,
}

impl ObjectStoreMetaDataKey {
    /// Store name slot.
    pub const NAME: u8 = 0;
    /// Key path slot.
    pub const KEY_PATH: u8 = 1;
    /// Auto-increment flag slot.
    pub const AUTO_INCREMENT: u8 = 2;
    /// Evictable flag slot; written but unused.
    pub const EVICTABLE: u8 = 3;
    /// Last issued record version.
    pub const LAST_VERSION: u8 = 4;
    /// Highest index id ever allocated.
    pub const MAX_INDEX_ID: u8 = 5;
    /// Whether the key path is non-null.
    pub const HAS_KEY_PATH: u8 = 6;
    /// Key generator state.
    pub const KEY_GENERATOR_CURRENT_NUMBER: u8 = 7;

    /// Encodes the metadata row `meta_type` of an object store.
    pub fn encode(database_id: i64, object_store_id: i64, meta_type: u8) -> Vec<u8> {
        let mut buf = KeyPrefix::new(database_id, 0, 0).encode();
        buf.push(DATABASE_OBJECT_STORE_META);
        push_var_int(&mut buf, object_store_id);
        buf.push(meta_type);
        buf
    }

    /// Upper bound over every object-store metadata row of a database.
    pub fn encode_max_for_database(database_id: i64) -> Vec<u8> {
        Self::encode(database_id, KeyPrefix::MAX_ID, u8::MAX)
    }

    /// Upper bound over one object store's metadata rows.
    pub fn encode_max_for_store(database_id: i64, object_store_id: i64) -> Vec<u8> {
        Self::encode(database_id, object_store_id, u8::MAX)
    }

    /// Decodes an object-store metadata key, advancing `input` past it.
    pub fn decode(input: &mut &[u8]) -> Option<ObjectStoreMetaDataKey> {
        let mut rest = *input;
        let prefix = KeyPrefix::decode(&mut rest)?;
        if prefix.database_id == 0 || prefix.object_store_id != 0 || prefix.index_id != 0 {
            return None;
        }
        let (&type_byte, tail) = rest.split_first()?;
        if type_byte != DATABASE_OBJECT_STORE_META {
            return None;
        }
        rest = tail;
        let object_store_id = decode_var_int(&mut rest)?;
        let (&meta_type, tail) = rest.split_first()?;
        rest = tail;
        *input = rest;
        Some(ObjectStoreMetaDataKey { object_store_id, meta_type })
    }
}

/// Index metadata rows within a database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexMetaDataKey {
    /// Object store the index belongs to.
    pub object_store_id: i64,
    /// Index the row belongs to.
    pub index_id: i64,
    /// Which slot this row is.
    pub meta_type: u8,
}

impl IndexMetaDataKey {
    /// Index name slot.
    pub const NAME: u8 = 0;
    /// Unique flag slot.
    pub const UNIQUE: u8 = 1;
    /// Key path slot.
    pub const KEY_PATH: u8 = 2;
    /// Multi-entry flag slot.
    pub const MULTI_ENTRY: u8 = 3;

    /// Encodes the metadata row `meta_type` of an index.
    pub fn encode(database_id: i64, object_store_id: i64, index_id: i64, meta_type: u8) -> Vec<u8> {
        let mut buf = KeyPrefix::new(database_id, 0, 0).encode();
        buf.push(DATABASE_INDEX_META);
        push_var_int(&mut buf, object_store_id);
        push_var_int(&mut buf, index_id);
        buf.push(meta_type);
        buf
    }

    /// Upper bound over one object store's index metadata rows.
    pub fn encode_max_for_store(database_id: i64, object_store_id: i64) -> Vec<u8> {
        Self::encode(database_id, object_store_id, KeyPrefix::MAX_ID, u8::MAX)
    }

    /// Upper bound over one index's metadata rows.
    pub fn encode_max_for_index(
        database_id: i64,
        object_store_id: i64,
        index_id: i64,
    ) -> Vec<u8> {
        Self::encode(database_id, object_store_id, index_id, u8::MAX)
    }

    /// Decodes an index metadata key, advancing `input` past it.
    pub fn decode(input: &mut &[u8]) -> Option<IndexMetaDataKey> {
        let mut rest = *input;
        let prefix = KeyPrefix::decode(&mut rest)?;
        if prefix.database_id == 0 || prefix.object_store_id != 0 || prefix.index_id != 0 {
            return None;
        }
        let (&type_byte, tail) = rest.split_first()?;
        if type_byte != DATABASE_INDEX_META {
            return None;
        }
        rest = tail;
        let object_store_id = decode_var_int(&mut rest)?;
        let index_id = decode_var_int(&mut rest)?;
        let (&meta_type, tail) = rest.split_first()?;
        rest = tail;
        *input = rest;
        Some(IndexMetaDataKey { object_store_id, index_id, meta_type })
    }
}

/// Row mapping an object store name to its id.
pub struct ObjectStoreNamesKey;

impl ObjectStoreNamesKey {
    /// Encodes the name row for an object store.
    pub fn encode(database_id: i64, name: &str) -> Vec<u8> {
        let mut buf = KeyPrefix::new(database_id, 0, 0).encode();
        buf.push(DATABASE_OBJECT_STORE_NAMES);
        push_string_with_length(&mut buf, name);
        buf
    }
}

/// Key of a primary record: prefix plus the encoded primary key.
#[derive(Debug, Clone)]
pub struct ObjectStoreDataKey {
    /// Decoded primary key.
    pub user_key: Key,
}

impl ObjectStoreDataKey {
    /// Encodes the record key for `user_key`.
    pub fn encode(database_id: i64, object_store_id: i64, user_key: &Key) -> Vec<u8> {
        Self::encode_encoded(database_id, object_store_id, &encode_key(user_key))
    }

    /// Encodes the record key around an already-encoded primary key.
    pub fn encode_encoded(
        database_id: i64,
        object_store_id: i64,
        encoded_user_key: &[u8],
    ) -> Vec<u8> {
        let mut buf =
            KeyPrefix::new(database_id, object_store_id, KeyPrefix::OBJECT_STORE_DATA_INDEX_ID)
                .encode();
        buf.extend_from_slice(encoded_user_key);
        buf
    }

    /// Decodes a record key, advancing `input` past it.
    pub fn decode(input: &mut &[u8]) -> Option<ObjectStoreDataKey> {
        let mut rest = *input;
        let prefix = KeyPrefix::decode(&mut rest)?;
        if prefix.index_id != KeyPrefix::OBJECT_STORE_DATA_INDEX_ID {
            return None;
        }
        let user_key = decode_key(&mut rest)?;
        *input = rest;
        Some(ObjectStoreDataKey { user_key })
    }
}

/// Key of an exists entry: prefix plus the encoded primary key.
pub struct ExistsEntryKey;

impl ExistsEntryKey {
    /// Encodes the exists-entry key for `user_key`.
    pub fn encode(database_id: i64, object_store_id: i64, user_key: &Key) -> Vec<u8> {
        Self::encode_encoded(database_id, object_store_id, &encode_key(user_key))
    }

    /// Encodes the exists-entry key around an already-encoded primary key.
    pub fn encode_encoded(
        database_id: i64,
        object_store_id: i64,
        encoded_user_key: &[u8],
    ) -> Vec<u8> {
        let mut buf =
            KeyPrefix::new(database_id, object_store_id, KeyPrefix::EXISTS_ENTRY_INDEX_ID)
                .encode();
        buf.extend_from_slice(encoded_user_key);
        buf
    }
}

/// Key of an index entry: prefix, index key, then primary key.
///
/// The trailing primary key keeps duplicate index keys individually
/// addressable and ordered by (index key, primary key).
#[derive(Debug, Clone)]
pub struct IndexDataKey {
    /// Owning database.
    pub database_id: i64,
    /// Owning object store.
    pub object_store_id: i64,
    /// Owning index.
    pub index_id: i64,
    /// Decoded index key.
    pub user_key: Key,
}

impl IndexDataKey {
    /// Encodes an index entry key from already-encoded parts.
    pub fn encode(
        database_id: i64,
        object_store_id: i64,
        index_id: i64,
        encoded_user_key: &[u8],
        encoded_primary_key: &[u8],
    ) -> Vec<u8> {
        let mut buf = KeyPrefix::new(database_id, object_store_id, index_id).encode();
        buf.extend_from_slice(encoded_user_key);
        buf.extend_from_slice(encoded_primary_key);
        buf
    }

    /// Encodes the prefix and index key alone; seek targets and bounds.
    pub fn encode_user_key(
        database_id: i64,
        object_store_id: i64,
        index_id: i64,
        user_key: &Key,
    ) -> Vec<u8> {
        Self::encode(database_id, object_store_id, index_id, &encode_key(user_key), &[])
    }

    /// Smallest key of one index's partition.
    pub fn encode_min_key(database_id: i64, object_store_id: i64, index_id: i64) -> Vec<u8> {
        Self::encode(database_id, object_store_id, index_id, &min_key_bytes(), &[])
    }

    /// Largest key of one index's partition.
    pub fn encode_max_key(database_id: i64, object_store_id: i64, index_id: i64) -> Vec<u8> {
        Self::encode(database_id, object_store_id, index_id, &max_key_bytes(), &max_key_bytes())
    }

    /// Decodes an index entry key through its index key, advancing `input`.
    /// The trailing primary key, when present, is left in `input`.
    pub fn decode(input: &mut &[u8]) -> Option<IndexDataKey> {
        let mut rest = *input;
        let prefix = KeyPrefix::decode(&mut rest)?;
        if prefix.index_id < KeyPrefix::MINIMUM_INDEX_ID {
            return None;
        }
        let user_key = decode_key(&mut rest)?;
        *input = rest;
        Some(IndexDataKey {
            database_id: prefix.database_id,
            object_store_id: prefix.object_store_id,
            index_id: prefix.index_id,
            user_key,
        })
    }
}

// ============================================================================
// Keyspace comparator
// ============================================================================

/// Compares two full keyspace keys.
///
/// `index_keys` ignores the trailing primary-key disambiguator of index
/// entries, which is what range-bound checks want; iteration order uses the
/// full comparison.
pub fn compare(a: &[u8], b: &[u8], index_keys: bool) -> Ordering {
    compare_keyspace(a, b, index_keys).unwrap_or_else(|| a.cmp(b))
}

fn compare_keyspace(a: &[u8], b: &[u8], index_keys: bool) -> Option<Ordering> {
    let mut rest_a = a;
    let mut rest_b = b;
    let prefix_a = KeyPrefix::decode(&mut rest_a)?;
    let prefix_b = KeyPrefix::decode(&mut rest_b)?;

    let ord = prefix_a
        .database_id
        .cmp(&prefix_b.database_id)
        .then(prefix_a.object_store_id.cmp(&prefix_b.object_store_id))
        .then(prefix_a.index_id.cmp(&prefix_b.index_id));
    if ord != Ordering::Equal {
        return Some(ord);
    }

    // Identical prefix. A bare prefix sorts before any longer key.
    if rest_a.is_empty() || rest_b.is_empty() {
        return Some(rest_a.len().cmp(&rest_b.len()));
    }

    if prefix_a.database_id == 0 {
        return compare_global_metadata(rest_a, rest_b);
    }
    if prefix_a.object_store_id == 0 {
        return compare_database_metadata(rest_a, rest_b);
    }
    match prefix_a.index_id {
        KeyPrefix::OBJECT_STORE_DATA_INDEX_ID | KeyPrefix::EXISTS_ENTRY_INDEX_ID => {
            compare_encoded_keys(&mut rest_a, &mut rest_b)
        }
        id if id >= KeyPrefix::MINIMUM_INDEX_ID => {
            let ord = compare_encoded_keys(&mut rest_a, &mut rest_b)?;
            if ord != Ordering::Equal || index_keys {
                return Some(ord);
            }
            if rest_a.is_empty() || rest_b.is_empty() {
                return Some(rest_a.len().cmp(&rest_b.len()));
            }
            compare_encoded_keys(&mut rest_a, &mut rest_b)
        }
        _ => Some(rest_a.cmp(rest_b)),
    }
}

fn compare_global_metadata(a: &[u8], b: &[u8]) -> Option<Ordering> {
    let mut rest_a = a;
    let mut rest_b = b;
    let (&type_a, tail_a) = rest_a.split_first()?;
    let (&type_b, tail_b) = rest_b.split_first()?;
    if type_a != type_b {
        return Some(type_a.cmp(&type_b));
    }
    rest_a = tail_a;
    rest_b = tail_b;
    match type_a {
        GLOBAL_DATABASE_NAME => {
            let origin_a = decode_string_piece(&mut rest_a)?;
            let origin_b = decode_string_piece(&mut rest_b)?;
            let ord = compare_code_points(origin_a, origin_b);
            if ord != Ordering::Equal {
                return Some(ord);
            }
            let name_a = decode_string_piece(&mut rest_a)?;
            let name_b = decode_string_piece(&mut rest_b)?;
            Some(compare_code_points(name_a, name_b))
        }
        // The fixed global rows are fully determined by their type byte.
        _ => Some(Ordering::Equal),
    }
}

fn compare_database_metadata(a: &[u8], b: &[u8]) -> Option<Ordering> {
    let mut rest_a = a;
    let mut rest_b = b;
    let (&type_a, tail_a) = rest_a.split_first()?;
    let (&type_b, tail_b) = rest_b.split_first()?;
    if type_a != type_b {
        return Some(type_a.cmp(&type_b));
    }
    rest_a = tail_a;
    rest_b = tail_b;
    match type_a {
        DATABASE_OBJECT_STORE_META => {
            let store_a = decode_var_int(&mut rest_a)?;
            let store_b = decode_var_int(&mut rest_b)?;
            let ord = store_a.cmp(&store_b);
            if ord != Ordering::Equal {
                return Some(ord);
            }
            if rest_a.is_empty() || rest_b.is_empty() {
                return Some(rest_a.len().cmp(&rest_b.len()));
            }
            Some(rest_a[0].cmp(&rest_b[0]))
        }
        DATABASE_INDEX_META => {
            let store_a = decode_var_int(&mut rest_a)?;
            let store_b = decode_var_int(&mut rest_b)?;
            let ord = store_a.cmp(&store_b);
            if ord != Ordering::Equal {
                return Some(ord);
            }
            let index_a = decode_var_int(&mut rest_a)?;
            let index_b = decode_var_int(&mut rest_b)?;
            let ord = index_a.cmp(&index_b);
            if ord != Ordering::Equal {
                return Some(ord);
            }
            if rest_a.is_empty() || rest_b.is_empty() {
                return Some(rest_a.len().cmp(&rest_b.len()));
            }
            Some(rest_a[0].cmp(&rest_b[0]))
        }
        DATABASE_OBJECT_STORE_NAMES => {
            let name_a = decode_string_piece(&mut rest_a)?;
            let name_b = decode_string_piece(&mut rest_b)?;
            Some(compare_code_points(name_a, name_b))
        }
        // The plain per-database slots are fully determined by their type byte.
        _ => Some(Ordering::Equal),
    }
}

/// Comparator the ordered store is opened with.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyspaceComparator;

impl KeyComparator for KeyspaceComparator {
    const NAME: &'static str = "strata_keyspace_v1";

    fn compare(a: &[u8], b: &[u8]) -> Ordering {
        compare(a, b, false)
    }
}
