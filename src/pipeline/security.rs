//! PDF Standard Security Handler, RC4 flavour (revisions 2 and 3).
//!
//! Key derivation, password authentication and per-object RC4 all live here
//! so that `pdf_ops` only ever sees plaintext [`Document`]s.
//!
//! ## Why load through [`load`] instead of `Document::load`?
//!
//! lopdf expands object streams while it parses. An encrypted object stream
//! is ciphertext at that point, so lopdf fails to read it and silently drops
//! every object inside (often the catalog and the whole page tree). [`load`]
//! relabels object streams before lopdf sees them; [`LoadedPdf::unlock`]
//! decrypts first and expands them afterwards.

use crate::error::DocError;
use lopdf::{Dictionary, Document, Object, ObjectId, ObjectStream, Reader, StringFormat};
use md5::{Digest, Md5};
use rc4::consts::{U10, U11, U12, U13, U14, U15, U16, U5, U6, U7, U8, U9};
use rc4::{KeyInit, Rc4, StreamCipher};
use std::path::Path;
use tracing::{debug, warn};

/// Padding string from the Standard Security Handler definition.
const PASSWORD_PADDING: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01, 0x08,
    0x2E, 0x2E, 0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53, 0x69, 0x7A,
];

/// `/Type` carried by object streams between [`load`] and expansion.
const HELD_OBJECT_STREAM: &[u8] = b"HeldObjStm";

/// Every permission bit set (bits 1–2 must be zero).
const ALL_PERMISSIONS: i32 = -4;

// ── Handler ──────────────────────────────────────────────────────────────

/// Parameters of one `/Encrypt` dictionary plus the file identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardSecurity {
    revision: u8,
    /// File key length in bytes (5–16).
    key_len: usize,
    owner_entry: Vec<u8>,
    user_entry: Vec<u8>,
    permissions: i32,
    file_id: Vec<u8>,
}

impl StandardSecurity {
    /// Revision 3, 128-bit handler for a document about to be encrypted.
    pub fn new(user_password: &str, owner_password: &str, file_id: Vec<u8>) -> Result<Self, DocError> {
        let mut handler = Self {
            revision: 3,
            key_len: 16,
            owner_entry: Vec::new(),
            user_entry: Vec::new(),
            permissions: ALL_PERMISSIONS,
            file_id,
        };
        handler.owner_entry =
            handler.compute_owner_entry(owner_password.as_bytes(), user_password.as_bytes())?;
        let key = handler.file_key(user_password.as_bytes());
        handler.user_entry = handler.compute_user_entry(&key)?;
        Ok(handler)
    }

    /// Read a handler from an `/Encrypt` dictionary.
    ///
    /// Only `/Filter /Standard` with V 1–2 and R 2–3 is understood.
    pub fn from_encrypt_dict(dict: &Dictionary, file_id: Vec<u8>) -> Result<Self, DocError> {
        let filter = dict_name(dict, b"Filter").unwrap_or_default();
        if filter != b"Standard" {
            return Err(unsupported(format!(
                "security handler '{}'",
                String::from_utf8_lossy(filter)
            )));
        }
        let version = dict_int(dict, b"V").unwrap_or(0);
        let revision = dict_int(dict, b"R").unwrap_or(0);
        if !(1..=2).contains(&version) || !(2..=3).contains(&revision) {
            return Err(unsupported(format!("encryption V{version} R{revision}")));
        }
        let key_len = if revision == 2 {
            5
        } else {
            let bits = dict_int(dict, b"Length").unwrap_or(40);
            if bits % 8 != 0 || !(40..=128).contains(&bits) {
                return Err(unsupported(format!("key length {bits} bits")));
            }
            (bits / 8) as usize
        };
        let owner_entry = dict_bytes(dict, b"O")
            .ok_or_else(|| DocError::backend("Encrypt dictionary has no /O entry"))?
            .to_vec();
        let user_entry = dict_bytes(dict, b"U")
            .ok_or_else(|| DocError::backend("Encrypt dictionary has no /U entry"))?
            .to_vec();
        let permissions = dict_int(dict, b"P")
            .ok_or_else(|| DocError::backend("Encrypt dictionary has no /P entry"))?
            as u32 as i32;

        Ok(Self {
            revision: revision as u8,
            key_len,
            owner_entry,
            user_entry,
            permissions,
            file_id,
        })
    }

    /// The `/Encrypt` dictionary describing this handler.
    pub fn to_dictionary(&self) -> Dictionary {
        let mut dict = Dictionary::new();
        dict.set("Filter", Object::Name(b"Standard".to_vec()));
        dict.set("V", Object::Integer(if self.revision == 2 { 1 } else { 2 }));
        dict.set("R", Object::Integer(i64::from(self.revision)));
        dict.set("Length", Object::Integer((self.key_len * 8) as i64));
        dict.set(
            "O",
            Object::String(self.owner_entry.clone(), StringFormat::Hexadecimal),
        );
        dict.set(
            "U",
            Object::String(self.user_entry.clone(), StringFormat::Hexadecimal),
        );
        dict.set("P", Object::Integer(i64::from(self.permissions)));
        dict
    }

    /// Authenticate `password` as the user password, then as the owner
    /// password. Returns the file key.
    pub fn authenticate(&self, password: &str) -> Result<Vec<u8>, DocError> {
        if let Some(key) = self.authenticate_user(password.as_bytes())? {
            debug!("Authenticated with user password");
            return Ok(key);
        }
        if let Some(key) = self.authenticate_owner(password.as_bytes())? {
            debug!("Authenticated with owner password");
            return Ok(key);
        }
        Err(DocError::IncorrectPassword)
    }

    fn authenticate_user(&self, password: &[u8]) -> Result<Option<Vec<u8>>, DocError> {
        let key = self.file_key(password);
        let expected = self.compute_user_entry(&key)?;
        let n = if self.revision == 2 { 32 } else { 16 };
        let matches = self.user_entry.len() >= n && expected[..n] == self.user_entry[..n];
        Ok(matches.then_some(key))
    }

    fn authenticate_owner(&self, password: &[u8]) -> Result<Option<Vec<u8>>, DocError> {
        let key = self.owner_rc4_key(password);
        let mut user_password = self.owner_entry.clone();
        if self.revision == 2 {
            rc4_apply(&key, &mut user_password)?;
        } else {
            for i in (0..=19u8).rev() {
                rc4_apply(&xor_key(&key, i), &mut user_password)?;
            }
        }
        self.authenticate_user(&user_password)
    }

    /// File encryption key for `password`.
    pub(crate) fn file_key(&self, password: &[u8]) -> Vec<u8> {
        let permissions = (self.permissions as u32).to_le_bytes();
        let mut hash = md5(&[
            &pad_password(password)[..],
            &self.owner_entry[..],
            &permissions[..],
            &self.file_id[..],
        ]);
        if self.revision >= 3 {
            for _ in 0..50 {
                hash = md5(&[&hash[..self.key_len]]);
            }
        }
        hash[..self.key_len].to_vec()
    }

    fn owner_rc4_key(&self, owner_password: &[u8]) -> Vec<u8> {
        let mut hash = md5(&[&pad_password(owner_password)[..]]);
        if self.revision >= 3 {
            for _ in 0..50 {
                hash = md5(&[&hash[..]]);
            }
        }
        hash[..self.key_len].to_vec()
    }

    fn compute_owner_entry(&self, owner_password: &[u8], user_password: &[u8]) -> Result<Vec<u8>, DocError> {
        let owner_password = if owner_password.is_empty() {
            user_password
        } else {
            owner_password
        };
        let key = self.owner_rc4_key(owner_password);
        let mut entry = pad_password(user_password).to_vec();
        rc4_apply(&key, &mut entry)?;
        if self.revision >= 3 {
            for i in 1..=19u8 {
                rc4_apply(&xor_key(&key, i), &mut entry)?;
            }
        }
        Ok(entry)
    }

    fn compute_user_entry(&self, file_key: &[u8]) -> Result<Vec<u8>, DocError> {
        if self.revision == 2 {
            let mut entry = PASSWORD_PADDING.to_vec();
            rc4_apply(file_key, &mut entry)?;
            return Ok(entry);
        }
        let mut entry = md5(&[&PASSWORD_PADDING[..], &self.file_id[..]]).to_vec();
        rc4_apply(file_key, &mut entry)?;
        for i in 1..=19u8 {
            rc4_apply(&xor_key(file_key, i), &mut entry)?;
        }
        entry.extend_from_slice(&PASSWORD_PADDING[..16]);
        Ok(entry)
    }
}

/// Per-object RC4 key: MD5 of the file key, the low three bytes of the object
/// number and the low two bytes of the generation.
pub fn object_key(file_key: &[u8], (number, generation): ObjectId) -> Vec<u8> {
    let number = number.to_le_bytes();
    let generation = generation.to_le_bytes();
    let hash = md5(&[file_key, &number[..3], &generation[..2]]);
    hash[..(file_key.len() + 5).min(16)].to_vec()
}

// ── Loading ──────────────────────────────────────────────────────────────

/// A parsed document whose objects may still be encrypted.
pub struct LoadedPdf {
    doc: Document,
    lock: Option<Lock>,
    /// Object streams not yet expanded.
    held: Vec<ObjectId>,
}

struct Lock {
    handler: StandardSecurity,
    encrypt_id: Option<ObjectId>,
    metadata_in_clear: bool,
}

impl LoadedPdf {
    pub fn is_encrypted(&self) -> bool {
        self.lock.is_some()
    }

    /// Decrypt with `password`. An unencrypted document is returned as is.
    pub fn unlock(self, password: &str) -> Result<Document, DocError> {
        let LoadedPdf { mut doc, lock, held } = self;
        if let Some(lock) = lock {
            let key = lock.handler.authenticate(password)?;
            let skip = CryptSkip {
                object: lock.encrypt_id,
                metadata: lock.metadata_in_clear,
            };
            crypt_document(&mut doc, &key, skip, Direction::Decrypt)?;
            if let Some(id) = lock.encrypt_id {
                doc.objects.remove(&id);
            }
        }
        expand_object_streams(&mut doc, &held);
        Ok(doc)
    }

    /// The plaintext document, for operations that take no password.
    ///
    /// Documents protected only by an owner password (empty user password)
    /// open transparently; anything else is refused.
    pub fn into_plain(self) -> Result<Document, DocError> {
        match self.unlock("") {
            Err(DocError::IncorrectPassword) => Err(DocError::backend(
                "PDF is password protected; decrypt it first",
            )),
            other => other,
        }
    }
}

/// Parse `path`, keeping encrypted objects as ciphertext and object streams
/// unexpanded.
pub fn load(path: &Path) -> Result<LoadedPdf, DocError> {
    let bytes = std::fs::read(path)
        .map_err(|e| DocError::backend(format!("cannot read '{}': {e}", path.display())))?;
    let mut doc = Reader {
        buffer: &bytes,
        document: Document::new(),
    }
    .read(Some(hold_object_stream))?;

    let held: Vec<ObjectId> = doc
        .objects
        .iter()
        .filter(|(_, object)| is_stream_of_type(object, HELD_OBJECT_STREAM))
        .map(|(id, _)| *id)
        .collect();
    let lock = take_lock(&mut doc)?;
    Ok(LoadedPdf { doc, lock, held })
}

/// Load filter: relabel object streams so lopdf keeps them as plain streams.
///
/// lopdf only uses the returned object for members of object streams it
/// expanded itself, and with this filter it expands none.
fn hold_object_stream(id: ObjectId, object: &mut Object) -> Option<(ObjectId, Object)> {
    if let Object::Stream(stream) = object {
        if stream.dict.type_is(b"ObjStm") {
            stream.dict.set("Type", Object::Name(HELD_OBJECT_STREAM.to_vec()));
        }
    }
    Some((id, Object::Null))
}

/// Replace each held object stream by the objects it contains. Objects that
/// already exist at top level win, as in lopdf's own loader.
fn expand_object_streams(doc: &mut Document, held: &[ObjectId]) {
    for id in held {
        let Some(Object::Stream(mut stream)) = doc.objects.remove(id) else {
            continue;
        };
        stream.dict.set("Type", Object::Name(b"ObjStm".to_vec()));
        match ObjectStream::new(&mut stream) {
            Ok(members) => {
                debug!(stream = ?id, objects = members.objects.len(), "Expanded object stream");
                for (member_id, member) in members.objects {
                    doc.objects.entry(member_id).or_insert(member);
                }
            }
            Err(e) => warn!("Dropping unreadable object stream {id:?}: {e}"),
        }
    }
}

fn take_lock(doc: &mut Document) -> Result<Option<Lock>, DocError> {
    let Some(entry) = doc.trailer.remove(b"Encrypt") else {
        return Ok(None);
    };
    let (dict, encrypt_id) = match entry {
        Object::Reference(id) => {
            let dict = doc
                .get_object(id)
                .and_then(Object::as_dict)
                .map_err(|e| DocError::backend(format!("unreadable Encrypt dictionary: {e}")))?
                .clone();
            (dict, Some(id))
        }
        Object::Dictionary(dict) => (dict, None),
        other => {
            return Err(DocError::backend(format!(
                "unexpected Encrypt entry: {other:?}"
            )))
        }
    };
    let file_id = match doc.trailer.get(b"ID") {
        Ok(Object::Array(ids)) => match ids.first() {
            Some(Object::String(id, _)) => id.clone(),
            _ => Vec::new(),
        },
        _ => {
            warn!("Encrypted PDF has no /ID; using an empty file identifier");
            Vec::new()
        }
    };
    let metadata_in_clear = matches!(dict.get(b"EncryptMetadata"), Ok(Object::Boolean(false)));
    let handler = StandardSecurity::from_encrypt_dict(&dict, file_id)?;
    Ok(Some(Lock {
        handler,
        encrypt_id,
        metadata_in_clear,
    }))
}

// ── Encrypting ───────────────────────────────────────────────────────────

/// Encrypt every object of `doc` in place with `password` as both user and
/// owner password (revision 3, 128-bit RC4, all permissions).
///
/// Call this last: nothing may rewrite streams after it runs.
pub fn encrypt_document(doc: &mut Document, password: &str) -> Result<(), DocError> {
    if password.is_empty() {
        return Err(DocError::InvalidParameter(
            "password must not be empty".into(),
        ));
    }
    if doc.trailer.has(b"Encrypt") {
        return Err(DocError::backend("PDF is already encrypted"));
    }

    let file_id = uuid::Uuid::new_v4().as_bytes().to_vec();
    let handler = StandardSecurity::new(password, password, file_id.clone())?;
    let key = handler.file_key(password.as_bytes());
    crypt_document(doc, &key, CryptSkip::default(), Direction::Encrypt)?;

    let encrypt_id = doc.add_object(handler.to_dictionary());
    doc.trailer.set("Encrypt", Object::Reference(encrypt_id));
    doc.trailer.set(
        "ID",
        Object::Array(vec![
            Object::String(file_id.clone(), StringFormat::Hexadecimal),
            Object::String(file_id, StringFormat::Hexadecimal),
        ]),
    );
    Ok(())
}

// ── Object crypt ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Encrypt,
    Decrypt,
}

/// Objects left in the clear.
#[derive(Debug, Clone, Copy, Default)]
struct CryptSkip {
    /// The `/Encrypt` dictionary itself.
    object: Option<ObjectId>,
    /// `/EncryptMetadata false`: metadata streams are plaintext.
    metadata: bool,
}

fn crypt_document(
    doc: &mut Document,
    file_key: &[u8],
    skip: CryptSkip,
    direction: Direction,
) -> Result<(), DocError> {
    for (id, object) in doc.objects.iter_mut() {
        if Some(*id) == skip.object || is_stream_of_type(object, b"XRef") {
            continue;
        }
        if skip.metadata && is_stream_of_type(object, b"Metadata") {
            continue;
        }
        let key = object_key(file_key, *id);
        crypt_object(object, &key, direction)?;
    }
    Ok(())
}

fn crypt_object(object: &mut Object, key: &[u8], direction: Direction) -> Result<(), DocError> {
    match object {
        Object::String(bytes, format) => {
            rc4_apply(key, bytes)?;
            // hex keeps arbitrary bytes (CR especially) intact through the writer
            *format = match direction {
                Direction::Decrypt if bytes.iter().all(|b| (0x20..0x7f).contains(b)) => {
                    StringFormat::Literal
                }
                _ => StringFormat::Hexadecimal,
            };
        }
        Object::Array(items) => {
            for item in items.iter_mut() {
                crypt_object(item, key, direction)?;
            }
        }
        Object::Dictionary(dict) => crypt_dictionary(dict, key, direction)?,
        Object::Stream(stream) => {
            crypt_dictionary(&mut stream.dict, key, direction)?;
            rc4_apply(key, &mut stream.content)?;
        }
        _ => {}
    }
    Ok(())
}

fn crypt_dictionary(dict: &mut Dictionary, key: &[u8], direction: Direction) -> Result<(), DocError> {
    for (_, value) in dict.iter_mut() {
        crypt_object(value, key, direction)?;
    }
    Ok(())
}

fn is_stream_of_type(object: &Object, type_name: &[u8]) -> bool {
    match object {
        Object::Stream(stream) => {
            matches!(stream.dict.get(b"Type"), Ok(Object::Name(name)) if name == type_name)
        }
        _ => false,
    }
}

// ── Primitives ───────────────────────────────────────────────────────────

fn pad_password(password: &[u8]) -> [u8; 32] {
    let n = password.len().min(32);
    let mut out = [0u8; 32];
    out[..n].copy_from_slice(&password[..n]);
    out[n..].copy_from_slice(&PASSWORD_PADDING[..32 - n]);
    out
}

fn md5(parts: &[&[u8]]) -> [u8; 16] {
    let mut hasher = Md5::new();
    for part in parts {
        hasher.update(*part);
    }
    let mut out = [0u8; 16];
    out.copy_from_slice(&hasher.finalize());
    out
}

fn xor_key(key: &[u8], i: u8) -> Vec<u8> {
    key.iter().map(|b| b ^ i).collect()
}

/// RC4 in place. Key lengths 5–16 bytes cover every key this handler derives.
pub(crate) fn rc4_apply(key: &[u8], data: &mut [u8]) -> Result<(), DocError> {
    macro_rules! keyed {
        ($($len:literal => $size:ty),+ $(,)?) => {
            match key.len() {
                $($len => Rc4::<$size>::new_from_slice(key).map(|mut c| c.apply_keystream(data)),)+
                other => {
                    return Err(DocError::backend(format!("unsupported RC4 key length {other}")))
                }
            }
        };
    }
    keyed!(
        5 => U5, 6 => U6, 7 => U7, 8 => U8, 9 => U9, 10 => U10,
        11 => U11, 12 => U12, 13 => U13, 14 => U14, 15 => U15, 16 => U16,
    )
    .map_err(|_| DocError::backend("invalid RC4 key"))
}

fn unsupported(what: String) -> DocError {
    DocError::backend(format!("unsupported encryption: {what}"))
}

fn dict_int(dict: &Dictionary, key: &[u8]) -> Option<i64> {
    match dict.get(key) {
        Ok(Object::Integer(i)) => Some(*i),
        _ => None,
    }
}

fn dict_bytes<'a>(dict: &'a Dictionary, key: &[u8]) -> Option<&'a [u8]> {
    match dict.get(key) {
        Ok(Object::String(bytes, _)) => Some(bytes.as_slice()),
        _ => None,
    }
}

fn dict_name<'a>(dict: &'a Dictionary, key: &[u8]) -> Option<&'a [u8]> {
    match dict.get(key) {
        Ok(Object::Name(name)) => Some(name.as_slice()),
        _ => None,
    }
}
