//! PDF standard security handler, revision 3 (128-bit RC4).
//!
//! The file key is derived by lopdf's own [`get_encryption_key`], so anything
//! written here can be opened again with `Document::decrypt`.

use lopdf::encryption::get_encryption_key;
use lopdf::{dictionary, Document, Object, ObjectId, StringFormat};
use rand::{rngs::OsRng, RngCore};

use super::{Permission, RenderError};

const PAD_BYTES: [u8; 32] = [
    0x28, 0xBF, 0x4E, 0x5E, 0x4E, 0x75, 0x8A, 0x41, 0x64, 0x00, 0x4E, 0x56, 0xFF, 0xFA, 0x01,
    0x08, 0x2E, 0x2E, 0x00, 0xB6, 0xD0, 0x68, 0x3E, 0x80, 0x2F, 0x0C, 0xA9, 0xFE, 0x64, 0x53,
    0x69, 0x7A,
];

const KEY_BITS: u32 = 128;
const KEY_LEN: usize = (KEY_BITS / 8) as usize;
const REVISION: i64 = 3;

/// Reserved bits that must be set for revision 3.
const RESERVED_PERMISSION_BITS: u32 = 0xFFFF_F0C0;

/// Streams the writer never emits as ordinary objects.
const UNENCRYPTED_TYPES: &[&str] = &["ObjStm", "XRef", "Linearized"];

/// `/P` value for the granted permissions.
pub fn permission_flags(permissions: &[Permission]) -> i64 {
    let bits = permissions
        .iter()
        .fold(RESERVED_PERMISSION_BITS, |bits, permission| {
            bits | match permission {
                // Bit 3 plus bit 12 (full-quality print).
                Permission::Print => 0x0004 | 0x0800,
                // Bit 5 plus bit 10 (accessibility extraction).
                Permission::Copy => 0x0010 | 0x0200,
            }
        });
    i64::from(bits as i32)
}

/// Encrypt every string and stream in `doc` and install the `/Encrypt` dictionary.
pub fn encrypt_document(
    doc: &mut Document,
    user_password: &str,
    owner_password: &str,
    permissions: &[Permission],
    strength: u32,
) -> Result<(), RenderError> {
    if strength != KEY_BITS {
        return Err(RenderError::Unsupported("encryption strengths other than 128-bit"));
    }
    if doc.is_encrypted() {
        return Err(RenderError::Unsupported("re-encrypting a protected document"));
    }

    let file_id = ensure_file_id(doc)?;
    let owner_entry = owner_entry(owner_password.as_bytes(), user_password.as_bytes());

    let encrypt_id = doc.add_object(dictionary! {
        "Filter" => "Standard",
        "V" => 2,
        "R" => REVISION,
        "Length" => i64::from(KEY_BITS),
        "O" => Object::String(owner_entry, StringFormat::Hexadecimal),
        "P" => permission_flags(permissions),
    });
    doc.trailer.set("Encrypt", encrypt_id);

    let key = get_encryption_key(&*doc, user_password, false)
        .map_err(|e| RenderError::Serialize(e.to_string()))?;

    let user_entry = user_entry(&key, &file_id);
    doc.get_object_mut(encrypt_id)?
        .as_dict_mut()?
        .set("U", Object::String(user_entry, StringFormat::Hexadecimal));

    for (&id, object) in doc.objects.iter_mut() {
        if id == encrypt_id || is_unencrypted_stream(object) {
            continue;
        }
        let object_key = object_key(&key, id);
        encrypt_object(object, &object_key);
    }
    Ok(())
}

fn is_unencrypted_stream(object: &Object) -> bool {
    object
        .type_name()
        .map(|name| UNENCRYPTED_TYPES.contains(&name))
        .unwrap_or(false)
}

/// First element of the trailer `/ID`, creating a random pair when absent.
fn ensure_file_id(doc: &mut Document) -> Result<Vec<u8>, RenderError> {
    if let Ok(Object::Array(ids)) = doc.trailer.get(b"ID") {
        if let Some(Object::String(first, _)) = ids.first() {
            return Ok(first.clone());
        }
    }

    let mut id = vec![0u8; 16];
    OsRng.fill_bytes(&mut id);
    doc.trailer.set(
        "ID",
        vec![
            Object::String(id.clone(), StringFormat::Hexadecimal),
            Object::String(id.clone(), StringFormat::Hexadecimal),
        ],
    );
    Ok(id)
}

fn padded(password: &[u8]) -> Vec<u8> {
    let len = password.len().min(PAD_BYTES.len());
    let mut out = Vec::with_capacity(PAD_BYTES.len());
    out.extend_from_slice(&password[..len]);
    out.extend_from_slice(&PAD_BYTES[..PAD_BYTES.len() - len]);
    out
}

/// `/O`: the padded user password locked under the owner password.
fn owner_entry(owner_password: &[u8], user_password: &[u8]) -> Vec<u8> {
    let source = if owner_password.is_empty() {
        user_password
    } else {
        owner_password
    };

    let mut digest = md5::compute(padded(source)).0;
    for _ in 0..50 {
        digest = md5::compute(digest).0;
    }
    let key = &digest[..KEY_LEN];

    xor_rounds(key, rc4(key, &padded(user_password)))
}

/// `/U`: the hashed file identifier under the file key, padded to 32 bytes.
fn user_entry(key: &[u8], file_id: &[u8]) -> Vec<u8> {
    let mut ctx = md5::Context::new();
    ctx.consume(PAD_BYTES);
    ctx.consume(file_id);
    let hash = ctx.finalize();

    let mut entry = xor_rounds(key, rc4(key, &hash.0));
    entry.extend_from_slice(&PAD_BYTES[..16]);
    entry
}

/// Nineteen further RC4 passes, each keyed with `key` XOR the round number.
fn xor_rounds(key: &[u8], mut data: Vec<u8>) -> Vec<u8> {
    for round in 1..=19u8 {
        let round_key: Vec<u8> = key.iter().map(|byte| byte ^ round).collect();
        data = rc4(&round_key, &data);
    }
    data
}

fn object_key(key: &[u8], (number, generation): ObjectId) -> Vec<u8> {
    let mut material = key.to_vec();
    material.extend_from_slice(&number.to_le_bytes()[..3]);
    material.extend_from_slice(&generation.to_le_bytes()[..2]);
    let len = (key.len() + 5).min(16);
    md5::compute(material).0[..len].to_vec()
}

fn encrypt_object(object: &mut Object, key: &[u8]) {
    match object {
        Object::String(bytes, format) => {
            *bytes = rc4(key, bytes);
            *format = StringFormat::Hexadecimal;
        }
        Object::Array(items) => items.iter_mut().for_each(|item| encrypt_object(item, key)),
        Object::Dictionary(dict) => dict
            .iter_mut()
            .for_each(|(_, value)| encrypt_object(value, key)),
        Object::Stream(stream) => {
            stream
                .dict
                .iter_mut()
                .for_each(|(_, value)| encrypt_object(value, key));
            let content = rc4(key, &stream.content);
            stream.set_content(content);
        }
        _ => {}
    }
}

fn rc4(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut state: [u8; 256] = std::array::from_fn(|i| i as u8);
    let mut j: u8 = 0;
    for i in 0..256 {
        j = j.wrapping_add(state[i]).wrapping_add(key[i % key.len()]);
        state.swap(i, j as usize);
    }

    let (mut i, mut j) = (0u8, 0u8);
    data.iter()
        .map(|byte| {
            i = i.wrapping_add(1);
            j = j.wrapping_add(state[i as usize]);
            state.swap(i as usize, j as usize);
            let k = state[i as usize].wrapping_add(state[j as usize]);
            byte ^ state[k as usize]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rc4_known_vectors() {
        assert_eq!(
            hex::encode(rc4(b"Key", b"Plaintext")),
            "bbf316e8d940af0ad3"
        );
        assert_eq!(hex::encode(rc4(b"Wiki", b"pedia")), "1021bf0420");
        assert_eq!(rc4(b"Key", &rc4(b"Key", b"round trip")), b"round trip");
    }

    #[test]
    fn test_print_and_copy_flags() {
        assert_eq!(
            permission_flags(&[Permission::Print, Permission::Copy]),
            -1324
        );
        // Nothing granted keeps only the reserved bits.
        assert_eq!(permission_flags(&[]), i64::from(0xFFFF_F0C0u32 as i32));
    }

    #[test]
    fn test_owner_entry_depends_on_owner_password() {
        let a = owner_entry(b"owner-a", b"");
        let b = owner_entry(b"owner-b", b"");
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }

    #[test]
    fn test_padding_truncates_long_passwords() {
        let long = [b'x'; 40];
        assert_eq!(padded(&long), vec![b'x'; 32]);
        assert_eq!(padded(b""), PAD_BYTES.to_vec());
    }
}
