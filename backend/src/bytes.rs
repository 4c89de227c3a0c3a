use std::io;
use std::io::{Cursor, Read, Write};

use byteorder::WriteBytesExt;
use sha1::{Digest, Sha1};

use common::err::proxy_error::{Needed, ProxyError};
use common::err::PResult;

use crate::{NULL_TERMINATOR, SCRAMBLE_SIZE};

pub fn write_null_term_string(cursor: &mut Cursor<&mut Vec<u8>>, str: &str) -> Result<(), io::Error> {
    cursor.write_all(str.as_bytes())?;
    cursor.write_u8(NULL_TERMINATOR)?;

    Ok(())
}

pub fn read_null_term_string(cursor: &mut Cursor<&[u8]>) -> PResult<String> {
    let mut out = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        if cursor.read(&mut byte)? == 0 {
            return Err(ProxyError::Incomplete(Needed::NoEnoughData));
        }
        if byte[0] == NULL_TERMINATOR {
            break;
        }
        out.push(byte[0]);
    }
    Ok(String::from_utf8(out)?)
}

pub fn sha1(value: &[u8]) -> Vec<u8> {
    let mut hasher = Sha1::new();
    hasher.update(value);
    hasher.finalize().as_slice().to_vec()
}

pub fn xor(slice1: &[u8], slice2: &[u8]) -> Vec<u8> {
    let mut result = vec![0u8; slice1.len()];
    for i in 0..result.len() {
        result[i] = slice1[i] ^ slice2[i % slice2.len()];
    }
    result
}

/// Token the client side of `mysql_native_password` puts on the wire.
///
/// With `hash1 = SHA1(password)` the token is
/// `SHA1(scramble || SHA1(hash1)) XOR hash1`.
pub fn scramble_response(scramble: &[u8], password_sha1: &[u8; SCRAMBLE_SIZE]) -> [u8; SCRAMBLE_SIZE] {
    let hash2 = sha1(password_sha1);
    let concat = [scramble, hash2.as_slice()].concat();
    let new_sha = sha1(&concat);

    let mut out = [0u8; SCRAMBLE_SIZE];
    out.copy_from_slice(&xor(&new_sha, password_sha1));
    out
}

/// Verify a client token against the stored double hash.
///
/// The server persists `hash2 = SHA1(SHA1(password))`. Undoing the xor with
/// `SHA1(scramble || hash2)` yields the candidate `SHA1(password)`; hashing it
/// once more must reproduce `hash2`. On success the recovered single hash is
/// returned, which is exactly what later re-authentication against a backend
/// needs.
pub fn check_scramble(
    token: &[u8],
    scramble: &[u8],
    stored_hash: &[u8; SCRAMBLE_SIZE],
) -> Option<[u8; SCRAMBLE_SIZE]> {
    if token.len() != SCRAMBLE_SIZE {
        return None;
    }

    let concat = [scramble, stored_hash.as_slice()].concat();
    let step = sha1(&concat);
    let candidate = xor(token, &step);

    if sha1(&candidate) == stored_hash.as_slice() {
        let mut out = [0u8; SCRAMBLE_SIZE];
        out.copy_from_slice(&candidate);
        Some(out)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn password_sha1(password: &str) -> [u8; SCRAMBLE_SIZE] {
        let mut out = [0u8; SCRAMBLE_SIZE];
        out.copy_from_slice(&sha1(password.as_bytes()));
        out
    }

    #[test]
    fn test_sha1_vector() {
        assert_eq!(
            hex_string(&sha1(b"abc")),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn test_xor_cycles_shorter_slice() {
        assert_eq!(xor(&[1, 2, 3, 4], &[0xff]), vec![0xfe, 0xfd, 0xfc, 0xfb]);
    }

    #[test]
    fn test_scramble_round_trip() {
        let scramble: Vec<u8> = (1..=20).collect();
        let hash1 = password_sha1("secret");
        let mut stored = [0u8; SCRAMBLE_SIZE];
        stored.copy_from_slice(&sha1(&hash1));

        let token = scramble_response(&scramble, &hash1);
        let recovered = check_scramble(&token, &scramble, &stored);
        assert_eq!(recovered, Some(hash1));
    }

    #[test]
    fn test_check_scramble_rejects_wrong_password() {
        let scramble: Vec<u8> = (1..=20).collect();
        let token = scramble_response(&scramble, &password_sha1("wrong"));
        let mut stored = [0u8; SCRAMBLE_SIZE];
        stored.copy_from_slice(&sha1(&password_sha1("secret")));

        assert_eq!(check_scramble(&token, &scramble, &stored), None);
    }

    #[test]
    fn test_null_term_string_round_trip() {
        let mut vec = Vec::new();
        let mut cursor = Cursor::new(&mut vec);
        write_null_term_string(&mut cursor, "mydb").unwrap();

        let data = vec.clone();
        let mut read_cursor = Cursor::new(data.as_slice());
        assert_eq!(read_null_term_string(&mut read_cursor).unwrap(), "mydb");
    }

    fn hex_string(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }
}
