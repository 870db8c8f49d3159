//! Block padding round-trip: pad, encrypt, decrypt, unpad, compare.
//!
//! The subject is PKCS#7 padding and what can go wrong with it. The cipher
//! wrapped around it is XTEA (64-bit blocks, 32 rounds), small enough to
//! implement here in full, run in CBC mode with an explicit IV. Keys come
//! from a passphrase through SHA-256, first 16 bytes.
//!
//! Run with: cargo run --bin crypto_padding

use colored::Colorize;
use rand::Rng;
use sha2::{Digest, Sha256};
use thiserror::Error;

const BLOCK: usize = 8;
const DELTA: u32 = 0x9E37_79B9;
const ROUNDS: u32 = 32;

#[derive(Debug, Error, PartialEq)]
pub enum CryptoError {
    #[error("input is empty")]
    Empty,

    #[error("input length {len} is not a multiple of the {block}-byte block")]
    NotBlockAligned { len: usize, block: usize },

    #[error("pad byte {0} is outside 1..=block")]
    BadPadByte(u8),

    #[error("padding bytes disagree with the declared pad length")]
    InconsistentPadding,
}

// ============================================================================
// PKCS#7 padding
// ============================================================================

/// Pads to a whole number of blocks. Block-aligned input gains one full
/// block of padding, so `unpad` can always trust the last byte.
pub fn pad(data: &[u8], block: usize) -> Vec<u8> {
    let pad_len = block - (data.len() % block);
    let mut out = Vec::with_capacity(data.len() + pad_len);
    out.extend_from_slice(data);
    out.resize(data.len() + pad_len, pad_len as u8);
    out
}

pub fn unpad(data: &[u8], block: usize) -> Result<Vec<u8>, CryptoError> {
    if data.is_empty() {
        return Err(CryptoError::Empty);
    }
    if data.len() % block != 0 {
        return Err(CryptoError::NotBlockAligned {
            len: data.len(),
            block,
        });
    }
    let pad_len = data[data.len() - 1] as usize;
    if pad_len == 0 || pad_len > block {
        return Err(CryptoError::BadPadByte(pad_len as u8));
    }
    let (body, padding) = data.split_at(data.len() - pad_len);
    if padding.iter().any(|&b| b as usize != pad_len) {
        return Err(CryptoError::InconsistentPadding);
    }
    Ok(body.to_vec())
}

// ============================================================================
// XTEA block cipher
// ============================================================================

fn encrypt_block(v: [u32; 2], key: &[u32; 4]) -> [u32; 2] {
    let [mut v0, mut v1] = v;
    let mut sum: u32 = 0;
    for _ in 0..ROUNDS {
        v0 = v0.wrapping_add(
            (((v1 << 4) ^ (v1 >> 5)).wrapping_add(v1))
                ^ (sum.wrapping_add(key[(sum & 3) as usize])),
        );
        sum = sum.wrapping_add(DELTA);
        v1 = v1.wrapping_add(
            (((v0 << 4) ^ (v0 >> 5)).wrapping_add(v0))
                ^ (sum.wrapping_add(key[((sum >> 11) & 3) as usize])),
        );
    }
    [v0, v1]
}

fn decrypt_block(v: [u32; 2], key: &[u32; 4]) -> [u32; 2] {
    let [mut v0, mut v1] = v;
    let mut sum: u32 = DELTA.wrapping_mul(ROUNDS);
    for _ in 0..ROUNDS {
        v1 = v1.wrapping_sub(
            (((v0 << 4) ^ (v0 >> 5)).wrapping_add(v0))
                ^ (sum.wrapping_add(key[((sum >> 11) & 3) as usize])),
        );
        sum = sum.wrapping_sub(DELTA);
        v0 = v0.wrapping_sub(
            (((v1 << 4) ^ (v1 >> 5)).wrapping_add(v1))
                ^ (sum.wrapping_add(key[(sum & 3) as usize])),
        );
    }
    [v0, v1]
}

fn block_to_bytes(v: [u32; 2]) -> [u8; 8] {
    let a = v[0].to_be_bytes();
    let b = v[1].to_be_bytes();
    [a[0], a[1], a[2], a[3], b[0], b[1], b[2], b[3]]
}

fn block_from_bytes(bytes: &[u8]) -> [u32; 2] {
    // caller guarantees 8 bytes
    [
        u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
    ]
}

// ============================================================================
// CBC mode over padded data
// ============================================================================

/// Pads the plaintext and encrypts it block-by-block, each block XORed with
/// the previous ciphertext block (the IV for the first).
pub fn cbc_encrypt(plaintext: &[u8], key: &[u32; 4], iv: [u8; BLOCK]) -> Vec<u8> {
    let padded = pad(plaintext, BLOCK);
    let mut out = Vec::with_capacity(padded.len());
    let mut prev = iv;
    for chunk in padded.chunks_exact(BLOCK) {
        let mut block = [0u8; BLOCK];
        for (i, byte) in block.iter_mut().enumerate() {
            *byte = chunk[i] ^ prev[i];
        }
        let cipher = block_to_bytes(encrypt_block(block_from_bytes(&block), key));
        out.extend_from_slice(&cipher);
        prev = cipher;
    }
    out
}

pub fn cbc_decrypt(
    ciphertext: &[u8],
    key: &[u32; 4],
    iv: [u8; BLOCK],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.is_empty() {
        return Err(CryptoError::Empty);
    }
    if ciphertext.len() % BLOCK != 0 {
        return Err(CryptoError::NotBlockAligned {
            len: ciphertext.len(),
            block: BLOCK,
        });
    }
    let mut padded = Vec::with_capacity(ciphertext.len());
    let mut prev = iv;
    for chunk in ciphertext.chunks_exact(BLOCK) {
        let plain = block_to_bytes(decrypt_block(block_from_bytes(chunk), key));
        for (i, byte) in plain.iter().enumerate() {
            padded.push(byte ^ prev[i]);
        }
        prev = [
            chunk[0], chunk[1], chunk[2], chunk[3], chunk[4], chunk[5], chunk[6], chunk[7],
        ];
    }
    unpad(&padded, BLOCK)
}

/// Passphrase to XTEA key: SHA-256, first 16 bytes as four big-endian words.
pub fn derive_key(passphrase: &str) -> [u32; 4] {
    let digest = Sha256::digest(passphrase.as_bytes());
    [
        u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]),
        u32::from_be_bytes([digest[4], digest[5], digest[6], digest[7]]),
        u32::from_be_bytes([digest[8], digest[9], digest[10], digest[11]]),
        u32::from_be_bytes([digest[12], digest[13], digest[14], digest[15]]),
    ]
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

// ============================================================================
// Demo
// ============================================================================

fn main() {
    println!("=== Block Padding Round-Trip ===\n");

    let passphrase = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "correct horse battery staple".to_string());
    let key = derive_key(&passphrase);
    println!("passphrase: {:?}", passphrase);

    let messages: [&[u8]; 4] = [
        b"",
        b"short",
        b"exactly8", // block-aligned on purpose
        b"The quick brown fox jumps over the lazy dog",
    ];

    let mut rng = rand::thread_rng();
    for message in messages {
        let mut iv = [0u8; BLOCK];
        rng.fill(&mut iv);

        let ciphertext = cbc_encrypt(message, &key, iv);
        let head: String = hex(&ciphertext).chars().take(48).collect();
        println!(
            "\nplaintext  ({:>2} bytes): {:?}",
            message.len(),
            String::from_utf8_lossy(message)
        );
        println!("iv                    : {}", hex(&iv));
        println!("ciphertext ({:>2} bytes): {}…", ciphertext.len(), head);

        match cbc_decrypt(&ciphertext, &key, iv) {
            Ok(recovered) if recovered == message => {
                println!("{} round trip matched byte for byte", "✓".green());
            }
            Ok(_) => println!("{} decrypted to different bytes", "✗".red()),
            Err(e) => println!("{} decrypt failed: {}", "✗".red(), e),
        }

        // Flip one ciphertext byte to show the padding check earning its keep.
        let mut tampered = ciphertext.clone();
        tampered[0] ^= 0x01;
        match cbc_decrypt(&tampered, &key, iv) {
            Err(e) => println!("{} tampered copy rejected: {}", "✓".green(), e),
            Ok(recovered) if recovered != message => {
                println!("{} tampered copy decrypted to garbage", "✓".green());
            }
            Ok(_) => println!("{} tampering went unnoticed", "✗".red()),
        }
    }

    println!("\n=== Done ===");
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u32; 4] = [0x0123_4567, 0x89AB_CDEF, 0xFEDC_BA98, 0x7654_3210];
    const IV: [u8; BLOCK] = [9, 8, 7, 6, 5, 4, 3, 2];

    #[test]
    fn pad_fills_to_block_and_unpad_recovers() {
        for len in 0..=(2 * BLOCK) {
            let data: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let padded = pad(&data, BLOCK);
            assert_eq!(padded.len() % BLOCK, 0);
            assert!(padded.len() > data.len(), "padding must add at least one byte");
            assert_eq!(unpad(&padded, BLOCK).unwrap(), data);
        }
    }

    #[test]
    fn aligned_input_gains_a_full_extra_block() {
        let padded = pad(&[0xAA; BLOCK], BLOCK);
        assert_eq!(padded.len(), 2 * BLOCK);
        assert_eq!(padded[BLOCK..], [BLOCK as u8; BLOCK]);
    }

    #[test]
    fn unpad_rejects_malformed_padding() {
        assert_eq!(unpad(&[], BLOCK).unwrap_err(), CryptoError::Empty);
        assert_eq!(
            unpad(&[1; 7], BLOCK).unwrap_err(),
            CryptoError::NotBlockAligned { len: 7, block: BLOCK }
        );
        assert_eq!(
            unpad(&[1, 2, 3, 4, 5, 6, 7, 0], BLOCK).unwrap_err(),
            CryptoError::BadPadByte(0)
        );
        assert_eq!(
            unpad(&[1, 2, 3, 4, 5, 6, 7, 9], BLOCK).unwrap_err(),
            CryptoError::BadPadByte(9)
        );
        // declared pad length 3, but only the last two bytes carry it
        assert_eq!(
            unpad(&[1, 2, 3, 4, 5, 1, 3, 3], BLOCK).unwrap_err(),
            CryptoError::InconsistentPadding
        );
    }

    #[test]
    fn block_cipher_inverts_itself() {
        let blocks = [
            [0u32, 0u32],
            [0xDEAD_BEEF, 0xCAFE_F00D],
            [u32::MAX, u32::MAX],
            [1, 0],
        ];
        for block in blocks {
            let cipher = encrypt_block(block, &KEY);
            assert_ne!(cipher, block, "encryption must change the block");
            assert_eq!(decrypt_block(cipher, &KEY), block);
        }
    }

    #[test]
    fn cbc_round_trips_every_length_up_to_64() {
        for len in 0..=64usize {
            let message: Vec<u8> = (0..len).map(|i| (i * 7 + 3) as u8).collect();
            let ciphertext = cbc_encrypt(&message, &KEY, IV);
            assert_eq!(ciphertext.len() % BLOCK, 0);
            assert_eq!(cbc_decrypt(&ciphertext, &KEY, IV).unwrap(), message);
        }
    }

    #[test]
    fn cbc_chains_identical_blocks_apart() {
        // Two identical plaintext blocks must not produce identical
        // ciphertext blocks, or the mode is ECB in disguise.
        let message = [0x42u8; 2 * BLOCK];
        let ciphertext = cbc_encrypt(&message, &KEY, IV);
        assert_ne!(ciphertext[..BLOCK], ciphertext[BLOCK..2 * BLOCK]);
    }

    #[test]
    fn encryption_is_deterministic_given_key_and_iv() {
        let message = b"same inputs, same outputs";
        assert_eq!(
            cbc_encrypt(message, &KEY, IV),
            cbc_encrypt(message, &KEY, IV)
        );
        let other_iv = [0u8; BLOCK];
        assert_ne!(
            cbc_encrypt(message, &KEY, IV),
            cbc_encrypt(message, &KEY, other_iv)
        );
    }

    #[test]
    fn tampering_never_goes_unnoticed() {
        let message = b"a message spanning three cipher blocks!!";
        let ciphertext = cbc_encrypt(message, &KEY, IV);
        for position in 0..ciphertext.len() {
            let mut tampered = ciphertext.clone();
            tampered[position] ^= 0x80;
            match cbc_decrypt(&tampered, &KEY, IV) {
                Err(_) => {} // padding caught it
                Ok(recovered) => assert_ne!(
                    recovered,
                    message.to_vec(),
                    "flipping byte {} must not yield the original",
                    position
                ),
            }
        }
    }

    #[test]
    fn derived_keys_are_stable_and_distinct() {
        assert_eq!(derive_key("alpha"), derive_key("alpha"));
        assert_ne!(derive_key("alpha"), derive_key("beta"));
    }

    #[test]
    fn misaligned_ciphertext_is_refused() {
        assert_eq!(
            cbc_decrypt(&[1, 2, 3], &KEY, IV).unwrap_err(),
            CryptoError::NotBlockAligned { len: 3, block: BLOCK }
        );
        assert_eq!(cbc_decrypt(&[], &KEY, IV).unwrap_err(), CryptoError::Empty);
    }
}
