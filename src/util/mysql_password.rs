//! `mysql_native_password` scramble. MySQL's scramble is:
//!
//!   SHA1(password) XOR SHA1(seed + SHA1(SHA1(password)))
//!
//! which lets the server verify the client without the password crossing
//! the wire.

use sha1_smol::Sha1;

pub fn scramble411(password: &[u8], seed: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }

    let stage1 = sha1(password);
    let stage2 = sha1(&stage1);

    let mut seeded = Vec::with_capacity(seed.len() + stage2.len());
    seeded.extend_from_slice(seed);
    seeded.extend_from_slice(&stage2);
    let stage3 = sha1(&seeded);

    stage1
        .iter()
        .zip(stage3.iter())
        .map(|(a, b)| a ^ b)
        .collect()
}

fn sha1(data: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.digest().bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_password_scrambles_to_empty() {
        assert!(scramble411(b"", b"seedseedseedseed0000").is_empty());
    }

    #[test]
    fn scramble_is_deterministic_for_fixed_seed() {
        let a = scramble411(b"hunter2", b"abcdefghijklmnopqrst");
        let b = scramble411(b"hunter2", b"abcdefghijklmnopqrst");
        assert_eq!(a, b);
        assert_eq!(a.len(), 20);
    }

    #[test]
    fn different_passwords_scramble_differently() {
        let a = scramble411(b"hunter2", b"abcdefghijklmnopqrst");
        let b = scramble411(b"correct-horse", b"abcdefghijklmnopqrst");
        assert_ne!(a, b);
    }
}
