use sha1::{Digest, Sha1};

/// SHA-1 digest of a byte slice.
///
/// The container format and the socket protocol are both content-addressed
/// by SHA-1; it is an identity scheme inherited from the patch build
/// pipeline, not an integrity primitive chosen here.
pub fn sha1_digest(data: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Lowercase hex rendering of a digest, for filenames and logs.
pub fn sha1_hex(data: &[u8]) -> String {
    hex::encode(sha1_digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        // SHA-1("abc")
        assert_eq!(
            sha1_hex(b"abc"),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn empty_input() {
        assert_eq!(
            sha1_hex(b""),
            "da39a3ee5e6b4b0d3255bfef95601890afd80709"
        );
    }
}
