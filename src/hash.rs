//! Hash & crypto primitives (§4.A).
//!
//! A [`Digest`] is a fixed-width byte string tagged with an [`Algorithm`].
//! A [`Key`] is the printable form of a digest: always `"MD5=<hex>"` or
//! `"SHA=<hex>"` so the algorithm survives a round trip through a string,
//! matching the `"sha256:<hex>"` shape of `ContentHash` in the teacher's
//! package registry, generalized to carry its own algorithm tag rather than
//! hard-coding SHA-256.

use sha1::Sha1;
use sha2::{Digest as _, Sha224, Sha256, Sha384, Sha512};
use std::fmt;
use std::io::Read;
use thiserror::Error;

/// Errors from the hashing subsystem.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// `printable()` input didn't start with a recognized algorithm prefix.
    #[error("unknown hash algorithm prefix in {0:?}")]
    UnknownAlgorithm(String),

    /// The hex payload was malformed or the wrong length for its algorithm.
    #[error("malformed digest: {0}")]
    MalformedDigest(String),

    /// `hash_stream` failed to read from its source.
    #[error("I/O error while hashing stream: {0}")]
    Io(String),
}

/// Hash algorithms supported by the crate. Each carries its own output
/// length so callers never hard-code a size (§3 Digest invariant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    /// 128-bit MD5. Used only where the original protocol requires it
    /// (legacy checksum records); never for new identity material.
    Md5,
    Sha224,
    Sha256,
    Sha384,
    Sha512,
}

impl Algorithm {
    /// The printable prefix used in a [`Key`]'s string form.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Algorithm::Md5 => "MD5",
            Algorithm::Sha224 | Algorithm::Sha256 | Algorithm::Sha384 | Algorithm::Sha512 => "SHA",
        }
    }

    /// Output length in bytes.
    #[must_use]
    pub const fn output_len(self) -> usize {
        match self {
            Algorithm::Md5 => 16,
            Algorithm::Sha224 => 28,
            Algorithm::Sha256 => 32,
            Algorithm::Sha384 => 48,
            Algorithm::Sha512 => 64,
        }
    }

    fn from_prefix_and_len(prefix: &str, len: usize) -> Option<Self> {
        match (prefix, len) {
            ("MD5", 16) => Some(Algorithm::Md5),
            ("SHA", 28) => Some(Algorithm::Sha224),
            ("SHA", 32) => Some(Algorithm::Sha256),
            ("SHA", 48) => Some(Algorithm::Sha384),
            ("SHA", 64) => Some(Algorithm::Sha512),
            _ => None,
        }
    }
}

/// A fixed-width digest tagged with its algorithm. Immutable once produced.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    algo: Algorithm,
    bytes: Vec<u8>,
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Digest").field("algo", &self.algo).field("hex", &hex::encode(&self.bytes)).finish()
    }
}

impl Digest {
    /// The algorithm this digest was produced with.
    #[must_use]
    pub fn algorithm(&self) -> Algorithm {
        self.algo
    }

    /// Raw digest bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Canonical printable key: `"<PREFIX>=<lowercase hex>"`.
    #[must_use]
    pub fn printable(&self) -> Key {
        Key(format!("{}={}", self.algo.prefix(), hex::encode(&self.bytes)))
    }
}

/// The printable form of a [`Digest`]. Equality is string equality of the
/// printable form (§3 Key invariant).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(String);

impl Key {
    /// Parse a printable key, recovering its algorithm and digest bytes.
    pub fn parse(s: &str) -> Result<Self, Error> {
        let (prefix, hex_part) =
            s.split_once('=').ok_or_else(|| Error::UnknownAlgorithm(s.to_string()))?;
        let bytes = hex::decode(hex_part).map_err(|e| Error::MalformedDigest(e.to_string()))?;
        if Algorithm::from_prefix_and_len(prefix, bytes.len()).is_none() {
            return Err(Error::UnknownAlgorithm(s.to_string()));
        }
        Ok(Key(s.to_string()))
    }

    /// Recover the [`Digest`] this key printed from.
    pub fn to_digest(&self) -> Result<Digest, Error> {
        let (prefix, hex_part) =
            self.0.split_once('=').ok_or_else(|| Error::UnknownAlgorithm(self.0.clone()))?;
        let bytes = hex::decode(hex_part).map_err(|e| Error::MalformedDigest(e.to_string()))?;
        let algo = Algorithm::from_prefix_and_len(prefix, bytes.len())
            .ok_or_else(|| Error::UnknownAlgorithm(self.0.clone()))?;
        Ok(Digest { algo, bytes })
    }

    /// The algorithm prefix, without consuming the key (see
    /// `skip_algo_prefix` in §4.A).
    #[must_use]
    pub fn skip_algo_prefix(&self) -> &str {
        self.0.split_once('=').map_or(self.0.as_str(), |(_, rest)| rest)
    }

    /// The printable string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hash a byte slice with the given algorithm. Pure function.
#[must_use]
pub fn hash_bytes(algo: Algorithm, buf: &[u8]) -> Digest {
    let bytes = match algo {
        Algorithm::Md5 => {
            use md5::Md5;
            Md5::digest(buf).to_vec()
        }
        Algorithm::Sha224 => Sha224::digest(buf).to_vec(),
        Algorithm::Sha256 => Sha256::digest(buf).to_vec(),
        Algorithm::Sha384 => Sha384::digest(buf).to_vec(),
        Algorithm::Sha512 => Sha512::digest(buf).to_vec(),
    };
    Digest { algo, bytes }
}

/// Hash a reader's full contents, chunked, without holding the whole input
/// in memory.
pub fn hash_stream(algo: Algorithm, mut reader: impl Read) -> Result<Digest, Error> {
    const CHUNK: usize = 64 * 1024;
    let mut buf = vec![0u8; CHUNK];

    macro_rules! drive {
        ($hasher:expr) => {{
            let mut hasher = $hasher;
            loop {
                let n = reader.read(&mut buf).map_err(|e| Error::Io(e.to_string()))?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            hasher.finalize().to_vec()
        }};
    }

    let bytes = match algo {
        Algorithm::Md5 => {
            use md5::Md5;
            drive!(Md5::new())
        }
        Algorithm::Sha224 => drive!(Sha224::new()),
        Algorithm::Sha256 => drive!(Sha256::new()),
        Algorithm::Sha384 => drive!(Sha384::new()),
        Algorithm::Sha512 => drive!(Sha512::new()),
    };
    Ok(Digest { algo, bytes })
}

/// Digest over an RSA public key's modulus and exponent, concatenated in
/// big-endian canonical form with leading zero bytes stripped from each.
/// The printable form of the result is used as a host's network identity
/// (§4.A: `hash_pubkey(algo, rsa_key)`).
#[must_use]
pub fn hash_pubkey(algo: Algorithm, key: &rsa::RsaPublicKey) -> Digest {
    use rsa::traits::PublicKeyParts;
    hash_pubkey_bytes(algo, &key.n().to_bytes_be(), &key.e().to_bytes_be())
}

/// [`hash_pubkey`] over raw big-endian modulus/exponent bytes rather than a
/// parsed [`rsa::RsaPublicKey`] — used directly by callers that already have
/// the wire-format bytes (and by this module's own tests).
#[must_use]
pub fn hash_pubkey_bytes(algo: Algorithm, modulus_be: &[u8], exponent_be: &[u8]) -> Digest {
    let mut buf = Vec::with_capacity(modulus_be.len() + exponent_be.len());
    buf.extend(strip_leading_zeros(modulus_be));
    buf.extend(strip_leading_zeros(exponent_be));
    hash_bytes(algo, &buf)
}

fn strip_leading_zeros(bytes: &[u8]) -> &[u8] {
    let first_nonzero = bytes.iter().position(|&b| b != 0).unwrap_or(bytes.len());
    &bytes[first_nonzero..]
}

/// Unused-SHA1 note: SHA-1 is not part of the [`Algorithm`] enum because
/// spec.md §3 enumerates only MD5/SHA-224/256/384/512, but the wire
/// protocol's legacy integrity frames (§4.E) still emit it; exposed as a
/// standalone helper rather than folded into [`Algorithm`].
#[must_use]
pub fn legacy_sha1(buf: &[u8]) -> [u8; 20] {
    Sha1::digest(buf).into()
}
