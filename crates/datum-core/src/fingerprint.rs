//! Content fingerprints
//!
//! A [`Fingerprint`] is a digest of a file's exact bytes tagged with the
//! algorithm that produced it, rendered as `<algorithm>:<lowercase hex>`.
//! Carrying the algorithm inside the value lets any verifier pick the right
//! hash function without out-of-band configuration.
//!
//! Hashing is pure and synchronous; the incremental [`Hasher`] lets callers
//! fingerprint content of arbitrary size chunk by chunk, either from a
//! blocking [`std::io::Read`] or from a [`tokio::io::AsyncRead`].
//!
//! # Usage
//!
//! ```ignore
//! use datum_core::fingerprint::{FingerprintEngine, DigestAlgorithm};
//!
//! let engine = FingerprintEngine::new(DigestAlgorithm::Sha256);
//! let fp = engine.fingerprint(b"hello world");
//! assert!(datum_core::fingerprint::verify(b"hello world", &fp));
//! ```

use crate::errors::{DatumError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::Read;
use std::str::FromStr;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Read buffer size for streaming fingerprints
pub const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Digest algorithms a fingerprint may be computed with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum DigestAlgorithm {
    /// SHA-256 (NIST FIPS 180-4)
    #[default]
    Sha256,
    /// BLAKE3 in its default 256-bit mode
    Blake3,
}

impl DigestAlgorithm {
    /// All supported algorithms
    pub const ALL: [DigestAlgorithm; 2] = [DigestAlgorithm::Sha256, DigestAlgorithm::Blake3];

    /// Name used in the textual fingerprint form
    pub fn name(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256 => "sha256",
            DigestAlgorithm::Blake3 => "blake3",
        }
    }

    /// Digest length in bytes
    pub fn output_len(&self) -> usize {
        match self {
            DigestAlgorithm::Sha256 | DigestAlgorithm::Blake3 => 32,
        }
    }

    /// Hash implementation for this algorithm
    pub fn implementation(&self) -> &'static dyn HashAlgorithm {
        match self {
            DigestAlgorithm::Sha256 => &Sha256Algorithm,
            DigestAlgorithm::Blake3 => &Blake3Algorithm,
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DigestAlgorithm {
    type Err = DatumError;

    fn from_str(s: &str) -> Result<Self> {
        DigestAlgorithm::ALL
            .into_iter()
            .find(|alg| alg.name() == s)
            .ok_or_else(|| DatumError::invalid_fingerprint(format!("unknown digest algorithm '{s}'")))
    }
}

impl Serialize for DigestAlgorithm {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for DigestAlgorithm {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Synchronous trait for content hashing
pub trait HashAlgorithm: Send + Sync + fmt::Debug {
    /// Which algorithm this implements
    fn algorithm(&self) -> DigestAlgorithm;

    /// Hash a complete byte slice
    fn hash(&self, data: &[u8]) -> Vec<u8> {
        let mut h = self.hasher();
        h.update(data);
        h.finalize()
    }

    /// Create an incremental hasher for multi-part hashing
    fn hasher(&self) -> Box<dyn Hasher>;
}

/// Incremental hashing of multi-part data
pub trait Hasher: Send {
    /// Update the hasher with more data
    fn update(&mut self, data: &[u8]);

    /// Finalize and return the digest bytes
    fn finalize(self: Box<Self>) -> Vec<u8>;
}

/// SHA-256 implementation
#[derive(Debug, Clone, Copy)]
pub struct Sha256Algorithm;

impl HashAlgorithm for Sha256Algorithm {
    fn algorithm(&self) -> DigestAlgorithm {
        DigestAlgorithm::Sha256
    }

    fn hasher(&self) -> Box<dyn Hasher> {
        Box::new(Sha256Hasher(Sha256::new()))
    }
}

struct Sha256Hasher(Sha256);

impl Hasher for Sha256Hasher {
    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn finalize(self: Box<Self>) -> Vec<u8> {
        self.0.finalize().to_vec()
    }
}

/// BLAKE3 implementation
#[derive(Debug, Clone, Copy)]
pub struct Blake3Algorithm;

impl HashAlgorithm for Blake3Algorithm {
    fn algorithm(&self) -> DigestAlgorithm {
        DigestAlgorithm::Blake3
    }

    fn hasher(&self) -> Box<dyn Hasher> {
        Box::new(Blake3Hasher(Box::new(blake3::Hasher::new())))
    }
}

struct Blake3Hasher(Box<blake3::Hasher>);

impl Hasher for Blake3Hasher {
    fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    fn finalize(self: Box<Self>) -> Vec<u8> {
        self.0.finalize().as_bytes().to_vec()
    }
}

/// Digest of a file's exact byte content, tagged with its algorithm
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint {
    algorithm: DigestAlgorithm,
    digest: Vec<u8>,
}

impl Fingerprint {
    /// Build a fingerprint from raw digest bytes, checking the length
    pub fn from_digest(algorithm: DigestAlgorithm, digest: Vec<u8>) -> Result<Self> {
        if digest.len() != algorithm.output_len() {
            return Err(DatumError::invalid_fingerprint(format!(
                "{algorithm} digest must be {} bytes, got {}",
                algorithm.output_len(),
                digest.len()
            )));
        }
        Ok(Self { algorithm, digest })
    }

    /// Algorithm that produced this digest
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Raw digest bytes
    pub fn digest(&self) -> &[u8] {
        &self.digest
    }

    /// Lowercase hex of the digest without the algorithm prefix
    pub fn hex_digest(&self) -> String {
        hex::encode(&self.digest)
    }

    /// Check that this fingerprint is well-formed
    pub fn validate(&self) -> Result<()> {
        Self::from_digest(self.algorithm, self.digest.clone()).map(|_| ())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex_digest())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({self})")
    }
}

impl FromStr for Fingerprint {
    type Err = DatumError;

    fn from_str(s: &str) -> Result<Self> {
        let (alg, hex_part) = s.split_once(':').ok_or_else(|| {
            DatumError::invalid_fingerprint(format!("'{s}' is not in the form 'algorithm:hexdigest'"))
        })?;
        let algorithm: DigestAlgorithm = alg.parse()?;
        if hex_part.chars().any(|c| c.is_ascii_uppercase()) {
            return Err(DatumError::invalid_fingerprint("hex digest must be lowercase"));
        }
        let digest = hex::decode(hex_part)
            .map_err(|e| DatumError::invalid_fingerprint(format!("bad hex digest: {e}")))?;
        Self::from_digest(algorithm, digest)
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// In-progress fingerprint over streamed content
pub struct StreamingFingerprint {
    algorithm: DigestAlgorithm,
    hasher: Box<dyn Hasher>,
    bytes_seen: u64,
}

impl StreamingFingerprint {
    /// Start a new streaming computation
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        Self {
            algorithm,
            hasher: algorithm.implementation().hasher(),
            bytes_seen: 0,
        }
    }

    /// Feed the next chunk of content
    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.bytes_seen += chunk.len() as u64;
    }

    /// Number of bytes hashed so far
    pub fn bytes_seen(&self) -> u64 {
        self.bytes_seen
    }

    /// Finish and produce the fingerprint
    pub fn finish(self) -> Fingerprint {
        Fingerprint {
            algorithm: self.algorithm,
            digest: self.hasher.finalize(),
        }
    }
}

/// Fingerprint computation with a configured default algorithm
#[derive(Debug, Clone, Copy, Default)]
pub struct FingerprintEngine {
    algorithm: DigestAlgorithm,
}

impl FingerprintEngine {
    /// Create an engine that fingerprints with `algorithm`
    pub fn new(algorithm: DigestAlgorithm) -> Self {
        Self { algorithm }
    }

    /// Algorithm used for new fingerprints
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Fingerprint an in-memory byte slice
    pub fn fingerprint(&self, bytes: &[u8]) -> Fingerprint {
        fingerprint_with(self.algorithm, bytes)
    }

    /// Start a streaming fingerprint
    pub fn stream(&self) -> StreamingFingerprint {
        StreamingFingerprint::new(self.algorithm)
    }

    /// Fingerprint a blocking reader without buffering it whole
    pub fn fingerprint_reader<R: Read>(&self, reader: R) -> Result<Fingerprint> {
        fingerprint_reader_with(self.algorithm, reader)
    }

    /// Fingerprint an async reader without buffering it whole
    pub async fn fingerprint_async<R: AsyncRead + Unpin>(&self, reader: R) -> Result<Fingerprint> {
        fingerprint_async_with(self.algorithm, reader).await
    }
}

/// Fingerprint bytes with the default algorithm (SHA-256)
pub fn fingerprint(bytes: &[u8]) -> Fingerprint {
    fingerprint_with(DigestAlgorithm::default(), bytes)
}

/// Fingerprint bytes with a specific algorithm
pub fn fingerprint_with(algorithm: DigestAlgorithm, bytes: &[u8]) -> Fingerprint {
    Fingerprint {
        algorithm,
        digest: algorithm.implementation().hash(bytes),
    }
}

/// Fingerprint a blocking reader in fixed-size chunks
pub fn fingerprint_reader_with<R: Read>(algorithm: DigestAlgorithm, mut reader: R) -> Result<Fingerprint> {
    let mut stream = StreamingFingerprint::new(algorithm);
    let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(DatumError::storage(format!("read failed while fingerprinting: {e}"))),
        };
        stream.update(&buf[..n]);
    }
    Ok(stream.finish())
}

/// Fingerprint an async reader in fixed-size chunks
pub async fn fingerprint_async_with<R: AsyncRead + Unpin>(
    algorithm: DigestAlgorithm,
    mut reader: R,
) -> Result<Fingerprint> {
    let mut stream = StreamingFingerprint::new(algorithm);
    let mut buf = vec![0u8; STREAM_CHUNK_SIZE];
    loop {
        let n = reader
            .read(&mut buf)
            .await
            .map_err(|e| DatumError::storage(format!("read failed while fingerprinting: {e}")))?;
        if n == 0 {
            break;
        }
        stream.update(&buf[..n]);
    }
    Ok(stream.finish())
}

/// Check bytes against a fingerprint using the fingerprint's own algorithm
pub fn verify(bytes: &[u8], expected: &Fingerprint) -> bool {
    fingerprint_with(expected.algorithm(), bytes) == *expected
}

/// Check a reader against a fingerprint
///
/// Fails closed: any read error yields `false`.
pub fn verify_reader<R: Read>(reader: R, expected: &Fingerprint) -> bool {
    match fingerprint_reader_with(expected.algorithm(), reader) {
        Ok(actual) => actual == *expected,
        Err(e) => {
            tracing::warn!(error = %e, "fingerprint verification aborted by read error");
            false
        }
    }
}

/// Check an async reader against a fingerprint
///
/// Fails closed: any read error yields `false`.
pub async fn verify_async<R: AsyncRead + Unpin>(reader: R, expected: &Fingerprint) -> bool {
    match fingerprint_async_with(expected.algorithm(), reader).await {
        Ok(actual) => actual == *expected,
        Err(e) => {
            tracing::warn!(error = %e, "fingerprint verification aborted by read error");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingReader {
        served: bool,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.served {
                return Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"));
            }
            self.served = true;
            buf[0] = b'x';
            Ok(1)
        }
    }

    #[test]
    fn test_sha256_known_vector() {
        // SHA256("") = e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855
        let fp = fingerprint(b"");
        assert_eq!(
            fp.to_string(),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_blake3_known_vector() {
        let fp = fingerprint_with(DigestAlgorithm::Blake3, b"");
        assert_eq!(
            fp.hex_digest(),
            "af1349b9f5f9a1a6a0404dea36dcc9499bcb25c9adc112b7cc9a93cae41f3262"
        );
    }

    #[test]
    fn test_streaming_matches_one_shot() {
        let data = vec![7u8; STREAM_CHUNK_SIZE * 3 + 17];
        for alg in DigestAlgorithm::ALL {
            let direct = fingerprint_with(alg, &data);
            let streamed = fingerprint_reader_with(alg, data.as_slice()).unwrap();
            assert_eq!(direct, streamed);
        }
    }

    #[test]
    fn test_algorithm_is_embedded() {
        let sha = fingerprint_with(DigestAlgorithm::Sha256, b"data");
        let b3 = fingerprint_with(DigestAlgorithm::Blake3, b"data");
        assert_ne!(sha, b3);
        assert!(verify(b"data", &sha));
        assert!(verify(b"data", &b3));
    }

    #[test]
    fn test_verify_rejects_altered_bytes() {
        let fp = fingerprint(b"original");
        assert!(!verify(b"originaL", &fp));
    }

    #[test]
    fn test_verify_reader_fails_closed() {
        let fp = fingerprint(b"x");
        assert!(!verify_reader(FailingReader { served: false }, &fp));
    }

    #[test]
    fn test_parse_round_trip() {
        let fp = fingerprint(b"hello");
        let parsed: Fingerprint = fp.to_string().parse().unwrap();
        assert_eq!(parsed, fp);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in [
            "",
            "sha256",
            "md5:d41d8cd98f00b204e9800998ecf8427e",
            "sha256:abcd",
            "sha256:zz",
            "sha256:E3B0C44298FC1C149AFBF4C8996FB92427AE41E4649B934CA495991B7852B855",
        ] {
            let err = bad.parse::<Fingerprint>().unwrap_err();
            assert!(matches!(err, DatumError::InvalidFingerprint { .. }), "{bad}");
        }
    }

    #[tokio::test]
    async fn test_async_reader() {
        let data = b"async content".to_vec();
        let engine = FingerprintEngine::new(DigestAlgorithm::Blake3);
        let fp = engine.fingerprint_async(data.as_slice()).await.unwrap();
        assert_eq!(fp, engine.fingerprint(&data));
        assert!(verify_async(data.as_slice(), &fp).await);
    }
}
