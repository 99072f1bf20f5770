//! Chained-chunk XChaCha20-Poly1305 content encryption.
//!
//! Ciphertext format (binary, no header):
//! ```text
//! [sealed chunk 0][sealed chunk 1]...[sealed chunk n]
//! sealed chunk = [≤ CHUNK_SIZE bytes ciphertext][16 bytes: Poly1305 tag]
//! nonce(i)     = file_nonce (16 bytes) || i (8 bytes, big-endian)
//! AAD(i)       = 0x01 if chunk i is the final chunk, else 0x00
//! ```
//!
//! Every chunk except the last carries exactly `CHUNK_SIZE` plaintext bytes,
//! and exactly one final chunk always exists (an empty input seals one empty
//! final chunk). Binding the index into the nonce rejects reordered chunks;
//! the final-chunk flag rejects truncated and extended streams.

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use futures::Stream;
use rand_core::{OsRng, RngCore};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::kdf::VaultKey;
use super::{NONCE_SIZE, TAG_SIZE};
use crate::{Result, VaultError};

/// Plaintext bytes per chunk (64 KiB).
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Ciphertext bytes per full chunk.
pub const SEALED_CHUNK_SIZE: usize = CHUNK_SIZE + TAG_SIZE;

const AAD_MIDDLE: [u8; 1] = [0x00];
const AAD_FINAL: [u8; 1] = [0x01];

/// Generate a fresh random file nonce from the OS CSPRNG.
pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Ciphertext length for a plaintext of `plaintext_len` bytes.
pub fn sealed_len(plaintext_len: u64) -> u64 {
    let chunk = CHUNK_SIZE as u64;
    let chunks = if plaintext_len == 0 {
        1
    } else {
        plaintext_len.div_ceil(chunk)
    };
    plaintext_len + chunks * TAG_SIZE as u64
}

/// Plaintext length for a ciphertext of `ciphertext_len` bytes.
///
/// Returns `None` when no well-formed ciphertext has that length.
pub fn plaintext_len(ciphertext_len: u64) -> Option<u64> {
    let sealed = SEALED_CHUNK_SIZE as u64;
    let tag = TAG_SIZE as u64;
    if ciphertext_len < tag {
        return None;
    }
    let full_chunks = ciphertext_len / sealed;
    match ciphertext_len % sealed {
        0 => Some(full_chunks * CHUNK_SIZE as u64),
        rest if rest >= tag => Some(full_chunks * CHUNK_SIZE as u64 + rest - tag),
        _ => None,
    }
}

/// Per-file AEAD state shared by the encryptor and decryptor.
struct ChunkCipher {
    aead: XChaCha20Poly1305,
    nonce: [u8; NONCE_SIZE],
}

impl ChunkCipher {
    fn new(key: &VaultKey, nonce: [u8; NONCE_SIZE]) -> Self {
        Self {
            aead: XChaCha20Poly1305::new(key.as_bytes().into()),
            nonce,
        }
    }

    fn chunk_nonce(&self, index: u64) -> [u8; 24] {
        let mut out = [0u8; 24];
        out[..NONCE_SIZE].copy_from_slice(&self.nonce);
        out[NONCE_SIZE..].copy_from_slice(&index.to_be_bytes());
        out
    }

    fn seal(&self, index: u64, last: bool, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = self.chunk_nonce(index);
        let aad: &[u8] = if last { &AAD_FINAL } else { &AAD_MIDDLE };
        self.aead
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|e| VaultError::Internal(format!("chunk encryption failed: {e}")))
    }

    fn open(&self, index: u64, last: bool, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < TAG_SIZE {
            return Err(VaultError::DecryptionFailed);
        }
        let nonce = self.chunk_nonce(index);
        let aad: &[u8] = if last { &AAD_FINAL } else { &AAD_MIDDLE };
        self.aead
            .decrypt(
                XNonce::from_slice(&nonce),
                Payload { msg: sealed, aad },
            )
            .map_err(|_| VaultError::DecryptionFailed)
    }
}

/// Incremental encryptor.
///
/// Feed plaintext with [`update`](Self::update) in any slice sizes; each call
/// returns the ciphertext that can already be written out. A full chunk is
/// only sealed once more data is known to follow it, so
/// [`finalize`](Self::finalize) always has the final chunk to seal.
pub struct StreamEncryptor {
    cipher: ChunkCipher,
    index: u64,
    buffer: Vec<u8>,
}

impl StreamEncryptor {
    pub fn new(key: &VaultKey, nonce: [u8; NONCE_SIZE]) -> Self {
        Self {
            cipher: ChunkCipher::new(key, nonce),
            index: 0,
            buffer: Vec::with_capacity(CHUNK_SIZE),
        }
    }

    /// Absorb plaintext, returning any ciphertext ready to be written.
    pub fn update(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        self.buffer.extend_from_slice(data);

        let mut out = Vec::new();
        while self.buffer.len() > CHUNK_SIZE {
            let sealed = self.cipher.seal(self.index, false, &self.buffer[..CHUNK_SIZE])?;
            self.buffer.drain(..CHUNK_SIZE);
            self.index += 1;
            out.extend_from_slice(&sealed);
        }
        Ok(out)
    }

    /// Seal the final chunk.
    pub fn finalize(self) -> Result<Vec<u8>> {
        self.cipher.seal(self.index, true, &self.buffer)
    }
}

/// Chunk-at-a-time decryptor. The caller says which chunk is final.
pub struct StreamDecryptor {
    cipher: ChunkCipher,
    index: u64,
    done: bool,
}

impl StreamDecryptor {
    /// Create a decryptor. A stored nonce of the wrong length is reported as
    /// `DecryptionFailed`, like any other corruption.
    pub fn new(key: &VaultKey, nonce: &[u8]) -> Result<Self> {
        let nonce: [u8; NONCE_SIZE] = nonce
            .try_into()
            .map_err(|_| VaultError::DecryptionFailed)?;
        Ok(Self {
            cipher: ChunkCipher::new(key, nonce),
            index: 0,
            done: false,
        })
    }

    /// Open the next sealed chunk in sequence.
    pub fn open_chunk(&mut self, sealed: &[u8], last: bool) -> Result<Vec<u8>> {
        if self.done {
            return Err(VaultError::DecryptionFailed);
        }
        if !last && sealed.len() != SEALED_CHUNK_SIZE {
            return Err(VaultError::DecryptionFailed);
        }
        let plaintext = self.cipher.open(self.index, last, sealed)?;
        self.index += 1;
        self.done = last;
        Ok(plaintext)
    }
}

/// Output of whole-buffer [`encrypt`].
#[derive(Debug, Clone)]
pub struct SealedContent {
    pub ciphertext: Vec<u8>,
    pub nonce: [u8; NONCE_SIZE],
}

/// Encrypt a whole buffer under a fresh random nonce.
pub fn encrypt(plaintext: &[u8], key: &VaultKey) -> Result<SealedContent> {
    let nonce = generate_nonce();
    let mut encryptor = StreamEncryptor::new(key, nonce);
    let mut ciphertext = encryptor.update(plaintext)?;
    ciphertext.extend_from_slice(&encryptor.finalize()?);
    Ok(SealedContent { ciphertext, nonce })
}

/// Decrypt a whole buffer produced by [`encrypt`] or [`StreamEncryptor`].
pub fn decrypt(ciphertext: &[u8], key: &VaultKey, nonce: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.is_empty() {
        return Err(VaultError::DecryptionFailed);
    }
    let mut decryptor = StreamDecryptor::new(key, nonce)?;
    let chunks: Vec<&[u8]> = ciphertext.chunks(SEALED_CHUNK_SIZE).collect();
    let last_index = chunks.len() - 1;

    let mut plaintext = Vec::with_capacity(ciphertext.len());
    for (i, sealed) in chunks.into_iter().enumerate() {
        plaintext.extend_from_slice(&decryptor.open_chunk(sealed, i == last_index)?);
    }
    Ok(plaintext)
}

/// Streaming decryptor over an async byte source.
///
/// Reads one sealed chunk ahead so it knows which chunk is final. The first
/// chunk is authenticated in [`open`](Self::open), so a wrong key is reported
/// before any plaintext is handed out.
pub struct DecryptingReader<R> {
    reader: R,
    decryptor: StreamDecryptor,
    current: Option<Vec<u8>>,
    pending: Option<Vec<u8>>,
}

impl<R> DecryptingReader<R>
where
    R: AsyncRead + Unpin,
{
    /// Start decrypting `reader`, verifying the first chunk.
    pub async fn open(reader: R, key: &VaultKey, nonce: &[u8]) -> Result<Self> {
        let mut this = Self {
            reader,
            decryptor: StreamDecryptor::new(key, nonce)?,
            current: None,
            pending: None,
        };

        let first = this.read_sealed().await?;
        if first.is_empty() {
            return Err(VaultError::DecryptionFailed);
        }
        this.current = Some(first);
        this.pending = this.advance().await?;
        Ok(this)
    }

    /// Next plaintext chunk, or `None` after the final chunk.
    pub async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        if let Some(plaintext) = self.pending.take() {
            return Ok(Some(plaintext));
        }
        self.advance().await
    }

    /// Decrypt everything that remains into memory.
    pub async fn read_to_end(mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next_chunk().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }

    async fn advance(&mut self) -> Result<Option<Vec<u8>>> {
        let sealed = match self.current.take() {
            Some(sealed) => sealed,
            None => return Ok(None),
        };
        let next = self.read_sealed().await?;
        let last = next.is_empty();
        let plaintext = self.decryptor.open_chunk(&sealed, last)?;
        if !last {
            self.current = Some(next);
        }
        Ok(Some(plaintext))
    }

    /// Read up to one sealed chunk. Empty means end of input.
    async fn read_sealed(&mut self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; SEALED_CHUNK_SIZE];
        let mut filled = 0;
        while filled < SEALED_CHUNK_SIZE {
            let n = self.reader.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(buf)
    }
}

impl<R> DecryptingReader<R>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    /// Turn the reader into a stream of plaintext chunks.
    pub fn into_stream(self) -> impl Stream<Item = Result<Vec<u8>>> + Send + 'static {
        futures::stream::try_unfold(self, |mut reader| async move {
            let chunk = reader.next_chunk().await?;
            Ok::<_, VaultError>(chunk.map(|chunk| (chunk, reader)))
        })
    }
}
