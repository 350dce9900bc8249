/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;

/// Poly1305 authentication tag size in bytes
pub const TAG_SIZE: usize = 16;

/// X25519 public key size in bytes
pub const PUBKEY_SIZE: usize = 32;

/// Random bytes in a message ID (before base64url encoding)
pub const MESSAGE_ID_SIZE: usize = 32;

/// Maximum plaintext size accepted by the sender box (256 KiB)
pub const MAX_MESSAGE_SIZE: usize = 262_144;

/// Remote index carried by a message the relay has not confirmed yet.
///
/// Being the largest sequence number, it sorts pending messages after every
/// confirmed one. The relay is never allowed to hand out this index.
pub const PENDING_REMOTE_INDEX: i64 = i64::MAX;

/// Key derivation contexts (BLAKE3)
pub const KDF_CONTEXT_BOX: &str = "hush-box-v1";
pub const KDF_CONTEXT_SEAL: &str = "hush-seal-v1";
pub const KDF_CONTEXT_SEAL_NONCE: &str = "hush-seal-nonce-v1";
