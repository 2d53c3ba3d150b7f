//! Stream cipher, plaintext validation and known-plaintext key recovery
//! for the live-timing feed.

pub mod cipher;
pub mod keyrev;

pub use cipher::{is_crypted, is_valid_decrypted_data, Cipher, CRYPTO_SEED};
pub use keyrev::{KeyReverser, ReverserStatus};
