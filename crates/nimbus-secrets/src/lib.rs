//! Nimbus Secrets: connection-string-at-rest encryption, TLS configuration
//! and redaction.
//!
//! - [`encryption`]: a process-wide AEAD key that encrypts connection
//!   strings at rest and decrypts them only at pool construction time.
//! - [`tls`]: transport security options honoring minimum TLS 1.2
//!   (preferred 1.3), certificate verification, optional mutual TLS, a
//!   modern cipher allow-list, and a guarded development-only opt-out.
//! - [`redact`]: strips credentials from connection strings before they
//!   reach a log record or event payload.

pub mod encryption;
pub mod redact;
pub mod tls;

pub use encryption::{DecryptedSecret, EncryptionKey};
pub use redact::{redact_connection_string, redact_credential};
pub use tls::TlsOptions;

/// Re-exports the common set most call sites need.
pub mod prelude {
    pub use crate::encryption::{DecryptedSecret, EncryptionKey};
    pub use crate::redact::{redact_connection_string, redact_credential};
    pub use crate::tls::TlsOptions;
}
