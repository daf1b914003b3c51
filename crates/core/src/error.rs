//! Error types shared across the infractl workspace.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using the infractl core error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced at the core component boundary.
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// A tool parameter was missing or malformed.
    #[error("invalid argument: {message}")]
    #[diagnostic(code(infractl::invalid_argument))]
    InvalidArgument {
        /// Description of what was wrong with the argument.
        message: String,
    },

    /// A requested resource, provider schema entry, or state record does not exist.
    #[error("not found: {message}")]
    #[diagnostic(code(infractl::not_found))]
    NotFound {
        /// What was not found.
        message: String,
    },

    /// A dependency edge referenced an endpoint that does not exist.
    #[error("integrity error: {message}")]
    #[diagnostic(code(infractl::integrity_error))]
    IntegrityError {
        /// Description of the violated constraint.
        message: String,
    },

    /// The provider could not be downloaded, extracted, started, or configured.
    #[error("provider load failed for {full_name}: {message}")]
    #[diagnostic(code(infractl::provider_load_failed))]
    ProviderLoadFailed {
        /// `namespace/type@version` of the provider.
        full_name: String,
        /// Aggregated failure message across every attempted path/configuration.
        message: String,
    },

    /// A provider RPC returned one or more error-severity diagnostics.
    #[error("provider diagnostics ({operation}): {message}")]
    #[diagnostic(code(infractl::provider_diagnostic_error))]
    ProviderDiagnosticError {
        /// The operation being performed (`plan`, `apply`, `read`, `import`, `configure`, …).
        operation: String,
        /// Joined `summary: detail` lines, one per diagnostic.
        message: String,
    },

    /// The provider subprocess died unexpectedly.
    #[error("provider plugin crashed: {full_name}")]
    #[diagnostic(code(infractl::plugin_crashed))]
    PluginCrashed {
        /// `namespace/type@version` of the provider.
        full_name: String,
    },

    /// A value failed to convert under its declared type.
    #[error("type mismatch: expected {expected}, got {actual}")]
    #[diagnostic(code(infractl::type_mismatch))]
    TypeMismatch {
        /// The type the value was expected to satisfy.
        expected: String,
        /// A description of what was actually found.
        actual: String,
    },

    /// An import operation returned zero resources.
    #[error("import returned no resources for import id {import_id}")]
    #[diagnostic(code(infractl::import_empty))]
    ImportEmpty {
        /// The import identifier that was requested.
        import_id: String,
    },

    /// The operation was cancelled cooperatively.
    #[error("operation cancelled")]
    #[diagnostic(code(infractl::cancelled))]
    Cancelled,

    /// The caller's deadline elapsed before the operation completed.
    #[error("deadline exceeded")]
    #[diagnostic(code(infractl::deadline_exceeded))]
    DeadlineExceeded,

    /// An opaque/capsule value could not be represented in the untyped tree.
    #[error("unsupported value kind: {kind}")]
    #[diagnostic(code(infractl::unsupported_value_kind))]
    UnsupportedValueKind {
        /// Description of the offending value kind.
        kind: String,
    },

    /// Serialization error.
    #[error("serialization error: {0}")]
    #[diagnostic(code(infractl::serialization_error))]
    Serialization(#[from] serde_json::Error),

    /// The wire codec failed to encode or decode a `DynamicValue`'s msgpack
    /// payload.
    #[error("msgpack error: {message}")]
    #[diagnostic(code(infractl::msgpack_error))]
    Msgpack {
        /// The underlying `rmp_serde` error message.
        message: String,
    },

    /// IO error.
    #[error("io error: {0}")]
    #[diagnostic(code(infractl::io_error))]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for [`Error::InvalidArgument`].
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument { message: message.into() }
    }

    /// Shorthand for [`Error::NotFound`].
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound { message: message.into() }
    }

    /// Shorthand for [`Error::TypeMismatch`].
    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::TypeMismatch { expected: expected.into(), actual: actual.into() }
    }

    /// Shorthand for [`Error::Msgpack`].
    pub fn msgpack(message: impl Into<String>) -> Self {
        Self::Msgpack { message: message.into() }
    }
}
