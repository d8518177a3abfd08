/// Error types for OPC package operations
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OpcError {
    /// The archive could not be opened, or the `[Content_Types].xml` manifest is absent.
    #[error("Corrupt container: {0}")]
    CorruptContainer(String),

    #[error("Invalid pack URI: {0}")]
    InvalidPackUri(String),

    #[error("Part not found: {0}")]
    PartNotFound(String),

    /// A relationship document exists but does not parse.
    ///
    /// Callers may recover by treating the owning part as having no relationships.
    #[error("Malformed relationships for {partname}: {reason}")]
    MalformedRelationships { partname: String, reason: String },

    #[error("Malformed XML in {partname}: {reason}")]
    MalformedXml { partname: String, reason: String },

    #[error("Package has no main document relationship")]
    MissingMainDocument,

    #[error("Identifier space exhausted: {0}")]
    IdentifierExhaustion(&'static str),

    #[error("Output file already exists: {}", .0.display())]
    OutputExists(PathBuf),

    #[error("ZIP error: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("XML error: {0}")]
    XmlError(String),

    #[error("Attribute error: {0}")]
    AttrError(String),

    #[error("Failed to serialize merge report: {0}")]
    ReportError(String),
}

impl From<quick_xml::Error> for OpcError {
    fn from(err: quick_xml::Error) -> Self {
        OpcError::XmlError(err.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for OpcError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        OpcError::AttrError(err.to_string())
    }
}

impl OpcError {
    /// Whether a caller may continue after this error.
    ///
    /// Only malformed relationship documents are recoverable at the package level;
    /// everything else aborts the operation that raised it.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, OpcError::MalformedRelationships { .. })
    }
}

pub type Result<T> = std::result::Result<T, OpcError>;
