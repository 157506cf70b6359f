//! Numeric codes carried by notifications and stored on failed documents.

use pressroom_api_types::RESOURCE_MISSING_CODE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Stored layout is not valid JSON or does not match the payload schema.
    MalformedLayout,
    /// A referenced object could not be resolved; rendering continued without it.
    ResourceMissing,
    /// Owning document no longer exists.
    DocumentMissing,
    /// Engine could not produce output.
    RenderFailed,
    /// Engine did not signal readiness in time.
    RenderTimeout,
    /// Artifact could not be written to object storage.
    StorageFailed,
    /// Catch-all for failures outside the pipeline's own taxonomy.
    System,
}

impl ErrorCode {
    pub fn code(self) -> u16 {
        match self {
            ErrorCode::MalformedLayout => 4000,
            ErrorCode::ResourceMissing => RESOURCE_MISSING_CODE,
            ErrorCode::DocumentMissing => 4040,
            ErrorCode::RenderFailed => 5000,
            ErrorCode::RenderTimeout => 5001,
            ErrorCode::StorageFailed => 5003,
            ErrorCode::System => 5999,
        }
    }

    /// Client-facing description; never includes internal detail.
    pub fn public_message(self) -> &'static str {
        match self {
            ErrorCode::MalformedLayout => "Document layout could not be read",
            ErrorCode::ResourceMissing => "Some referenced assets could not be found",
            ErrorCode::DocumentMissing => "Document no longer exists",
            ErrorCode::RenderFailed => "Document could not be rendered",
            ErrorCode::RenderTimeout => "Rendering timed out",
            ErrorCode::StorageFailed => "Rendered document could not be stored",
            ErrorCode::System => "Unexpected error during generation",
        }
    }
}
