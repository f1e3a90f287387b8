//! Caller-facing service layer. The HTTP surface (a collaborator) maps
//! these operations onto endpoints one-to-one.

pub mod render;
pub mod retention;
pub mod uploads;
pub mod verification;

pub use render::{render_debug_text, render_final_text, validate_result, ValidationIssue};
pub use retention::{RetentionStats, RetentionWorker};
pub use uploads::{
    validate_upload_id, DeleteAudit, StatusSnapshot, SubmitUpload, UploadAccepted, UploadService,
};
pub use verification::VerificationService;
