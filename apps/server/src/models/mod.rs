//! Domain models: upload records, extracted bills, lifecycle enums.

mod upload;

pub use upload::{
    BillCategory, CreateOutcome, ExtractedBill, ItemRow, LineItemEdit, ListFilter, ListScope,
    NewUpload, Payment, ProcessingStage, UploadRecord, UploadStatus, VerificationStatus,
};
