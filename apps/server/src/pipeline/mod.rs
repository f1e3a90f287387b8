//! Upload processing pipeline: OCR collaborator, structured extraction,
//! and the single-flight background worker.

pub mod extract;
pub mod ocr;
pub mod worker;

pub use extract::extract_bill;
pub use ocr::{HttpOcrEngine, OcrEngine, OcrLine, PageText};
pub use worker::UploadWorker;
