// Core domain types for the stockflow pipeline
// No I/O here: stages, payload blobs, extraction envelopes, events, config

pub mod config;
pub mod error;
pub mod events;
pub mod extraction;
pub mod merchant;
pub mod payload;
pub mod stage;

pub use config::StockflowConfig;
pub use error::{Result, StockflowError};
pub use events::{classify_severity, ActivityLog, EventKind, ProgressEvent, Severity};
pub use extraction::{
    adaptive_timeout, strip_code_fences, DocumentTotals, ExtractedDocument, ExtractedLineItem,
    ExtractionEnvelope, SupplierStub,
};
pub use merchant::{FuzzyEngineChoice, MerchantSettings};
pub use payload::{ItemSeed, ProductPayload, StageOutcome, StagePayload};
pub use stage::Stage;
