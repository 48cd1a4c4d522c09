// Outbound RPC clients

pub mod enrichment;
pub mod extraction;
pub mod image_search;
pub mod shopify;

pub use enrichment::EnrichmentClient;
pub use extraction::ExtractionClient;
pub use image_search::{ImageCandidate, ImageSearchClient};
pub use shopify::ShopifyClient;
