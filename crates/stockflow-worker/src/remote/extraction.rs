// Extraction RPC client
//
// Sends the document to the vision/LLM extraction service and normalizes
// whatever comes back: fenced JSON is unwrapped, chunked responses merged,
// pack quantities recovered. The prompt asks for raw JSON, but models wrap
// output in markdown fences often enough that stripping is unconditional.

use base64::Engine as _;
use tracing::{info, warn};

use stockflow_core::extraction::{post_process, strip_code_fences};
use stockflow_core::{
    adaptive_timeout, ExtractedDocument, ExtractionEnvelope, Result, StockflowConfig,
    StockflowError,
};
use stockflow_storage::UploadRow;

const EXTRACTION_PROMPT: &str = "Extract the purchase order as raw JSON with fields \
number, supplier{name,email,phone,website,address}, lineItems[{sku,productName,quantity,unitCost,totalCost}], \
totals{subtotal,tax,total}. Respond with JSON only, no markdown.";

pub struct ExtractionClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl ExtractionClient {
    pub fn new(config: &StockflowConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.extraction_api_url.clone(),
            api_key: config.extraction_api_key.clone(),
        }
    }

    /// Extract structured data from an uploaded document
    pub async fn extract(&self, upload: &UploadRow) -> Result<(ExtractedDocument, f64)> {
        let timeout = adaptive_timeout(upload.byte_size.max(0) as u64);

        // Uploads stored inline travel as base64 bytes; anything else goes
        // by reference and the extraction service fetches the bytes itself
        let mut body = serde_json::json!({
            "fileName": upload.file_name,
            "prompt": EXTRACTION_PROMPT,
        });
        if let Some(encoded) = upload.content_ref.strip_prefix("base64:") {
            body["contentBase64"] = encoded.into();
        } else if let Some(inline) = upload.content_ref.strip_prefix("inline:") {
            body["contentBase64"] =
                base64::engine::general_purpose::STANDARD.encode(inline).into();
        } else {
            body["contentRef"] = upload.content_ref.clone().into();
        }

        let mut request = self
            .http
            .post(&self.base_url)
            .timeout(timeout)
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                // Retryable: the orchestrator reschedules with backoff
                StockflowError::StageTimeout {
                    stage: "ai_parsing".to_string(),
                    elapsed_ms: timeout.as_millis() as u64,
                }
            } else {
                StockflowError::transient(format!("extraction rpc: {e}"))
            }
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| StockflowError::transient(format!("extraction body: {e}")))?;
        if status.is_server_error() {
            return Err(StockflowError::transient(format!(
                "extraction service {status}: {text}"
            )));
        }
        if !status.is_success() {
            return Err(StockflowError::validation(format!(
                "extraction rejected ({status}): {text}"
            )));
        }

        let cleaned = strip_code_fences(&text);
        let envelope: ExtractionEnvelope = serde_json::from_str(cleaned).map_err(|e| {
            warn!(error = %e, "unparseable extraction response");
            StockflowError::validation(format!("malformed extraction response: {e}"))
        })?;

        let (mut document, confidence) = envelope.into_document()?;
        post_process(&mut document);

        info!(
            upload_id = %upload.id,
            line_items = document.line_items.len(),
            confidence,
            "document extracted"
        );
        Ok((document, confidence))
    }
}
