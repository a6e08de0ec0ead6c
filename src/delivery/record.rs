//! Payload shapes sent to the monitoring and business sinks

use serde::{Deserialize, Serialize};

/// One flushed batch, immutable once built
///
/// Serializes to the business API body:
/// `{"reader_id": "...", "antenna": "1", "idHex": [...], "timestamp": "..."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub reader_id: String,
    /// Logical channel label, not the physical antenna
    pub antenna: String,
    #[serde(rename = "idHex")]
    pub id_hex: Vec<String>,
    pub timestamp: String,
}

/// Outcome of the business-sink call, relayed to the monitoring sink
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ApiResult {
    Success {
        status: u16,
        response: String,
        original_payload: DeliveryRecord,
    },
    Failure {
        error: String,
        original_payload: DeliveryRecord,
    },
}

/// Wrapper the monitoring endpoint expects: `{"api_result": {...}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResultEnvelope {
    pub api_result: ApiResult,
}
