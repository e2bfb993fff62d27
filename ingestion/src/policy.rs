//! Inbound content screening for component C4 step 4: runs the shared
//! prompt-injection detector over extracted text before chunking. A
//! positive result never aborts ingestion (a contract or support ticket
//! may legitimately quote "ignore previous instructions") — it is only
//! recorded in the document's metadata and a counter is incremented. This
//! is the same detector the answer generator uses fatally in C7; here it
//! is purely advisory.

use providers::injection::{detect, InjectionVerdict};
use ragcore_core::metrics::Metrics;
use std::sync::Arc;

pub const INJECTION_FLAG_KEY: &str = "inbound_injection_suspected";
pub const INJECTION_REASON_KEY: &str = "inbound_injection_reason";

/// Screens `text`, incrementing `metrics`' injection counter on a hit, and
/// returns the metadata entries the caller should attach to the document.
pub fn screen(text: &str, metrics: &Arc<Metrics>) -> Vec<(String, String)> {
    let verdict: InjectionVerdict = detect(text);
    if !verdict.suspicious {
        return Vec::new();
    }

    metrics.record_inbound_injection_flagged();

    let mut entries = vec![(INJECTION_FLAG_KEY.to_string(), "true".to_string())];
    if let Some(reason) = verdict.reason {
        entries.push((INJECTION_REASON_KEY.to_string(), reason));
    }
    entries
}
