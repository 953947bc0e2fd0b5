use crate::Error;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;

/// One verification attempt, successful or not.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct VerificationRecord {
    pub timestamp: DateTime<Utc>,
    pub provider: String,
    /// Course or product id for purchases, email or subject for identities.
    pub subject: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<u64>,
}

impl VerificationRecord {
    pub fn new<T>(provider: &str, subject: impl Into<String>, outcome: &Result<T, Error>) -> Self {
        Self {
            timestamp: Utc::now(),
            provider: provider.to_string(),
            subject: subject.into(),
            success: outcome.is_ok(),
            reason: outcome.as_ref().err().map(Error::reason),
            error: outcome.as_ref().err().map(ToString::to_string),
            user_id: None,
        }
    }

    pub fn with_user_id(mut self, user_id: Option<u64>) -> Self {
        self.user_id = user_id;
        self
    }
}

/// Receives audit records. Implementations must not block or panic; a
/// verification never waits on, or fails because of, its audit record.
pub trait AuditSink: Send + Sync {
    fn record(&self, record: VerificationRecord);
}

/// Emits each record as a structured `tracing` event and bumps a counter.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: VerificationRecord) {
        if record.success {
            metrics::counter!("verification-accepted", "provider" => record.provider.clone())
                .increment(1);
            tracing::info!(
                timestamp = %record.timestamp,
                provider = %record.provider,
                subject = %record.subject,
                user_id = ?record.user_id,
                success = true,
                "verification accepted"
            );
        } else {
            metrics::counter!(
                "verification-rejected",
                "provider" => record.provider.clone(),
                "reason" => record.reason.unwrap_or("unknown")
            )
            .increment(1);
            tracing::warn!(
                timestamp = %record.timestamp,
                provider = %record.provider,
                subject = %record.subject,
                user_id = ?record.user_id,
                success = false,
                reason = record.reason.unwrap_or("unknown"),
                error = record.error.as_deref().unwrap_or_default(),
                "verification rejected"
            );
        }
    }
}

/// Keeps records in memory, for hosts that persist them in batches and for
/// tests.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    records: Mutex<Vec<VerificationRecord>>,
}

impl MemoryAuditSink {
    pub fn records(&self) -> Vec<VerificationRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, record: VerificationRecord) {
        if let Ok(mut records) = self.records.lock() {
            records.push(record);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn failed_outcome_keeps_reason_and_message() {
        let outcome: Result<(), Error> = Err(Error::ReceiptStatusNonZero(21003));
        let record = VerificationRecord::new("apple", "course-42", &outcome).with_user_id(Some(7));
        assert!(!record.success);
        assert_eq!(record.reason, Some("receipt-status"));
        assert_eq!(record.error.as_deref(), Some("receipt returned status 21003"));
        assert_eq!(record.user_id, Some(7));

        let json = serde_json::to_value(&record).expect("serializes");
        assert_eq!(json["provider"], "apple");
        assert_eq!(json["subject"], "course-42");
    }

    #[test]
    fn successful_outcome_has_no_error() {
        let record = VerificationRecord::new("google", "course-1", &Ok::<_, Error>(()));
        assert!(record.success);
        assert_eq!(record.reason, None);
        assert!(serde_json::to_value(&record).expect("serializes").get("error").is_none());
    }

    #[test]
    fn sinks_accept_records() {
        let record = VerificationRecord::new("facebook", "unknown", &Err::<(), _>(Error::MissingEmail));
        TracingAuditSink.record(record.clone());

        let memory = MemoryAuditSink::default();
        memory.record(record.clone());
        assert_eq!(memory.records(), vec![record]);
    }
}
