use log::info;
use serde_json::Value;

/// Fire-and-forget audit trail. Events are emitted on the dedicated `audit`
/// log target so operators can route them separately; recording never fails
/// and never blocks the primary operation.
#[derive(Clone, Default)]
pub struct AuditLogger;

impl AuditLogger {
    pub fn new() -> Self {
        Self
    }

    pub fn record(&self, event: &str, fields: Value) {
        info!(target: "audit", "{event} {fields}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_does_not_panic() {
        let audit = AuditLogger::new();
        audit.record(
            "duplicate_contact_blocked",
            json!({"organization_id": "x", "email": "a@b.c", "user_id": "y"}),
        );
    }
}
