use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// p95/p99 of one stage in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct StagePercentiles {
    pub p95: f64,
    pub p99: f64,
    /// Completed samples the percentiles were computed from.
    pub samples: u64,
}

/// Immutable metrics view served by the metrics endpoint.
///
/// Field names serialise in camelCase. A snapshot taken before any traffic
/// is all zeros rather than an error.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub inbound_p95: f64,
    pub inbound_p99: f64,
    pub outbound_p95: f64,
    pub outbound_p99: f64,
    pub business_logic_p95: f64,
    pub business_logic_p99: f64,
    pub inbound_active_threads: usize,
    pub inbound_queue_size: usize,
    pub outbound_active_threads: usize,
    pub outbound_queue_size: usize,
    pub total_inbound_messages: u64,
    pub total_outbound_messages: u64,
}

/// Column header matching [`MetricsSnapshot::to_tsv_row`].
pub const TSV_HEADER: &str = "timestamp\tlabel\tinboundP95\tinboundP99\toutboundP95\toutboundP99\tbusinessLogicP95\tbusinessLogicP99\tinboundActiveThreads\tinboundQueueSize\toutboundActiveThreads\toutboundQueueSize\ttotalInboundMessages\ttotalOutboundMessages";

impl MetricsSnapshot {
    /// One tab-separated results row stamped with the current time.
    #[must_use]
    pub fn to_tsv_row(&self, label: &str) -> String {
        self.to_tsv_row_at(label, Utc::now())
    }

    /// One tab-separated results row stamped with `at`.
    ///
    /// Tabs and newlines in `label` are replaced with spaces.
    #[must_use]
    pub fn to_tsv_row_at(&self, label: &str, at: DateTime<Utc>) -> String {
        let label: String = label
            .chars()
            .map(|c| if matches!(c, '\t' | '\n' | '\r') { ' ' } else { c })
            .collect();
        format!(
            "{}\t{}\t{:.3}\t{:.3}\t{:.3}\t{:.3}\t{:.3}\t{:.3}\t{}\t{}\t{}\t{}\t{}\t{}",
            at.to_rfc3339_opts(SecondsFormat::Millis, true),
            label,
            self.inbound_p95,
            self.inbound_p99,
            self.outbound_p95,
            self.outbound_p99,
            self.business_logic_p95,
            self.business_logic_p99,
            self.inbound_active_threads,
            self.inbound_queue_size,
            self.outbound_active_threads,
            self.outbound_queue_size,
            self.total_inbound_messages,
            self.total_outbound_messages,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> MetricsSnapshot {
        MetricsSnapshot {
            inbound_p95: 1.5,
            inbound_p99: 2.25,
            business_logic_p95: 10.0,
            business_logic_p99: 12.0,
            inbound_active_threads: 4,
            total_inbound_messages: 100,
            total_outbound_messages: 50,
            ..MetricsSnapshot::default()
        }
    }

    #[test]
    fn test_json_field_names() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["inboundP95"], 1.5);
        assert_eq!(json["businessLogicP99"], 12.0);
        assert_eq!(json["inboundActiveThreads"], 4);
        assert_eq!(json["outboundQueueSize"], 0);
        assert_eq!(json["totalOutboundMessages"], 50);
        assert_eq!(json.as_object().unwrap().len(), 12);
    }

    #[test]
    fn test_json_parses_back() {
        let text = serde_json::to_string(&sample()).unwrap();
        let parsed: MetricsSnapshot = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, sample());
    }

    #[test]
    fn test_tsv_row_matches_header() {
        let at = Utc.with_ymd_and_hms(2025, 1, 6, 12, 34, 56).unwrap();
        let row = sample().to_tsv_row_at("cpu\t100tps", at);
        assert_eq!(
            row.split('\t').count(),
            TSV_HEADER.split('\t').count()
        );
        assert!(row.starts_with("2025-01-06T12:34:56.000Z\tcpu 100tps\t1.500\t2.250\t"));
        assert!(row.ends_with("\t100\t50"));
    }
}
