use serde::{Deserialize, Serialize};

/// Metric kind. A name stays bound to the kind it was first written with.
///
/// # Examples
///
/// ```
/// use metrix_common::types::MetricKind;
///
/// let kind: MetricKind = "gauge".parse().unwrap();
/// assert_eq!(kind, MetricKind::Gauge);
/// assert_eq!(MetricKind::Counter.to_string(), "counter");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
}

impl MetricKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MetricKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "counter" => Ok(MetricKind::Counter),
            "gauge" => Ok(MetricKind::Gauge),
            _ => Err(format!("unknown metric type: {s}")),
        }
    }
}

/// Current value of a metric: an accumulated counter total or the latest gauge reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Counter(i64),
    Gauge(f64),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Counter(_) => MetricKind::Counter,
            MetricValue::Gauge(_) => MetricKind::Gauge,
        }
    }

    /// Parses the textual value used by the path-form update endpoint.
    pub fn parse(kind: MetricKind, raw: &str) -> Result<Self, String> {
        match kind {
            MetricKind::Counter => raw
                .parse::<i64>()
                .map(MetricValue::Counter)
                .map_err(|e| format!("invalid counter value '{raw}': {e}")),
            MetricKind::Gauge => raw
                .parse::<f64>()
                .map(MetricValue::Gauge)
                .map_err(|e| format!("invalid gauge value '{raw}': {e}")),
        }
    }
}

/// Counters print as integers, gauges with trailing zeros trimmed (`42.5`, `3`).
impl std::fmt::Display for MetricValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MetricValue::Counter(delta) => write!(f, "{delta}"),
            MetricValue::Gauge(value) => write!(f, "{value}"),
        }
    }
}

/// A named metric as it travels on the wire.
///
/// Serialized as `{"id": .., "type": "counter", "delta": ..}` or
/// `{"id": .., "type": "gauge", "value": ..}`.
///
/// # Examples
///
/// ```
/// use metrix_common::types::Metric;
///
/// let json = serde_json::to_string(&Metric::gauge("CPU", 42.5)).unwrap();
/// assert_eq!(json, r#"{"id":"CPU","type":"gauge","value":42.5}"#);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireMetric", into = "WireMetric")]
pub struct Metric {
    pub id: String,
    pub value: MetricValue,
}

impl Metric {
    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            value: MetricValue::Counter(delta),
        }
    }

    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            value: MetricValue::Gauge(value),
        }
    }

    pub fn kind(&self) -> MetricKind {
        self.value.kind()
    }
}

#[derive(Serialize, Deserialize)]
struct WireMetric {
    id: String,
    #[serde(rename = "type")]
    kind: MetricKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<f64>,
}

impl TryFrom<WireMetric> for Metric {
    type Error = String;

    fn try_from(wire: WireMetric) -> Result<Self, Self::Error> {
        if wire.id.is_empty() {
            return Err("metric id cannot be empty".to_string());
        }
        let value = match (wire.kind, wire.delta, wire.value) {
            (MetricKind::Counter, Some(delta), _) => MetricValue::Counter(delta),
            (MetricKind::Gauge, _, Some(value)) => MetricValue::Gauge(value),
            (MetricKind::Counter, None, _) => {
                return Err(format!("counter '{}' has no delta", wire.id))
            }
            (MetricKind::Gauge, _, None) => {
                return Err(format!("gauge '{}' has no value", wire.id))
            }
        };
        Ok(Metric { id: wire.id, value })
    }
}

impl From<Metric> for WireMetric {
    fn from(metric: Metric) -> Self {
        let (delta, value) = match metric.value {
            MetricValue::Counter(delta) => (Some(delta), None),
            MetricValue::Gauge(value) => (None, Some(value)),
        };
        WireMetric {
            id: metric.id,
            kind: metric.value.kind(),
            delta,
            value,
        }
    }
}

/// Lookup key used by `POST /value/`: `{"id": .., "type": ..}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricKey {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_serializes_without_value_field() {
        let json = serde_json::to_value(Metric::counter("PollCount", 5)).unwrap();
        assert_eq!(json["id"], "PollCount");
        assert_eq!(json["type"], "counter");
        assert_eq!(json["delta"], 5);
        assert!(json.get("value").is_none());
    }

    #[test]
    fn deserialize_rejects_counter_without_delta() {
        let err = serde_json::from_str::<Metric>(r#"{"id":"c","type":"counter","value":1.0}"#)
            .unwrap_err();
        assert!(err.to_string().contains("no delta"));
    }

    #[test]
    fn deserialize_rejects_unknown_type() {
        assert!(serde_json::from_str::<Metric>(r#"{"id":"x","type":"histogram"}"#).is_err());
    }

    #[test]
    fn deserialize_batch_mixed_kinds() {
        let batch: Vec<Metric> = serde_json::from_str(
            r#"[{"id":"a","type":"counter","delta":3},{"id":"b","type":"gauge","value":0.25}]"#,
        )
        .unwrap();
        assert_eq!(batch, vec![Metric::counter("a", 3), Metric::gauge("b", 0.25)]);
    }

    #[test]
    fn display_trims_gauge_zeros() {
        assert_eq!(MetricValue::Gauge(42.5).to_string(), "42.5");
        assert_eq!(MetricValue::Gauge(3.0).to_string(), "3");
        assert_eq!(MetricValue::Counter(-7).to_string(), "-7");
    }

    #[test]
    fn parse_path_values() {
        assert_eq!(
            MetricValue::parse(MetricKind::Counter, "10").unwrap(),
            MetricValue::Counter(10)
        );
        assert!(MetricValue::parse(MetricKind::Counter, "1.5").is_err());
        assert_eq!(
            MetricValue::parse(MetricKind::Gauge, "1.5").unwrap(),
            MetricValue::Gauge(1.5)
        );
        assert!(MetricValue::parse(MetricKind::Gauge, "none").is_err());
    }
}
