//! Bounds applied to a single job run

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Bounds applied to a single job run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobLimits {
    /// Maximum number of coding-agent turns before the run is exhausted
    pub max_iterations: u32,
    /// Number of recent conversation messages fed to the agent
    pub history_limit: usize,
    /// Lifetime of the sandbox session, counted from creation
    #[serde(with = "duration_ms")]
    pub sandbox_timeout: Duration,
    /// Wall-clock timeout for a single terminal command
    #[serde(with = "duration_ms")]
    pub command_timeout: Duration,
    /// Maximum captured bytes per output stream (stdout and stderr each)
    pub max_output_bytes: usize,
}

impl Default for JobLimits {
    fn default() -> Self {
        Self {
            max_iterations: 12,
            history_limit: 6,
            sandbox_timeout: Duration::from_secs(30 * 60), // 30 minutes
            command_timeout: Duration::from_secs(5 * 60),  // 5 minutes per command
            max_output_bytes: 1024 * 1024,                 // 1 MB per stream
        }
    }
}

/// Helper for serializing Duration as milliseconds
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

/// Buffer that stops accumulating once `limit` bytes have been stored.
///
/// Used for the stdout/stderr capture of terminal commands so a chatty
/// command cannot flood the agent's context.
#[derive(Debug, Clone)]
pub struct LimitedBuffer {
    buffer: Vec<u8>,
    limit: usize,
    truncated: bool,
}

const TRUNCATION_MARKER: &[u8] = b"\n... [output truncated] ...\n";

impl LimitedBuffer {
    /// Create an empty buffer holding at most `limit` bytes of payload.
    pub fn new(limit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            limit,
            truncated: false,
        }
    }

    /// Append `data`, returning the number of bytes consumed.
    ///
    /// Always reports the full length so streaming writers keep draining
    /// the source after the limit is hit.
    pub fn write(&mut self, data: &[u8]) -> usize {
        if self.truncated {
            return data.len();
        }

        let remaining = self.limit.saturating_sub(self.buffer.len());
        let to_write = data.len().min(remaining);
        self.buffer.extend_from_slice(&data[..to_write]);

        if to_write < data.len() {
            self.truncated = true;
            self.buffer.extend_from_slice(TRUNCATION_MARKER);
        }

        data.len()
    }

    /// Whether any data was dropped.
    pub fn was_truncated(&self) -> bool {
        self.truncated
    }

    /// The captured bytes decoded lossily as UTF-8.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.buffer).into_owned()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = JobLimits::default();

        assert_eq!(limits.max_iterations, 12);
        assert_eq!(limits.history_limit, 6);
        assert_eq!(limits.sandbox_timeout, Duration::from_secs(1800));
        assert_eq!(limits.max_output_bytes, 1024 * 1024);
    }

    #[test]
    fn test_limits_serialization_format() {
        let limits = JobLimits {
            command_timeout: Duration::from_millis(5000),
            ..JobLimits::default()
        };

        let json = serde_json::to_string(&limits).unwrap();

        // Durations are serialized as milliseconds
        assert!(json.contains("\"command_timeout\":5000"));
        assert!(json.contains("\"sandbox_timeout\":1800000"));
    }

    #[test]
    fn test_limits_partial_document_uses_defaults() {
        let limits: JobLimits = serde_json::from_str(r#"{"max_iterations": 3}"#).unwrap();

        assert_eq!(limits.max_iterations, 3);
        assert_eq!(limits.history_limit, 6);
    }

    #[test]
    fn test_limited_buffer_under_limit() {
        let mut buffer = LimitedBuffer::new(100);

        let written = buffer.write(b"hello world");
        assert_eq!(written, 11);
        assert!(!buffer.was_truncated());
        assert_eq!(buffer.to_string_lossy(), "hello world");
    }

    #[test]
    fn test_limited_buffer_over_limit_truncates_once() {
        let mut buffer = LimitedBuffer::new(5);

        assert_eq!(buffer.write(b"hello world"), 11);
        assert!(buffer.was_truncated());
        assert_eq!(buffer.write(b"more data"), 9);

        let content = buffer.to_string_lossy();
        assert!(content.starts_with("hello"));
        assert_eq!(content.matches("truncated").count(), 1);
    }

    #[test]
    fn test_limited_buffer_exact_boundary() {
        let mut buffer = LimitedBuffer::new(10);

        buffer.write(b"12345");
        buffer.write(b"67890");
        assert!(!buffer.was_truncated());
        assert_eq!(buffer.to_string_lossy(), "1234567890");

        buffer.write(b"x");
        assert!(buffer.was_truncated());
    }
}
