//! Completion marker detection.
//!
//! The agent signals that it is done by wrapping a short summary in
//! `<task_summary>` tags. The parse rule is strict: the first opening tag,
//! then the first closing tag after it; the summary is the trimmed text in
//! between. An unterminated marker or a blank summary does not count.

/// Opening tag of the completion marker.
pub const SUMMARY_OPEN: &str = "<task_summary>";
/// Closing tag of the completion marker.
pub const SUMMARY_CLOSE: &str = "</task_summary>";

/// Extract the task summary from the agent's latest text, if it has one.
pub fn extract_task_summary(text: &str) -> Option<String> {
    let start = text.find(SUMMARY_OPEN)? + SUMMARY_OPEN.len();
    let rest = &text[start..];
    let end = rest.find(SUMMARY_CLOSE)?;
    let summary = rest[..end].trim();
    if summary.is_empty() {
        None
    } else {
        Some(summary.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_well_formed_marker() {
        assert_eq!(
            extract_task_summary("All done.\n<task_summary>\nBuilt a counter\n</task_summary>"),
            Some("Built a counter".to_string())
        );
    }

    #[test]
    fn test_no_marker() {
        assert_eq!(extract_task_summary("Still working on it"), None);
        assert_eq!(extract_task_summary(""), None);
    }

    #[test]
    fn test_unterminated_marker() {
        assert_eq!(extract_task_summary("<task_summary>Built a counter"), None);
    }

    #[test]
    fn test_blank_summary() {
        assert_eq!(extract_task_summary("<task_summary>  \n </task_summary>"), None);
    }

    #[test]
    fn test_closing_tag_before_opening_is_ignored() {
        assert_eq!(
            extract_task_summary("</task_summary> then <task_summary>Real</task_summary>"),
            Some("Real".to_string())
        );
    }

    #[test]
    fn test_first_marker_wins() {
        let text = "<task_summary>one</task_summary><task_summary>two</task_summary>";
        assert_eq!(extract_task_summary(text), Some("one".to_string()));
    }

    #[test]
    fn test_mention_of_tag_name_is_not_a_marker() {
        assert_eq!(
            extract_task_summary("I will emit task_summary when finished"),
            None
        );
    }
}
