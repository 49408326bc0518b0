//! Label pattern matching.
//!
//! A subscription's pattern is a regular expression evaluated
//! case-insensitively against each of an issue's labels. The whole label
//! has to match: `bug` does not match `bugfix`.

use regex::RegexBuilder;

use crate::github::Label;

/// Returns the first label fully matched by `pattern`, in label order.
///
/// Invalid and empty patterns match nothing rather than erroring. The
/// subscription surface validates patterns with the same compilation rule
/// before storing them, so an invalid pattern here is stale data, not a
/// caller error.
pub fn match_label<'a>(pattern: &str, labels: &'a [Label]) -> Option<&'a str> {
    if pattern.is_empty() {
        return None;
    }
    // Compile the raw pattern before anchoring it: anchoring can turn some
    // malformed patterns into ones that compile.
    if RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .is_err()
    {
        return None;
    }
    let re = RegexBuilder::new(&format!("^(?:{pattern})$"))
        .case_insensitive(true)
        .build()
        .ok()?;
    labels
        .iter()
        .find(|label| re.is_match(&label.name))
        .map(|label| label.name.as_str())
}
