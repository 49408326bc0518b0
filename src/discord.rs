//! Discord delivery: DMs a subscriber when a tracked issue matches.

pub mod api;
pub mod client;

pub use client::DiscordClient;

use async_trait::async_trait;
use itertools::Itertools;

use crate::github::Issue;

/// Sends one formatted message to one recipient.
///
/// Failures are reported to the caller but are never fatal to the calling
/// loop; both ingestion paths log a failed delivery and keep going.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_dm(&self, recipient_id: &str, content: &str) -> anyhow::Result<()>;
}

/// Formats the DM for a freshly discovered issue.
///
/// The layout is a stable contract: marker line with the repository and the
/// matched label, issue number and title, author, the full label list, and
/// the issue URL.
pub fn build_issue_message(repo: &str, issue: &Issue, matched_label: &str) -> String {
    let labels = issue
        .labels
        .iter()
        .map(|label| format!("`{}`", label.name))
        .join(", ");
    let labels = if labels.is_empty() {
        "—".to_string()
    } else {
        labels
    };
    format!(
        "🔔 **New issue in `{repo}`** (matched label: `{matched_label}`)\n\
         **#{number} — {title}**\n\
         👤 Opened by **{author}**\n\
         🏷️ Labels: {labels}\n\
         🔗 {url}",
        number = issue.number,
        title = issue.title,
        author = issue.user.login,
        url = issue.html_url,
    )
}
