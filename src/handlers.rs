use std::sync::Arc;

use crate::config::Config;
use crate::db::{Subscription, SubscriptionStore};
use crate::discord::{self, Notifier};
use crate::github::{Issue, IssueFetcher, IssuesAction, IssuesEvent};
use crate::resolver;

/// Shared collaborators for both ingestion paths.
///
/// The webhook server and the poll loop hold the same `Arc<Context>`;
/// everything in here is read-only after startup.
pub struct Context {
    pub github: Arc<dyn IssueFetcher>,
    pub notifier: Arc<dyn Notifier>,
    pub store: Arc<dyn SubscriptionStore>,
    pub config: Config,
}

/// Outcome of processing one webhook delivery.
#[derive(Debug, PartialEq, Eq)]
pub enum HandledEvent {
    /// The event was valid but is not a newly opened, labeled issue.
    /// Unrelated events are expected input, not errors.
    Skipped(&'static str),
    /// Notifications were resolved and dispatched; the count is of
    /// successful deliveries.
    Notified(usize),
}

/// Handles one `issues` webhook event.
///
/// Push events are evaluated unconditionally: the polling watermark is
/// never consulted and never advanced here.
pub async fn handle_issues_event(
    ctx: &Context,
    event: IssuesEvent,
) -> anyhow::Result<HandledEvent> {
    if event.action != IssuesAction::Opened {
        return Ok(HandledEvent::Skipped("action is not 'opened'"));
    }

    let repo = &event.repository.full_name;
    let issue = &event.issue;
    tracing::info!(
        number = issue.number,
        %repo,
        labels = ?issue.labels.iter().map(|label| &label.name).collect::<Vec<_>>(),
        "new issue opened"
    );

    if issue.labels.is_empty() {
        // A repo-wide wildcard subscription must not fire on every
        // unlabeled issue.
        return Ok(HandledEvent::Skipped("issue has no labels"));
    }

    let subscriptions = ctx.store.subscriptions_for_repo(repo).await?;
    let notified =
        deliver_notifications(ctx.notifier.as_ref(), repo, issue, &subscriptions).await;
    Ok(HandledEvent::Notified(notified))
}

/// Resolves which subscribers to tell about `issue` and DMs each of them.
///
/// A failed delivery is logged and dropped; it never stops the remaining
/// deliveries. Returns the number of successful deliveries.
pub(crate) async fn deliver_notifications(
    notifier: &dyn Notifier,
    repo: &str,
    issue: &Issue,
    subscriptions: &[Subscription],
) -> usize {
    let mut delivered = 0;
    for notification in resolver::resolve(issue, subscriptions) {
        let message = discord::build_issue_message(repo, issue, &notification.matched_label);
        let recipient = &notification.subscription.discord_id;
        match notifier.send_dm(recipient, &message).await {
            Ok(()) => {
                tracing::info!(%recipient, number = issue.number, %repo, "notified subscriber");
                delivered += 1;
            }
            Err(err) => {
                tracing::error!(%recipient, "failed to deliver notification: {err:?}");
            }
        }
    }
    delivered
}

#[cfg(test)]
mod tests {
    use super::{HandledEvent, deliver_notifications, handle_issues_event};
    use crate::github::{IssuesAction, IssuesEvent, Repository};
    use crate::tests::{RecordingNotifier, issue, subscription, test_context};

    fn issues_event(action: IssuesAction, labels: &[&str]) -> IssuesEvent {
        IssuesEvent {
            action,
            issue: issue(1347, "2024-05-01T12:00:00Z", labels),
            repository: Repository {
                full_name: "octocat/Hello-World".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn one_delivery_failure_does_not_stop_the_batch() {
        let notifier = RecordingNotifier::failing_for(&["discord-1"]);
        let subs = vec![
            subscription(1, 1, "octocat/Hello-World", "help.*"),
            subscription(2, 2, "octocat/Hello-World", "help-wanted"),
        ];
        let issue = issue(1, "2024-05-01T12:00:00Z", &["help-wanted"]);

        let delivered =
            deliver_notifications(&notifier, "octocat/Hello-World", &issue, &subs).await;

        assert_eq!(delivered, 1);
        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "discord-2");
    }

    #[tokio::test]
    async fn overlapping_subscribers_each_get_one_message() {
        let (ctx, _fetcher, notifier, store) = test_context();
        store.insert_subscriptions(vec![
            subscription(1, 1, "octocat/Hello-World", "help.*"),
            subscription(2, 2, "octocat/Hello-World", "help-wanted"),
        ]);

        let outcome = handle_issues_event(&ctx, issues_event(IssuesAction::Opened, &["help-wanted"]))
            .await
            .unwrap();

        assert_eq!(outcome, HandledEvent::Notified(2));
        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].0, "discord-1");
        assert_eq!(sent[1].0, "discord-2");
    }

    #[tokio::test]
    async fn non_opened_actions_are_skipped() {
        let (ctx, _fetcher, notifier, store) = test_context();
        store.insert_subscriptions(vec![subscription(1, 1, "octocat/Hello-World", ".*")]);

        let outcome = handle_issues_event(&ctx, issues_event(IssuesAction::Closed, &["bug"]))
            .await
            .unwrap();

        assert_eq!(outcome, HandledEvent::Skipped("action is not 'opened'"));
        assert!(notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn unlabeled_issues_are_skipped() {
        let (ctx, _fetcher, notifier, store) = test_context();
        store.insert_subscriptions(vec![subscription(1, 1, "octocat/Hello-World", ".*")]);

        let outcome = handle_issues_event(&ctx, issues_event(IssuesAction::Opened, &[]))
            .await
            .unwrap();

        assert_eq!(outcome, HandledEvent::Skipped("issue has no labels"));
        assert!(notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn subscriptions_for_other_repositories_do_not_fire() {
        let (ctx, _fetcher, notifier, store) = test_context();
        store.insert_subscriptions(vec![subscription(1, 1, "rust-lang/rust", ".*")]);

        let outcome = handle_issues_event(&ctx, issues_event(IssuesAction::Opened, &["bug"]))
            .await
            .unwrap();

        assert_eq!(outcome, HandledEvent::Notified(0));
        assert!(notifier.sent.lock().unwrap().is_empty());
    }
}
