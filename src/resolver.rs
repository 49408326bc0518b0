//! Decides who gets told about one new issue.

use std::collections::HashSet;

use crate::db::Subscription;
use crate::github::Issue;
use crate::matcher;

/// One pending delivery: a subscription that matched and the label it
/// matched on.
///
/// When several of an issue's labels qualify, only the first in label order
/// is reported as the match reason.
#[derive(Debug)]
pub struct Notification<'a> {
    pub subscription: &'a Subscription,
    pub matched_label: String,
}

/// Resolves `issue` against candidate subscriptions into the minimal set of
/// deliveries.
///
/// Candidates must already be scoped to the issue's repository and arrive
/// in store order (ascending id); the first matching subscription of a
/// subscriber wins and any further matches for the same subscriber are
/// dropped. Pure and deterministic: the same inputs yield the same output
/// sequence.
pub fn resolve<'a>(issue: &Issue, subscriptions: &'a [Subscription]) -> Vec<Notification<'a>> {
    let mut notified: HashSet<i64> = HashSet::new();
    let mut notifications = Vec::new();
    for subscription in subscriptions {
        let Some(matched) = matcher::match_label(&subscription.label_pattern, &issue.labels)
        else {
            continue;
        };
        if !notified.insert(subscription.subscriber_id) {
            // A different subscription of the same subscriber already
            // matched this issue.
            continue;
        }
        notifications.push(Notification {
            subscription,
            matched_label: matched.to_string(),
        });
    }
    notifications
}
