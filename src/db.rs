//! Subscription storage.
//!
//! The engine reads subscriber and subscription records and advances
//! polling watermarks. Creating and deleting records belongs to the
//! subscription CRUD surface, which shares the same tables and enforces
//! pattern validity and the (subscriber, repository, pattern) uniqueness
//! constraint at write time.

pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;

/// A user able to receive notifications.
///
/// Only subscribers holding a GitHub token participate in the polling path,
/// and [`SubscriptionStore::subscribers_with_tokens`] is the only way the
/// engine sees one, so the credential is not optional here.
#[derive(Clone, Debug)]
pub struct Subscriber {
    pub id: i64,
    pub username: String,
    /// Discord user id, the DM destination.
    pub discord_id: String,
    pub github_token: SecretString,
}

/// One (subscriber, repository, label pattern) triple.
#[derive(Clone, Debug)]
pub struct Subscription {
    pub id: i64,
    pub subscriber_id: i64,
    /// The owning subscriber's DM destination, joined in so the webhook
    /// path can deliver without a second lookup.
    pub discord_id: String,
    /// Example: `octocat/Hello-World`
    pub repo_full_name: String,
    /// Regular expression matched case-insensitively against whole label
    /// names, e.g. `good.first.issue` or `help.*`.
    pub label_pattern: String,
    /// Issues created at or before this instant have already been seen by
    /// the polling path. Unset until the first successful poll. Advanced
    /// only by the poll scheduler; the webhook path never touches it.
    pub last_checked_at: Option<DateTime<Utc>>,
}

/// Read/write access to subscriber and subscription records.
///
/// Listings are ordered by ascending id (insertion order). Dedup and match
/// reporting depend on a stable candidate order, so implementations must
/// not reorder.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Subscribers that can poll GitHub on their own credential. Subscribers
    /// without a token are not returned at all.
    async fn subscribers_with_tokens(&self) -> anyhow::Result<Vec<Subscriber>>;

    /// Every subscription for `repo_full_name`, across all subscribers.
    async fn subscriptions_for_repo(
        &self,
        repo_full_name: &str,
    ) -> anyhow::Result<Vec<Subscription>>;

    /// Every subscription owned by one subscriber.
    async fn subscriptions_for_subscriber(
        &self,
        subscriber_id: i64,
    ) -> anyhow::Result<Vec<Subscription>>;

    /// Move `last_checked_at` for every listed subscription to `to`, as a
    /// single atomic write.
    async fn advance_watermarks(
        &self,
        subscription_ids: &[i64],
        to: DateTime<Utc>,
    ) -> anyhow::Result<()>;
}
