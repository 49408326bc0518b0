use anyhow::{Context as _, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::SecretString;
use tokio_postgres::{Client, Row};

use crate::db::{Subscriber, Subscription, SubscriptionStore};

pub async fn make_client(db_url: &str) -> Result<Client> {
    let (client, connection) = tokio_postgres::connect(db_url, tokio_postgres::NoTls)
        .await
        .context("failed to connect to the database")?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            eprintln!("database connection error: {e}");
        }
    });
    Ok(client)
}

static MIGRATIONS: &[&str] = &[
    "
CREATE TABLE users (
    id BIGSERIAL PRIMARY KEY,
    discord_id TEXT NOT NULL UNIQUE,
    username TEXT NOT NULL,
    github_username TEXT,
    github_token TEXT,
    created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT now()
);
",
    "
CREATE TABLE subscriptions (
    id BIGSERIAL PRIMARY KEY,
    user_id BIGINT NOT NULL REFERENCES users (id) ON DELETE CASCADE,
    repo_full_name TEXT NOT NULL,
    label_pattern TEXT NOT NULL,
    last_checked_at TIMESTAMP WITH TIME ZONE,
    created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT now(),
    UNIQUE (user_id, repo_full_name, label_pattern)
);
",
    "CREATE INDEX subscriptions_repo_idx ON subscriptions (repo_full_name);",
];

pub async fn run_migrations(client: &Client) -> Result<()> {
    client
        .batch_execute(
            "CREATE TABLE IF NOT EXISTS database_versions (
                zero INTEGER PRIMARY KEY,
                migration_counter INTEGER
            );",
        )
        .await
        .context("creating database versioning table")?;
    client
        .execute(
            "INSERT INTO database_versions (zero, migration_counter)
                VALUES (0, 0)
                ON CONFLICT DO NOTHING",
            &[],
        )
        .await
        .context("inserting initial database_versions")?;

    let migration_idx: i32 = client
        .query_one("SELECT migration_counter FROM database_versions", &[])
        .await
        .context("getting migration counter")?
        .get(0);
    let migration_idx = migration_idx as usize;

    for (idx, migration) in MIGRATIONS.iter().enumerate().skip(migration_idx) {
        client
            .batch_execute(migration)
            .await
            .with_context(|| format!("executing migration {idx}"))?;
        client
            .execute(
                "UPDATE database_versions SET migration_counter = $1",
                &[&(idx as i32 + 1)],
            )
            .await
            .with_context(|| format!("updating migration counter to {}", idx + 1))?;
    }

    Ok(())
}

pub struct Postgres {
    client: Client,
}

impl Postgres {
    pub fn new(client: Client) -> Self {
        Postgres { client }
    }
}

fn subscription_from_row(row: &Row) -> Subscription {
    Subscription {
        id: row.get("id"),
        subscriber_id: row.get("user_id"),
        discord_id: row.get("discord_id"),
        repo_full_name: row.get("repo_full_name"),
        label_pattern: row.get("label_pattern"),
        last_checked_at: row.get("last_checked_at"),
    }
}

#[async_trait]
impl SubscriptionStore for Postgres {
    async fn subscribers_with_tokens(&self) -> Result<Vec<Subscriber>> {
        let rows = self
            .client
            .query(
                "SELECT id, username, discord_id, github_token
                    FROM users
                    WHERE github_token IS NOT NULL
                    ORDER BY id",
                &[],
            )
            .await
            .context("listing subscribers with GitHub tokens")?;
        Ok(rows
            .into_iter()
            .map(|row| Subscriber {
                id: row.get("id"),
                username: row.get("username"),
                discord_id: row.get("discord_id"),
                github_token: SecretString::from(row.get::<_, String>("github_token")),
            })
            .collect())
    }

    async fn subscriptions_for_repo(&self, repo_full_name: &str) -> Result<Vec<Subscription>> {
        let rows = self
            .client
            .query(
                "SELECT s.id, s.user_id, u.discord_id, s.repo_full_name,
                        s.label_pattern, s.last_checked_at
                    FROM subscriptions s
                    JOIN users u ON u.id = s.user_id
                    WHERE s.repo_full_name = $1
                    ORDER BY s.id",
                &[&repo_full_name],
            )
            .await
            .with_context(|| format!("listing subscriptions for {repo_full_name}"))?;
        Ok(rows.iter().map(subscription_from_row).collect())
    }

    async fn subscriptions_for_subscriber(
        &self,
        subscriber_id: i64,
    ) -> Result<Vec<Subscription>> {
        let rows = self
            .client
            .query(
                "SELECT s.id, s.user_id, u.discord_id, s.repo_full_name,
                        s.label_pattern, s.last_checked_at
                    FROM subscriptions s
                    JOIN users u ON u.id = s.user_id
                    WHERE s.user_id = $1
                    ORDER BY s.id",
                &[&subscriber_id],
            )
            .await
            .with_context(|| format!("listing subscriptions of subscriber {subscriber_id}"))?;
        Ok(rows.iter().map(subscription_from_row).collect())
    }

    async fn advance_watermarks(
        &self,
        subscription_ids: &[i64],
        to: DateTime<Utc>,
    ) -> Result<()> {
        self.client
            .execute(
                "UPDATE subscriptions SET last_checked_at = $2 WHERE id = ANY($1)",
                &[&subscription_ids, &to],
            )
            .await
            .context("advancing subscription watermarks")?;
        Ok(())
    }
}
