use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use subrec_core::{ContactField, Subscriber, SubscriberKind};
use subrec_jobs::{ConsentBackfillJob, CreationJob, JobConfig};
use subrec_storage::{MemoryStore, Predicate, RecordStore};
use tempfile::TempDir;

struct Fixture {
    store: Arc<MemoryStore>,
    subscribers: Vec<Subscriber>,
    sms_subscribers: Vec<Subscriber>,
    reports: TempDir,
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2017, 6, 18, 0, 0, 0).single().unwrap()
}

fn phone(n: usize) -> String {
    format!("+48{}", 500_000_000 + n)
}

async fn seeded() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let mut subscribers = Vec::new();
    let mut sms_subscribers = Vec::new();
    for n in 0..10 {
        subscribers.push(
            store
                .insert_subscriber(SubscriberKind::Email, format!("email_{n}@test.pl"), true, now())
                .await,
        );
        sms_subscribers.push(
            store
                .insert_subscriber(SubscriberKind::Sms, phone(n), true, now())
                .await,
        );
    }
    Fixture {
        store,
        subscribers,
        sms_subscribers,
        reports: tempfile::tempdir().expect("tempdir"),
    }
}

impl Fixture {
    fn config(&self) -> JobConfig {
        JobConfig {
            report_dir: self.reports.path().to_path_buf(),
            ..Default::default()
        }
    }

    async fn create_users(&self) {
        CreationJob::new(self.store.clone(), self.config())
            .run()
            .await
            .expect("creation job");
    }

    fn report_lines(&self, kind: SubscriberKind) -> Vec<String> {
        let path = self.reports.path().join(kind.conflict_file_name());
        std::fs::read_to_string(path)
            .expect("conflict report")
            .lines()
            .map(str::to_string)
            .collect()
    }

    async fn users_matching(&self, filter: Predicate) -> usize {
        self.store.users(&filter).await.unwrap().len()
    }
}

#[tokio::test]
async fn migrates_all_subscribers_into_empty_user_table() {
    let fx = seeded().await;

    fx.create_users().await;

    assert_eq!(fx.store.count_users().await.unwrap(), 20);
    assert_eq!(fx.report_lines(SubscriberKind::Email), vec!["ID,EMAIL"]);
    assert_eq!(fx.report_lines(SubscriberKind::Sms), vec!["ID,PHONE"]);
}

#[tokio::test]
async fn existing_user_email_is_not_duplicated() {
    let fx = seeded().await;
    fx.store
        .insert_user(fx.subscribers[0].key.as_str(), phone(900), false, now())
        .await;

    fx.create_users().await;

    assert_eq!(fx.store.count_users().await.unwrap(), 20);
}

#[tokio::test]
async fn existing_user_phone_is_not_duplicated() {
    let fx = seeded().await;
    fx.store
        .insert_user("user_email_0@test.pl", fx.sms_subscribers[0].key.as_str(), false, now())
        .await;

    fx.create_users().await;

    assert_eq!(fx.store.count_users().await.unwrap(), 20);
}

#[tokio::test]
async fn client_data_replaces_subscriber_data_for_email() {
    let fx = seeded().await;
    let client = fx
        .store
        .insert_client(fx.subscribers[0].key.as_str(), phone(700), now())
        .await;

    fx.create_users().await;

    let both = Predicate::eq(ContactField::Email, client.email.as_str())
        .and(Predicate::eq(ContactField::Phone, client.phone.as_str()));
    assert_eq!(fx.users_matching(both).await, 1);
    let consenting = fx
        .store
        .users(&Predicate::All)
        .await
        .unwrap()
        .into_iter()
        .filter(|u| u.gdpr_consent)
        .count();
    assert_eq!(consenting, 19);
}

#[tokio::test]
async fn client_data_replaces_subscriber_data_for_phone() {
    let fx = seeded().await;
    let client = fx
        .store
        .insert_client("client_email_0@test.pl", fx.sms_subscribers[0].key.as_str(), now())
        .await;

    fx.create_users().await;

    let both = Predicate::eq(ContactField::Email, client.email.as_str())
        .and(Predicate::eq(ContactField::Phone, client.phone.as_str()));
    assert_eq!(fx.users_matching(both).await, 1);
}

#[tokio::test]
async fn two_clients_sharing_phone_are_reported_once() {
    let fx = seeded().await;
    let first = &fx.sms_subscribers[0];
    fx.store
        .insert_client("client_email_0@test.pl", first.key.as_str(), now())
        .await;
    fx.store
        .insert_client("client_email_1@test.pl", first.key.as_str(), now())
        .await;

    fx.create_users().await;

    assert_eq!(
        fx.users_matching(Predicate::eq(ContactField::Email, "client_email_0@test.pl"))
            .await,
        0
    );
    assert_eq!(fx.report_lines(SubscriberKind::Email).len(), 1);
    assert_eq!(
        fx.report_lines(SubscriberKind::Sms),
        vec!["ID,PHONE".to_string(), format!("{},{}", first.id, first.key)]
    );
}

#[tokio::test]
async fn user_holding_client_email_blocks_client_user() {
    let fx = seeded().await;
    let client = fx
        .store
        .insert_client(fx.subscribers[0].key.as_str(), phone(700), now())
        .await;
    fx.store
        .insert_user(client.email.as_str(), "", false, now())
        .await;

    fx.create_users().await;

    let both = Predicate::eq(ContactField::Email, client.email.as_str())
        .and(Predicate::eq(ContactField::Phone, client.phone.as_str()));
    assert_eq!(fx.users_matching(both).await, 0);
}

#[tokio::test]
async fn user_holding_client_phone_is_a_conflict_for_email() {
    let fx = seeded().await;
    let first = &fx.subscribers[0];
    let client = fx
        .store
        .insert_client(first.key.as_str(), phone(700), now())
        .await;
    fx.store
        .insert_user("user_email_0@test.pl", client.phone.as_str(), false, now())
        .await;

    fx.create_users().await;

    assert_eq!(
        fx.report_lines(SubscriberKind::Email),
        vec!["ID,EMAIL".to_string(), format!("{},{}", first.id, first.key)]
    );
    assert_eq!(fx.store.count_users().await.unwrap(), 20);
}

#[tokio::test]
async fn user_holding_client_email_is_a_conflict_for_phone() {
    let fx = seeded().await;
    let first = &fx.sms_subscribers[0];
    let client = fx
        .store
        .insert_client("client_email_0@test.pl", first.key.as_str(), now())
        .await;
    fx.store
        .insert_user(client.email.as_str(), phone(800), false, now())
        .await;

    fx.create_users().await;

    assert_eq!(fx.report_lines(SubscriberKind::Sms).len(), 2);
}

#[tokio::test]
async fn user_matching_both_client_fields_is_not_a_conflict() {
    let fx = seeded().await;
    let client = fx
        .store
        .insert_client(fx.subscribers[0].key.as_str(), phone(700), now())
        .await;
    fx.store
        .insert_user("user_email_0@test.pl", client.phone.as_str(), false, now())
        .await;
    fx.store
        .insert_user(client.email.as_str(), phone(701), false, now())
        .await;

    fx.create_users().await;

    assert_eq!(fx.report_lines(SubscriberKind::Email).len(), 1);
    assert_eq!(fx.report_lines(SubscriberKind::Sms).len(), 1);
}

#[tokio::test]
async fn existing_user_with_empty_phone_survives() {
    let fx = seeded().await;
    let first = &fx.subscribers[0];
    fx.store.insert_user(first.key.as_str(), "", false, now()).await;

    fx.create_users().await;

    let exact = Predicate::eq(ContactField::Email, first.key.as_str())
        .and(Predicate::eq(ContactField::Phone, ""));
    assert_eq!(fx.users_matching(exact).await, 1);
}

#[tokio::test]
async fn backfill_after_creation_only_touches_older_users() {
    let fx = seeded().await;
    let month_ago = now() - Duration::days(30);
    let stale = fx
        .store
        .insert_user(fx.subscribers[3].key.as_str(), "", false, month_ago)
        .await;
    let fresh = fx
        .store
        .insert_user(fx.subscribers[4].key.as_str(), "", false, now() + Duration::days(1))
        .await;

    let summary = ConsentBackfillJob::new(fx.store.clone(), fx.config())
        .run()
        .await
        .expect("backfill job");

    assert_eq!(summary.candidates, 2);
    assert_eq!(summary.updated, 1);
    assert!(fx.store.user(stale.id).await.unwrap().gdpr_consent);
    assert!(!fx.store.user(fresh.id).await.unwrap().gdpr_consent);
}
