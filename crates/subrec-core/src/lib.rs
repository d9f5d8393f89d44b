//! Core record model shared by the reconciliation jobs and the stores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "subrec-core";

/// Default chunk size for bulk writes.
pub const BATCH_SIZE: usize = 100;

/// Contact columns present on users, clients and (one of them) on subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactField {
    Email,
    Phone,
}

impl ContactField {
    pub fn column(self) -> &'static str {
        match self {
            ContactField::Email => "email",
            ContactField::Phone => "phone",
        }
    }

    pub fn other(self) -> Self {
        match self {
            ContactField::Email => ContactField::Phone,
            ContactField::Phone => ContactField::Email,
        }
    }

    /// Column label used in conflict report headers.
    pub fn header(self) -> &'static str {
        match self {
            ContactField::Email => "EMAIL",
            ContactField::Phone => "PHONE",
        }
    }
}

/// Which legacy opt-in table a subscriber came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriberKind {
    Email,
    Sms,
}

impl SubscriberKind {
    pub const ALL: [SubscriberKind; 2] = [SubscriberKind::Email, SubscriberKind::Sms];

    pub fn model_name(self) -> &'static str {
        match self {
            SubscriberKind::Email => "Subscriber",
            SubscriberKind::Sms => "SubscriberSMS",
        }
    }

    pub fn table(self) -> &'static str {
        match self {
            SubscriberKind::Email => "subscriber",
            SubscriberKind::Sms => "subscriber_sms",
        }
    }

    /// The unique column of this legacy table.
    pub fn key_field(self) -> ContactField {
        match self {
            SubscriberKind::Email => ContactField::Email,
            SubscriberKind::Sms => ContactField::Phone,
        }
    }

    /// The contact column this table does not carry.
    pub fn check_field(self) -> ContactField {
        self.key_field().other()
    }

    pub fn conflict_file_name(self) -> String {
        format!("{}_conflicts.csv", self.model_name().to_ascii_lowercase())
    }
}

impl std::fmt::Display for SubscriberKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.model_name())
    }
}

/// Read access to the contact columns and creation time of a record.
///
/// Returns `None` for a column the record type does not have, so a predicate on
/// a missing column never matches.
pub trait Contact {
    fn contact(&self, field: ContactField) -> Option<&str>;
    fn created(&self) -> DateTime<Utc>;
}

/// Legacy opt-in record, keyed by email (`Subscriber`) or phone (`SubscriberSMS`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: i64,
    pub kind: SubscriberKind,
    pub key: String,
    pub gdpr_consent: bool,
    pub created: DateTime<Utc>,
}

impl Contact for Subscriber {
    fn contact(&self, field: ContactField) -> Option<&str> {
        (field == self.kind.key_field()).then_some(self.key.as_str())
    }

    fn created(&self) -> DateTime<Utc> {
        self.created
    }
}

/// Legacy contact record. Email is unique, phone is not and may be empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: i64,
    pub email: String,
    pub phone: String,
    pub created: DateTime<Utc>,
}

impl Client {
    pub fn field(&self, field: ContactField) -> &str {
        match field {
            ContactField::Email => &self.email,
            ContactField::Phone => &self.phone,
        }
    }
}

impl Contact for Client {
    fn contact(&self, field: ContactField) -> Option<&str> {
        Some(self.field(field))
    }

    fn created(&self) -> DateTime<Utc> {
        self.created
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub phone: String,
    pub gdpr_consent: bool,
    pub created: DateTime<Utc>,
}

impl User {
    pub fn field(&self, field: ContactField) -> &str {
        match field {
            ContactField::Email => &self.email,
            ContactField::Phone => &self.phone,
        }
    }
}

impl Contact for User {
    fn contact(&self, field: ContactField) -> Option<&str> {
        Some(self.field(field))
    }

    fn created(&self) -> DateTime<Utc> {
        self.created
    }
}

/// A user row waiting to be inserted; the store assigns id and creation time.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub phone: String,
    pub gdpr_consent: bool,
}

impl NewUser {
    /// User seeded from a subscriber with no matching client. Only the
    /// subscriber's own column is filled; the other stays empty.
    pub fn from_subscriber(subscriber: &Subscriber) -> Self {
        let mut user = NewUser {
            gdpr_consent: subscriber.gdpr_consent,
            ..Default::default()
        };
        match subscriber.kind.key_field() {
            ContactField::Email => user.email = subscriber.key.clone(),
            ContactField::Phone => user.phone = subscriber.key.clone(),
        }
        user
    }

    /// User copied from a client. Consent is left unset.
    pub fn from_client(client: &Client) -> Self {
        NewUser {
            email: client.email.clone(),
            phone: client.phone.clone(),
            gdpr_consent: false,
        }
    }
}

/// Consent value to write back onto an existing user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentUpdate {
    pub user_id: i64,
    pub gdpr_consent: bool,
}
