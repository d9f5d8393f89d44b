//! Boolean filters over contact columns, evaluable in memory or rendered to SQL.

use chrono::{DateTime, Utc};
use sqlx::{Postgres, QueryBuilder};
use subrec_core::{Contact, ContactField};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    All,
    Eq(ContactField, String),
    In(ContactField, Vec<String>),
    CreatedAfter(DateTime<Utc>),
    Not(Box<Predicate>),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn eq(field: ContactField, value: impl Into<String>) -> Self {
        Predicate::Eq(field, value.into())
    }

    pub fn is_in<I, S>(field: ContactField, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Predicate::In(field, values.into_iter().map(Into::into).collect())
    }

    pub fn created_after(ts: DateTime<Utc>) -> Self {
        Predicate::CreatedAfter(ts)
    }

    pub fn negate(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::And(mut parts) => {
                parts.push(other);
                Predicate::And(parts)
            }
            first => Predicate::And(vec![first, other]),
        }
    }

    pub fn or(self, other: Predicate) -> Self {
        match self {
            Predicate::Or(mut parts) => {
                parts.push(other);
                Predicate::Or(parts)
            }
            first => Predicate::Or(vec![first, other]),
        }
    }

    pub fn matches<C: Contact + ?Sized>(&self, record: &C) -> bool {
        match self {
            Predicate::All => true,
            Predicate::Eq(field, value) => record.contact(*field) == Some(value.as_str()),
            Predicate::In(field, values) => record
                .contact(*field)
                .is_some_and(|v| values.iter().any(|candidate| candidate == v)),
            Predicate::CreatedAfter(ts) => record.created() > *ts,
            Predicate::Not(inner) => !inner.matches(record),
            Predicate::And(parts) => parts.iter().all(|p| p.matches(record)),
            Predicate::Or(parts) => parts.iter().any(|p| p.matches(record)),
        }
    }

    /// Append this predicate as a SQL boolean expression. Values are bound, never
    /// interpolated; an empty `In` renders as `FALSE` through `= ANY('{}')`.
    pub fn push_sql(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        match self {
            Predicate::All => {
                qb.push("TRUE");
            }
            Predicate::Eq(field, value) => {
                qb.push(field.column()).push(" = ").push_bind(value.clone());
            }
            Predicate::In(field, values) => {
                qb.push(field.column())
                    .push(" = ANY(")
                    .push_bind(values.clone())
                    .push(")");
            }
            Predicate::CreatedAfter(ts) => {
                qb.push("created > ").push_bind(*ts);
            }
            Predicate::Not(inner) => {
                qb.push("NOT (");
                inner.push_sql(qb);
                qb.push(")");
            }
            Predicate::And(parts) => push_joined(qb, parts, " AND ", "TRUE"),
            Predicate::Or(parts) => push_joined(qb, parts, " OR ", "FALSE"),
        }
    }
}

fn push_joined(qb: &mut QueryBuilder<'_, Postgres>, parts: &[Predicate], sep: &str, empty: &str) {
    if parts.is_empty() {
        qb.push(empty);
        return;
    }
    qb.push("(");
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            qb.push(sep);
        }
        part.push_sql(qb);
    }
    qb.push(")");
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use subrec_core::User;

    fn user(email: &str, phone: &str, day: u32) -> User {
        User {
            id: 1,
            email: email.into(),
            phone: phone.into(),
            gdpr_consent: false,
            created: Utc.with_ymd_and_hms(2017, 6, day, 0, 0, 0).single().unwrap(),
        }
    }

    #[test]
    fn conflict_shape_matches_other_field_with_different_key() {
        let p = Predicate::eq(ContactField::Phone, "+48500")
            .and(Predicate::eq(ContactField::Email, "c@test.pl").negate());
        assert!(p.matches(&user("someone@test.pl", "+48500", 1)));
        assert!(!p.matches(&user("c@test.pl", "+48500", 1)));
        assert!(!p.matches(&user("someone@test.pl", "+48999", 1)));
    }

    #[test]
    fn membership_and_or() {
        let p = Predicate::is_in(ContactField::Email, ["a@test.pl", "b@test.pl"])
            .or(Predicate::is_in(ContactField::Phone, ["+48700"]));
        assert!(p.matches(&user("b@test.pl", "", 1)));
        assert!(p.matches(&user("x@test.pl", "+48700", 1)));
        assert!(!p.matches(&user("x@test.pl", "+48701", 1)));
        assert!(!Predicate::is_in(ContactField::Email, Vec::<String>::new()).matches(&user("", "", 1)));
    }

    #[test]
    fn created_after_is_strict() {
        let cutoff = Utc.with_ymd_and_hms(2017, 6, 10, 0, 0, 0).single().unwrap();
        let p = Predicate::created_after(cutoff);
        assert!(p.matches(&user("", "", 11)));
        assert!(!p.matches(&user("", "", 10)));
    }

    #[test]
    fn renders_bound_sql() {
        let p = Predicate::eq(ContactField::Phone, "+48500")
            .and(Predicate::eq(ContactField::Email, "c@test.pl").negate());
        let mut qb = QueryBuilder::<Postgres>::new("SELECT 1 FROM users WHERE ");
        p.push_sql(&mut qb);
        assert_eq!(
            qb.sql(),
            "SELECT 1 FROM users WHERE (phone = $1 AND NOT (email = $2))"
        );
    }
}
