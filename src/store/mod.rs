//! Postgres storage for users, credentials, and sessions.
//!
//! Every multi-statement mutation runs inside a `sqlx` transaction; a
//! transaction dropped on an error path rolls back, so no partial cascade is
//! ever observable. Queries are instrumented with `db.query` spans.

pub mod credentials;
pub mod reset;
pub mod sessions;
pub mod users;

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}
