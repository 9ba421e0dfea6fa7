//! The value-or-error result cell that travels through a promise chain.
//!
//! An [`Expect`] holds exactly one of a value or an [`ErrorToken`]. Errors are
//! type-erased so that arbitrary user error types can cross an asynchronous
//! boundary and still be matched by concrete type downstream (see
//! [`Promise::fail`](crate::Promise::fail)).

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Marker payload for a panic whose payload was not a `String` or `&str`.
///
/// Panic payloads are `Box<dyn Any + Send>` without `Sync`, so payload types
/// we cannot prove shareable are replaced by this marker. The panic message,
/// when one exists, is always preserved on the token itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Panicked;

impl fmt::Display for Panicked {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("continuation panicked")
    }
}

impl std::error::Error for Panicked {}

/// A cheaply clonable, type-erased error.
///
/// Captures the concrete error value behind `Arc<dyn Any>` together with its
/// display message. Typed recovery ([`Promise::fail`](crate::Promise::fail))
/// uses [`ErrorToken::is`] / [`ErrorToken::downcast_ref`] to match on the
/// original concrete type; everything else treats the token opaquely.
#[derive(Clone)]
pub struct ErrorToken {
    payload: Arc<dyn Any + Send + Sync>,
    message: Arc<str>,
}

impl ErrorToken {
    /// Captures `err` with its display message.
    pub fn new<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        let message = err.to_string();
        Self {
            payload: Arc::new(err),
            message: message.into(),
        }
    }

    /// Captures a panic payload, as produced by `std::panic::catch_unwind`.
    ///
    /// `String` and `&str` payloads keep their message and stay matchable by
    /// those types; anything else degrades to a [`Panicked`] marker payload.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        match payload.downcast::<String>() {
            Ok(message) => {
                let message: Arc<str> = message.as_str().into();
                Self {
                    payload: Arc::new(Panicked),
                    message,
                }
            }
            Err(payload) => match payload.downcast::<&'static str>() {
                Ok(message) => Self {
                    payload: Arc::new(Panicked),
                    message: (*message).into(),
                },
                Err(_) => Self {
                    payload: Arc::new(Panicked),
                    message: Panicked.to_string().into(),
                },
            },
        }
    }

    /// Whether the captured error is of concrete type `E`.
    pub fn is<E: Any>(&self) -> bool {
        self.payload.is::<E>()
    }

    /// Borrows the captured error as `E`, if that is its concrete type.
    pub fn downcast_ref<E: Any>(&self) -> Option<&E> {
        self.payload.downcast_ref::<E>()
    }

    /// The display message captured when the error was raised.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ErrorToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl fmt::Debug for ErrorToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ErrorToken").field(&self.message).finish()
    }
}

impl std::error::Error for ErrorToken {}

/// A resolved outcome: either a value or a captured error, never both.
///
/// Immutable once constructed. [`Promise::reflect`](crate::Promise::reflect)
/// delivers one of these as a plain value so that success and failure can be
/// inspected uniformly, e.g. when fanning in over independently-failable
/// operations.
#[derive(Debug, Clone)]
pub enum Expect<T> {
    /// Resolved with a value.
    Value(T),
    /// Resolved with an error.
    Error(ErrorToken),
}

impl<T> Expect<T> {
    /// Wraps a value.
    pub fn value(value: T) -> Self {
        Expect::Value(value)
    }

    /// Wraps a captured error.
    pub fn error(token: ErrorToken) -> Self {
        Expect::Error(token)
    }

    /// `true` when this outcome carries a value.
    pub fn has_value(&self) -> bool {
        matches!(self, Expect::Value(_))
    }

    /// `true` when this outcome carries an error.
    pub fn has_error(&self) -> bool {
        matches!(self, Expect::Error(_))
    }

    /// Unwraps into a `Result`, surfacing the captured error.
    pub fn get(self) -> Result<T, ErrorToken> {
        match self {
            Expect::Value(value) => Ok(value),
            Expect::Error(token) => Err(token),
        }
    }

    /// Borrows the value, if present.
    pub fn value_ref(&self) -> Option<&T> {
        match self {
            Expect::Value(value) => Some(value),
            Expect::Error(_) => None,
        }
    }

    /// Borrows the error token, if present.
    pub fn error_ref(&self) -> Option<&ErrorToken> {
        match self {
            Expect::Value(_) => None,
            Expect::Error(token) => Some(token),
        }
    }
}

impl<T> From<Result<T, ErrorToken>> for Expect<T> {
    fn from(result: Result<T, ErrorToken>) -> Self {
        match result {
            Ok(value) => Expect::Value(value),
            Err(token) => Expect::Error(token),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use thiserror::Error;

    #[derive(Debug, Error)]
    #[error("thing not found")]
    struct NotFound;

    #[test]
    fn token_matches_concrete_type() {
        let token = ErrorToken::new(NotFound);
        assert!(token.is::<NotFound>());
        assert!(!token.is::<std::io::Error>());
        assert!(token.downcast_ref::<NotFound>().is_some());
        assert_eq!(token.message(), "thing not found");
    }

    #[test]
    fn token_from_string_panic_keeps_message() {
        let token = ErrorToken::from_panic(Box::new(String::from("boom")));
        assert_eq!(token.message(), "boom");
        assert!(token.is::<Panicked>());
    }

    #[test]
    fn token_from_str_panic_keeps_message() {
        let token = ErrorToken::from_panic(Box::new("kaboom"));
        assert_eq!(token.message(), "kaboom");
    }

    #[test]
    fn expect_holds_exactly_one_case() {
        let ok = Expect::value(7);
        assert!(ok.has_value());
        assert!(!ok.has_error());
        assert_eq!(ok.get().unwrap(), 7);

        let bad: Expect<i32> = Expect::error(ErrorToken::new(NotFound));
        assert!(bad.has_error());
        assert!(bad.get().unwrap_err().is::<NotFound>());
    }
}
