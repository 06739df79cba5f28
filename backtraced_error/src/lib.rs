use std::backtrace::Backtrace;

pub fn error_chain_to_pretty_formatted<E>(error: &E) -> String
where
    E: std::error::Error,
{
    let mut error: &dyn std::error::Error = error;
    let mut err = format!("{}", error);
    while let Some(inner_err) = error.source() {
        err.push_str(&format!("\nCaused by: \n{}", inner_err));
        error = inner_err;
    }
    err
}

/// Wraps a lower level error with what we were doing when it happened
#[derive(Debug, thiserror::Error)]
#[error("{kind} Context: {context}\n{backtrace}")]
pub struct ContextError<E>
where
    E: std::error::Error + 'static,
{
    #[source]
    pub source: E,
    pub kind: &'static str,
    pub context: String,
    pub backtrace: OptionBacktracePrettyPrinter,
}

impl<E> ContextError<E>
where
    E: std::error::Error + 'static,
{
    fn new<S: Into<String>>(source: E, kind: &'static str, context: S) -> Self {
        Self {
            source,
            kind,
            context: context.into(),
            backtrace: OptionBacktracePrettyPrinter::capture(),
        }
    }
}

pub type SqlxError = ContextError<sqlx::Error>;
pub type SerdeJsonError = ContextError<serde_json::Error>;

impl SqlxError {
    pub fn from_sqlx_error<S: Into<String>>(source: sqlx::Error, context: S) -> Self {
        Self::new(source, "SqlxError", context)
    }
}

impl SerdeJsonError {
    pub fn from_serde_json_error<S: Into<String>>(source: serde_json::Error, context: S) -> Self {
        Self::new(source, "SerdeJsonError", context)
    }
}

#[derive(Debug)]
pub struct OptionBacktracePrettyPrinter(pub Option<Backtrace>);

impl OptionBacktracePrettyPrinter {
    pub fn capture() -> Self {
        Self::from(Backtrace::capture())
    }
}

impl From<Backtrace> for OptionBacktracePrettyPrinter {
    fn from(value: Backtrace) -> Self {
        Self(Some(value))
    }
}
impl std::fmt::Display for OptionBacktracePrettyPrinter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.as_ref() {
            Some(child) => write!(f, "{}", child),
            None => write!(f, "No backtrace"),
        }
    }
}
