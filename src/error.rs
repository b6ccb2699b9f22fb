pub use anyhow::Result;

use std::error::Error as StdError;
use std::fmt::{self, Display, Formatter};

/// Failure raised while encoding or solving. Everything that can go wrong
/// inside a `check` call funnels through this type before the orchestrator
/// folds it into an `ERR` verdict.
#[derive(Debug, Clone)]
pub struct Error {
    pub reason: Reason,
    pub help: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Reason {
    Simple(String),
    NotFound {
        name: String,
        namespace: String,
    },
    Ambiguous {
        name: String,
    },
    /// SQL construct or constraint the encoder does not model.
    Unsupported {
        feature: String,
    },
    /// The solver process replied `error`/`unsupported` or went away.
    Solver {
        message: String,
    },
    Internal {
        message: String,
    },
}

impl Error {
    pub fn new(reason: Reason) -> Self {
        Error { reason, help: None }
    }

    pub fn simple<S: Into<String>>(message: S) -> Self {
        Error::new(Reason::Simple(message.into()))
    }

    pub fn not_found<S: Into<String>>(name: S, namespace: &str) -> Self {
        Error::new(Reason::NotFound {
            name: name.into(),
            namespace: namespace.to_string(),
        })
    }

    pub fn ambiguous<S: Into<String>>(name: S) -> Self {
        Error::new(Reason::Ambiguous { name: name.into() })
    }

    pub fn unsupported<S: Into<String>>(feature: S) -> Self {
        Error::new(Reason::Unsupported {
            feature: feature.into(),
        })
    }

    pub fn solver<S: Into<String>>(message: S) -> Self {
        Error::new(Reason::Solver {
            message: message.into(),
        })
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Error::new(Reason::Internal {
            message: message.into(),
        })
    }

    pub fn with_help<S: Into<String>>(mut self, help: S) -> Self {
        self.help = Some(help.into());
        self
    }

    pub fn is_solver(&self) -> bool {
        matches!(self.reason, Reason::Solver { .. })
    }
}

impl Reason {
    pub fn message(&self) -> String {
        match self {
            Reason::Simple(text) => text.clone(),
            Reason::NotFound { name, namespace } => format!("{namespace} `{name}` not found"),
            Reason::Ambiguous { name } => format!("name `{name}` is ambiguous"),
            Reason::Unsupported { feature } => format!("unsupported: {feature}"),
            Reason::Solver { message } => format!("solver: {message}"),
            Reason::Internal { message } => format!("internal: {message}"),
        }
    }
}

// Needed for anyhow
impl StdError for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason.message())?;
        if let Some(help) = &self.help {
            write!(f, " ({help})")?;
        }
        Ok(())
    }
}

/// Extracts a user-facing message from whatever error bubbled out of an
/// encoding or search pass.
pub fn downcast(error: anyhow::Error) -> String {
    match error.downcast::<Error>() {
        Ok(error) => error.to_string(),
        Err(error) => format!("{error:#}"),
    }
}
