use std::{borrow::Cow, io};

use thiserror::Error;

pub mod text;
pub mod uri;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("an I/O error occurred")]
    Io {
        error: io::Error,
        context: Cow<'static, str>,
    },
}

pub trait IoErr<Out> {
    fn map_io_err<I: Into<Cow<'static, str>>>(self, f: impl FnOnce() -> I) -> Out;
}

impl<T> IoErr<Result<T>> for std::result::Result<T, io::Error> {
    fn map_io_err<I: Into<Cow<'static, str>>>(self, context: impl FnOnce() -> I) -> Result<T> {
        self.map_err(|error| Error::Io {
            error,
            context: context().into(),
        })
    }
}

#[cfg(feature = "error-stack")]
mod error_stack_compat {
    use error_stack::Report;

    use crate::Error;

    impl Error {
        pub fn into_report<W: core::error::Error + Send + Sync + 'static>(
            self,
            wrapper: W,
        ) -> Report<W> {
            match self {
                Self::Io { error, context } => {
                    Report::new(error).attach(context).change_context(wrapper)
                }
            }
        }
    }
}
