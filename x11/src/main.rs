use std::{
    ffi::OsString,
    fs,
    os::unix::ffi::OsStringExt,
    process::ExitCode,
};

use clap::{error::ErrorKind, Parser};
use error_stack::Report;
use log::info;
use thiserror::Error;
use x11rb::{
    errors::{ConnectError, ConnectionError, ReplyError, ReplyOrIdError},
    x11_utils::X11Error,
};
use xclipp_core::{Error, IoErr};

use crate::server::Clipper;

mod server;

const USAGE_ERROR: u8 = 1;
const FILE_ERROR: u8 = 2;
const RUNTIME_ERROR: u8 = 3;

/// Put a string or a file reference on the X11 CLIPBOARD selection and serve
/// it to other clients until another one takes ownership.
#[derive(Parser, Debug)]
#[command(version)]
#[command(max_term_width = 100)]
struct Cli {
    /// Serve FILE's canonical absolute path as a file reference.
    #[arg(short, conflicts_with = "content")]
    file: bool,

    /// Read FILE and serve its contents as text.
    #[arg(short)]
    content: bool,

    /// The string to serve, or the file to reference with -f/-c.
    #[arg(required = true, value_name = "STRING|FILE")]
    value: OsString,
}

#[derive(Error, Debug)]
enum CliError {
    #[error("failed to connect to X server")]
    X11Connect(#[from] ConnectError),
    #[error("X11 request failed")]
    X11Connection(#[from] ConnectionError),
    #[error("{context}")]
    X11Request {
        error: X11Error,
        context: &'static str,
    },
    #[error("failed to create X11 ID")]
    X11IdsExhausted,
}

impl From<ReplyError> for CliError {
    fn from(value: ReplyError) -> Self {
        match value {
            ReplyError::ConnectionError(e) => e.into(),
            ReplyError::X11Error(error) => Self::X11Request {
                error,
                context: "request check failed",
            },
        }
    }
}

impl From<ReplyOrIdError> for CliError {
    fn from(value: ReplyOrIdError) -> Self {
        match value {
            ReplyOrIdError::IdsExhausted => Self::X11IdsExhausted,
            ReplyOrIdError::ConnectionError(e) => e.into(),
            ReplyOrIdError::X11Error(error) => Self::X11Request {
                error,
                context: "failed to allocate a resource id",
            },
        }
    }
}

/// Attaches a human context to a checked request, mirroring
/// [`IoErr::map_io_err`] for the X11 error family.
trait X11Err<T> {
    fn map_x11_err(self, context: &'static str) -> Result<T, CliError>;
}

impl<T> X11Err<T> for Result<T, ReplyError> {
    fn map_x11_err(self, context: &'static str) -> Result<T, CliError> {
        self.map_err(|e| match e {
            ReplyError::ConnectionError(e) => CliError::X11Connection(e),
            ReplyError::X11Error(error) => CliError::X11Request { error, context },
        })
    }
}

fn error_name(error: &X11Error) -> &'static str {
    match error.error_code {
        1 => "BadRequest",
        2 => "BadValue",
        3 => "BadWindow",
        4 => "BadPixmap",
        5 => "BadAtom",
        6 => "BadCursor",
        7 => "BadFont",
        8 => "BadMatch",
        9 => "BadDrawable",
        10 => "BadAccess",
        11 => "BadAlloc",
        12 => "BadColormap",
        13 => "BadGContext",
        14 => "BadIdChoice",
        15 => "BadName",
        16 => "BadLength",
        17 => "BadImplementation",
        _ => "<unknown error>",
    }
}

#[derive(Error, Debug)]
enum Wrapper {
    #[error("{0}")]
    W(String),
}

fn into_report(cli_err: CliError) -> Report<Wrapper> {
    let wrapper = Wrapper::W(cli_err.to_string());
    match cli_err {
        CliError::X11Connect(e) => Report::new(e).change_context(wrapper),
        CliError::X11Connection(e) => Report::new(e).change_context(wrapper),
        CliError::X11Request { error, context: _ } => Report::new(wrapper)
            .attach_printable(format!("{}: {error:?}", error_name(&error))),
        CliError::X11IdsExhausted => Report::new(wrapper),
    }
}

fn main() -> ExitCode {
    #[cfg(not(debug_assertions))]
    error_stack::Report::install_debug_hook::<std::panic::Location>(|_, _| {});

    if cfg!(debug_assertions) {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    } else {
        env_logger::init();
    }

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(USAGE_ERROR),
            };
        }
    };

    info!("Starting xclipp v{}.", env!("CARGO_PKG_VERSION"));

    let is_file = cli.file;
    let payload = match load_payload(cli) {
        Ok(payload) => payload,
        Err(e) => {
            let wrapper = Wrapper::W(e.to_string());
            eprintln!("Error: {:?}", e.into_report(wrapper));
            return ExitCode::from(FILE_ERROR);
        }
    };

    match Clipper::new(payload, is_file).and_then(Clipper::run) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:?}", into_report(e));
            ExitCode::from(RUNTIME_ERROR)
        }
    }
}

fn load_payload(cli: Cli) -> Result<Box<[u8]>, Error> {
    let Cli {
        file,
        content,
        value,
    } = cli;
    Ok(if content {
        fs::read(&value)
            .map_io_err(|| format!("Failed to read file: {value:?}"))?
            .into_boxed_slice()
    } else if file {
        fs::canonicalize(&value)
            .map_io_err(|| format!("Failed to resolve path: {value:?}"))?
            .into_os_string()
            .into_vec()
            .into_boxed_slice()
    } else {
        value.into_vec().into_boxed_slice()
    })
}
