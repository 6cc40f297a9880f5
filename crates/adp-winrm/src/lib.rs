//! WS-Management execution layer for the AD provider.
//!
//! * [`transport`]/[`auth`]: authenticated SOAP channel (Basic, NTLM,
//!   Kerberos through SPNEGO) and the WinRS shell lifecycle.
//! * [`pool`]: mutex-guarded queues of command and file sessions.
//! * [`command`]: PowerShell script construction and escaping.
//! * [`runner`]: executes commands and decodes their output.

pub mod auth;
pub mod clixml;
pub mod command;
pub mod kerberos;
pub mod local;
pub mod ntlm;
pub mod pool;
pub mod runner;
pub mod session;
pub mod shell;
pub mod soap;
pub mod spnego;
pub mod ticket;
pub mod transport;

pub use command::{ps_array, ps_bool, quote, secure_string, CommandOptions, PsCommand};
pub use pool::{CommandLease, FileLease, SessionPool};
pub use runner::PsRunner;
pub use session::{CommandSession, FileSession, ShellFactory, WinRmShellFactory};
pub use shell::{CommandResult, Shell};
