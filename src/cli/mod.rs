// Command-line front end
//
// Line-oriented prompt on stdin, a terminal approval gate and fragment
// printing. Everything else lives in the library modules.

pub mod approval;
pub mod commands;
pub mod input;
pub mod output;
pub mod repl;

pub use approval::TerminalApproval;
pub use commands::{handle_command, Command};
pub use input::LineInput;
pub use repl::Repl;
