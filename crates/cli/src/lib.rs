//! # gerrit-cl library
//!
//! Configuration, logging and output helpers shared by the `gerrit-cl` binary.

pub mod config;
pub mod logging;
pub mod render;

pub use config::GerritConfig;
pub use render::{EventPrinter, OutputFormat};

/// Render an error chain the way it is shown to the user:
/// `fatal: <message>` followed by one `caused by: <cause>` line per source.
pub fn fatal_message(err: &anyhow::Error) -> String {
    let mut message = format!("fatal: {err}");
    for cause in err.chain().skip(1) {
        message.push_str("\ncaused by: ");
        message.push_str(&cause.to_string());
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn fatal_message_lists_causes() {
        let err = Err::<(), _>(std::io::Error::other("connection reset"))
            .context("event stream failure")
            .unwrap_err();

        assert_eq!(
            fatal_message(&err),
            "fatal: event stream failure\ncaused by: connection reset"
        );
    }

    #[test]
    fn fatal_message_without_cause() {
        let err = anyhow::anyhow!("gerrit.host not set");
        assert_eq!(fatal_message(&err), "fatal: gerrit.host not set");
    }
}
