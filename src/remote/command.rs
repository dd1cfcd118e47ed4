use std::fmt;

use crate::time::TimeRange;

/// File name of the extraction program once unpacked in the data directory.
pub const EXTRACTOR_NAME: &str = "blockdump";

/// The commands the orchestrator runs in a target container. Each reduces
/// to an argument vector only at the transport boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCommand {
    /// Asks an installed extractor for its version.
    Probe { extractor: String },
    /// Unpacks a gzipped tar read from stdin into `data_dir`.
    Upload { data_dir: String },
    Extract {
        extractor: String,
        data_dir: String,
        window: TimeRange,
        debug: bool,
    },
    Meta {
        extractor: String,
        data_dir: String,
        debug: bool,
    },
    /// Removes the extractor. Safe to repeat.
    Cleanup { extractor: String },
    /// Empties `data_dir` ahead of a restore.
    ClearData { data_dir: String },
}

impl RemoteCommand {
    pub fn name(&self) -> &'static str {
        match self {
            RemoteCommand::Probe { .. } => "probe",
            RemoteCommand::Upload { .. } => "upload",
            RemoteCommand::Extract { .. } => "extract",
            RemoteCommand::Meta { .. } => "meta",
            RemoteCommand::Cleanup { .. } => "cleanup",
            RemoteCommand::ClearData { .. } => "clear-data",
        }
    }

    pub fn argv(&self) -> Vec<String> {
        match self {
            RemoteCommand::Probe { extractor } => vec![extractor.clone(), "--version".to_string()],
            RemoteCommand::Upload { data_dir } => strings(&["tar", "-C", data_dir.as_str(), "-xzf", "-"]),
            RemoteCommand::Extract {
                extractor,
                data_dir,
                window,
                debug,
            } => {
                let mut argv = vec![
                    extractor.clone(),
                    "--min-time".to_string(),
                    window.start().as_nanos().to_string(),
                    "--max-time".to_string(),
                    window.end().as_nanos().to_string(),
                    "--data-dir".to_string(),
                    data_dir.clone(),
                ];
                if *debug {
                    argv.push("--debug".to_string());
                }
                argv
            }
            RemoteCommand::Meta {
                extractor,
                data_dir,
                debug,
            } => {
                let mut argv = strings(&[extractor.as_str(), "--meta", "--data-dir", data_dir.as_str()]);
                if *debug {
                    argv.push("--debug".to_string());
                }
                argv
            }
            RemoteCommand::Cleanup { extractor } => strings(&["rm", "-f", extractor.as_str()]),
            RemoteCommand::ClearData { data_dir } => {
                vec![
                    "sh".to_string(),
                    "-c".to_string(),
                    format!("rm -rf {}/*", shell_quote(data_dir.trim_end_matches('/'))),
                ]
            }
        }
    }
}

impl fmt::Display for RemoteCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.argv().join(" "))
    }
}

/// Path of the extractor inside `data_dir`. Remote paths are always POSIX.
pub fn extractor_path(data_dir: &str) -> String {
    format!("{}/{}", data_dir.trim_end_matches('/'), EXTRACTOR_NAME)
}

fn strings(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| part.to_string()).collect()
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
