/// One stage of a pipeline: a program, its arguments, and whether its
/// stderr should follow its stdout into the next stage or output file.
#[derive(Debug, Clone, PartialEq)]
pub struct Stage {
    pub argv: Vec<String>,
    pub dup_stderr_to_stdout: bool,
}

impl Stage {
    pub fn program(&self) -> &str {
        &self.argv[0]
    }
}

/// A parsed pipeline: an ordered list of stages plus pipeline-level
/// redirections and the foreground/background intent.
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub stages: Vec<Stage>,
    /// First stage reads from this file instead of the terminal.
    pub input_file: Option<String>,
    /// Last stage writes to this file instead of the terminal.
    pub output_file: Option<String>,
    /// Open `output_file` for append rather than truncate.
    pub append_output: bool,
    /// Submitted with a trailing `&`.
    pub background: bool,
}

impl Pipeline {
    /// Reconstruct the command line for display in `jobs` output and by `fg`.
    pub fn command_line(&self) -> String {
        let mut out = String::new();
        for (i, stage) in self.stages.iter().enumerate() {
            if i > 0 {
                out.push_str(" | ");
            }
            out.push_str(&stage.argv.join(" "));
        }
        out
    }
}

/// One line of input: a sequence of pipelines separated by `;`.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandLine {
    pub pipelines: Vec<Pipeline>,
}
