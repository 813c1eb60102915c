use crate::ast::{CommandLine, Pipeline, Stage};

/// A lexed token: either a word or one of the pipeline operators.
#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    /// `|`
    Pipe,
    /// `|&` — stderr of the left stage follows stdout into the pipe.
    PipeAmp,
    /// `<`
    RedirIn,
    /// `>`
    RedirOut,
    /// `>>`
    RedirAppend,
    /// `>&` — like `>`, with the last stage's stderr duplicated onto it.
    RedirOutAmp,
    /// `>>&`
    RedirAppendAmp,
    /// trailing `&`
    Amp,
    /// `;`
    Semi,
}

/// States for the tokenizer state machine.
enum State {
    /// Between tokens — whitespace is skipped
    Normal,
    /// Building an unquoted word — whitespace or an operator ends it
    InWord,
    /// Inside double quotes — whitespace and operators are literal
    InDoubleQuote,
    /// Inside single quotes — everything is literal
    InSingleQuote,
}

/// Tokenize a line into words and operators. Quoted text never becomes an
/// operator, so `echo "a | b"` stays a single stage.
fn tokenize(input: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut state = State::Normal;
    let mut chars = input.chars().peekable();

    let flush = |current: &mut String, tokens: &mut Vec<Token>| {
        if !current.is_empty() {
            tokens.push(Token::Word(std::mem::take(current)));
        }
    };

    while let Some(ch) = chars.next() {
        match (&state, ch) {
            (State::Normal | State::InWord, ' ' | '\t') => {
                flush(&mut current, &mut tokens);
                state = State::Normal;
            }
            (State::Normal | State::InWord, '"') => state = State::InDoubleQuote,
            (State::Normal | State::InWord, '\'') => state = State::InSingleQuote,
            (State::Normal | State::InWord, '|') => {
                flush(&mut current, &mut tokens);
                if chars.peek() == Some(&'&') {
                    chars.next();
                    tokens.push(Token::PipeAmp);
                } else {
                    tokens.push(Token::Pipe);
                }
                state = State::Normal;
            }
            (State::Normal | State::InWord, '<') => {
                flush(&mut current, &mut tokens);
                tokens.push(Token::RedirIn);
                state = State::Normal;
            }
            (State::Normal | State::InWord, '>') => {
                flush(&mut current, &mut tokens);
                let append = chars.peek() == Some(&'>');
                if append {
                    chars.next();
                }
                let dup = chars.peek() == Some(&'&');
                if dup {
                    chars.next();
                }
                tokens.push(match (append, dup) {
                    (false, false) => Token::RedirOut,
                    (true, false) => Token::RedirAppend,
                    (false, true) => Token::RedirOutAmp,
                    (true, true) => Token::RedirAppendAmp,
                });
                state = State::Normal;
            }
            (State::Normal | State::InWord, '&') => {
                flush(&mut current, &mut tokens);
                tokens.push(Token::Amp);
                state = State::Normal;
            }
            (State::Normal | State::InWord, ';') => {
                flush(&mut current, &mut tokens);
                tokens.push(Token::Semi);
                state = State::Normal;
            }
            (State::Normal | State::InWord, c) => {
                current.push(c);
                state = State::InWord;
            }
            (State::InDoubleQuote, '"') => state = State::InWord,
            (State::InDoubleQuote, c) => current.push(c),
            (State::InSingleQuote, '\'') => state = State::InWord,
            (State::InSingleQuote, c) => current.push(c),
        }
    }

    flush(&mut current, &mut tokens);
    tokens
}

/// Incrementally built pipeline state used while parsing one `;` segment.
struct PipelineBuilder {
    stages: Vec<Stage>,
    argv: Vec<String>,
    input_file: Option<String>,
    output_file: Option<String>,
    append_output: bool,
    /// A `>&`/`>>&` was seen; applies to the last stage once known.
    dup_stderr_on_last: bool,
    background: bool,
}

impl PipelineBuilder {
    fn new() -> Self {
        Self {
            stages: Vec::new(),
            argv: Vec::new(),
            input_file: None,
            output_file: None,
            append_output: false,
            dup_stderr_on_last: false,
            background: false,
        }
    }

    fn is_empty(&self) -> bool {
        self.stages.is_empty() && self.argv.is_empty()
    }

    fn finish_stage(&mut self, dup_stderr: bool, near: &str) -> Result<(), String> {
        if self.argv.is_empty() {
            return Err(format!("conch: syntax error near '{near}'"));
        }
        self.stages.push(Stage {
            argv: std::mem::take(&mut self.argv),
            dup_stderr_to_stdout: dup_stderr,
        });
        Ok(())
    }

    fn finish(mut self) -> Result<Pipeline, String> {
        let dup = self.dup_stderr_on_last;
        self.finish_stage(dup, "newline")?;
        Ok(Pipeline {
            stages: self.stages,
            input_file: self.input_file,
            output_file: self.output_file,
            append_output: self.append_output,
            background: self.background,
        })
    }
}

/// Parse one line of input into pipelines.
///
/// Grammar (no expansion, no `&&`/`||`, per the shell's scope):
/// `line := pipeline (';' pipeline)* [';']`
/// `pipeline := stage (('|' | '|&') stage)* [redirections] ['&']`
pub fn parse_line(input: &str) -> Result<CommandLine, String> {
    let tokens = tokenize(input);
    let mut pipelines = Vec::new();
    let mut builder = PipelineBuilder::new();
    let mut i = 0;

    let expect_word = |tokens: &[Token], i: usize, op: &str| -> Result<String, String> {
        match tokens.get(i) {
            Some(Token::Word(w)) => Ok(w.clone()),
            _ => Err(format!("conch: syntax error: expected filename after '{op}'")),
        }
    };

    while i < tokens.len() {
        match &tokens[i] {
            Token::Word(w) => {
                if builder.background {
                    return Err("conch: syntax error near '&'".to_string());
                }
                builder.argv.push(w.clone());
            }
            Token::Pipe => builder.finish_stage(false, "|")?,
            Token::PipeAmp => builder.finish_stage(true, "|&")?,
            Token::RedirIn => {
                i += 1;
                let path = expect_word(&tokens, i, "<")?;
                if builder.input_file.replace(path).is_some() {
                    return Err("conch: duplicate input redirection".to_string());
                }
            }
            Token::RedirOut | Token::RedirAppend | Token::RedirOutAmp | Token::RedirAppendAmp => {
                let op = match &tokens[i] {
                    Token::RedirAppend => ">>",
                    Token::RedirOutAmp => ">&",
                    Token::RedirAppendAmp => ">>&",
                    _ => ">",
                };
                builder.append_output =
                    matches!(&tokens[i], Token::RedirAppend | Token::RedirAppendAmp);
                builder.dup_stderr_on_last |=
                    matches!(&tokens[i], Token::RedirOutAmp | Token::RedirAppendAmp);
                i += 1;
                let path = expect_word(&tokens, i, op)?;
                if builder.output_file.replace(path).is_some() {
                    return Err("conch: duplicate output redirection".to_string());
                }
            }
            Token::Amp => {
                if builder.is_empty() || builder.background {
                    return Err("conch: syntax error near '&'".to_string());
                }
                builder.background = true;
            }
            Token::Semi => {
                if !builder.is_empty() {
                    pipelines.push(std::mem::replace(&mut builder, PipelineBuilder::new()).finish()?);
                }
            }
        }
        i += 1;
    }

    if !builder.is_empty() {
        pipelines.push(builder.finish()?);
    }

    Ok(CommandLine { pipelines })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one(input: &str) -> Pipeline {
        let line = parse_line(input).unwrap();
        assert_eq!(line.pipelines.len(), 1, "expected one pipeline in {input:?}");
        line.pipelines.into_iter().next().unwrap()
    }

    #[test]
    fn simple_command() {
        let p = one("echo hello world");
        assert_eq!(p.stages.len(), 1);
        assert_eq!(p.stages[0].argv, vec!["echo", "hello", "world"]);
        assert!(!p.background);
    }

    #[test]
    fn empty_input_parses_to_nothing() {
        assert!(parse_line("").unwrap().pipelines.is_empty());
        assert!(parse_line("   ").unwrap().pipelines.is_empty());
    }

    #[test]
    fn pipeline_stages_in_order() {
        let p = one("cat f | grep x | wc -l");
        let programs: Vec<&str> = p.stages.iter().map(|s| s.program()).collect();
        assert_eq!(programs, vec!["cat", "grep", "wc"]);
    }

    #[test]
    fn background_flag() {
        let p = one("sleep 100 &");
        assert!(p.background);
        assert_eq!(p.stages[0].argv, vec!["sleep", "100"]);
    }

    #[test]
    fn ampersand_must_be_last() {
        assert!(parse_line("sleep & 100").is_err());
        assert!(parse_line("& ls").is_err());
    }

    #[test]
    fn input_and_output_redirection() {
        let p = one("sort < data.txt > out.txt");
        assert_eq!(p.input_file.as_deref(), Some("data.txt"));
        assert_eq!(p.output_file.as_deref(), Some("out.txt"));
        assert!(!p.append_output);
    }

    #[test]
    fn append_redirection() {
        let p = one("echo hi >> log.txt");
        assert_eq!(p.output_file.as_deref(), Some("log.txt"));
        assert!(p.append_output);
    }

    #[test]
    fn stderr_follows_stdout_into_file() {
        let p = one("make >& build.log");
        assert!(p.stages[0].dup_stderr_to_stdout);
        assert_eq!(p.output_file.as_deref(), Some("build.log"));
    }

    #[test]
    fn stderr_follows_stdout_into_pipe() {
        let p = one("make |& tee build.log");
        assert!(p.stages[0].dup_stderr_to_stdout);
        assert!(!p.stages[1].dup_stderr_to_stdout);
    }

    #[test]
    fn missing_filename_is_error() {
        assert!(parse_line("echo >").is_err());
        assert!(parse_line("sort <").is_err());
        assert!(parse_line("echo > | cat").is_err());
    }

    #[test]
    fn empty_stage_is_error() {
        assert!(parse_line("| cat").is_err());
        assert!(parse_line("ls | | cat").is_err());
    }

    #[test]
    fn semicolon_separates_pipelines() {
        let line = parse_line("echo a; echo b &; echo c").unwrap();
        assert_eq!(line.pipelines.len(), 3);
        assert!(line.pipelines[1].background);
        assert!(!line.pipelines[2].background);
    }

    #[test]
    fn trailing_semicolon_is_fine() {
        assert_eq!(parse_line("ls;").unwrap().pipelines.len(), 1);
    }

    #[test]
    fn quoted_operators_are_literal() {
        let p = one(r#"echo "a | b" 'c & d'"#);
        assert_eq!(p.stages.len(), 1);
        assert_eq!(p.stages[0].argv, vec!["echo", "a | b", "c & d"]);
    }

    #[test]
    fn quotes_mid_word_join() {
        let p = one(r#"echo he"llo wor"ld"#);
        assert_eq!(p.stages[0].argv, vec!["echo", "hello world"]);
    }

    #[test]
    fn operators_need_no_whitespace() {
        let p = one("cat f|grep x>out.txt");
        assert_eq!(p.stages.len(), 2);
        assert_eq!(p.output_file.as_deref(), Some("out.txt"));
    }
}
