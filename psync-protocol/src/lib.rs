//! Wire codec for the psync control protocol.
//!
//! A frame is a single newline-terminated text line. The first
//! whitespace-delimited token is the frame's kind; everything else is the
//! kind-specific body. The codec is pure: it does no I/O, only string
//! parsing and formatting, so it can be shared verbatim between the client
//! and the server.

use std::collections::BTreeMap;

use derive_more::{Display, Error, From};

/// Environment variable mapping carried by an `Open` request.
pub type Env = BTreeMap<String, String>;

/// A request sent from the client to the server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    /// Spawn `path` with the given `args` and `env` on the server.
    Open {
        path: String,
        args: Vec<String>,
        env: Env,
    },

    /// Terminate the peer's currently-running session, if any.
    Kill,
}

/// A response sent from the server to the client.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Response {
    /// Acknowledges an accepted `Open`.
    Okay,

    /// One chunk of child output. `msg` preserves any trailing newline.
    Log { msg: String },

    /// Terminal frame for a session: the child's exit code (negative for
    /// signal termination).
    Exit { code: i32 },

    /// A non-terminal transport or dispatch error.
    Error { msg: String },
}

/// Errors that can occur while parsing a frame.
#[derive(Clone, Debug, Display, Error, From, PartialEq, Eq)]
pub enum CodecError {
    #[display(fmt = "unrecognized message kind: {}", _0)]
    UnknownKind(#[error(not(source))] String),

    #[display(fmt = "open request is missing required path field")]
    MissingPath,

    #[display(fmt = "malformed quoting or field syntax: {}", _0)]
    MalformedQuoting(#[error(not(source))] String),
}

impl Request {
    /// Parses a single wire frame (without its trailing newline) as a request.
    pub fn parse(line: &str) -> Result<Self, CodecError> {
        let (kind, rest) = split_kind(line);
        match kind {
            "open" => {
                let path = extract_field(rest, "path")
                    .ok_or(CodecError::MissingPath)?
                    .to_string();

                let args = match extract_field(rest, "args") {
                    Some(raw) if !raw.is_empty() => shell_words::split(raw)
                        .map_err(|_| CodecError::MalformedQuoting(raw.to_string()))?,
                    _ => Vec::new(),
                };

                let env = match extract_field(rest, "env") {
                    Some(raw) if !raw.is_empty() => parse_env(raw)?,
                    _ => Env::new(),
                };

                Ok(Request::Open { path, args, env })
            }
            "kill" => Ok(Request::Kill),
            other => Err(CodecError::UnknownKind(other.to_string())),
        }
    }

    /// Serializes this request as a single wire frame (without trailing newline).
    pub fn serialize(&self) -> String {
        match self {
            Request::Open { path, args, env } => {
                let args = shell_words::join(args);
                let env = serialize_env(env);
                format!("open path='{path}' args='{args}' env='{env}'")
            }
            Request::Kill => "kill".to_string(),
        }
    }
}

impl Response {
    /// Parses a single wire frame (without its trailing newline) as a response.
    pub fn parse(line: &str) -> Result<Self, CodecError> {
        let (kind, rest) = split_kind(line);
        match kind {
            "okay" => Ok(Response::Okay),
            "log" => Ok(Response::Log {
                msg: rest.to_string(),
            }),
            "exit" => {
                let code = rest
                    .trim()
                    .parse::<i32>()
                    .map_err(|_| CodecError::MalformedQuoting(rest.to_string()))?;
                Ok(Response::Exit { code })
            }
            "error" => Ok(Response::Error {
                msg: rest.to_string(),
            }),
            other => Err(CodecError::UnknownKind(other.to_string())),
        }
    }

    /// Serializes this response as a single wire frame (without trailing newline).
    pub fn serialize(&self) -> String {
        match self {
            Response::Okay => "okay".to_string(),
            Response::Log { msg } => format!("log {msg}"),
            Response::Exit { code } => format!("exit {code}"),
            Response::Error { msg } => format!("error {msg}"),
        }
    }
}

/// Splits a frame into its leading kind token and the rest of the line.
///
/// A frame with no body (`kill`, `okay`) has an empty `rest`.
fn split_kind(line: &str) -> (&str, &str) {
    match line.split_once(' ') {
        Some((kind, rest)) => (kind, rest),
        None => (line, ""),
    }
}

/// Finds the value of `field='...'` within `body`, requiring the field name
/// to start at a word boundary so `args` doesn't match inside some other
/// identifier. Returns `None` if the field is absent or unterminated.
fn extract_field<'a>(body: &'a str, field: &str) -> Option<&'a str> {
    let pat = format!("{field}='");
    let mut search_from = 0;
    while let Some(rel) = body[search_from..].find(pat.as_str()) {
        let start = search_from + rel;
        let at_boundary = start == 0 || body.as_bytes()[start - 1].is_ascii_whitespace();
        if at_boundary {
            let val_start = start + pat.len();
            return body[val_start..]
                .find('\'')
                .map(|rel_end| &body[val_start..val_start + rel_end]);
        }
        search_from = start + pat.len();
    }
    None
}

/// Parses a whitespace-separated sequence of `NAME=VALUE` pairs, where
/// `VALUE` is either a double-quoted string (inner quotes stripped) or a
/// non-whitespace bareword.
///
/// Exposed so `psync-client` can turn a `--env` flag's raw value into the
/// same `Env` map the wire codec would produce, guaranteeing identical
/// quoting rules on both ends of the connection.
pub fn parse_env(raw: &str) -> Result<Env, CodecError> {
    let mut env = Env::new();
    let mut chars = raw.char_indices().peekable();

    loop {
        while matches!(chars.peek(), Some((_, c)) if c.is_whitespace()) {
            chars.next();
        }
        let name_start = match chars.peek() {
            Some(&(i, _)) => i,
            None => break,
        };

        let mut name_end = name_start;
        let mut first = true;
        while let Some(&(i, c)) = chars.peek() {
            let valid = if first {
                c.is_ascii_alphabetic() || c == '_'
            } else {
                c.is_ascii_alphanumeric() || c == '_'
            };
            if !valid {
                break;
            }
            chars.next();
            name_end = i + c.len_utf8();
            first = false;
        }
        if name_end == name_start {
            return Err(CodecError::MalformedQuoting(raw.to_string()));
        }
        let name = raw[name_start..name_end].to_string();

        match chars.next() {
            Some((_, '=')) => {}
            _ => return Err(CodecError::MalformedQuoting(raw.to_string())),
        }

        let value = if matches!(chars.peek(), Some((_, '"'))) {
            chars.next();
            let val_start = match chars.peek() {
                Some(&(i, _)) => i,
                None => return Err(CodecError::MalformedQuoting(raw.to_string())),
            };
            let mut val_end = val_start;
            let mut closed = false;
            while let Some(&(i, c)) = chars.peek() {
                chars.next();
                if c == '"' {
                    closed = true;
                    break;
                }
                val_end = i + c.len_utf8();
            }
            if !closed {
                return Err(CodecError::MalformedQuoting(raw.to_string()));
            }
            raw[val_start..val_end].to_string()
        } else {
            let val_start = match chars.peek() {
                Some(&(i, _)) => i,
                None => return Err(CodecError::MalformedQuoting(raw.to_string())),
            };
            let mut val_end = val_start;
            while let Some(&(i, c)) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                chars.next();
                val_end = i + c.len_utf8();
            }
            raw[val_start..val_end].to_string()
        };

        env.insert(name, value);
    }

    Ok(env)
}

fn serialize_env(env: &Env) -> String {
    env.iter()
        .map(|(k, v)| format!("{k}=\"{v}\""))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_round_trips_with_args_and_env() {
        let mut env = Env::new();
        env.insert("FOO".to_string(), "bar baz".to_string());
        env.insert("PATH".to_string(), "/usr/bin".to_string());

        let req = Request::Open {
            path: "/tmp/hello".to_string(),
            args: vec!["--flag".to_string(), "value with space".to_string()],
            env,
        };

        let wire = req.serialize();
        let parsed = Request::parse(&wire).unwrap();
        assert_eq!(req, parsed);
    }

    #[test]
    fn open_with_absent_args_and_env_defaults_to_empty() {
        let req = Request::parse("open path='/bin/true'").unwrap();
        assert_eq!(
            req,
            Request::Open {
                path: "/bin/true".to_string(),
                args: Vec::new(),
                env: Env::new(),
            }
        );
    }

    #[test]
    fn open_with_empty_args_and_env_fields_is_same_as_absent() {
        let req = Request::parse("open path='/bin/true' args='' env=''").unwrap();
        assert_eq!(
            req,
            Request::Open {
                path: "/bin/true".to_string(),
                args: Vec::new(),
                env: Env::new(),
            }
        );
    }

    #[test]
    fn open_without_path_is_an_error() {
        let err = Request::parse("open args='a b'").unwrap_err();
        assert_eq!(err, CodecError::MissingPath);
    }

    #[test]
    fn kill_round_trips() {
        let req = Request::Kill;
        assert_eq!(Request::parse(&req.serialize()).unwrap(), req);
    }

    #[test]
    fn unknown_request_kind_is_rejected() {
        let err = Request::parse("frobnicate").unwrap_err();
        assert_eq!(err, CodecError::UnknownKind("frobnicate".to_string()));
    }

    #[test]
    fn response_kind_is_not_a_valid_request() {
        let err = Request::parse("okay").unwrap_err();
        assert_eq!(err, CodecError::UnknownKind("okay".to_string()));
    }

    #[test]
    fn okay_round_trips() {
        let resp = Response::Okay;
        assert_eq!(Response::parse(&resp.serialize()).unwrap(), resp);
    }

    #[test]
    fn log_preserves_trailing_newline_in_msg() {
        let resp = Response::Log {
            msg: "hi\n".to_string(),
        };
        let wire = resp.serialize();
        assert_eq!(wire, "log hi\n");
        assert_eq!(Response::parse(&wire).unwrap(), resp);
    }

    #[test]
    fn exit_round_trips_negative_code() {
        let resp = Response::Exit { code: -15 };
        assert_eq!(Response::parse(&resp.serialize()).unwrap(), resp);
    }

    #[test]
    fn error_round_trips() {
        let resp = Response::Error {
            msg: "no such file".to_string(),
        };
        assert_eq!(Response::parse(&resp.serialize()).unwrap(), resp);
    }

    #[test]
    fn env_values_support_quoted_spaces_and_barewords() {
        let env = parse_env(r#"FOO="bar baz" BAZ=qux"#).unwrap();
        assert_eq!(env.get("FOO").unwrap(), "bar baz");
        assert_eq!(env.get("BAZ").unwrap(), "qux");
    }

    #[test]
    fn malformed_env_name_is_rejected() {
        assert!(parse_env("1FOO=bar").is_err());
    }
}
