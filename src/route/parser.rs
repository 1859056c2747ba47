//! The route-command language.
//!
//! A routing table is described by a multi-line text; blank lines and
//! `#` comments are ignored. Each remaining line is one of:
//!
//! ```text
//! route add <service> <host>/<path> <url> [weight <w>] [tags "a,b"] [opts "k1=v1 k2=v2"]
//! route add <service> <host>/<path> <url> redirect <code> [<target>]
//! route del <service> [<host>/<path>] [<url>]
//! route weight <service> <host>/<path> weight <w>
//! ```
//!
//! Parsing fails with a line-annotated error; the caller decides
//! whether to keep a previous table.

use std::collections::BTreeMap;

use url::Url;

/// A single parsed route command.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    RouteAdd {
        service: String,
        host: String,
        path: String,
        dst: Url,
        weight: f64,
        tags: Vec<String>,
        opts: BTreeMap<String, String>,
        redirect: Option<(u16, Option<String>)>,
    },
    RouteDel {
        service: String,
        src: Option<(String, String)>,
        dst: Option<Url>,
    },
    RouteWeight {
        service: String,
        host: String,
        path: String,
        weight: f64,
    },
}

/// A parse failure annotated with its 1-based line number.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub line: usize,
    pub msg: String,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.msg)
    }
}

impl std::error::Error for ParseError {}

/// Parse a full command text into its commands.
pub fn parse_commands(input: &str) -> Result<Vec<Command>, ParseError> {
    Ok(parse_annotated(input)?.into_iter().map(|(_, c)| c).collect())
}

/// Like [`parse_commands`], but keeps the 1-based source line of each
/// command so later (semantic) failures can still be annotated.
pub fn parse_annotated(input: &str) -> Result<Vec<(usize, Command)>, ParseError> {
    let mut commands = Vec::new();
    for (i, line) in input.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let cmd = parse_line(line).map_err(|msg| ParseError { line: i + 1, msg })?;
        commands.push((i + 1, cmd));
    }
    Ok(commands)
}

fn parse_line(line: &str) -> Result<Command, String> {
    let tokens = tokenize(line)?;
    let mut it = tokens.iter();

    match it.next().map(String::as_str) {
        Some("route") => {}
        _ => return Err(format!("expected \"route\", got {:?}", line)),
    }

    match it.next().map(String::as_str) {
        Some("add") => parse_add(&tokens[2..]),
        Some("del") => parse_del(&tokens[2..]),
        Some("weight") => parse_weight(&tokens[2..]),
        Some(other) => Err(format!("unknown route command {:?}", other)),
        None => Err("incomplete route command".to_string()),
    }
}

fn parse_add(args: &[String]) -> Result<Command, String> {
    if args.len() < 3 {
        return Err("route add requires <service> <host>/<path> <url>".to_string());
    }
    let service = args[0].clone();
    let (host, path) = split_src(&args[1])?;
    let dst = parse_url(&args[2])?;

    let mut weight = 0.0;
    let mut tags = Vec::new();
    let mut opts = BTreeMap::new();
    let mut redirect = None;

    let mut i = 3;
    while i < args.len() {
        match args[i].as_str() {
            "weight" => {
                let v = args.get(i + 1).ok_or("weight requires a value")?;
                weight = v
                    .parse::<f64>()
                    .map_err(|_| format!("invalid weight {:?}", v))?;
                i += 2;
            }
            "tags" => {
                let v = args.get(i + 1).ok_or("tags requires a value")?;
                tags = v
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
                i += 2;
            }
            "opts" => {
                let v = args.get(i + 1).ok_or("opts requires a value")?;
                for kv in v.split_whitespace() {
                    let (k, val) = kv
                        .split_once('=')
                        .ok_or_else(|| format!("invalid opt {:?}, expected k=v", kv))?;
                    opts.insert(k.to_string(), val.to_string());
                }
                i += 2;
            }
            "redirect" => {
                let v = args.get(i + 1).ok_or("redirect requires a code")?;
                let code = v
                    .parse::<u16>()
                    .map_err(|_| format!("invalid redirect code {:?}", v))?;
                if !matches!(code, 301 | 302 | 307 | 308) {
                    return Err(format!("redirect code must be 301/302/307/308, got {}", code));
                }
                // An optional bare token after the code is the location.
                let target = match args.get(i + 2).map(String::as_str) {
                    Some("weight") | Some("tags") | Some("opts") | None => None,
                    Some(t) => Some(t.to_string()),
                };
                let consumed = if target.is_some() { 3 } else { 2 };
                redirect = Some((code, target));
                i += consumed;
            }
            other => return Err(format!("unexpected token {:?}", other)),
        }
    }

    Ok(Command::RouteAdd {
        service,
        host,
        path,
        dst,
        weight,
        tags,
        opts,
        redirect,
    })
}

fn parse_del(args: &[String]) -> Result<Command, String> {
    if args.is_empty() || args.len() > 3 {
        return Err("route del requires <service> [<host>/<path>] [<url>]".to_string());
    }
    let service = args[0].clone();
    let src = args.get(1).map(|s| split_src(s)).transpose()?;
    let dst = args.get(2).map(|s| parse_url(s)).transpose()?;
    Ok(Command::RouteDel { service, src, dst })
}

fn parse_weight(args: &[String]) -> Result<Command, String> {
    if args.len() != 4 || args[2] != "weight" {
        return Err("route weight requires <service> <host>/<path> weight <w>".to_string());
    }
    let service = args[0].clone();
    let (host, path) = split_src(&args[1])?;
    let weight = args[3]
        .parse::<f64>()
        .map_err(|_| format!("invalid weight {:?}", args[3]))?;
    Ok(Command::RouteWeight {
        service,
        host,
        path,
        weight,
    })
}

/// Split `host/path` into a lower-cased host and a path starting
/// with `/`. The host may be empty.
fn split_src(src: &str) -> Result<(String, String), String> {
    match src.find('/') {
        Some(i) => Ok((src[..i].to_lowercase(), src[i..].to_string())),
        None => Err(format!("invalid route source {:?}, expected host/path", src)),
    }
}

fn parse_url(s: &str) -> Result<Url, String> {
    Url::parse(s).map_err(|e| format!("invalid URL {:?}: {}", s, e))
}

/// Split a line into whitespace-separated tokens, honoring double
/// quotes. Quotes are stripped from the returned tokens.
fn tokenize(line: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in line.chars() {
        match c {
            '"' => {
                if in_quotes {
                    tokens.push(std::mem::take(&mut current));
                }
                in_quotes = !in_quotes;
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if in_quotes {
        return Err("unterminated quote".to_string());
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_with_all_clauses() {
        let cmds = parse_commands(
            "route add svc www.example.com/app http://10.1.1.1:8080/ weight 0.25 tags \"a,b\" opts \"strip=/app host=dst\"",
        )
        .unwrap();
        match &cmds[0] {
            Command::RouteAdd {
                service,
                host,
                path,
                dst,
                weight,
                tags,
                opts,
                redirect,
            } => {
                assert_eq!(service, "svc");
                assert_eq!(host, "www.example.com");
                assert_eq!(path, "/app");
                assert_eq!(dst.as_str(), "http://10.1.1.1:8080/");
                assert_eq!(*weight, 0.25);
                assert_eq!(tags, &["a", "b"]);
                assert_eq!(opts.get("strip").unwrap(), "/app");
                assert_eq!(opts.get("host").unwrap(), "dst");
                assert!(redirect.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_add_redirect_with_target() {
        let cmds =
            parse_commands("route add svc www.ex.com/old http://ignored redirect 301 /new")
                .unwrap();
        match &cmds[0] {
            Command::RouteAdd { redirect, .. } => {
                assert_eq!(redirect, &Some((301, Some("/new".to_string()))));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_add_redirect_rejects_other_codes() {
        let err = parse_commands("route add svc a.com/ http://x redirect 303").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.msg.contains("301/302/307/308"));
    }

    #[test]
    fn test_del_widening() {
        let cmds = parse_commands(
            "route del svc\nroute del svc www.example.com/app\nroute del svc www.example.com/app http://h1/",
        )
        .unwrap();
        assert_eq!(cmds.len(), 3);
        assert!(matches!(
            &cmds[0],
            Command::RouteDel { src: None, dst: None, .. }
        ));
        assert!(matches!(
            &cmds[1],
            Command::RouteDel { src: Some(_), dst: None, .. }
        ));
        assert!(matches!(
            &cmds[2],
            Command::RouteDel { src: Some(_), dst: Some(_), .. }
        ));
    }

    #[test]
    fn test_weight_command() {
        let cmds = parse_commands("route weight svc www.example.com/app weight 0.7").unwrap();
        assert_eq!(
            cmds[0],
            Command::RouteWeight {
                service: "svc".to_string(),
                host: "www.example.com".to_string(),
                path: "/app".to_string(),
                weight: 0.7,
            }
        );
    }

    #[test]
    fn test_comments_and_blank_lines_are_skipped() {
        let cmds = parse_commands("# header\n\nroute add svc / http://h1/\n  # tail\n").unwrap();
        assert_eq!(cmds.len(), 1);
    }

    #[test]
    fn test_errors_carry_line_numbers() {
        let err = parse_commands("route add svc / http://h1/\nroute frobnicate x").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.msg.contains("frobnicate"));
    }

    #[test]
    fn test_host_is_lowercased() {
        let cmds = parse_commands("route add svc WWW.Example.COM/ http://h1/").unwrap();
        match &cmds[0] {
            Command::RouteAdd { host, .. } => assert_eq!(host, "www.example.com"),
            other => panic!("unexpected command {:?}", other),
        }
    }
}
