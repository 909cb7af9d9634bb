//! `.env` loading. Variables already present in the process environment are never overridden.

use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub key: String,
    pub value: String,
}

/// Parse every assignment in `contents`. Errors carry the 1-based line number.
pub fn parse(contents: &str) -> Result<Vec<Assignment>, String> {
    let mut assignments = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        if let Some(assignment) = parse_line(line).map_err(|e| format!("line {}: {}", index + 1, e))? {
            assignments.push(assignment);
        }
    }
    Ok(assignments)
}

/// Load `path` into the process environment; returns how many variables were set.
pub fn load(path: &Path) -> Result<usize, String> {
    let contents = fs::read_to_string(path).map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    let assignments = parse(&contents).map_err(|e| format!("{}: {}", path.display(), e))?;
    let mut applied = 0;
    for Assignment { key, value } in assignments {
        if std::env::var_os(&key).is_some() {
            continue;
        }
        // Mutating the process environment is unsafe once other threads may read it;
        // this runs before logging or any worker thread starts.
        unsafe {
            std::env::set_var(&key, value);
        }
        applied += 1;
    }
    Ok(applied)
}

fn parse_line(line: &str) -> Result<Option<Assignment>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let line = line.strip_prefix("export ").map(str::trim_start).unwrap_or(line);

    let Some((key, raw_value)) = line.split_once('=') else {
        return Err("expected KEY=VALUE".to_string());
    };
    let key = key.trim();
    if key.is_empty() {
        return Err("empty variable name".to_string());
    }
    if !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(format!("invalid variable name `{}`", key));
    }

    Ok(Some(Assignment {
        key: key.to_string(),
        value: parse_value(raw_value.trim())?,
    }))
}

fn parse_value(raw: &str) -> Result<String, String> {
    let mut chars = raw.chars();
    let quote = match chars.next() {
        None => return Ok(String::new()),
        Some(q @ ('"' | '\'')) => q,
        Some(_) => {
            // Unquoted: an inline comment needs whitespace before the `#`.
            let value = match raw.find(" #").or_else(|| raw.find("\t#")) {
                Some(at) => &raw[..at],
                None => raw,
            };
            return Ok(value.trim_end().to_string());
        }
    };

    let mut value = String::new();
    while let Some(c) = chars.next() {
        match c {
            c if c == quote => {
                let rest = chars.as_str().trim_start();
                return if rest.is_empty() || rest.starts_with('#') {
                    Ok(value)
                } else {
                    Err(format!("unexpected `{}` after closing quote", rest))
                };
            }
            '\\' if quote == '"' => match chars.next() {
                Some('n') => value.push('\n'),
                Some('t') => value.push('\t'),
                Some('r') => value.push('\r'),
                Some(other) => value.push(other),
                None => break,
            },
            c => value.push(c),
        }
    }
    Err(format!("missing closing {}", quote))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kv(key: &str, value: &str) -> Assignment {
        Assignment {
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    #[test]
    fn parses_common_forms() {
        let contents = "\
# dispenser backend
API_BASE_URL=https://api.example.com/device
export API_TOKEN = 'abc#123'
DASHBOARD_SEARCH=\"Room 201\\tEast\"   # comment
EMPTY=
COLOR=#FF4757
RUST_LOG=debug # verbose
";
        let parsed = parse(contents).unwrap();
        assert_eq!(
            parsed,
            vec![
                kv("API_BASE_URL", "https://api.example.com/device"),
                kv("API_TOKEN", "abc#123"),
                kv("DASHBOARD_SEARCH", "Room 201\tEast"),
                kv("EMPTY", ""),
                kv("COLOR", "#FF4757"),
                kv("RUST_LOG", "debug"),
            ]
        );
    }

    #[test]
    fn single_quotes_are_literal() {
        assert_eq!(parse("A='x\\ny'").unwrap(), vec![kv("A", "x\\ny")]);
    }

    #[test]
    fn errors_name_the_line() {
        let err = parse("A=1\nthis is not an assignment\n").unwrap_err();
        assert!(err.starts_with("line 2:"), "{err}");
        assert!(parse("=1").is_err());
        assert!(parse("BAD KEY=1").is_err());
        assert!(parse("A=\"open").is_err());
        assert!(parse("A=\"x\" trailing").is_err());
    }

    #[test]
    fn process_environment_wins() {
        let dir = std::env::temp_dir().join(format!("dispenser-monitor-{}-env", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(".env");
        fs::write(&path, "DISPENSER_ENV_TEST_PATH=from-file\nDISPENSER_ENV_TEST_NEW=fresh\n").unwrap();
        unsafe {
            std::env::set_var("DISPENSER_ENV_TEST_PATH", "from-process");
        }
        assert_eq!(load(&path).unwrap(), 1);
        assert_eq!(std::env::var("DISPENSER_ENV_TEST_PATH").unwrap(), "from-process");
        assert_eq!(std::env::var("DISPENSER_ENV_TEST_NEW").unwrap(), "fresh");
    }
}
