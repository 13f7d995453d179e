//! Rendering of per-instance Redis configuration files.
//!
//! The template is the stock `redis.conf`. Four default directive lines are
//! located and rewritten; every other line passes through untouched.

use crate::error::{HarnessError, Result};
use crate::platform::config_path_value;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Values substituted into a template.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    pub port: u16,
    pub database_count: u32,
    /// Bare file name of the RDB file (no directory).
    pub data_file_name: String,
    pub data_directory: PathBuf,
}

impl RenderOptions {
    pub fn new(
        port: u16,
        data_file_name: impl Into<String>,
        data_directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            port,
            database_count: 1,
            data_file_name: data_file_name.into(),
            data_directory: data_directory.into(),
        }
    }

    pub fn with_database_count(mut self, count: u32) -> Self {
        self.database_count = count;
        self
    }
}

/// A default directive line in the stock template.
struct Directive {
    keyword: &'static str,
    default_line: &'static str,
    pattern: &'static LazyLock<Regex>,
}

// Whole-line matches so commented mentions of the defaults are ignored.
// The `tail` group keeps trailing blanks and a CR from CRLF templates.
static PORT_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^port 6379(?P<tail>[ \t]*\r?)$").unwrap());
static DATABASES_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^databases 16(?P<tail>[ \t]*\r?)$").unwrap());
static DBFILENAME_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^dbfilename dump\.rdb(?P<tail>[ \t]*\r?)$").unwrap());
static DIR_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^dir \./(?P<tail>[ \t]*\r?)$").unwrap());

static DIRECTIVES: [Directive; 4] = [
    Directive {
        keyword: "port",
        default_line: "port 6379",
        pattern: &PORT_LINE,
    },
    Directive {
        keyword: "databases",
        default_line: "databases 16",
        pattern: &DATABASES_LINE,
    },
    Directive {
        keyword: "dbfilename",
        default_line: "dbfilename dump.rdb",
        pattern: &DBFILENAME_LINE,
    },
    Directive {
        keyword: "dir",
        default_line: "dir ./",
        pattern: &DIR_LINE,
    },
];

/// Render a concrete configuration from `template`.
///
/// Fails with [`HarnessError::TemplateMismatch`] unless every default
/// directive occurs exactly once.
pub fn render(template: &str, options: &RenderOptions) -> Result<String> {
    let values = [
        options.port.to_string(),
        options.database_count.to_string(),
        config_path_value(Path::new(&options.data_file_name)),
        config_path_value(&options.data_directory),
    ];

    DIRECTIVES
        .iter()
        .zip(values.iter())
        .try_fold(template.to_string(), |text, (directive, value)| {
            substitute(&text, directive, value)
        })
}

/// Check that `template` carries every default directive exactly once.
pub fn validate(template: &str) -> Result<()> {
    for directive in &DIRECTIVES {
        let occurrences = directive.pattern.find_iter(template).count();
        if occurrences != 1 {
            return Err(mismatch(directive, occurrences));
        }
    }
    Ok(())
}

fn substitute(text: &str, directive: &Directive, value: &str) -> Result<String> {
    let mut matches = directive.pattern.captures_iter(text);
    let (Some(captures), None) = (matches.next(), matches.next()) else {
        let occurrences = directive.pattern.find_iter(text).count();
        return Err(mismatch(directive, occurrences));
    };
    let Some(line) = captures.get(0) else {
        return Err(mismatch(directive, 0));
    };
    let tail = captures.name("tail").map_or("", |m| m.as_str());

    let mut rendered = String::with_capacity(text.len() + value.len());
    rendered.push_str(&text[..line.start()]);
    rendered.push_str(directive.keyword);
    rendered.push(' ');
    rendered.push_str(value);
    rendered.push_str(tail);
    rendered.push_str(&text[line.end()..]);
    Ok(rendered)
}

fn mismatch(directive: &Directive, occurrences: usize) -> HarnessError {
    HarnessError::TemplateMismatch {
        directive: directive.default_line.to_string(),
        occurrences,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = "\
# Accept connections on the specified port, default is 6379.
port 6379
timeout 0
databases 16
save 900 1
# The filename where to dump the DB
dbfilename dump.rdb
# dir ./ is relative to the working directory
dir ./
appendonly no
";

    fn options() -> RenderOptions {
        RenderOptions::new(6400, "x.rdb", "/tmp/scratch")
    }

    #[test]
    fn test_render_substitutes_each_directive_once() {
        let rendered = render(TEMPLATE, &options()).unwrap();

        let expected = "\
# Accept connections on the specified port, default is 6379.
port 6400
timeout 0
databases 1
save 900 1
# The filename where to dump the DB
dbfilename x.rdb
# dir ./ is relative to the working directory
dir /tmp/scratch
appendonly no
";
        assert_eq!(rendered, expected);
    }

    #[test]
    fn test_render_leaves_other_lines_unchanged() {
        let rendered = render(TEMPLATE, &options()).unwrap();
        let before: Vec<&str> = TEMPLATE.lines().collect();
        let after: Vec<&str> = rendered.lines().collect();
        assert_eq!(before.len(), after.len());

        let changed: Vec<usize> = before
            .iter()
            .zip(after.iter())
            .enumerate()
            .filter(|(_, (a, b))| a != b)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(changed, vec![1, 3, 6, 8]);
    }

    #[test]
    fn test_render_custom_database_count() {
        let rendered = render(TEMPLATE, &options().with_database_count(4)).unwrap();
        assert!(rendered.contains("\ndatabases 4\n"));
    }

    #[test]
    fn test_render_preserves_crlf() {
        let template = TEMPLATE.replace('\n', "\r\n");
        let rendered = render(&template, &options()).unwrap();
        assert!(rendered.contains("\r\nport 6400\r\n"));
        assert!(rendered.contains("\r\ndir /tmp/scratch\r\n"));
        assert_eq!(rendered.matches("\r\n").count(), template.matches("\r\n").count());
    }

    #[test]
    fn test_render_quotes_directory_with_spaces() {
        let rendered = render(
            TEMPLATE,
            &RenderOptions::new(6400, "x.rdb", "/tmp/my scratch"),
        )
        .unwrap();
        assert!(rendered.contains("\ndir \"/tmp/my scratch\"\n"));
    }

    #[test]
    fn test_missing_directive_is_mismatch() {
        let template = TEMPLATE.replace("databases 16\n", "");
        match render(&template, &options()) {
            Err(HarnessError::TemplateMismatch {
                directive,
                occurrences,
            }) => {
                assert_eq!(directive, "databases 16");
                assert_eq!(occurrences, 0);
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_directive_is_mismatch() {
        let template = format!("{TEMPLATE}port 6379\n");
        match render(&template, &options()) {
            Err(HarnessError::TemplateMismatch {
                directive,
                occurrences,
            }) => {
                assert_eq!(directive, "port 6379");
                assert_eq!(occurrences, 2);
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_validate() {
        assert!(validate(TEMPLATE).is_ok());
        assert!(validate("port 6379\n").is_err());
    }
}
