//! Line-level grammar for the `Cartfile` and `Cartfile.resolved` formats.
//!
//! A hand-rolled line scanner drives the overall structure (blank lines, `#` comments), with
//! `nom` combinators handling the quoted-string and specifier grammar within each entry line.

use crate::dependency::Dependency;
use crate::version::{SemanticVersion, VersionSpecifier};
use nom::{
    branch::alt,
    bytes::complete::{escaped, is_not, tag, take_while1},
    character::complete::{char, multispace1},
    combinator::{map, map_res, opt},
    sequence::{delimited, preceded},
    IResult,
};

/// One parsed entry line: `kind "location" [specifier]`.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryLine {
    pub dependency: Dependency,
    pub specifier: VersionSpecifier,
}

/// A parsed resolved-manifest line: `kind "location" "pinned-version"`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEntryLine {
    pub dependency: Dependency,
    pub pinned: String,
}

fn ws(input: &str) -> IResult<&str, &str> {
    multispace1(input)
}

fn quoted_string(input: &str) -> IResult<&str, String> {
    map(
        delimited(
            char('"'),
            opt(escaped(is_not("\"\\"), '\\', char('"'))),
            char('"'),
        ),
        |s: Option<&str>| s.unwrap_or("").to_string(),
    )(input)
}

fn kind(input: &str) -> IResult<&str, &str> {
    alt((tag("github"), tag("git"), tag("binary")))(input)
}

fn semver(input: &str) -> IResult<&str, SemanticVersion> {
    map_res(
        take_while1(|c: char| c.is_ascii_digit() || c == '.'),
        |s: &str| SemanticVersion::parse(s),
    )(input)
}

fn bare_word(input: &str) -> IResult<&str, String> {
    alt((
        quoted_string,
        map(take_while1(|c: char| !c.is_whitespace()), String::from),
    ))(input)
}

fn specifier(input: &str) -> IResult<&str, VersionSpecifier> {
    alt((
        map(preceded(tag("=="), semver), VersionSpecifier::Exactly),
        map(preceded(tag(">="), semver), VersionSpecifier::AtLeast),
        map(preceded(tag("~>"), semver), VersionSpecifier::CompatibleWith),
        map(preceded(tag("branch"), preceded(ws, bare_word)), |s| {
            VersionSpecifier::GitReference(s)
        }),
        map(preceded(tag("commit"), preceded(ws, bare_word)), |s| {
            VersionSpecifier::GitReference(s)
        }),
    ))(input)
}

/// Parse a `github "owner/repo"` or `github "https://host/owner/repo"` location into a
/// `Dependency::GitHub`.
fn parse_github_location(location: &str) -> Dependency {
    if let Some(rest) = location
        .strip_prefix("https://")
        .or_else(|| location.strip_prefix("http://"))
    {
        let mut segments = rest.splitn(2, '/');
        let server = segments.next().unwrap_or("github.com").to_string();
        let path = segments.next().unwrap_or("");
        let mut parts = path.trim_end_matches(".git").splitn(2, '/');
        let owner = parts.next().unwrap_or("").to_string();
        let repo = parts.next().unwrap_or("").to_string();
        Dependency::GitHub {
            server,
            owner,
            repo,
        }
    } else {
        let path = location.trim_end_matches(".git");
        let mut parts = path.splitn(2, '/');
        let owner = parts.next().unwrap_or("").to_string();
        let repo = parts.next().unwrap_or("").to_string();
        Dependency::GitHub {
            server: "github.com".to_string(),
            owner,
            repo,
        }
    }
}

/// Parse one non-comment, non-blank manifest line into an [`EntryLine`].
pub fn parse_entry_line(input: &str) -> Result<EntryLine, String> {
    let input = input.trim();
    let (rest, kind) = kind(input).map_err(|_| "expected `github`, `git` or `binary`".to_string())?;
    let (rest, _) = ws(rest).map_err(|_| "expected whitespace after kind".to_string())?;
    let (rest, location) =
        quoted_string(rest).map_err(|_| "expected a quoted location".to_string())?;
    let rest = rest.trim_start();
    let spec = if rest.is_empty() {
        VersionSpecifier::Any
    } else {
        specifier(rest)
            .map(|(_, s)| s)
            .map_err(|_| format!("invalid version specifier: {rest:?}"))?
    };
    let dependency = match kind {
        "github" => parse_github_location(&location),
        "git" => Dependency::Git { url: location },
        "binary" => Dependency::Binary { url: location },
        _ => unreachable!(),
    };
    Ok(EntryLine {
        dependency,
        specifier: spec,
    })
}

/// Parse one resolved-manifest line into a [`ResolvedEntryLine`].
pub fn parse_resolved_entry_line(input: &str) -> Result<ResolvedEntryLine, String> {
    let input = input.trim();
    let (rest, kind) = kind(input).map_err(|_| "expected `github`, `git` or `binary`".to_string())?;
    let (rest, _) = ws(rest).map_err(|_| "expected whitespace after kind".to_string())?;
    let (rest, location) =
        quoted_string(rest).map_err(|_| "expected a quoted location".to_string())?;
    let rest = rest.trim_start();
    let (_, pinned) =
        quoted_string(rest).map_err(|_| "expected a quoted pinned version".to_string())?;
    let dependency = match kind {
        "github" => parse_github_location(&location),
        "git" => Dependency::Git { url: location },
        "binary" => Dependency::Binary { url: location },
        _ => unreachable!(),
    };
    Ok(ResolvedEntryLine { dependency, pinned })
}

/// Strip a trailing `# comment` not inside the quoted location/specifier portion of the line.
///
/// Since locations and branch/commit identifiers are always quoted, a `#` outside of a quoted
/// span always starts a comment.
pub fn strip_trailing_comment(line: &str) -> &str {
    let mut in_quotes = false;
    for (i, c) in line.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            '#' if !in_quotes => return &line[..i],
            _ => {}
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_github_owner_repo() {
        let e = parse_entry_line(r#"github "o/A" ~> 1.0"#).unwrap();
        assert_eq!(
            e.dependency,
            Dependency::GitHub {
                server: "github.com".into(),
                owner: "o".into(),
                repo: "A".into(),
            }
        );
        assert_eq!(
            e.specifier,
            VersionSpecifier::CompatibleWith(SemanticVersion::new(1, 0, 0))
        );
    }

    #[test]
    fn parses_git_exact() {
        let e = parse_entry_line(r#"git "https://example.com/foo/bar.git" == 2.1.0"#).unwrap();
        assert_eq!(
            e.dependency,
            Dependency::Git {
                url: "https://example.com/foo/bar.git".into()
            }
        );
        assert_eq!(
            e.specifier,
            VersionSpecifier::Exactly(SemanticVersion::new(2, 1, 0))
        );
    }

    #[test]
    fn parses_binary_with_no_specifier() {
        let e = parse_entry_line(r#"binary "https://example.com/proj.json""#).unwrap();
        assert_eq!(e.specifier, VersionSpecifier::Any);
    }

    #[test]
    fn parses_branch_and_commit_specifiers() {
        let e = parse_entry_line(r#"github "o/A" branch "develop""#).unwrap();
        assert_eq!(e.specifier, VersionSpecifier::GitReference("develop".into()));

        let e = parse_entry_line(r#"github "o/A" commit "deadbeef""#).unwrap();
        assert_eq!(e.specifier, VersionSpecifier::GitReference("deadbeef".into()));
    }

    #[test]
    fn parses_resolved_entry() {
        let e = parse_resolved_entry_line(r#"github "o/A" "1.1.0""#).unwrap();
        assert_eq!(e.pinned, "1.1.0");
    }

    #[test]
    fn strips_comments_outside_quotes() {
        assert_eq!(
            strip_trailing_comment(r#"github "o/A" ~> 1.0 # pinned for reasons"#).trim(),
            r#"github "o/A" ~> 1.0"#
        );
    }

    #[test]
    fn rejects_unknown_kind() {
        assert!(parse_entry_line(r#"svn "o/A""#).is_err());
    }
}
