//! Include directive scanners.

use cairn_dag::{GenericFlags, GenericScanner, Scanner, ScannerKind};

use crate::fs::{join, parent_dir, FileSystem};

/// An include directive as written in a file, before path resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundInclude {
    /// The target text between the delimiters.
    pub target: String,
    /// `<...>` style (or bare with `BARE_MEANS_SYSTEM`): searched on include
    /// paths only.
    pub system: bool,
    /// Whether the included file is scanned in turn.
    pub follow: bool,
}

/// Extracts include directives from file contents.
pub trait IncludeScanner: Send + Sync {
    /// Returns the directives in `contents`, in file order.
    fn scan(&self, kind: &ScannerKind, contents: &str) -> Vec<FoundInclude>;
}

/// Line-oriented scanner for the built-in scanner kinds.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectiveScanner;

impl IncludeScanner for DirectiveScanner {
    fn scan(&self, kind: &ScannerKind, contents: &str) -> Vec<FoundInclude> {
        match kind {
            ScannerKind::Cpp => contents.lines().filter_map(scan_cpp_line).collect(),
            ScannerKind::Generic(generic) => contents
                .lines()
                .filter_map(|line| scan_generic_line(generic, line))
                .collect(),
        }
    }
}

fn scan_cpp_line(line: &str) -> Option<FoundInclude> {
    let rest = line.trim_start().strip_prefix('#')?;
    let rest = rest.trim_start().strip_prefix("include")?;
    let (target, system) = delimited(rest.trim_start())?;
    Some(FoundInclude {
        target: target.to_string(),
        system,
        follow: true,
    })
}

fn scan_generic_line(generic: &GenericScanner, line: &str) -> Option<FoundInclude> {
    let line = line.trim_start();
    let flags = generic.flags;
    for keyword in &generic.keywords {
        let Some(rest) = line.strip_prefix(keyword.text.as_str()) else {
            continue;
        };
        if flags.contains(GenericFlags::REQUIRE_WHITESPACE)
            && !rest.starts_with(|c: char| c == ' ' || c == '\t')
        {
            continue;
        }
        let rest = rest.trim_start();
        let found = if flags.contains(GenericFlags::USE_SEPARATORS) {
            delimited(rest)
        } else {
            None
        };
        let (target, system) = match found {
            Some(hit) => hit,
            None => {
                let bare = rest.split_whitespace().next()?;
                (bare, flags.contains(GenericFlags::BARE_MEANS_SYSTEM))
            }
        };
        if target.is_empty() {
            return None;
        }
        return Some(FoundInclude {
            target: target.to_string(),
            system,
            follow: keyword.follow,
        });
    }
    None
}

/// Parses `"target"` or `<target>`; the flag is `true` for angle brackets.
fn delimited(s: &str) -> Option<(&str, bool)> {
    let (close, system) = match s.chars().next()? {
        '"' => ('"', false),
        '<' => ('>', true),
        _ => return None,
    };
    let body = &s[1..];
    let end = body.find(close)?;
    Some((&body[..end], system))
}

/// Resolves an include found in `including_file` to a path that exists.
///
/// Quoted includes are tried next to the including file first, then on each
/// include path; system includes only on the include paths. Unresolvable
/// includes yield `None`.
pub fn resolve_include(
    fs: &dyn FileSystem,
    scanner: &Scanner,
    including_file: &str,
    found: &FoundInclude,
) -> Option<String> {
    let local = (!found.system).then(|| join(parent_dir(including_file), &found.target));
    local
        .into_iter()
        .chain(scanner.include_paths.iter().map(|dir| join(dir, &found.target)))
        .find(|candidate| fs.exists(candidate))
}
