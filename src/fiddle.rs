use crate::model::FiddleSource;
use std::fmt;
use std::path::Path;

/// A `--fiddle` value that matches neither a gist id nor a usable local
/// reference. Its Display form is the exact message shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnrecognizedFiddle(pub String);

impl fmt::Display for UnrecognizedFiddle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unrecognized Fiddle \"{}\"", self.0)
    }
}

impl std::error::Error for UnrecognizedFiddle {}

/// Gist ids are 32 lowercase hex characters, nothing else.
fn is_gist_id(s: &str) -> bool {
    s.len() == 32 && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// Resolve a raw `--fiddle` argument into an unambiguous source.
///
/// Absent means the injected working directory; a 32-char lowercase hex
/// string is a gist id; anything else is unrecognized here. The CLI layer
/// accepts existing local directories before falling through to this
/// discrimination, which keeps `resolve` a pure function of its inputs.
pub fn resolve(raw: Option<&str>, cwd: &Path) -> Result<FiddleSource, UnrecognizedFiddle> {
    match raw {
        None => Ok(FiddleSource::FilePath(cwd.display().to_string())),
        Some(s) if is_gist_id(s) => Ok(FiddleSource::GistId(s.to_owned())),
        Some(s) => Err(UnrecognizedFiddle(s.to_owned())),
    }
}
