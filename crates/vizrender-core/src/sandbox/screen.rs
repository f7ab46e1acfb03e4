//! Pre-execution screen for untrusted scene code.
//!
//! A textual check run before a sandbox is provisioned. Matching code fails
//! terminally without spending a render; the sandbox stays the isolation
//! boundary for everything the screen lets through.

use regex::{Regex, RegexSet};

/// Patterns rejected by default: process and filesystem access, dynamic
/// code execution and interactive input.
pub const DEFAULT_FORBIDDEN_PATTERNS: &[&str] = &[
    r"\bimport\s+(os|sys|subprocess|shutil|socket|ctypes)\b",
    r"\bfrom\s+(os|sys|subprocess|shutil|socket|ctypes)\b",
    r"\bsubprocess\b",
    r"\b(eval|exec|compile)\s*\(",
    r"__import__",
    r"\b(open|file|input|raw_input)\s*\(",
];

pub fn default_forbidden_patterns() -> Vec<String> {
    DEFAULT_FORBIDDEN_PATTERNS
        .iter()
        .map(|p| p.to_string())
        .collect()
}

#[derive(Debug, Clone)]
pub struct CodeScreen {
    set: RegexSet,
    patterns: Vec<Regex>,
}

impl CodeScreen {
    pub fn new<I, S>(patterns: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| Regex::new(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        let set = RegexSet::new(patterns.iter().map(Regex::as_str))?;
        Ok(Self { set, patterns })
    }

    /// The offending text of the first forbidden pattern `code` matches.
    pub fn violation<'a>(&self, code: &'a str) -> Option<&'a str> {
        let first = self.set.matches(code).into_iter().next()?;
        self.patterns[first].find(code).map(|m| m.as_str())
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

impl Default for CodeScreen {
    fn default() -> Self {
        Self::new(DEFAULT_FORBIDDEN_PATTERNS).unwrap_or_else(|_| Self {
            set: RegexSet::empty(),
            patterns: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_patterns_compile() {
        assert!(CodeScreen::new(DEFAULT_FORBIDDEN_PATTERNS).is_ok());
        assert_eq!(CodeScreen::default().len(), DEFAULT_FORBIDDEN_PATTERNS.len());
    }

    #[test]
    fn test_rejects_host_access() {
        let screen = CodeScreen::default();
        for (code, offending) in [
            ("import os\nos.system('rm -rf /')", "import os"),
            ("from subprocess import run", "from subprocess"),
            ("data = open('/etc/passwd').read()", "open("),
            ("exec('print(1)')", "exec("),
            ("m = __import__('os')", "__import__"),
            ("name = input ('who?')", "input ("),
        ] {
            assert_eq!(screen.violation(code), Some(offending), "code: {code}");
        }
    }

    #[test]
    fn test_accepts_ordinary_scenes() {
        let screen = CodeScreen::default();
        for code in [
            "c = Circle()\nself.play(Create(c))",
            "axes = Axes()\ngraph = axes.plot(lambda x: np.sin(x))\nself.add(axes, graph)",
            "t = Text('evaluate the opening move')\nself.play(Write(t))",
            "self.play(FadeIn(Square()), run_time=2)",
        ] {
            assert_eq!(screen.violation(code), None, "rejected: {code}");
        }
    }

    #[test]
    fn test_custom_patterns() {
        let screen = CodeScreen::new([r"\bTex\("]).unwrap();
        assert_eq!(screen.violation("t = Tex('x')"), Some("Tex("));
        assert_eq!(screen.violation("import os"), None);
        assert!(CodeScreen::new(["("]).is_err());

        let off = CodeScreen::new(Vec::<String>::new()).unwrap();
        assert!(off.is_empty());
        assert_eq!(off.violation("import os"), None);
    }
}
