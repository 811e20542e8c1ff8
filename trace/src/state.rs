//! Abstract states produced by the oracle and their canonical form.

use serde::{Deserialize, Serialize};

/// Abstract state reported by the oracle.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TlcState {
    /// Fingerprint of the state, stable across oracle calls.
    pub key: i64,

    /// Human-readable representation of the state.
    pub repr: String,
}

impl TlcState {
    /// Create a new state.
    pub fn new(key: i64, repr: impl Into<String>) -> Self {
        Self {
            key,
            repr: repr.into(),
        }
    }

    /// Return a copy of this state with a canonical [TlcState::repr].
    pub fn canonical(&self) -> Self {
        Self {
            key: self.key,
            repr: canonicalize(&self.repr),
        }
    }
}

/// Ordered states the oracle returned for one execution.
pub type Path = Vec<TlcState>;

/// Every [Path] observed during a campaign, in execution order.
pub type Paths = Vec<Path>;

/// Conjunction marker emitted by the oracle at the start of each line.
const CONJUNCTION: &str = "/\\";

/// Normalize the representation of an abstract state.
///
/// Newlines become commas, conjunction markers are stripped, sequence delimiters (`<<`, `>>`)
/// become square brackets, and a stray mathematical right angle bracket becomes `>`. The transform
/// is idempotent.
pub fn canonicalize(repr: &str) -> String {
    let mut out = repr.replace('\n', ",").replace('\u{27e9}', ">");

    // Stripping one marker can join the halves of another (`//\\`)
    while out.contains(CONJUNCTION) {
        out = out.replace(CONJUNCTION, "");
    }
    out.replace(">>", "]").replace("<<", "[")
}

/// Canonicalize every state in `states`, preserving order.
pub fn canonicalize_all(states: &[TlcState]) -> Vec<TlcState> {
    states.iter().map(TlcState::canonical).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("a = 1" => "a = 1".to_string() ; "untouched")]
    #[test_case("/\\ a = 1\n/\\ b = 2" => " a = 1, b = 2".to_string() ; "conjunction lines")]
    #[test_case("log = <<1, 2>>" => "log = [1, 2]".to_string() ; "sequence")]
    #[test_case("<<<<1>>, <<>>>>" => "[[1], []]".to_string() ; "nested sequence")]
    #[test_case("x \u{27e9} y" => "x > y".to_string() ; "stray angle")]
    #[test_case("a \u{27e9}\u{27e9}" => "a ]".to_string() ; "stray angle pair")]
    #[test_case("//\\\\" => "".to_string() ; "interleaved conjunction")]
    #[test_case("" => "".to_string() ; "empty")]
    fn test_canonicalize(repr: &str) -> String {
        canonicalize(repr)
    }

    #[test]
    fn test_canonicalize_idempotent() {
        let inputs = [
            "/\\ state = (n1 :> \"leader\" @@ n2 :> \"follower\")\n/\\ log = <<<<1, 2>>>>",
            "<<<",
            ">>>",
            "<</\\<",
            ">\u{27e9}>",
            "//\\\\\n/\\",
            "\n\n",
        ];
        for input in inputs {
            let once = canonicalize(input);
            assert_eq!(canonicalize(&once), once, "input: {input:?}");
        }
    }

    #[test]
    fn test_canonical_keeps_key() {
        let state = TlcState::new(-42, "/\\ x = <<1>>");
        let canonical = state.canonical();
        assert_eq!(canonical.key, -42);
        assert_eq!(canonical.repr, " x = [1]");

        let all = canonicalize_all(&[state.clone(), TlcState::new(7, "y\nz")]);
        assert_eq!(all, vec![canonical, TlcState::new(7, "y,z")]);
    }
}
