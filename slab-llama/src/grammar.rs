//! Grammar-constrained sampling. Not a general BNF/GBNF engine: it covers
//! the two forms the sampling-parameters data model actually asks for,
//! `json_mode` and a small pipe-separated literal grammar string, both
//! expressed as a structural prefix check the sampler can mask tokens
//! against between decode steps.

#[derive(Debug, Clone)]
pub enum Grammar {
    /// Output must remain a structurally valid JSON prefix at every step.
    Json,
    /// Output must stay a prefix of one of these literal alternatives.
    Literals(Vec<String>),
}

impl Grammar {
    /// Parses a `|`-separated list of literal alternatives. There is no
    /// general grammar syntax here, so anything blank is rejected.
    pub fn parse(src: &str) -> Option<Self> {
        let src = src.trim();
        if src.is_empty() {
            return None;
        }
        let literals: Vec<String> = src.split('|').map(|s| s.trim().to_string()).collect();
        Some(Grammar::Literals(literals))
    }

    pub fn new_state(&self) -> GrammarState {
        match self {
            Grammar::Json => GrammarState::Json(JsonState::default()),
            Grammar::Literals(options) => GrammarState::Literals {
                options: options.clone(),
                matched: String::new(),
            },
        }
    }
}

#[derive(Debug, Clone, Default)]
struct JsonState {
    depth: i32,
    in_string: bool,
    escape: bool,
    started: bool,
}

impl JsonState {
    fn accepts(&self, c: char) -> bool {
        if self.escape {
            return true;
        }
        if self.in_string {
            return true;
        }
        if !self.started {
            return matches!(c, '{' | '[' | '"' | '-' | '0'..='9' | 't' | 'f' | 'n') || c.is_whitespace();
        }
        match c {
            '{' | '[' => true,
            '}' | ']' => self.depth > 0,
            '"' => true,
            ',' | ':' => self.depth > 0,
            '-' | '0'..='9' | '.' | 'e' | 'E' | '+' => true,
            // true/false/null spell out with these letters only.
            't' | 'r' | 'u' | 'f' | 'a' | 'l' | 's' | 'n' => true,
            c if c.is_whitespace() => true,
            _ => false,
        }
    }

    fn apply(&mut self, c: char) {
        if self.escape {
            self.escape = false;
            return;
        }
        if self.in_string {
            match c {
                '\\' => self.escape = true,
                '"' => self.in_string = false,
                _ => {}
            }
            return;
        }
        match c {
            '"' => self.in_string = true,
            '{' | '[' => {
                self.depth += 1;
                self.started = true;
            }
            '}' | ']' => {
                self.depth -= 1;
                self.started = true;
            }
            c if !c.is_whitespace() => self.started = true,
            _ => {}
        }
    }
}

#[derive(Debug, Clone)]
pub enum GrammarState {
    Json(JsonState),
    Literals {
        options: Vec<String>,
        matched: String,
    },
}

impl GrammarState {
    /// Would appending `text` keep the parse state valid?
    pub fn allows(&self, text: &str) -> bool {
        match self {
            GrammarState::Json(state) => {
                let mut probe = state.clone();
                for c in text.chars() {
                    if !probe.accepts(c) {
                        return false;
                    }
                    probe.apply(c);
                }
                true
            }
            GrammarState::Literals { options, matched } => {
                let candidate = format!("{matched}{text}");
                options.iter().any(|o| o.starts_with(&candidate))
            }
        }
    }

    /// Commits `text` into the parse state.
    pub fn accept(&mut self, text: &str) {
        match self {
            GrammarState::Json(state) => {
                for c in text.chars() {
                    state.apply(c);
                }
            }
            GrammarState::Literals { matched, .. } => matched.push_str(text),
        }
    }

    pub fn reset(&mut self, grammar: &Grammar) {
        *self = grammar.new_state();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_state_only_allows_opening_delimiters_before_anything_is_emitted() {
        let state = Grammar::Json.new_state();
        assert!(state.allows("{"));
        assert!(state.allows("\""));
        assert!(!state.allows("}"));
        assert!(!state.allows(","));
    }

    #[test]
    fn json_state_tracks_nesting_depth() {
        let mut state = Grammar::Json.new_state();
        state.accept("{");
        assert!(state.allows("}"));
        state.accept("}");
        if let GrammarState::Json(json) = &state {
            assert_eq!(json.depth, 0);
        }
    }

    #[test]
    fn literal_grammar_only_allows_prefixes_of_its_options() {
        let grammar = Grammar::parse("yes|no").unwrap();
        let state = grammar.new_state();
        assert!(state.allows("y"));
        assert!(state.allows("n"));
        assert!(!state.allows("m"));
    }

    #[test]
    fn literal_grammar_narrows_as_text_is_accepted() {
        let grammar = Grammar::parse("yes|no").unwrap();
        let mut state = grammar.new_state();
        state.accept("y");
        assert!(state.allows("es"));
        assert!(!state.allows("o"));
    }
}
