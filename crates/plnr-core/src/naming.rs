//! Deterministic name synthesis for registry entries

/// Counter-based name generator (`{prefix}1`, `{prefix}2`, ...)
///
/// Skips names already taken, so explicit names never collide with
/// synthesized ones. Two generators fed the same sequence of requests
/// produce the same names.
#[derive(Debug, Clone)]
pub(crate) struct NameSequence {
    prefix: String,
    next: u64,
}

impl NameSequence {
    pub(crate) fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: 1,
        }
    }

    /// Next free name; advances the counter past it
    pub(crate) fn next_free<F>(&mut self, taken: F) -> String
    where
        F: Fn(&str) -> bool,
    {
        loop {
            let candidate = format!("{}{}", self.prefix, self.next);
            self.next += 1;
            if !taken(&candidate) {
                return candidate;
            }
        }
    }

    pub(crate) fn reset(&mut self) {
        self.next = 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_names() {
        let mut seq = NameSequence::new("argset_");
        assert_eq!(seq.next_free(|_| false), "argset_1");
        assert_eq!(seq.next_free(|_| false), "argset_2");
    }

    #[test]
    fn skips_taken() {
        let mut seq = NameSequence::new("a");
        assert_eq!(seq.next_free(|n| n == "a1" || n == "a2"), "a3");
        assert_eq!(seq.next_free(|_| false), "a4");
    }

    #[test]
    fn reset_restarts() {
        let mut seq = NameSequence::new("x");
        seq.next_free(|_| false);
        seq.reset();
        assert_eq!(seq.next_free(|_| false), "x1");
    }
}
